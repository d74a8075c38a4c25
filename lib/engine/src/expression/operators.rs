//! SPARQL value semantics: numeric promotion, effective boolean values,
//! operator comparisons and the total order used by `ORDER BY`.

use oxsdatatypes::{Boolean, DateTime, Decimal, Double, Float, Integer};
use sparflow_common::ExpressionError;
use sparflow_model::vocab::xsd;
use sparflow_model::{is_unbound, Literal, Term};
use std::cmp::Ordering;

/// A numeric operand after parsing, before promotion.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Numeric {
    Integer(Integer),
    Decimal(Decimal),
    Float(Float),
    Double(Double),
}

/// A pair of numeric operands promoted to their common type.
#[derive(Debug, Clone, Copy)]
pub(crate) enum NumericPair {
    Integer(Integer, Integer),
    Decimal(Decimal, Decimal),
    Float(Float, Float),
    Double(Double, Double),
}

const INTEGER_DERIVED: [&str; 12] = [
    "http://www.w3.org/2001/XMLSchema#int",
    "http://www.w3.org/2001/XMLSchema#long",
    "http://www.w3.org/2001/XMLSchema#short",
    "http://www.w3.org/2001/XMLSchema#byte",
    "http://www.w3.org/2001/XMLSchema#unsignedInt",
    "http://www.w3.org/2001/XMLSchema#unsignedLong",
    "http://www.w3.org/2001/XMLSchema#unsignedShort",
    "http://www.w3.org/2001/XMLSchema#unsignedByte",
    "http://www.w3.org/2001/XMLSchema#positiveInteger",
    "http://www.w3.org/2001/XMLSchema#negativeInteger",
    "http://www.w3.org/2001/XMLSchema#nonPositiveInteger",
    "http://www.w3.org/2001/XMLSchema#nonNegativeInteger",
];

/// Checks whether `literal` carries a numeric datatype.
pub(crate) fn is_numeric_literal(literal: &Literal) -> bool {
    let datatype = literal.datatype();
    datatype == xsd::INTEGER
        || datatype == xsd::DECIMAL
        || datatype == xsd::FLOAT
        || datatype == xsd::DOUBLE
        || INTEGER_DERIVED.contains(&datatype.as_str())
}

/// Parses a term into a numeric value.
pub(crate) fn numeric(term: &Term) -> Result<Numeric, ExpressionError> {
    let Term::Literal(literal) = term else {
        return Err(ExpressionError::type_error(format!(
            "{term} is not a numeric literal"
        )));
    };
    let datatype = literal.datatype();
    let value = literal.value();
    let malformed = || ExpressionError::MalformedLiteral(literal.to_string());
    if datatype == xsd::INTEGER || INTEGER_DERIVED.contains(&datatype.as_str()) {
        Ok(Numeric::Integer(value.parse().map_err(|_| malformed())?))
    } else if datatype == xsd::DECIMAL {
        Ok(Numeric::Decimal(value.parse().map_err(|_| malformed())?))
    } else if datatype == xsd::FLOAT {
        Ok(Numeric::Float(value.parse().map_err(|_| malformed())?))
    } else if datatype == xsd::DOUBLE {
        Ok(Numeric::Double(value.parse().map_err(|_| malformed())?))
    } else {
        Err(ExpressionError::type_error(format!(
            "{term} is not a numeric literal"
        )))
    }
}

/// Promotes two numerics to their common type, per the XPath promotion rules.
pub(crate) fn promote(a: Numeric, b: Numeric) -> NumericPair {
    use Numeric::{Decimal as De, Double as Do, Float as Fl, Integer as In};
    match (a, b) {
        (In(a), In(b)) => NumericPair::Integer(a, b),
        (In(a), De(b)) => NumericPair::Decimal(a.into(), b),
        (De(a), In(b)) => NumericPair::Decimal(a, b.into()),
        (De(a), De(b)) => NumericPair::Decimal(a, b),
        (In(a), Fl(b)) => NumericPair::Float(a.into(), b),
        (Fl(a), In(b)) => NumericPair::Float(a, b.into()),
        (De(a), Fl(b)) => NumericPair::Float(a.into(), b),
        (Fl(a), De(b)) => NumericPair::Float(a, b.into()),
        (Fl(a), Fl(b)) => NumericPair::Float(a, b),
        (In(a), Do(b)) => NumericPair::Double(a.into(), b),
        (Do(a), In(b)) => NumericPair::Double(a, b.into()),
        (De(a), Do(b)) => NumericPair::Double(a.into(), b),
        (Do(a), De(b)) => NumericPair::Double(a, b.into()),
        (Fl(a), Do(b)) => NumericPair::Double(a.into(), b),
        (Do(a), Fl(b)) => NumericPair::Double(a, b.into()),
        (Do(a), Do(b)) => NumericPair::Double(a, b),
    }
}

/// Converts a numeric value back into its canonical literal.
pub(crate) fn numeric_term(value: Numeric) -> Term {
    match value {
        Numeric::Integer(v) => Literal::new_typed_literal(v.to_string(), xsd::INTEGER).into(),
        Numeric::Decimal(v) => Literal::new_typed_literal(v.to_string(), xsd::DECIMAL).into(),
        Numeric::Float(v) => Literal::new_typed_literal(v.to_string(), xsd::FLOAT).into(),
        Numeric::Double(v) => Literal::new_typed_literal(v.to_string(), xsd::DOUBLE).into(),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum ArithOp {
    Add,
    Subtract,
    Multiply,
    Divide,
}

/// Applies an arithmetic operator with numeric promotion.
///
/// Dividing two integers produces a decimal, per the XPath `op:numeric-divide`
/// rules. Integer overflow and decimal division by zero are errors.
pub(crate) fn arithmetic(op: ArithOp, a: &Term, b: &Term) -> Result<Term, ExpressionError> {
    let a = numeric(a)?;
    let b = numeric(b)?;
    let pair = if matches!(op, ArithOp::Divide) {
        // Integer division yields a decimal.
        match promote(a, b) {
            NumericPair::Integer(a, b) => NumericPair::Decimal(a.into(), b.into()),
            other => other,
        }
    } else {
        promote(a, b)
    };

    let overflow = || ExpressionError::type_error("numeric operation overflowed");
    let result = match pair {
        NumericPair::Integer(a, b) => Numeric::Integer(
            match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Subtract => a.checked_sub(b),
                ArithOp::Multiply => a.checked_mul(b),
                ArithOp::Divide => a.checked_div(b),
            }
            .ok_or_else(overflow)?,
        ),
        NumericPair::Decimal(a, b) => Numeric::Decimal(
            match op {
                ArithOp::Add => a.checked_add(b),
                ArithOp::Subtract => a.checked_sub(b),
                ArithOp::Multiply => a.checked_mul(b),
                ArithOp::Divide => a.checked_div(b),
            }
            .ok_or_else(overflow)?,
        ),
        NumericPair::Float(a, b) => Numeric::Float(match op {
            ArithOp::Add => a + b,
            ArithOp::Subtract => a - b,
            ArithOp::Multiply => a * b,
            ArithOp::Divide => a / b,
        }),
        NumericPair::Double(a, b) => Numeric::Double(match op {
            ArithOp::Add => a + b,
            ArithOp::Subtract => a - b,
            ArithOp::Multiply => a * b,
            ArithOp::Divide => a / b,
        }),
    };
    Ok(numeric_term(result))
}

/// The effective boolean value of a term, per SPARQL 17.2.2.
pub(crate) fn effective_boolean_value(term: &Term) -> Result<bool, ExpressionError> {
    let Term::Literal(literal) = term else {
        return Err(ExpressionError::type_error(format!("{term} has no effective boolean value")));
    };
    let datatype = literal.datatype();
    if datatype == xsd::BOOLEAN {
        let value: Boolean = literal
            .value()
            .parse()
            .map_err(|_| ExpressionError::MalformedLiteral(literal.to_string()))?;
        return Ok(value.into());
    }
    if datatype == xsd::STRING || literal.language().is_some() {
        return Ok(!literal.value().is_empty());
    }
    if is_numeric_literal(literal) {
        return match numeric(term)? {
            Numeric::Integer(v) => Ok(v != Integer::from(0_i64)),
            Numeric::Decimal(v) => Ok(v != Decimal::from(0_i64)),
            Numeric::Float(v) => Ok(!(v.is_nan() || v == Float::from(0_f32))),
            Numeric::Double(v) => Ok(!(v.is_nan() || v == Double::from(0_f64))),
        };
    }
    Err(ExpressionError::type_error(format!(
        "{term} has no effective boolean value"
    )))
}

/// Value comparison of two terms, used by `<`, `<=`, `>` and `>=`.
///
/// Comparable domains are numerics, booleans, strings and `xsd:dateTime`.
/// Everything else is a type error, which excludes the solution in `FILTER`.
pub(crate) fn compare(a: &Term, b: &Term) -> Result<Ordering, ExpressionError> {
    let incomparable =
        || ExpressionError::type_error(format!("{a} and {b} are not comparable"));
    let (Term::Literal(la), Term::Literal(lb)) = (a, b) else {
        return Err(incomparable());
    };

    if is_numeric_literal(la) && is_numeric_literal(lb) {
        let ordering = match promote(numeric(a)?, numeric(b)?) {
            NumericPair::Integer(a, b) => a.partial_cmp(&b),
            NumericPair::Decimal(a, b) => a.partial_cmp(&b),
            NumericPair::Float(a, b) => a.partial_cmp(&b),
            NumericPair::Double(a, b) => a.partial_cmp(&b),
        };
        return ordering.ok_or_else(incomparable);
    }

    let string_like =
        |l: &Literal| l.datatype() == xsd::STRING && l.language().is_none();
    if string_like(la) && string_like(lb) {
        return Ok(la.value().cmp(lb.value()));
    }

    if la.datatype() == xsd::BOOLEAN && lb.datatype() == xsd::BOOLEAN {
        let a: Boolean = la.value().parse().map_err(|_| incomparable())?;
        let b: Boolean = lb.value().parse().map_err(|_| incomparable())?;
        return bool::from(a).partial_cmp(&b.into()).ok_or_else(incomparable);
    }

    if la.datatype() == xsd::DATE_TIME && lb.datatype() == xsd::DATE_TIME {
        let a: DateTime = la.value().parse().map_err(|_| incomparable())?;
        let b: DateTime = lb.value().parse().map_err(|_| incomparable())?;
        return a.partial_cmp(&b).ok_or_else(incomparable);
    }

    Err(incomparable())
}

/// The `=` operator: term equality first, value equality for literals.
pub(crate) fn equals(a: &Term, b: &Term) -> Result<bool, ExpressionError> {
    if a == b {
        return Ok(true);
    }
    match (a, b) {
        (Term::Literal(_), Term::Literal(_)) => match compare(a, b) {
            Ok(ordering) => Ok(ordering == Ordering::Equal),
            // Two distinct terms of an uncomparable datatype: unknown, error.
            Err(e) => Err(e),
        },
        _ => Ok(false),
    }
}

/// The total order on optional terms used by `ORDER BY`, per SPARQL 15.1:
/// unbound first, then blank nodes, IRIs and literals.
///
/// Unlike [`compare`] this order never fails; incomparable literals fall back
/// to their canonical text.
pub fn order_terms(a: Option<&Term>, b: Option<&Term>) -> Ordering {
    let rank = |term: Option<&Term>| match term {
        None => 0,
        Some(term) if is_unbound(term.as_ref()) => 0,
        Some(Term::BlankNode(_)) => 1,
        Some(Term::NamedNode(_)) => 2,
        Some(Term::Literal(_)) => 3,
    };
    match rank(a).cmp(&rank(b)) {
        Ordering::Equal => {}
        other => return other,
    }
    match (a, b) {
        (Some(a), Some(b)) => {
            if let Ok(ordering) = compare(a, b) {
                ordering
            } else {
                a.to_string().cmp(&b.to_string())
            }
        }
        _ => Ordering::Equal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sparflow_model::NamedNode;

    fn int(v: i64) -> Term {
        Literal::new_typed_literal(v.to_string(), xsd::INTEGER).into()
    }

    fn dbl(v: &str) -> Term {
        Literal::new_typed_literal(v, xsd::DOUBLE).into()
    }

    #[test]
    fn integer_division_yields_decimal() {
        let result = arithmetic(ArithOp::Divide, &int(7), &int(2)).unwrap();
        let Term::Literal(literal) = result else {
            panic!("expected a literal")
        };
        assert_eq!(literal.datatype(), xsd::DECIMAL);
        assert_eq!(literal.value(), "3.5");
    }

    #[test]
    fn mixed_arithmetic_promotes() {
        let result = arithmetic(ArithOp::Add, &int(1), &dbl("2.5")).unwrap();
        let Term::Literal(literal) = result else {
            panic!("expected a literal")
        };
        assert_eq!(literal.datatype(), xsd::DOUBLE);
    }

    #[test]
    fn numeric_equality_across_types() {
        assert!(equals(&int(2), &dbl("2")).unwrap());
        assert!(!equals(&int(2), &dbl("2.5")).unwrap());
    }

    #[test]
    fn ebv_of_strings_and_numbers() {
        assert!(effective_boolean_value(&Literal::new_simple_literal("x").into()).unwrap());
        assert!(!effective_boolean_value(&Literal::new_simple_literal("").into()).unwrap());
        assert!(!effective_boolean_value(&int(0)).unwrap());
        assert!(effective_boolean_value(&int(3)).unwrap());
        assert!(
            effective_boolean_value(&NamedNode::new_unchecked("http://example.com").into())
                .is_err()
        );
    }

    #[test]
    fn order_is_total() {
        let blank = Term::BlankNode(sparflow_model::BlankNode::new_unchecked("b0"));
        let iri: Term = NamedNode::new_unchecked("http://example.com").into();
        assert_eq!(order_terms(None, Some(&blank)), Ordering::Less);
        assert_eq!(order_terms(Some(&blank), Some(&iri)), Ordering::Less);
        assert_eq!(order_terms(Some(&iri), Some(&int(1))), Ordering::Less);
        assert_eq!(order_terms(Some(&int(2)), Some(&int(10))), Ordering::Less);
    }
}
