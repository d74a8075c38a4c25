//! The built-in scalar functions of SPARQL 1.1.

use super::operators::{self, Numeric};
use md5::{Digest, Md5};
use oxsdatatypes::DateTime;
use regex::{Regex, RegexBuilder};
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};
use sparflow_common::ExpressionError;
use sparflow_model::vocab::xsd;
use sparflow_model::{BlankNode, Iri, Literal, NamedNode, Term};
use spargebra::algebra::Function;
use std::fmt::Write;

/// Evaluates a built-in function over already-evaluated arguments.
pub(super) fn evaluate(
    function: &Function,
    args: &[Term],
    base_iri: Option<&Iri<String>>,
) -> Result<Term, ExpressionError> {
    match function {
        Function::Str => {
            let value = match arg(args, 0)? {
                Term::NamedNode(node) => node.as_str().to_owned(),
                Term::Literal(literal) => literal.value().to_owned(),
                term => {
                    return Err(ExpressionError::type_error(format!("STR({term}) is undefined")))
                }
            };
            Ok(Literal::new_simple_literal(value).into())
        }
        Function::Lang => {
            let literal = literal_arg(args, 0)?;
            Ok(Literal::new_simple_literal(literal.language().unwrap_or_default()).into())
        }
        Function::LangMatches => {
            let tag = plain_arg(args, 0)?.to_lowercase();
            let range = plain_arg(args, 1)?.to_lowercase();
            let matched = if range == "*" {
                !tag.is_empty()
            } else {
                tag == range || tag.starts_with(&format!("{range}-"))
            };
            Ok(super::bool_term(matched))
        }
        Function::Datatype => {
            let literal = literal_arg(args, 0)?;
            Ok(literal.datatype().into_owned().into())
        }
        Function::Iri => match arg(args, 0)? {
            Term::NamedNode(node) => Ok(node.clone().into()),
            Term::Literal(literal) => {
                let value = literal.value();
                let resolved = match base_iri {
                    Some(base) => base
                        .resolve(value)
                        .map_err(|e| ExpressionError::type_error(e.to_string()))?
                        .into_inner(),
                    None => Iri::parse(value.to_owned())
                        .map_err(|e| ExpressionError::type_error(e.to_string()))?
                        .into_inner(),
                };
                Ok(NamedNode::new_unchecked(resolved).into())
            }
            term => Err(ExpressionError::type_error(format!("IRI({term}) is undefined"))),
        },
        Function::BNode => match args.first() {
            None => Ok(BlankNode::default().into()),
            Some(_) => {
                let value = plain_arg(args, 0)?;
                BlankNode::new(value)
                    .map(Into::into)
                    .map_err(|e| ExpressionError::type_error(e.to_string()))
            }
        },
        Function::Rand => {
            let value: f64 = rand::random();
            Ok(Literal::new_typed_literal(value.to_string(), xsd::DOUBLE).into())
        }
        Function::Abs => numeric_unary(args, |n| match n {
            Numeric::Integer(v) => v
                .checked_abs()
                .map(Numeric::Integer)
                .ok_or_else(|| ExpressionError::type_error("integer overflow")),
            Numeric::Decimal(v) => v
                .checked_abs()
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("decimal overflow")),
            Numeric::Float(v) => Ok(Numeric::Float(v.abs())),
            Numeric::Double(v) => Ok(Numeric::Double(v.abs())),
        }),
        Function::Ceil => numeric_unary(args, |n| match n {
            Numeric::Decimal(v) => v
                .checked_ceil()
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("decimal overflow")),
            Numeric::Float(v) => Ok(Numeric::Float(v.ceil())),
            Numeric::Double(v) => Ok(Numeric::Double(v.ceil())),
            n @ Numeric::Integer(_) => Ok(n),
        }),
        Function::Floor => numeric_unary(args, |n| match n {
            Numeric::Decimal(v) => v
                .checked_floor()
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("decimal overflow")),
            Numeric::Float(v) => Ok(Numeric::Float(v.floor())),
            Numeric::Double(v) => Ok(Numeric::Double(v.floor())),
            n @ Numeric::Integer(_) => Ok(n),
        }),
        Function::Round => numeric_unary(args, |n| match n {
            Numeric::Decimal(v) => v
                .checked_round()
                .map(Numeric::Decimal)
                .ok_or_else(|| ExpressionError::type_error("decimal overflow")),
            Numeric::Float(v) => Ok(Numeric::Float(v.round())),
            Numeric::Double(v) => Ok(Numeric::Double(v.round())),
            n @ Numeric::Integer(_) => Ok(n),
        }),
        Function::Concat => {
            let mut value = String::new();
            let mut lang: Option<Option<String>> = None;
            for term in args {
                let (part, part_lang) = string_arg(term)?;
                value.push_str(&part);
                // The result keeps a language tag only if all parts agree.
                match &lang {
                    None => lang = Some(part_lang),
                    Some(current) if *current == part_lang => {}
                    Some(_) => lang = Some(None),
                }
            }
            string_term(value, lang.flatten().as_deref())
        }
        Function::SubStr => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            let start = integer_arg(args, 1)?;
            let length = match args.get(2) {
                Some(_) => Some(integer_arg(args, 2)?),
                None => None,
            };

            // XPath substring is 1-based and counts characters.
            let start = usize::try_from(start.max(1) - 1)
                .map_err(|_| ExpressionError::type_error("SUBSTR start out of range"))?;
            let chars = value.chars().skip(start);
            let value: String = match length {
                Some(length) => {
                    let length = usize::try_from(length.max(0))
                        .map_err(|_| ExpressionError::type_error("SUBSTR length out of range"))?;
                    chars.take(length).collect()
                }
                None => chars.collect(),
            };
            string_term(value, lang.as_deref())
        }
        Function::StrLen => {
            let (value, _) = string_arg(arg(args, 0)?)?;
            Ok(int_term(i64::try_from(value.chars().count()).unwrap_or(i64::MAX)))
        }
        Function::Replace => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            let pattern = plain_arg(args, 1)?;
            let replacement = plain_arg(args, 2)?;
            let flags = args.get(3).map(|_| plain_arg(args, 3)).transpose()?;
            let regex = build_regex(&pattern, flags.as_deref())?;
            let replaced = regex.replace_all(&value, replacement.as_str()).into_owned();
            string_term(replaced, lang.as_deref())
        }
        Function::UCase => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            string_term(value.to_uppercase(), lang.as_deref())
        }
        Function::LCase => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            string_term(value.to_lowercase(), lang.as_deref())
        }
        Function::EncodeForUri => {
            let (value, _) = string_arg(arg(args, 0)?)?;
            let mut encoded = String::with_capacity(value.len());
            for byte in value.bytes() {
                match byte {
                    b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                        encoded.push(char::from(byte));
                    }
                    _ => {
                        // The write cannot fail on a String.
                        let _ = write!(encoded, "%{byte:02X}");
                    }
                }
            }
            Ok(Literal::new_simple_literal(encoded).into())
        }
        Function::Contains => {
            let (haystack, needle) = compatible_string_pair(args)?;
            Ok(super::bool_term(haystack.contains(&needle)))
        }
        Function::StrStarts => {
            let (haystack, needle) = compatible_string_pair(args)?;
            Ok(super::bool_term(haystack.starts_with(&needle)))
        }
        Function::StrEnds => {
            let (haystack, needle) = compatible_string_pair(args)?;
            Ok(super::bool_term(haystack.ends_with(&needle)))
        }
        Function::StrBefore => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            let (needle, _) = string_arg(arg(args, 1)?)?;
            match value.find(&needle) {
                Some(position) => string_term(value[..position].to_owned(), lang.as_deref()),
                None => Ok(Literal::new_simple_literal("").into()),
            }
        }
        Function::StrAfter => {
            let (value, lang) = string_arg(arg(args, 0)?)?;
            let (needle, _) = string_arg(arg(args, 1)?)?;
            match value.find(&needle) {
                Some(position) => {
                    string_term(value[position + needle.len()..].to_owned(), lang.as_deref())
                }
                None => Ok(Literal::new_simple_literal("").into()),
            }
        }
        Function::Year => Ok(int_term(date_time_arg(args)?.year())),
        Function::Month => Ok(int_term(i64::from(date_time_arg(args)?.month()))),
        Function::Day => Ok(int_term(i64::from(date_time_arg(args)?.day()))),
        Function::Hours => Ok(int_term(i64::from(date_time_arg(args)?.hour()))),
        Function::Minutes => Ok(int_term(i64::from(date_time_arg(args)?.minute()))),
        Function::Seconds => {
            let seconds = date_time_arg(args)?.second();
            Ok(Literal::new_typed_literal(seconds.to_string(), xsd::DECIMAL).into())
        }
        Function::Timezone => {
            let literal = literal_arg(args, 0)?;
            let offset = timezone_suffix(literal.value()).ok_or_else(|| {
                ExpressionError::type_error("the dateTime carries no timezone")
            })?;
            Ok(Literal::new_typed_literal(
                offset_to_duration(&offset)?,
                xsd::DAY_TIME_DURATION,
            )
            .into())
        }
        Function::Tz => {
            let literal = literal_arg(args, 0)?;
            Ok(Literal::new_simple_literal(timezone_suffix(literal.value()).unwrap_or_default())
                .into())
        }
        Function::Now => {
            let now = DateTime::now();
            Ok(Literal::new_typed_literal(now.to_string(), xsd::DATE_TIME).into())
        }
        Function::Uuid => {
            Ok(NamedNode::new_unchecked(format!("urn:uuid:{}", uuid::Uuid::new_v4())).into())
        }
        Function::StrUuid => {
            Ok(Literal::new_simple_literal(uuid::Uuid::new_v4().to_string()).into())
        }
        Function::Md5 => hash_arg(args, |bytes| hex::encode(Md5::digest(bytes))),
        Function::Sha1 => hash_arg(args, |bytes| hex::encode(Sha1::digest(bytes))),
        Function::Sha256 => hash_arg(args, |bytes| hex::encode(Sha256::digest(bytes))),
        Function::Sha384 => hash_arg(args, |bytes| hex::encode(Sha384::digest(bytes))),
        Function::Sha512 => hash_arg(args, |bytes| hex::encode(Sha512::digest(bytes))),
        Function::StrLang => {
            let lexical = plain_arg(args, 0)?;
            let lang = plain_arg(args, 1)?;
            Literal::new_language_tagged_literal(lexical, lang.to_lowercase())
                .map(Into::into)
                .map_err(|e| ExpressionError::type_error(e.to_string()))
        }
        Function::StrDt => {
            let lexical = plain_arg(args, 0)?;
            match arg(args, 1)? {
                Term::NamedNode(datatype) => {
                    Ok(Literal::new_typed_literal(lexical, datatype.clone()).into())
                }
                term => Err(ExpressionError::type_error(format!(
                    "STRDT expects an IRI datatype, got {term}"
                ))),
            }
        }
        Function::IsIri => Ok(super::bool_term(matches!(arg(args, 0)?, Term::NamedNode(_)))),
        Function::IsBlank => Ok(super::bool_term(matches!(arg(args, 0)?, Term::BlankNode(_)))),
        Function::IsLiteral => Ok(super::bool_term(matches!(arg(args, 0)?, Term::Literal(_)))),
        Function::IsNumeric => Ok(super::bool_term(match arg(args, 0)? {
            Term::Literal(literal) => operators::is_numeric_literal(literal),
            _ => false,
        })),
        Function::Regex => {
            let (value, _) = string_arg(arg(args, 0)?)?;
            let pattern = plain_arg(args, 1)?;
            let flags = args.get(2).map(|_| plain_arg(args, 2)).transpose()?;
            let regex = build_regex(&pattern, flags.as_deref())?;
            Ok(super::bool_term(regex.is_match(&value)))
        }
        Function::Custom(name) => {
            // Custom functions are resolved at compile time; reaching this
            // arm indicates a compiler bug.
            Err(ExpressionError::FunctionFailure(name.clone()))
        }
        function => Err(ExpressionError::type_error(format!(
            "the function {function:?} is not supported"
        ))),
    }
}

fn arg(args: &[Term], index: usize) -> Result<&Term, ExpressionError> {
    args.get(index)
        .ok_or_else(|| ExpressionError::type_error(format!("missing argument {index}")))
}

fn literal_arg(args: &[Term], index: usize) -> Result<&Literal, ExpressionError> {
    match arg(args, index)? {
        Term::Literal(literal) => Ok(literal),
        term => Err(ExpressionError::type_error(format!("{term} is not a literal"))),
    }
}

/// A string-ish argument: its value together with its language tag.
fn string_arg(term: &Term) -> Result<(String, Option<String>), ExpressionError> {
    match term {
        Term::Literal(literal)
            if literal.datatype() == xsd::STRING || literal.language().is_some() =>
        {
            Ok((
                literal.value().to_owned(),
                literal.language().map(ToOwned::to_owned),
            ))
        }
        term => Err(ExpressionError::type_error(format!("{term} is not a string literal"))),
    }
}

/// A plain string argument where language tags are not allowed to matter.
fn plain_arg(args: &[Term], index: usize) -> Result<String, ExpressionError> {
    Ok(string_arg(arg(args, index)?)?.0)
}

/// Two string arguments whose language tags must be compatible.
fn compatible_string_pair(args: &[Term]) -> Result<(String, String), ExpressionError> {
    let (a, a_lang) = string_arg(arg(args, 0)?)?;
    let (b, b_lang) = string_arg(arg(args, 1)?)?;
    match (&a_lang, &b_lang) {
        (_, None) => Ok((a, b)),
        (Some(al), Some(bl)) if al == bl => Ok((a, b)),
        _ => Err(ExpressionError::type_error(
            "incompatible language tags in string arguments",
        )),
    }
}

fn integer_arg(args: &[Term], index: usize) -> Result<i64, ExpressionError> {
    match operators::numeric(arg(args, index)?)? {
        Numeric::Integer(v) => Ok(v.into()),
        _ => Err(ExpressionError::type_error("expected an integer argument")),
    }
}

fn date_time_arg(args: &[Term]) -> Result<DateTime, ExpressionError> {
    let literal = literal_arg(args, 0)?;
    if literal.datatype() != xsd::DATE_TIME {
        return Err(ExpressionError::type_error(format!(
            "{literal} is not an xsd:dateTime"
        )));
    }
    literal
        .value()
        .parse()
        .map_err(|_| ExpressionError::MalformedLiteral(literal.to_string()))
}

fn numeric_unary(
    args: &[Term],
    f: impl FnOnce(Numeric) -> Result<Numeric, ExpressionError>,
) -> Result<Term, ExpressionError> {
    let value = operators::numeric(arg(args, 0)?)?;
    Ok(operators::numeric_term(f(value)?))
}

fn hash_arg(args: &[Term], hash: impl FnOnce(&[u8]) -> String) -> Result<Term, ExpressionError> {
    let value = plain_arg(args, 0)?;
    Ok(Literal::new_simple_literal(hash(value.as_bytes())).into())
}

fn string_term(value: String, lang: Option<&str>) -> Result<Term, ExpressionError> {
    match lang {
        Some(lang) => Literal::new_language_tagged_literal(value, lang)
            .map(Into::into)
            .map_err(|e| ExpressionError::type_error(e.to_string())),
        None => Ok(Literal::new_simple_literal(value).into()),
    }
}

fn int_term(value: i64) -> Term {
    Literal::new_typed_literal(value.to_string(), xsd::INTEGER).into()
}

fn build_regex(pattern: &str, flags: Option<&str>) -> Result<Regex, ExpressionError> {
    let flags = flags.unwrap_or_default();
    let pattern = if flags.contains('q') {
        regex::escape(pattern)
    } else {
        pattern.to_owned()
    };
    let mut builder = RegexBuilder::new(&pattern);
    for flag in flags.chars() {
        match flag {
            'i' => {
                builder.case_insensitive(true);
            }
            's' => {
                builder.dot_matches_new_line(true);
            }
            'm' => {
                builder.multi_line(true);
            }
            'x' => {
                builder.ignore_whitespace(true);
            }
            'q' => {}
            other => {
                return Err(ExpressionError::type_error(format!(
                    "unsupported regex flag {other}"
                )))
            }
        }
    }
    builder
        .build()
        .map_err(|e| ExpressionError::type_error(e.to_string()))
}

/// The timezone suffix of a `xsd:dateTime` lexical form, if any.
fn timezone_suffix(lexical: &str) -> Option<String> {
    if lexical.ends_with('Z') {
        return Some("Z".to_owned());
    }
    // The offset, when present, is always the last 6 characters: ±HH:MM.
    let suffix = lexical.len().checked_sub(6).and_then(|at| lexical.get(at..))?;
    let bytes = suffix.as_bytes();
    if (bytes[0] == b'+' || bytes[0] == b'-') && bytes[3] == b':' {
        return Some(suffix.to_owned());
    }
    None
}

/// Converts a timezone offset (`Z` or `±HH:MM`) into an
/// `xsd:dayTimeDuration` lexical form.
fn offset_to_duration(offset: &str) -> Result<String, ExpressionError> {
    if offset == "Z" {
        return Ok("PT0S".to_owned());
    }
    let malformed = || ExpressionError::type_error("malformed timezone offset");
    let sign = if offset.starts_with('-') { "-" } else { "" };
    let hours: u32 = offset[1..3].parse().map_err(|_| malformed())?;
    let minutes: u32 = offset[4..6].parse().map_err(|_| malformed())?;
    let mut duration = format!("{sign}PT");
    if hours > 0 {
        let _ = write!(duration, "{hours}H");
    }
    if minutes > 0 {
        let _ = write!(duration, "{minutes}M");
    }
    if hours == 0 && minutes == 0 {
        duration.push_str("0S");
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(value: &str) -> Term {
        Literal::new_simple_literal(value).into()
    }

    fn lang_string(value: &str, lang: &str) -> Term {
        Literal::new_language_tagged_literal_unchecked(value, lang).into()
    }

    #[test]
    fn substr_is_one_based() {
        let result = evaluate(
            &Function::SubStr,
            &[string("foobar"), int_term(4)],
            None,
        )
        .unwrap();
        assert_eq!(result, string("bar"));
    }

    #[test]
    fn ucase_preserves_language() {
        let result = evaluate(&Function::UCase, &[lang_string("foo", "en")], None).unwrap();
        assert_eq!(result, lang_string("FOO", "en"));
    }

    #[test]
    fn regex_flags() {
        let matched = evaluate(
            &Function::Regex,
            &[string("Thomas"), string("^thomas$"), string("i")],
            None,
        )
        .unwrap();
        assert_eq!(matched, Literal::from(true).into());
    }

    #[test]
    fn strbefore_missing_needle_is_empty() {
        let result =
            evaluate(&Function::StrBefore, &[string("abc"), string("z")], None).unwrap();
        assert_eq!(result, string(""));
    }

    #[test]
    fn timezone_parsing() {
        assert_eq!(timezone_suffix("2011-01-10T14:45:13.815-05:00").unwrap(), "-05:00");
        assert_eq!(timezone_suffix("2011-01-10T14:45:13Z").unwrap(), "Z");
        assert!(timezone_suffix("2011-01-10T14:45:13").is_none());
        assert_eq!(offset_to_duration("-05:00").unwrap(), "-PT5H");
        assert_eq!(offset_to_duration("+05:30").unwrap(), "PT5H30M");
    }

    #[test]
    fn encode_for_uri_escapes() {
        let result =
            evaluate(&Function::EncodeForUri, &[string("Los Angeles")], None).unwrap();
        assert_eq!(result, string("Los%20Angeles"));
    }
}
