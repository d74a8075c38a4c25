use crate::Bindings;
use oxrdf::{Term, Variable};
use rustc_hash::{FxHashMap, FxHashSet};

/// A group of solutions produced by `GROUP BY`.
///
/// The group holds its key (the bindings of the grouping variables) and, for
/// every variable bound in at least one member solution, the list of terms
/// collected in input order. Aggregate expressions are evaluated against this
/// type instead of a plain [`Bindings`], which makes "aggregate outside of a
/// group" a type-level impossibility inside the engine.
#[derive(Debug, Clone, Default)]
pub struct SolutionGroup {
    key: Bindings,
    columns: FxHashMap<Variable, Vec<Term>>,
    seen: FxHashSet<String>,
    len: usize,
}

impl SolutionGroup {
    /// Creates an empty group with the given grouping key.
    pub fn new(key: Bindings) -> Self {
        Self {
            key,
            columns: FxHashMap::default(),
            seen: FxHashSet::default(),
            len: 0,
        }
    }

    /// The bindings of the grouping variables.
    pub fn key(&self) -> &Bindings {
        &self.key
    }

    /// The number of solutions collected into this group.
    ///
    /// `COUNT(*)` reports this number, which may exceed the length of any
    /// single column when solutions bind different variable sets.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Checks whether no solution has been collected.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The number of distinct solutions collected, for `COUNT(DISTINCT *)`.
    pub fn distinct_len(&self) -> usize {
        self.seen.len()
    }

    /// Collects one solution into the group.
    pub fn push(&mut self, solution: &Bindings) {
        self.len += 1;
        self.seen.insert(solution.canonical_form());
        for (variable, term) in solution.iter() {
            self.columns
                .entry(variable.clone())
                .or_default()
                .push(term.clone());
        }
    }

    /// Appends a term to the column of `variable` without counting a
    /// solution. Used for per-row aggregate inputs.
    pub fn push_term(&mut self, variable: Variable, term: Term) {
        self.columns.entry(variable).or_default().push(term);
    }

    /// Counts a solution without collecting its bindings.
    pub fn record_row(&mut self, solution: &Bindings) {
        self.len += 1;
        self.seen.insert(solution.canonical_form());
    }

    /// The terms collected for `variable`, in input order.
    pub fn column(&self, variable: &Variable) -> &[Term] {
        self.columns.get(variable).map_or(&[], Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxrdf::NamedNode;

    #[test]
    fn collects_columns_in_input_order() {
        let x = Variable::new_unchecked("x");
        let y = Variable::new_unchecked("y");
        let mut group = SolutionGroup::new(Bindings::new());

        for i in 0..3 {
            let mut solution = Bindings::new();
            solution.insert(
                x.clone(),
                NamedNode::new_unchecked(format!("http://example.com/{i}")).into(),
            );
            if i == 1 {
                solution.insert(y.clone(), NamedNode::new_unchecked("http://example.com/y").into());
            }
            group.push(&solution);
        }

        assert_eq!(group.len(), 3);
        assert_eq!(group.column(&x).len(), 3);
        assert_eq!(group.column(&y).len(), 1);
        assert_eq!(
            group.column(&x)[2],
            NamedNode::new_unchecked("http://example.com/2").into()
        );
    }
}
