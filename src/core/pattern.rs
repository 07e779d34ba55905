use super::binding::Binding;
use super::term::{Term, Tuple, Variable};
use std::collections::BTreeSet;
use std::fmt;

/// One position of a tuple pattern.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Slot {
    Variable(Variable),
    Constant(Term),
}

impl Slot {
    pub fn var(name: &str) -> Self {
        Slot::Variable(Variable::new(name))
    }

    pub fn constant(value: &str) -> Self {
        Slot::Constant(Term::new(value))
    }

    pub fn is_constant(&self) -> bool {
        matches!(self, Slot::Constant(_))
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Variable(v) => write!(f, "{}", v),
            Slot::Constant(t) => write!(f, "{}", t),
        }
    }
}

/// One edge of a basic graph pattern: an ordered sequence of slots.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub struct TuplePattern {
    slots: Vec<Slot>,
}

impl TuplePattern {
    pub fn new(slots: Vec<Slot>) -> Self {
        Self { slots }
    }

    /// Builds a triple pattern from `?var` / constant shorthand strings.
    pub fn parse_triple(subject: &str, predicate: &str, object: &str) -> Self {
        Self::new(vec![shorthand(subject), shorthand(predicate), shorthand(object)])
    }

    pub fn arity(&self) -> usize {
        self.slots.len()
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    /// Bit mask of the positions holding constants.
    pub fn constant_mask(&self) -> u32 {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_constant())
            .fold(0u32, |mask, (i, _)| mask | (1 << i))
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.slots
            .iter()
            .filter_map(|slot| match slot {
                Slot::Variable(v) => Some(v.clone()),
                Slot::Constant(_) => None,
            })
            .collect()
    }

    /// Matches a concrete tuple against this pattern.
    ///
    /// Returns `None` when the arity differs, a constant differs, or a variable
    /// occurring twice would bind two different terms (`?x ?p ?x`).
    pub fn match_tuple(&self, tuple: &Tuple) -> Option<Binding> {
        if tuple.arity() != self.arity() {
            return None;
        }
        let mut binding = Binding::new();
        for (slot, term) in self.slots.iter().zip(tuple.terms()) {
            match slot {
                Slot::Constant(constant) => {
                    if constant != term {
                        return None;
                    }
                }
                Slot::Variable(variable) => {
                    if let Some(bound) = binding.get(variable) {
                        if bound != term {
                            return None;
                        }
                    } else {
                        binding.insert(variable.clone(), term.clone());
                    }
                }
            }
        }
        Some(binding)
    }

    /// Replaces variables with their bound terms. `None` if any variable is unbound.
    pub fn instantiate(&self, binding: &Binding) -> Option<Tuple> {
        self.slots
            .iter()
            .map(|slot| match slot {
                Slot::Constant(term) => Some(term.clone()),
                Slot::Variable(v) => binding.get(v).cloned(),
            })
            .collect::<Option<Vec<_>>>()
            .map(Tuple::new)
    }
}

impl fmt::Display for TuplePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, slot) in self.slots.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", slot)?;
        }
        Ok(())
    }
}

fn shorthand(value: &str) -> Slot {
    if value.starts_with('?') || value.starts_with('$') {
        Slot::var(value)
    } else {
        Slot::constant(value)
    }
}

/// Ordered set of tuple patterns forming one query body.
#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct GraphPattern {
    patterns: Vec<TuplePattern>,
}

impl GraphPattern {
    pub fn new(patterns: Vec<TuplePattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[TuplePattern] {
        &self.patterns
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn variables(&self) -> BTreeSet<Variable> {
        self.patterns.iter().flat_map(TuplePattern::variables).collect()
    }
}

impl FromIterator<TuplePattern> for GraphPattern {
    fn from_iter<I: IntoIterator<Item = TuplePattern>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

/// Subset of a query's tuple patterns, as a bit mask over pattern indices.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, PartialOrd, Ord)]
pub struct PatternSet(u64);

impl PatternSet {
    pub const MAX_PATTERNS: usize = 64;

    pub fn single(index: usize) -> Self {
        PatternSet(1u64 << index)
    }

    pub fn full(len: usize) -> Self {
        if len >= Self::MAX_PATTERNS {
            PatternSet(u64::MAX)
        } else {
            PatternSet((1u64 << len) - 1)
        }
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, index: usize) -> bool {
        self.0 & (1u64 << index) != 0
    }

    pub fn is_disjoint(self, other: PatternSet) -> bool {
        self.0 & other.0 == 0
    }

    pub fn union(self, other: PatternSet) -> PatternSet {
        PatternSet(self.0 | other.0)
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn indices(self) -> impl Iterator<Item = usize> {
        (0..Self::MAX_PATTERNS).filter(move |i| self.contains(*i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_match_binds_variables() {
        let pattern = TuplePattern::parse_triple("?s", "<p>", "?o");
        let binding = pattern.match_tuple(&Tuple::triple("<a>", "<p>", "<b>")).unwrap();
        assert_eq!(binding.get(&Variable::new("s")), Some(&Term::new("<a>")));
        assert_eq!(binding.get(&Variable::new("o")), Some(&Term::new("<b>")));
        assert_eq!(binding.len(), 2);
    }

    #[test]
    fn test_constant_mismatch_fails() {
        let pattern = TuplePattern::parse_triple("?s", "<p>", "?o");
        assert!(pattern.match_tuple(&Tuple::triple("<a>", "<q>", "<b>")).is_none());
    }

    #[test]
    fn test_self_join_requires_equal_terms() {
        let pattern = TuplePattern::parse_triple("?x", "?p", "?x");
        assert!(pattern.match_tuple(&Tuple::triple("<a>", "<p>", "<b>")).is_none());
        let binding = pattern.match_tuple(&Tuple::triple("<a>", "<p>", "<a>")).unwrap();
        assert_eq!(binding.len(), 2);
    }

    #[test]
    fn test_arity_mismatch_is_no_match() {
        let pattern = TuplePattern::parse_triple("?s", "?p", "?o");
        assert!(pattern.match_tuple(&Tuple::quad("<a>", "<p>", "<b>", "<g>")).is_none());
    }

    #[test]
    fn test_constant_mask() {
        assert_eq!(TuplePattern::parse_triple("<s>", "<p>", "?o").constant_mask(), 0b011);
        assert_eq!(TuplePattern::parse_triple("?s", "?p", "?o").constant_mask(), 0);
    }

    #[test]
    fn test_pattern_set_operations() {
        let a = PatternSet::single(0).union(PatternSet::single(2));
        assert!(a.contains(2));
        assert!(!a.contains(1));
        assert!(a.is_disjoint(PatternSet::single(1)));
        assert_eq!(a.len(), 2);
        assert_eq!(a.indices().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(PatternSet::full(3).bits(), 0b111);
        assert_eq!(PatternSet::full(64).bits(), u64::MAX);
    }
}
