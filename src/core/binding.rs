use super::term::{Term, Variable};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Mapping from variable to term.
///
/// Kept ordered so that equal bindings hash equally regardless of the order in
/// which their variables were bound.
#[derive(Clone, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(transparent)]
pub struct Binding(BTreeMap<Variable, Term>);

impl Binding {
    pub fn new() -> Self {
        Binding(BTreeMap::new())
    }

    pub fn get(&self, variable: &Variable) -> Option<&Term> {
        self.0.get(variable)
    }

    pub fn insert(&mut self, variable: Variable, term: Term) -> Option<Term> {
        self.0.insert(variable, term)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Variable, &Term)> {
        self.0.iter()
    }

    /// Two bindings are join-compatible iff they agree on every shared variable.
    pub fn is_compatible(&self, other: &Binding) -> bool {
        let (small, large) = if self.len() <= other.len() { (self, other) } else { (other, self) };
        small.0.iter().all(|(var, term)| large.0.get(var).map_or(true, |t| t == term))
    }

    /// Union of two compatible bindings.
    pub fn merge(&self, other: &Binding) -> Binding {
        let mut merged = self.clone();
        for (var, term) in &other.0 {
            merged.0.entry(var.clone()).or_insert_with(|| term.clone());
        }
        merged
    }

    /// Restricts the binding to the given variables, in the binding's own order.
    pub fn project(&self, variables: &[Variable]) -> Binding {
        Binding(
            self.0
                .iter()
                .filter(|(var, _)| variables.contains(var))
                .map(|(var, term)| (var.clone(), term.clone()))
                .collect(),
        )
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.0.iter()).finish()
    }
}

impl<V: Into<Variable>, T: Into<Term>> FromIterator<(V, T)> for Binding {
    fn from_iter<I: IntoIterator<Item = (V, T)>>(iter: I) -> Self {
        Binding(iter.into_iter().map(|(v, t)| (v.into(), t.into())).collect())
    }
}
