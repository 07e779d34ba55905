//! Opaque hooks invoked on complete solutions: FILTER predicates and CONSTRUCT templates.

use crate::core::{Binding, Term, Tuple, TuplePattern, Variable};
use std::fmt;

/// Boolean predicate over a complete binding. Solutions are dropped when it returns false.
pub trait Filter: Send + Sync {
    fn evaluate(&self, binding: &Binding) -> bool;
}

impl<F> Filter for F
where
    F: Fn(&Binding) -> bool + Send + Sync,
{
    fn evaluate(&self, binding: &Binding) -> bool {
        self(binding)
    }
}

/// Produces output tuples from a complete binding in place of the binding itself.
pub trait ConstructTemplate: Send + Sync {
    fn instantiate(&self, binding: &Binding) -> Vec<Tuple>;
}

/// Template made of tuple patterns; patterns with an unbound variable are skipped.
#[derive(Debug, Clone, Default)]
pub struct TupleTemplate {
    patterns: Vec<TuplePattern>,
}

impl TupleTemplate {
    pub fn new(patterns: Vec<TuplePattern>) -> Self {
        Self { patterns }
    }

    pub fn patterns(&self) -> &[TuplePattern] {
        &self.patterns
    }
}

impl ConstructTemplate for TupleTemplate {
    fn instantiate(&self, binding: &Binding) -> Vec<Tuple> {
        self.patterns.iter().filter_map(|pattern| pattern.instantiate(binding)).collect()
    }
}

/// Operand of a [`TermComparison`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand {
    Variable(Variable),
    Constant(Term),
}

impl Operand {
    fn resolve<'a>(&'a self, binding: &'a Binding) -> Option<&'a Term> {
        match self {
            Operand::Variable(v) => binding.get(v),
            Operand::Constant(t) => Some(t),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Equal,
    NotEqual,
}

/// Term (in)equality filter, e.g. `FILTER(?a != ?b)`.
///
/// Comparing an unbound variable evaluates to false, as an error would in SPARQL.
#[derive(Debug, Clone)]
pub struct TermComparison {
    pub left: Operand,
    pub op: ComparisonOp,
    pub right: Operand,
}

impl Filter for TermComparison {
    fn evaluate(&self, binding: &Binding) -> bool {
        match (self.left.resolve(binding), self.right.resolve(binding)) {
            (Some(left), Some(right)) => match self.op {
                ComparisonOp::Equal => left == right,
                ComparisonOp::NotEqual => left != right,
            },
            _ => false,
        }
    }
}

impl fmt::Display for TermComparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = |op: &Operand| match op {
            Operand::Variable(v) => v.to_string(),
            Operand::Constant(t) => t.to_string(),
        };
        let op = match self.op {
            ComparisonOp::Equal => "=",
            ComparisonOp::NotEqual => "!=",
        };
        write!(f, "{} {} {}", side(&self.left), op, side(&self.right))
    }
}
