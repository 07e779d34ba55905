use serde::{Serialize, Serializer};
use std::fmt;
use std::sync::Arc;

/// Opaque atomic value from the stream's data domain.
///
/// The engine only compares and hashes terms. Parsers in this crate store the
/// N-Triples lexical form (`<iri>`, `"literal"`, `_:blank`), but any string works.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Term(Arc<str>);

impl Term {
    pub fn new(value: &str) -> Self {
        Term(Arc::from(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Term {
    fn from(value: &str) -> Self {
        Term::new(value)
    }
}

impl From<String> for Term {
    fn from(value: String) -> Self {
        Term(Arc::from(value))
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for Term {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// Name of a query variable, stored without the leading `?`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Variable(Arc<str>);

impl Variable {
    pub fn new(name: &str) -> Self {
        Variable(Arc::from(name.trim_start_matches(['?', '$'])))
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Variable {
    fn from(name: &str) -> Self {
        Variable::new(name)
    }
}

impl fmt::Debug for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

impl Serialize for Variable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// A fact arriving from the stream, e.g. a triple or a quad.
#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(transparent)]
pub struct Tuple(Vec<Term>);

impl Tuple {
    pub fn new(terms: Vec<Term>) -> Self {
        Tuple(terms)
    }

    pub fn triple(subject: &str, predicate: &str, object: &str) -> Self {
        Tuple(vec![Term::new(subject), Term::new(predicate), Term::new(object)])
    }

    pub fn quad(subject: &str, predicate: &str, object: &str, graph: &str) -> Self {
        Tuple(vec![Term::new(subject), Term::new(predicate), Term::new(object), Term::new(graph)])
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn terms(&self) -> &[Term] {
        &self.0
    }

    pub fn get(&self, position: usize) -> Option<&Term> {
        self.0.get(position)
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "{}", term)?;
        }
        f.write_str(" .")
    }
}
