//! Translates a SPARQL subset into a [`ContinuousQuery`].
//!
//! Accepted: `PREFIX` declarations, `SELECT [DISTINCT|REDUCED] (?v.. | *)`, `ASK`,
//! `CONSTRUCT { .. }`, one `WHERE { .. }` group of triple patterns (with `;` and `,`
//! shorthand) and `FILTER(x = y)` / `FILTER(x != y)`, then `LIMIT` and `OFFSET`.
//! Well-formed SPARQL outside that subset is rejected as incompatible.

use crate::core::{GraphPattern, Slot, Term, TuplePattern, Variable};
use crate::error::{EngineError, Result};
use crate::query::{
    ComparisonOp, ContinuousQuery, Distinctness, Filter, Modifiers, Operand, Projection, TermComparison,
    TupleTemplate,
};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;

const RDF_TYPE: &str = "<http://www.w3.org/1999/02/22-rdf-syntax-ns#type>";
const XSD: &str = "http://www.w3.org/2001/XMLSchema#";

/// Keywords of SPARQL algebra the engine does not evaluate.
const UNSUPPORTED: &[&str] = &[
    "OPTIONAL", "UNION", "MINUS", "GRAPH", "SERVICE", "EXISTS", "NOT", "BIND", "VALUES", "SELECT", "FROM",
    "ORDER", "GROUP", "HAVING", "BASE",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Iri,
    Literal,
    Number,
    Variable,
    Punct,
    Word,
}

#[derive(Debug, Clone, Copy)]
struct Token<'a> {
    kind: TokenKind,
    text: &'a str,
}

impl Token<'_> {
    fn is_punct(&self, punct: &str) -> bool {
        self.kind == TokenKind::Punct && self.text == punct
    }

    fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(keyword)
    }

    fn keyword(&self) -> Option<String> {
        (self.kind == TokenKind::Word && !self.text.contains(':')).then(|| self.text.to_ascii_uppercase())
    }
}

enum Form {
    Select { distinctness: Distinctness, variables: Option<Vec<Variable>> },
    Ask,
    Construct(Vec<TuplePattern>),
}

struct Cursor<'a> {
    tokens: Vec<Token<'a>>,
    position: usize,
    prefixes: HashMap<String, String>,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position).copied()
    }

    fn peek_second(&self) -> Option<Token<'a>> {
        self.tokens.get(self.position + 1).copied()
    }

    fn next(&mut self) -> Option<Token<'a>> {
        let token = self.peek();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn next_or(&mut self, expected: &str) -> Result<Token<'a>> {
        self.next().ok_or_else(|| invalid(format!("unexpected end of query, expected {}", expected)))
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, punct: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_punct(punct)) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, punct: &str) -> Result<()> {
        let token = self.next_or(&format!("`{}`", punct))?;
        if token.is_punct(punct) {
            Ok(())
        } else {
            Err(invalid(format!("expected `{}`, found `{}`", punct, token.text)))
        }
    }
}

fn invalid(message: String) -> EngineError {
    EngineError::InvalidQuery(message)
}

fn incompatible(message: String) -> EngineError {
    EngineError::IncompatibleQuery(message)
}

pub struct QueryParser {
    token_regex: Regex,
}

impl QueryParser {
    pub fn new() -> Result<Self> {
        Ok(QueryParser {
            token_regex: Regex::new(
                r#"(?x)
                  (?P<comment>\#[^\n]*)
                | (?P<iri><[^<>"{}|^`\\\s]*>)
                | (?P<literal>"(?:[^"\\\n]|\\.)*"(?:\^\^(?:<[^<>\s]*>|(?:[A-Za-z][\w\-]*)?:[\w\-]*)|@[A-Za-z]+(?:-[A-Za-z0-9]+)*)?)
                | (?P<number>[+-]?\d+(?:\.\d+)?)
                | (?P<variable>[?$][A-Za-z_][A-Za-z0-9_]*)
                | (?P<punct>!=|<=|>=|&&|\|\||[{}()\[\].;,*=/|^+<>!?])
                | (?P<word>[A-Za-z_:][\w\-:]*)
                "#,
            )?,
        })
    }

    pub fn parse(&self, query: &str) -> Result<ContinuousQuery> {
        let mut cursor = Cursor { tokens: self.tokenize(query)?, position: 0, prefixes: HashMap::new() };

        parse_prologue(&mut cursor)?;
        let form = parse_form(&mut cursor)?;
        cursor.eat_keyword("WHERE");
        let (patterns, filters) = parse_group(&mut cursor)?;
        if patterns.is_empty() {
            return Err(invalid("the WHERE group contains no triple patterns".to_string()));
        }
        let (limit, offset) = parse_solution_modifiers(&mut cursor)?;
        let pattern = GraphPattern::new(patterns);

        let mut modifiers = match form {
            Form::Select { distinctness, variables } => Modifiers {
                projection: variables.map_or_else(|| select_star(&pattern), Projection::Variables),
                distinctness,
                ..Default::default()
            },
            Form::Ask => Modifiers::ask(),
            Form::Construct(template) => Modifiers::construct(TupleTemplate::new(template)),
        };
        modifiers.limit = limit;
        modifiers.offset = offset;
        modifiers.filters.extend(filters.into_iter().map(|f| Arc::new(f) as Arc<dyn Filter>));

        Ok(ContinuousQuery::new(pattern, modifiers))
    }

    fn tokenize<'a>(&self, query: &'a str) -> Result<Vec<Token<'a>>> {
        let mut tokens = Vec::new();
        let mut last = 0;
        for captures in self.token_regex.captures_iter(query) {
            let Some(whole) = captures.get(0) else {
                continue;
            };
            let gap = query[last..whole.start()].trim();
            if !gap.is_empty() {
                return Err(invalid(format!("unexpected input `{}`", gap)));
            }
            last = whole.end();

            let kind = if captures.name("comment").is_some() {
                continue;
            } else if captures.name("iri").is_some() {
                TokenKind::Iri
            } else if captures.name("literal").is_some() {
                TokenKind::Literal
            } else if captures.name("number").is_some() {
                TokenKind::Number
            } else if captures.name("variable").is_some() {
                TokenKind::Variable
            } else if captures.name("punct").is_some() {
                TokenKind::Punct
            } else {
                TokenKind::Word
            };
            tokens.push(Token { kind, text: whole.as_str() });
        }
        let rest = query[last..].trim();
        if !rest.is_empty() {
            return Err(invalid(format!("unexpected input `{}`", rest)));
        }
        Ok(tokens)
    }
}

/// Parses `query` with a freshly built [`QueryParser`].
pub fn parse_query(query: &str) -> Result<ContinuousQuery> {
    QueryParser::new()?.parse(query)
}

fn parse_prologue(cursor: &mut Cursor<'_>) -> Result<()> {
    while cursor.eat_keyword("PREFIX") {
        let name = cursor.next_or("a prefix name")?;
        if name.kind != TokenKind::Word || !name.text.ends_with(':') || name.text.matches(':').count() != 1 {
            return Err(invalid(format!("malformed prefix name `{}`", name.text)));
        }
        let iri = cursor.next_or("a namespace IRI")?;
        if iri.kind != TokenKind::Iri {
            return Err(invalid(format!("expected a namespace IRI, found `{}`", iri.text)));
        }
        let prefix = name.text.trim_end_matches(':').to_string();
        let namespace = iri.text[1..iri.text.len() - 1].to_string();
        cursor.prefixes.insert(prefix, namespace);
    }
    Ok(())
}

fn parse_form(cursor: &mut Cursor<'_>) -> Result<Form> {
    let token = cursor.next_or("SELECT, ASK or CONSTRUCT")?;
    match token.keyword().as_deref() {
        Some("SELECT") => {
            let distinctness = if cursor.eat_keyword("DISTINCT") {
                Distinctness::Distinct
            } else if cursor.eat_keyword("REDUCED") {
                Distinctness::Reduced
            } else {
                Distinctness::None
            };
            if cursor.eat_punct("*") {
                return Ok(Form::Select { distinctness, variables: None });
            }
            let mut variables = Vec::new();
            while let Some(token) = cursor.peek() {
                match token.kind {
                    TokenKind::Variable => {
                        variables.push(Variable::new(token.text));
                        cursor.next();
                    }
                    TokenKind::Punct if token.text == "(" => {
                        return Err(incompatible("SELECT expressions are not supported".to_string()));
                    }
                    _ => break,
                }
            }
            if variables.is_empty() {
                return Err(invalid("SELECT needs `*` or at least one variable".to_string()));
            }
            Ok(Form::Select { distinctness, variables: Some(variables) })
        }
        Some("ASK") => Ok(Form::Ask),
        Some("CONSTRUCT") => {
            if !cursor.peek().is_some_and(|t| t.is_punct("{")) {
                return Err(incompatible("CONSTRUCT WHERE shorthand is not supported".to_string()));
            }
            let (template, filters) = parse_group(cursor)?;
            if !filters.is_empty() {
                return Err(invalid("FILTER is not allowed in a CONSTRUCT template".to_string()));
            }
            Ok(Form::Construct(template))
        }
        Some("DESCRIBE") => Err(incompatible("DESCRIBE queries are not supported".to_string())),
        _ => Err(invalid(format!("expected SELECT, ASK or CONSTRUCT, found `{}`", token.text))),
    }
}

/// Parses `{ ... }`: triple patterns separated by `.`, interleaved with FILTERs.
fn parse_group(cursor: &mut Cursor<'_>) -> Result<(Vec<TuplePattern>, Vec<TermComparison>)> {
    cursor.expect_punct("{")?;
    let mut patterns = Vec::new();
    let mut filters = Vec::new();
    loop {
        let token = cursor.peek().ok_or_else(|| invalid("unterminated group, expected `}`".to_string()))?;
        if token.is_punct("}") {
            cursor.next();
            break;
        }
        if token.is_punct(".") {
            cursor.next();
            continue;
        }
        if token.is_punct("{") {
            return Err(incompatible("nested groups and subqueries are not supported".to_string()));
        }
        if token.is_keyword("FILTER") {
            cursor.next();
            filters.push(parse_filter(cursor)?);
            continue;
        }
        if let Some(keyword) = token.keyword().filter(|k| UNSUPPORTED.contains(&k.as_str())) {
            return Err(incompatible(format!("{} is not supported", keyword)));
        }
        parse_triples(cursor, &mut patterns)?;
        match cursor.peek() {
            Some(next) if next.is_punct(".") || next.is_punct("}") || next.is_keyword("FILTER") => {}
            Some(next) if next.keyword().is_some_and(|k| UNSUPPORTED.contains(&k.as_str())) => {}
            Some(next) => return Err(invalid(format!("expected `.` after triple pattern, found `{}`", next.text))),
            None => return Err(invalid("unterminated group, expected `}`".to_string())),
        }
    }
    Ok((patterns, filters))
}

/// One subject with its `;`-separated predicates and `,`-separated objects.
fn parse_triples(cursor: &mut Cursor<'_>, patterns: &mut Vec<TuplePattern>) -> Result<()> {
    let subject = parse_slot(cursor)?;
    loop {
        let predicate = parse_predicate(cursor)?;
        loop {
            let object = parse_slot(cursor)?;
            patterns.push(TuplePattern::new(vec![subject.clone(), predicate.clone(), object]));
            if !cursor.eat_punct(",") {
                break;
            }
        }
        if !cursor.eat_punct(";") {
            return Ok(());
        }
        if cursor.peek().map_or(true, |t| t.is_punct(".") || t.is_punct("}")) {
            return Ok(());
        }
    }
}

fn parse_predicate(cursor: &mut Cursor<'_>) -> Result<Slot> {
    let token = cursor.peek().ok_or_else(|| invalid("unexpected end of query, expected a predicate".to_string()))?;
    if token.kind == TokenKind::Punct && ["^", "!", "("].contains(&token.text) {
        return Err(incompatible("property paths are not supported".to_string()));
    }
    if matches!(token.kind, TokenKind::Literal | TokenKind::Number) {
        return Err(invalid(format!("a literal cannot be a predicate: `{}`", token.text)));
    }
    let predicate = if token.is_keyword("a") {
        cursor.next();
        Slot::Constant(Term::new(RDF_TYPE))
    } else {
        parse_slot(cursor)?
    };
    if let Some(next) = cursor.peek() {
        if next.kind == TokenKind::Punct && ["/", "|", "^", "+", "*", "?"].contains(&next.text) {
            return Err(incompatible("property paths are not supported".to_string()));
        }
    }
    Ok(predicate)
}

/// `SELECT *` projects every named variable; blank nodes stay hidden.
fn select_star(pattern: &GraphPattern) -> Projection {
    let variables = pattern.variables();
    if variables.iter().all(|v| !is_blank(v)) {
        return Projection::All;
    }
    Projection::Variables(variables.into_iter().filter(|v| !is_blank(v)).collect())
}

fn is_blank(variable: &Variable) -> bool {
    variable.name().starts_with("_:")
}

fn parse_slot(cursor: &mut Cursor<'_>) -> Result<Slot> {
    let token = cursor.next_or("a term")?;
    match token.kind {
        TokenKind::Variable => Ok(Slot::Variable(Variable::new(token.text))),
        TokenKind::Iri => Ok(Slot::Constant(Term::new(token.text))),
        TokenKind::Literal => Ok(Slot::Constant(expand_literal(token.text, &cursor.prefixes)?)),
        TokenKind::Number => Ok(Slot::Constant(number_term(token.text))),
        TokenKind::Word => {
            // Blank nodes in a pattern behave as variables that `SELECT *` leaves out.
            if token.text.starts_with("_:") {
                return Ok(Slot::Variable(Variable::new(token.text)));
            }
            match token.text {
                "true" | "false" => Ok(Slot::Constant(Term::new(&format!("\"{}\"^^<{}boolean>", token.text, XSD)))),
                text if text.contains(':') => Ok(Slot::Constant(expand_prefixed(text, &cursor.prefixes)?)),
                text => Err(invalid(format!("unexpected `{}`", text))),
            }
        }
        TokenKind::Punct if token.text == "[" || token.text == "(" => {
            Err(incompatible("blank node property lists and collections are not supported".to_string()))
        }
        TokenKind::Punct => Err(invalid(format!("unexpected `{}`", token.text))),
    }
}

fn parse_filter(cursor: &mut Cursor<'_>) -> Result<TermComparison> {
    if !cursor.eat_punct("(") {
        let found = cursor.peek().map(|t| t.text).unwrap_or("end of query");
        return Err(incompatible(format!("unsupported FILTER expression starting at `{}`", found)));
    }
    let left = parse_operand(cursor)?;
    let op = match cursor.next_or("`=` or `!=`")? {
        token if token.is_punct("=") => ComparisonOp::Equal,
        token if token.is_punct("!=") => ComparisonOp::NotEqual,
        token if token.kind == TokenKind::Punct && token.text != ")" => {
            return Err(incompatible(format!("FILTER operator `{}` is not supported", token.text)));
        }
        token => return Err(invalid(format!("expected `=` or `!=` in FILTER, found `{}`", token.text))),
    };
    let right = parse_operand(cursor)?;
    match cursor.next_or("`)`")? {
        token if token.is_punct(")") => Ok(TermComparison { left, op, right }),
        token if token.is_punct("&&") || token.is_punct("||") => {
            Err(incompatible("compound FILTER expressions are not supported".to_string()))
        }
        token => Err(invalid(format!("expected `)` to close FILTER, found `{}`", token.text))),
    }
}

fn parse_operand(cursor: &mut Cursor<'_>) -> Result<Operand> {
    let Some(token) = cursor.peek() else {
        return Err(invalid("unexpected end of query inside FILTER".to_string()));
    };
    let is_call = token.kind == TokenKind::Word && cursor.peek_second().is_some_and(|t| t.is_punct("("));
    if is_call || token.is_punct("!") || token.is_punct("(") {
        return Err(incompatible(format!("FILTER expression `{}` is not supported", token.text)));
    }
    Ok(match parse_slot(cursor)? {
        Slot::Variable(variable) => Operand::Variable(variable),
        Slot::Constant(term) => Operand::Constant(term),
    })
}

fn parse_solution_modifiers(cursor: &mut Cursor<'_>) -> Result<(Option<u64>, Option<u64>)> {
    let mut limit = None;
    let mut offset = None;
    while let Some(token) = cursor.next() {
        match token.keyword().as_deref() {
            Some("LIMIT") => limit = Some(parse_count(cursor, "LIMIT")?),
            Some("OFFSET") => offset = Some(parse_count(cursor, "OFFSET")?),
            Some(keyword) if UNSUPPORTED.contains(&keyword) => {
                return Err(incompatible(format!("{} is not supported", keyword)));
            }
            _ => return Err(invalid(format!("unexpected `{}` after the WHERE group", token.text))),
        }
    }
    Ok((limit, offset))
}

fn parse_count(cursor: &mut Cursor<'_>, clause: &str) -> Result<u64> {
    let token = cursor.next_or(&format!("a number after {}", clause))?;
    if token.kind != TokenKind::Number {
        return Err(invalid(format!("{} expects a non-negative integer, found `{}`", clause, token.text)));
    }
    token
        .text
        .parse::<u64>()
        .map_err(|_| invalid(format!("{} expects a non-negative integer, found `{}`", clause, token.text)))
}

fn expand_prefixed(name: &str, prefixes: &HashMap<String, String>) -> Result<Term> {
    let (prefix, local) = name.split_once(':').ok_or_else(|| invalid(format!("not a prefixed name: `{}`", name)))?;
    let namespace = prefixes.get(prefix).ok_or_else(|| invalid(format!("undeclared prefix `{}:`", prefix)))?;
    Ok(Term::new(&format!("<{}{}>", namespace, local)))
}

/// Keeps the literal's lexical form, expanding a prefixed datatype.
fn expand_literal(literal: &str, prefixes: &HashMap<String, String>) -> Result<Term> {
    match literal.rsplit_once("^^") {
        Some((lexical, datatype)) if !datatype.starts_with('<') => {
            let datatype = expand_prefixed(datatype, prefixes)?;
            Ok(Term::new(&format!("{}^^{}", lexical, datatype)))
        }
        _ => Ok(Term::new(literal)),
    }
}

fn number_term(number: &str) -> Term {
    let datatype = if number.contains('.') { "decimal" } else { "integer" };
    Term::new(&format!("\"{}\"^^<{}{}>", number, XSD, datatype))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Binding;

    fn parser() -> QueryParser {
        QueryParser::new().unwrap()
    }

    #[test]
    fn test_parse_select_with_prefixes() {
        let query = parser()
            .parse(
                r"
                PREFIX ex: <http://example.org/>
                SELECT DISTINCT ?a ?c WHERE {
                    ?a ex:p ?b .
                    ?b ex:q ?c .
                } LIMIT 5 OFFSET 1
                ",
            )
            .unwrap();

        assert_eq!(query.pattern.len(), 2);
        assert_eq!(query.pattern.patterns()[0], TuplePattern::parse_triple("?a", "<http://example.org/p>", "?b"));
        assert_eq!(query.modifiers.distinctness, Distinctness::Distinct);
        assert_eq!(query.modifiers.projection, Projection::Variables(vec![Variable::new("a"), Variable::new("c")]));
        assert_eq!(query.modifiers.limit, Some(5));
        assert_eq!(query.modifiers.offset, Some(1));
        assert!(query.validate(3).is_ok());
    }

    #[test]
    fn test_parse_shorthand_and_literals() {
        let query = parser()
            .parse(
                r#"PREFIX : <http://ex.org/>
                   SELECT * { ?s a :Sensor ; :value 42, "x"@en . ?s :label "y"^^:str }"#,
            )
            .unwrap();
        let patterns = query.pattern.patterns();
        assert_eq!(patterns.len(), 4);
        assert_eq!(patterns[0], TuplePattern::parse_triple("?s", RDF_TYPE, "<http://ex.org/Sensor>"));
        assert_eq!(
            patterns[1].slots()[2],
            Slot::constant("\"42\"^^<http://www.w3.org/2001/XMLSchema#integer>")
        );
        assert_eq!(patterns[2].slots()[2], Slot::constant("\"x\"@en"));
        assert_eq!(patterns[3].slots()[2], Slot::constant("\"y\"^^<http://ex.org/str>"));
        assert_eq!(query.modifiers.projection, Projection::All);
    }

    #[test]
    fn test_parse_ask_construct_and_filter() {
        let ask = parser().parse("ASK { ?a <p> ?b . ?b <q> ?c }").unwrap();
        assert!(ask.modifiers.ask);

        let construct = parser()
            .parse("CONSTRUCT { ?a <knows> ?c } WHERE { ?a <p> ?b . ?b <q> ?c FILTER(?a != ?c) }")
            .unwrap();
        assert!(construct.modifiers.construct.is_some());
        assert_eq!(construct.modifiers.filters.len(), 1);

        let filter = &construct.modifiers.filters[0];
        let same: Binding = [("a", "<x>"), ("c", "<x>")].into_iter().collect();
        let different: Binding = [("a", "<x>"), ("c", "<y>")].into_iter().collect();
        assert!(!filter.evaluate(&same));
        assert!(filter.evaluate(&different));
    }

    #[test]
    fn test_comments_and_iris_with_hash() {
        let query = parser()
            .parse(
                "# leading comment\nSELECT ?s WHERE { ?s <http://www.w3.org/1999/02/22-rdf-syntax-ns#type> ?o } # done",
            )
            .unwrap();
        assert_eq!(query.pattern.patterns()[0], TuplePattern::parse_triple("?s", RDF_TYPE, "?o"));
    }

    #[test]
    fn test_rejects_unsupported_algebra() {
        let cases = [
            "SELECT * WHERE { ?a <p> ?b OPTIONAL { ?b <q> ?c } }",
            "SELECT * WHERE { { ?a <p> ?b } UNION { ?a <q> ?b } }",
            "SELECT * WHERE { ?a <p>/<q> ?b }",
            "SELECT * WHERE { ?a <p> ?b FILTER(?b > 3) }",
            "SELECT * WHERE { ?a <p> ?b FILTER(regex(?b, \"x\")) }",
            "SELECT * WHERE { ?a <p> ?b FILTER NOT EXISTS { ?b <q> ?c } }",
            "SELECT * WHERE { GRAPH ?g { ?a <p> ?b } }",
            "SELECT * WHERE { ?a <p> ?b } ORDER BY ?a",
            "DESCRIBE <x>",
            "SELECT (COUNT(?a) AS ?n) WHERE { ?a <p> ?b }",
        ];
        for case in cases {
            assert!(
                matches!(parser().parse(case), Err(EngineError::IncompatibleQuery(_))),
                "expected incompatible: {}",
                case
            );
        }
    }

    #[test]
    fn test_rejects_malformed_text() {
        let cases = [
            "",
            "SELECT WHERE { ?a <p> ?b }",
            "SELECT * WHERE { ?a <p> ?b",
            "SELECT * WHERE { ?a ex:p ?b }",
            "SELECT * WHERE { }",
            "SELECT * WHERE { ?a <p> ?b } LIMIT many",
            "SELECT * WHERE { ?a <p> ?b ?c <q> ?d }",
            "SELECT * WHERE { ?a <p> ?b } trailing",
        ];
        for case in cases {
            assert!(matches!(parser().parse(case), Err(EngineError::InvalidQuery(_))), "expected invalid: {}", case);
        }
    }

    #[test]
    fn test_blank_nodes_are_hidden_variables() {
        let query = parser().parse("SELECT ?a WHERE { ?a <p> _:x . _:x <q> <z> }").unwrap();
        assert!(query.pattern.variables().contains(&Variable::new("_:x")));
        assert!(query.validate(3).is_ok());

        let star = parser().parse("SELECT * WHERE { _:b <p> ?o . ?o <q> ?z }").unwrap();
        assert_eq!(star.modifiers.projection, Projection::Variables(vec![Variable::new("o"), Variable::new("z")]));
    }
}
