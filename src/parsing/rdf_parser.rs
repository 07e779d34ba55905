use crate::core::{Term, Tuple};
use crate::error::{EngineError, Result};

/// Parse a line of N-Triples/N-Quads into a Tuple
///
/// Terms keep their N-Triples lexical form (`<iri>`, `_:b`, `"v"`, `"v"@en`,
/// `"v"^^<datatype>`) so they compare equal to the constants of parsed queries.
/// Returns `Ok(None)` for blank lines and comments.
pub fn parse_rdf_line(line: &str) -> Result<Option<Tuple>> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with('#') {
        return Ok(None);
    }

    // Remove the terminating dot
    let trimmed = trimmed
        .strip_suffix('.')
        .ok_or_else(|| EngineError::Parse(format!("Missing terminating '.': {}", trimmed)))?
        .trim_end();

    let (subject, remaining) = parse_subject(trimmed)?;
    let (predicate, remaining) = parse_iri(remaining, "predicate")?;
    let (object, remaining) = parse_object(remaining)?;

    let mut terms = vec![subject, predicate, object];

    // Optional graph label turns the triple into a quad
    let remaining = remaining.trim();
    if !remaining.is_empty() {
        let (graph, rest) = parse_subject(remaining)?;
        if !rest.trim().is_empty() {
            return Err(EngineError::Parse(format!("Unexpected trailing input: {}", rest.trim())));
        }
        terms.push(graph);
    }

    Ok(Some(Tuple::new(terms)))
}

/// Subjects and graph labels are IRIs or blank nodes
fn parse_subject(input: &str) -> Result<(Term, &str)> {
    let input = input.trim_start();
    if input.starts_with("_:") {
        return parse_blank_node(input);
    }
    parse_iri(input, "subject")
}

/// Parse an IRI enclosed in angle brackets, keeping the brackets
fn parse_iri<'a>(input: &'a str, field_name: &str) -> Result<(Term, &'a str)> {
    let input = input.trim_start();

    if !input.starts_with('<') {
        return Err(EngineError::Parse(format!("Expected '<' for {} IRI, got: {}", field_name, input)));
    }

    let end_idx = input
        .find('>')
        .ok_or_else(|| EngineError::Parse(format!("Missing closing '>' for {} IRI", field_name)))?;

    let iri = &input[..=end_idx];
    if iri[1..end_idx].chars().any(char::is_whitespace) {
        return Err(EngineError::Parse(format!("Whitespace inside {} IRI: {}", field_name, iri)));
    }

    Ok((Term::new(iri), &input[end_idx + 1..]))
}

fn parse_blank_node(input: &str) -> Result<(Term, &str)> {
    let end_idx = input.find(char::is_whitespace).unwrap_or(input.len());
    if end_idx <= 2 {
        return Err(EngineError::Parse("Empty blank node label".to_string()));
    }
    Ok((Term::new(&input[..end_idx]), &input[end_idx..]))
}

/// Parse object which can be:
/// - IRI: <http://example.org/resource>
/// - Blank node: _:b0
/// - Plain literal: "some text"
/// - Typed literal: "23.5"^^<http://www.w3.org/2001/XMLSchema#decimal>
/// - Language-tagged literal: "hello"@en
fn parse_object(input: &str) -> Result<(Term, &str)> {
    let input = input.trim_start();

    if input.starts_with('<') {
        return parse_iri(input, "object");
    }

    if input.starts_with("_:") {
        return parse_blank_node(input);
    }

    if input.starts_with('"') {
        return parse_literal(input);
    }

    Err(EngineError::Parse(format!("Invalid object format: {}", input)))
}

/// Parse a literal with optional datatype or language tag
fn parse_literal(input: &str) -> Result<(Term, &str)> {
    // Find the closing quote, skipping escaped characters
    let mut escaped = false;
    let mut close_idx = None;
    for (idx, c) in input.char_indices().skip(1) {
        match c {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '"' => {
                close_idx = Some(idx);
                break;
            }
            _ => {}
        }
    }
    let close_idx = close_idx.ok_or_else(|| EngineError::Parse("Missing closing quote for literal".to_string()))?;
    let after_quote = &input[close_idx + 1..];

    let literal_end = if let Some(after_caret) = after_quote.strip_prefix("^^") {
        // Typed literal
        if !after_caret.starts_with('<') {
            return Err(EngineError::Parse(format!("Expected datatype IRI after '^^', got: {}", after_caret)));
        }
        let (datatype, _) = parse_iri(after_caret, "datatype")?;
        close_idx + 1 + 2 + datatype.as_str().len()
    } else if let Some(after_at) = after_quote.strip_prefix('@') {
        // Language-tagged literal
        let lang_len = after_at.find(|c: char| !(c.is_ascii_alphanumeric() || c == '-')).unwrap_or(after_at.len());
        if lang_len == 0 {
            return Err(EngineError::Parse("Empty language tag".to_string()));
        }
        close_idx + 1 + 1 + lang_len
    } else {
        // Plain literal
        close_idx + 1
    };

    Ok((Term::new(&input[..literal_end]), &input[literal_end..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_typed_literal() {
        let line = r#"<http://example.org/sensor1> <http://example.org/temperature> "23.5"^^<http://www.w3.org/2001/XMLSchema#decimal> <http://example.org/sensorStream> ."#;
        let result = parse_rdf_line(line).unwrap().unwrap();

        assert_eq!(result.arity(), 4);
        assert_eq!(result.terms()[0].as_str(), "<http://example.org/sensor1>");
        assert_eq!(result.terms()[1].as_str(), "<http://example.org/temperature>");
        assert_eq!(result.terms()[2].as_str(), r#""23.5"^^<http://www.w3.org/2001/XMLSchema#decimal>"#);
        assert_eq!(result.terms()[3].as_str(), "<http://example.org/sensorStream>");
    }

    #[test]
    fn test_parse_plain_and_language_literals() {
        let line = r#"<http://example.org/sensor1> <http://example.org/name> "Temperature \"Sensor\"" ."#;
        let result = parse_rdf_line(line).unwrap().unwrap();
        assert_eq!(result.terms()[2].as_str(), r#""Temperature \"Sensor\"""#);

        let line = r#"<http://example.org/s> <http://example.org/label> "hallo"@de-AT ."#;
        let result = parse_rdf_line(line).unwrap().unwrap();
        assert_eq!(result.terms()[2].as_str(), r#""hallo"@de-AT"#);
    }

    #[test]
    fn test_parse_triple_with_blank_nodes() {
        let line = "_:b0 <http://example.org/type> _:b1 .";
        let result = parse_rdf_line(line).unwrap().unwrap();

        assert_eq!(result, Tuple::triple("_:b0", "<http://example.org/type>", "_:b1"));
    }

    #[test]
    fn test_blank_and_comment_lines_are_skipped() {
        assert!(parse_rdf_line("   ").unwrap().is_none());
        assert!(parse_rdf_line("# a comment").unwrap().is_none());
    }

    #[test]
    fn test_malformed_lines() {
        assert!(matches!(parse_rdf_line("<s> <p> <o>"), Err(EngineError::Parse(_))));
        assert!(parse_rdf_line(r#"<s> "p" <o> ."#).is_err());
        assert!(parse_rdf_line(r#"<s> <p> "open ."#).is_err());
        assert!(parse_rdf_line("<s> <p> <o> <g> <extra> .").is_err());
    }
}
