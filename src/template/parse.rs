//! Token grammar
//!
//! ```text
//! [[name]]                 scalar
//! [[name|pascal|singular]] scalar passed through naming filters
//! [[[seq]]] ... [[[/seq]]] body repeated once per element of `seq`
//! [[[seq|, ]]]             same, elements joined by ", " (\n, \t, \\ escapes)
//! [[?pred]] ... [[/?pred]] body kept only when `pred` holds
//! [[?!pred]] ... [[/?!pred]] body kept only when `pred` does not hold
//! ```
//!
//! Tags never span lines. A block tag that is the only thing on its line
//! takes the whole line with it, indentation and newline included.
//! `\[[` is emitted as a literal `[[`, so `grid = \[[0]]` renders as
//! `grid = [[0]]`.

use super::TemplateError;

/// Parsed template fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Text(String),
    Scalar {
        name: String,
        filters: Vec<String>,
        line: usize,
    },
    List {
        sequence: String,
        separator: String,
        body: Vec<Node>,
        line: usize,
    },
    Conditional {
        predicate: String,
        negated: bool,
        body: Vec<Node>,
        line: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum Tag {
    Scalar { name: String, filters: Vec<String> },
    ListOpen { sequence: String, separator: String },
    ListClose { sequence: String },
    ConditionalOpen { predicate: String, negated: bool },
    ConditionalClose { predicate: String, negated: bool },
}

impl Tag {
    fn is_block(&self) -> bool {
        !matches!(self, Tag::Scalar { .. })
    }
}

#[derive(Debug)]
enum Piece {
    Text(String),
    Tag(Tag, usize),
}

enum Open {
    List { sequence: String, separator: String },
    Conditional { predicate: String, negated: bool },
}

impl Open {
    fn describe(&self) -> String {
        match self {
            Open::List { sequence, .. } => format!("[[[{}]]]", sequence),
            Open::Conditional { predicate, negated } => {
                format!("[[?{}{}]]", if *negated { "!" } else { "" }, predicate)
            }
        }
    }
}

struct Frame {
    open: Open,
    line: usize,
    body: Vec<Node>,
}

/// Parse template text into nodes
pub fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut pieces = Vec::new();
    for (index, line) in source.split_inclusive('\n').enumerate() {
        scan_line(line, index + 1, &mut pieces)?;
    }
    build(pieces)
}

fn scan_line(line: &str, line_no: usize, out: &mut Vec<Piece>) -> Result<(), TemplateError> {
    let mut pieces = Vec::new();
    let mut rest = line;

    while let Some(start) = rest.find("[[") {
        if rest[..start].ends_with('\\') {
            pieces.push(Piece::Text(format!("{}[[", &rest[..start - 1])));
            rest = &rest[start + 2..];
            continue;
        }
        if start > 0 {
            pieces.push(Piece::Text(rest[..start].to_string()));
        }
        let tail = &rest[start..];
        let (tag, consumed) = if tail.starts_with("[[[") {
            let end = tail[3..]
                .find("]]]")
                .ok_or(TemplateError::UnterminatedTag { line: line_no })?;
            (parse_list_tag(&tail[3..3 + end], line_no)?, end + 6)
        } else {
            let end = tail[2..]
                .find("]]")
                .ok_or(TemplateError::UnterminatedTag { line: line_no })?;
            (parse_tag(&tail[2..2 + end], line_no)?, end + 4)
        };
        pieces.push(Piece::Tag(tag, line_no));
        rest = &tail[consumed..];
    }
    if !rest.is_empty() {
        pieces.push(Piece::Text(rest.to_string()));
    }

    if is_standalone(&pieces) {
        out.extend(pieces.into_iter().filter(|p| matches!(p, Piece::Tag(..))));
    } else {
        out.extend(pieces);
    }
    Ok(())
}

fn is_standalone(pieces: &[Piece]) -> bool {
    let mut tags = 0;
    for piece in pieces {
        match piece {
            Piece::Tag(tag, _) if tag.is_block() => tags += 1,
            Piece::Tag(..) => return false,
            Piece::Text(text) if !text.trim().is_empty() => return false,
            Piece::Text(_) => {}
        }
    }
    tags == 1
}

fn parse_list_tag(inner: &str, line: usize) -> Result<Tag, TemplateError> {
    let malformed = || TemplateError::MalformedTag {
        tag: format!("[[[{}]]]", inner),
        line,
    };

    if let Some(name) = inner.strip_prefix('/') {
        let name = name.trim();
        return if is_token_name(name) {
            Ok(Tag::ListClose {
                sequence: name.to_string(),
            })
        } else {
            Err(malformed())
        };
    }

    let (name, separator) = match inner.split_once('|') {
        Some((name, separator)) => (name.trim(), unescape(separator)),
        None => (inner.trim(), String::new()),
    };
    if !is_token_name(name) {
        return Err(malformed());
    }
    Ok(Tag::ListOpen {
        sequence: name.to_string(),
        separator,
    })
}

fn parse_tag(inner: &str, line: usize) -> Result<Tag, TemplateError> {
    let malformed = || TemplateError::MalformedTag {
        tag: format!("[[{}]]", inner),
        line,
    };
    let checked = |name: &str| {
        let name = name.trim();
        if is_token_name(name) {
            Ok(name.to_string())
        } else {
            Err(malformed())
        }
    };

    if let Some(name) = inner.strip_prefix("/?!") {
        return Ok(Tag::ConditionalClose {
            predicate: checked(name)?,
            negated: true,
        });
    }
    if let Some(name) = inner.strip_prefix("/?") {
        return Ok(Tag::ConditionalClose {
            predicate: checked(name)?,
            negated: false,
        });
    }
    if let Some(name) = inner.strip_prefix("?!") {
        return Ok(Tag::ConditionalOpen {
            predicate: checked(name)?,
            negated: true,
        });
    }
    if let Some(name) = inner.strip_prefix('?') {
        return Ok(Tag::ConditionalOpen {
            predicate: checked(name)?,
            negated: false,
        });
    }

    let mut parts = inner.split('|');
    let name = checked(parts.next().unwrap_or_default())?;
    let filters = parts.map(&checked).collect::<Result<Vec<_>, _>>()?;
    Ok(Tag::Scalar { name, filters })
}

fn build(pieces: Vec<Piece>) -> Result<Vec<Node>, TemplateError> {
    let mut root: Vec<Node> = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    for piece in pieces {
        match piece {
            Piece::Text(text) => {
                let body = current(&mut root, &mut stack);
                match body.last_mut() {
                    Some(Node::Text(previous)) => previous.push_str(&text),
                    _ => body.push(Node::Text(text)),
                }
            }
            Piece::Tag(Tag::Scalar { name, filters }, line) => {
                current(&mut root, &mut stack).push(Node::Scalar {
                    name,
                    filters,
                    line,
                });
            }
            Piece::Tag(Tag::ListOpen { sequence, separator }, line) => stack.push(Frame {
                open: Open::List {
                    sequence,
                    separator,
                },
                line,
                body: Vec::new(),
            }),
            Piece::Tag(Tag::ConditionalOpen { predicate, negated }, line) => stack.push(Frame {
                open: Open::Conditional { predicate, negated },
                line,
                body: Vec::new(),
            }),
            Piece::Tag(close, line) => {
                let (found, name) = match &close {
                    Tag::ListClose { sequence } => (format!("[[[/{}]]]", sequence), sequence.clone()),
                    Tag::ConditionalClose { predicate, negated } => (
                        format!("[[/?{}{}]]", if *negated { "!" } else { "" }, predicate),
                        predicate.clone(),
                    ),
                    _ => unreachable!("open and scalar tags are handled above"),
                };
                let frame = stack
                    .pop()
                    .ok_or_else(|| TemplateError::UnexpectedClose { name, line })?;

                let node = match (frame.open, close) {
                    (Open::List { sequence, separator }, Tag::ListClose { sequence: closing })
                        if sequence == closing =>
                    {
                        Node::List {
                            sequence,
                            separator,
                            body: frame.body,
                            line: frame.line,
                        }
                    }
                    (
                        Open::Conditional { predicate, negated },
                        Tag::ConditionalClose {
                            predicate: closing,
                            negated: closing_negated,
                        },
                    ) if predicate == closing && negated == closing_negated => Node::Conditional {
                        predicate,
                        negated,
                        body: frame.body,
                        line: frame.line,
                    },
                    (open, _) => {
                        return Err(TemplateError::MismatchedClose {
                            expected: open.describe(),
                            found,
                            line,
                        })
                    }
                };
                current(&mut root, &mut stack).push(node);
            }
        }
    }

    if let Some(frame) = stack.pop() {
        return Err(TemplateError::UnclosedBlock {
            name: frame.open.describe(),
            line: frame.line,
        });
    }
    Ok(root)
}

fn current<'a>(root: &'a mut Vec<Node>, stack: &'a mut [Frame]) -> &'a mut Vec<Node> {
    match stack.last_mut() {
        Some(frame) => &mut frame.body,
        None => root,
    }
}

fn is_token_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Node {
        Node::Text(s.to_string())
    }

    #[test]
    fn test_plain_text_is_one_node() {
        assert_eq!(parse("a\n  b\n").unwrap(), vec![text("a\n  b\n")]);
    }

    #[test]
    fn test_escaped_brackets_are_text() {
        assert_eq!(parse("grid = \\[[0]]\n").unwrap(), vec![text("grid = [[0]]\n")]);
        assert_eq!(
            parse("\\[[x]] [[y]]").unwrap(),
            vec![
                text("[[x]] "),
                Node::Scalar {
                    name: "y".to_string(),
                    filters: Vec::new(),
                    line: 1,
                },
            ]
        );
    }

    #[test]
    fn test_scalar_with_filters() {
        let nodes = parse("class [[table|singular|pascal]] {").unwrap();
        assert_eq!(
            nodes,
            vec![
                text("class "),
                Node::Scalar {
                    name: "table".to_string(),
                    filters: vec!["singular".to_string(), "pascal".to_string()],
                    line: 1,
                },
                text(" {"),
            ]
        );
    }

    #[test]
    fn test_inline_list_with_separator() {
        let nodes = parse("([[[columns|, ]]][[column]][[[/columns]]])").unwrap();
        match &nodes[1] {
            Node::List {
                sequence,
                separator,
                body,
                ..
            } => {
                assert_eq!(sequence, "columns");
                assert_eq!(separator, ", ");
                assert_eq!(body.len(), 1);
            }
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn test_standalone_block_lines_are_consumed() {
        let nodes = parse("a:\n  [[?x]]\n  b\n  [[/?x]]\nc\n").unwrap();
        assert_eq!(
            nodes,
            vec![
                text("a:\n"),
                Node::Conditional {
                    predicate: "x".to_string(),
                    negated: false,
                    body: vec![text("  b\n")],
                    line: 2,
                },
                text("c\n"),
            ]
        );
    }

    #[test]
    fn test_nested_lists() {
        let source = "[[[tables]]]\n[[name]]:\n[[[columns]]]\n  - [[column]]\n[[[/columns]]]\n[[[/tables]]]\n";
        let nodes = parse(source).unwrap();
        assert_eq!(nodes.len(), 1);
        let Node::List { body, .. } = &nodes[0] else {
            panic!("expected list");
        };
        assert!(matches!(body.last(), Some(Node::List { sequence, .. }) if sequence == "columns"));
    }

    #[test]
    fn test_separator_escapes() {
        let nodes = parse("[[[xs|,\\n]]]x[[[/xs]]]").unwrap();
        let Node::List { separator, .. } = &nodes[0] else {
            panic!("expected list");
        };
        assert_eq!(separator, ",\n");
    }

    #[test]
    fn test_negated_conditional() {
        let nodes = parse("[[?!join]]plain[[/?!join]]").unwrap();
        assert!(matches!(&nodes[0], Node::Conditional { negated: true, .. }));
    }

    #[test]
    fn test_unclosed_block() {
        let err = parse("[[[columns]]]\n[[column]]\n").unwrap_err();
        assert!(matches!(err, TemplateError::UnclosedBlock { line: 1, .. }));
    }

    #[test]
    fn test_mismatched_close() {
        let err = parse("[[[columns]]][[?x]][[[/columns]]][[/?x]]").unwrap_err();
        assert!(matches!(err, TemplateError::MismatchedClose { .. }));
    }

    #[test]
    fn test_unexpected_close() {
        let err = parse("text\n[[/?x]]\n").unwrap_err();
        assert_eq!(
            err,
            TemplateError::UnexpectedClose {
                name: "x".to_string(),
                line: 2
            }
        );
    }

    #[test]
    fn test_unterminated_and_malformed_tags() {
        assert_eq!(
            parse("ok\nbroken [[table\n").unwrap_err(),
            TemplateError::UnterminatedTag { line: 2 }
        );
        assert!(matches!(
            parse("[[not a name]]").unwrap_err(),
            TemplateError::MalformedTag { .. }
        ));
    }
}
