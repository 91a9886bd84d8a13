//! Placeholder resolution
//!
//! Scalars and sequences are looked up from the innermost list element
//! outwards to the unit scope. Predicates are unit-level: a conditional
//! inside a list body sees the same value on every repetition.

use std::collections::BTreeMap;

use tracing::trace;

use super::parse::Node;
use super::{Template, TemplateError};
use crate::codegen::NamingConvention;

/// Named values visible at one level of resolution
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scope {
    scalars: BTreeMap<String, String>,
    sequences: BTreeMap<String, Vec<Scope>>,
    predicates: BTreeMap<String, bool>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn scalar(mut self, name: &str, value: impl Into<String>) -> Self {
        self.set_scalar(name, value);
        self
    }

    pub fn sequence(mut self, name: &str, items: Vec<Scope>) -> Self {
        self.set_sequence(name, items);
        self
    }

    pub fn predicate(mut self, name: &str, value: bool) -> Self {
        self.set_predicate(name, value);
        self
    }

    pub fn set_scalar(&mut self, name: &str, value: impl Into<String>) {
        self.scalars.insert(name.to_string(), value.into());
    }

    pub fn set_sequence(&mut self, name: &str, items: Vec<Scope>) {
        self.sequences.insert(name.to_string(), items);
    }

    pub fn set_predicate(&mut self, name: &str, value: bool) {
        self.predicates.insert(name.to_string(), value);
    }

    pub fn get_scalar(&self, name: &str) -> Option<&str> {
        self.scalars.get(name).map(String::as_str)
    }

    pub fn get_sequence(&self, name: &str) -> Option<&[Scope]> {
        self.sequences.get(name).map(Vec::as_slice)
    }

    pub fn get_predicate(&self, name: &str) -> Option<bool> {
        self.predicates.get(name).copied()
    }
}

/// Everything one template expansion can see
#[derive(Debug, Clone)]
pub struct ResolutionContext {
    naming: NamingConvention,
    root: Scope,
}

impl ResolutionContext {
    pub fn new(naming: NamingConvention, root: Scope) -> Self {
        Self { naming, root }
    }

    pub fn naming(&self) -> &NamingConvention {
        &self.naming
    }

    pub fn root(&self) -> &Scope {
        &self.root
    }
}

struct Frame<'a> {
    scope: &'a Scope,
    parent: Option<&'a Frame<'a>>,
}

impl<'a> Frame<'a> {
    fn scalar(&self, name: &str) -> Option<&'a str> {
        self.scope
            .get_scalar(name)
            .or_else(|| self.parent.and_then(|p| p.scalar(name)))
    }

    fn sequence(&self, name: &str) -> Option<&'a [Scope]> {
        self.scope
            .get_sequence(name)
            .or_else(|| self.parent.and_then(|p| p.sequence(name)))
    }
}

/// Expand `template` against `context`
pub fn resolve(template: &Template, context: &ResolutionContext) -> Result<String, TemplateError> {
    let nodes = template.nodes()?;
    let mut out = String::with_capacity(template.source().len());
    let frame = Frame {
        scope: &context.root,
        parent: None,
    };
    render(nodes, &frame, context, &mut out)?;
    trace!(template = %template.id(), bytes = out.len(), "Template resolved");
    Ok(out)
}

fn render(
    nodes: &[Node],
    frame: &Frame<'_>,
    context: &ResolutionContext,
    out: &mut String,
) -> Result<(), TemplateError> {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Scalar {
                name,
                filters,
                line,
            } => {
                let value = frame
                    .scalar(name)
                    .ok_or_else(|| TemplateError::UnresolvedScalar {
                        name: name.clone(),
                        line: *line,
                    })?;
                if filters.is_empty() {
                    out.push_str(value);
                } else {
                    let filtered = context
                        .naming
                        .apply_filters(value, filters)
                        .map_err(|filter| TemplateError::UnknownFilter {
                            filter,
                            line: *line,
                        })?;
                    out.push_str(&filtered);
                }
            }
            Node::List {
                sequence,
                separator,
                body,
                line,
            } => {
                let items = frame
                    .sequence(sequence)
                    .ok_or_else(|| TemplateError::UnknownSequence {
                        name: sequence.clone(),
                        line: *line,
                    })?;
                for (index, item) in items.iter().enumerate() {
                    if index > 0 {
                        out.push_str(separator);
                    }
                    let child = Frame {
                        scope: item,
                        parent: Some(frame),
                    };
                    render(body, &child, context, out)?;
                }
            }
            Node::Conditional {
                predicate,
                negated,
                body,
                line,
            } => {
                let holds = context.root.get_predicate(predicate).ok_or_else(|| {
                    TemplateError::UnknownPredicate {
                        name: predicate.clone(),
                        line: *line,
                    }
                })?;
                if holds != *negated {
                    render(body, frame, context, out)?;
                }
            }
        }
    }
    Ok(())
}
