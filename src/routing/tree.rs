//! Per-method route trie.
//!
//! # Responsibilities
//! - Parse route patterns into segments
//! - Insert routes, rejecting ambiguous or malformed patterns
//! - Match a concrete path, collecting parameters
//!
//! # Design Decisions
//! - One edge per path segment; empty segments are ignored
//! - A node owns a static child map, at most one named parameter edge and at
//!   most one terminal wildcard; each is its own field, never a nullable
//!   "maybe param" child
//! - Matching precedence per level: static, then parameter, then wildcard.
//!   A dead end under a static child backtracks to the parameter edge
//! - A wildcard consumes one or more remaining segments and ends matching

use std::collections::HashMap;

use thiserror::Error;

use crate::routing::handler::Handler;

/// Parameter key used for an unnamed wildcard (`*`).
pub const WILDCARD_PARAM: &str = "*";

/// Errors raised while registering routes. All of them are programmer
/// errors detected at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistrationError {
    #[error("route pattern '{0}' must start with '/'")]
    MissingLeadingSlash(String),

    #[error("route pattern '{0}' has a wildcard that is not the last segment")]
    WildcardNotLast(String),

    #[error("route pattern '{0}' has a parameter without a name")]
    EmptyParamName(String),

    #[error("route pattern '{pattern}' binds ':{new}' where ':{existing}' is already registered")]
    ParamConflict {
        pattern: String,
        existing: String,
        new: String,
    },

    #[error("wildcard in route pattern '{pattern}' is named '{new}' but '{existing}' is already registered")]
    WildcardConflict {
        pattern: String,
        existing: String,
        new: String,
    },

    #[error("route {method} '{pattern}' is already registered")]
    Duplicate { method: String, pattern: String },
}

/// One parsed pattern segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Segment {
    Static(String),
    Param(String),
    Wildcard(String),
}

/// Split a pattern into segments, validating its shape.
pub(crate) fn parse_pattern(pattern: &str) -> Result<Vec<Segment>, RegistrationError> {
    if !pattern.starts_with('/') {
        return Err(RegistrationError::MissingLeadingSlash(pattern.to_string()));
    }

    let raw: Vec<&str> = pattern.split('/').filter(|s| !s.is_empty()).collect();
    let mut segments = Vec::with_capacity(raw.len());

    for (i, seg) in raw.iter().enumerate() {
        if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(RegistrationError::EmptyParamName(pattern.to_string()));
            }
            segments.push(Segment::Param(name.to_string()));
        } else if let Some(name) = seg.strip_prefix('*') {
            if i + 1 != raw.len() {
                return Err(RegistrationError::WildcardNotLast(pattern.to_string()));
            }
            let name = if name.is_empty() { WILDCARD_PARAM } else { name };
            segments.push(Segment::Wildcard(name.to_string()));
        } else {
            segments.push(Segment::Static((*seg).to_string()));
        }
    }

    Ok(segments)
}

/// Named parameter edge.
struct ParamEdge {
    name: String,
    node: Box<Node>,
}

/// Terminal wildcard leaf.
struct WildcardLeaf {
    name: String,
    handler: Handler,
}

/// A trie node.
#[derive(Default)]
pub(crate) struct Node {
    handler: Option<Handler>,
    statics: HashMap<String, Node>,
    param: Option<ParamEdge>,
    wildcard: Option<WildcardLeaf>,
}

/// Result of a successful lookup.
pub(crate) struct Matched {
    pub handler: Handler,
    pub params: Vec<(String, String)>,
}

impl Node {
    /// Insert `handler` at `pattern`.
    pub(crate) fn insert(
        &mut self,
        method: &str,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), RegistrationError> {
        let segments = parse_pattern(pattern)?;
        let duplicate = || RegistrationError::Duplicate {
            method: method.to_string(),
            pattern: pattern.to_string(),
        };

        let mut current = self;
        for segment in segments {
            match segment {
                Segment::Static(name) => {
                    current = current.statics.entry(name).or_default();
                }
                Segment::Param(name) => {
                    let edge = current.param.get_or_insert_with(|| ParamEdge {
                        name: name.clone(),
                        node: Box::default(),
                    });
                    if edge.name != name {
                        return Err(RegistrationError::ParamConflict {
                            pattern: pattern.to_string(),
                            existing: edge.name.clone(),
                            new: name,
                        });
                    }
                    current = edge.node.as_mut();
                }
                Segment::Wildcard(name) => {
                    // parse_pattern guarantees this is the last segment.
                    if let Some(leaf) = &current.wildcard {
                        if leaf.name != name {
                            return Err(RegistrationError::WildcardConflict {
                                pattern: pattern.to_string(),
                                existing: leaf.name.clone(),
                                new: name,
                            });
                        }
                        return Err(duplicate());
                    }
                    current.wildcard = Some(WildcardLeaf { name, handler });
                    return Ok(());
                }
            }
        }

        if current.handler.is_some() {
            return Err(duplicate());
        }
        current.handler = Some(handler);
        Ok(())
    }

    /// Look up a concrete request path.
    pub(crate) fn find(&self, path: &str) -> Option<Matched> {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let mut params = Vec::new();
        let handler = self.search(&segments, &mut params)?;
        Some(Matched {
            handler: handler.clone(),
            params,
        })
    }

    fn search<'a>(
        &'a self,
        segments: &[&str],
        params: &mut Vec<(String, String)>,
    ) -> Option<&'a Handler> {
        let Some((first, rest)) = segments.split_first() else {
            return self.handler.as_ref();
        };

        if let Some(child) = self.statics.get(*first) {
            if let Some(found) = child.search(rest, params) {
                return Some(found);
            }
        }

        if let Some(edge) = &self.param {
            params.push((edge.name.clone(), (*first).to_string()));
            if let Some(found) = edge.node.search(rest, params) {
                return Some(found);
            }
            params.pop();
        }

        if let Some(leaf) = &self.wildcard {
            params.push((leaf.name.clone(), segments.join("/")));
            return Some(&leaf.handler);
        }

        None
    }

    /// Number of handlers stored below this node (inclusive).
    pub(crate) fn route_count(&self) -> usize {
        usize::from(self.handler.is_some())
            + usize::from(self.wildcard.is_some())
            + self.statics.values().map(Node::route_count).sum::<usize>()
            + self.param.as_ref().map_or(0, |e| e.node.route_count())
    }
}
