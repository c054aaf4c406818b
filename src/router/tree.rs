//! Compressed prefix tree mapping path patterns to handler chains.
//!
//! One tree exists per HTTP method. Static pattern text is stored with common
//! prefixes shared, so `/users/list` and `/uploads` hang off a single `/u`
//! node. Dynamic segments live in dedicated slots beside the static children:
//!
//! | Segment | Matches                                   | Captured as                 |
//! |---------|-------------------------------------------|-----------------------------|
//! | `:name` | one non-empty segment, up to the next `/` | `name`                      |
//! | `*`     | the rest of the path, including `/`       | [`WILDCARD_PARAM`], with its leading `/` |
//!
//! A position in the tree holds static children, a single parameter, or a
//! single wildcard. Registering a second kind at a taken position is a
//! [`RouteError::Conflict`], so every request path resolves to at most one
//! route and the outcome never depends on registration order.

use std::mem;

use smallvec::SmallVec;
use thiserror::Error;

use crate::middleware::HandlersChain;

/// Parameter name under which a wildcard capture is stored.
pub const WILDCARD_PARAM: &str = "wildcard";

/// Faults detected while registering a route.
///
/// These indicate a programming mistake in the route table, so the
/// registration API reports them by panicking; [`Node::insert`] and
/// [`RouterBuilder::try_add_route`](super::RouterBuilder::try_add_route) return them
/// for callers that want to inspect them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("route path must not be empty")]
    EmptyPath,

    #[error("route method must not be empty")]
    EmptyMethod,

    #[error("route path `{path}` must begin with '/'")]
    MissingLeadingSlash { path: String },

    #[error("route `{path}` has no handlers")]
    NoHandlers { path: String },

    #[error("invalid route pattern `{path}`: {reason}")]
    InvalidPattern { path: String, reason: &'static str },

    #[error("route `{path}` declares {count} parameters, more than the limit of {max}")]
    TooManyParams {
        path: String,
        count: usize,
        max: usize,
    },

    #[error("route `{path}` conflicts with an existing route: {reason}")]
    Conflict { path: String, reason: &'static str },
}

// One lexical piece of a route pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Static(&'a str),
    Param(&'a str),
    Wildcard,
}

/// Checks a pattern's syntax and returns the names it binds, in order.
pub(crate) fn param_names(path: &str) -> Result<Vec<String>, RouteError> {
    Ok(tokenize(path)?
        .into_iter()
        .filter_map(|token| match token {
            Token::Static(_) => None,
            Token::Param(name) => Some(name.to_owned()),
            Token::Wildcard => Some(WILDCARD_PARAM.to_owned()),
        })
        .collect())
}

fn tokenize(path: &str) -> Result<Vec<Token<'_>>, RouteError> {
    let invalid = |reason| RouteError::InvalidPattern {
        path: path.to_owned(),
        reason,
    };

    let bytes = path.as_bytes();
    let mut tokens = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while pos < bytes.len() {
        match bytes[pos] {
            b':' | b'*' if pos == 0 || bytes[pos - 1] != b'/' => {
                return Err(invalid("':' and '*' must start a path segment"));
            }
            b':' => {
                if literal_start < pos {
                    tokens.push(Token::Static(&path[literal_start..pos]));
                }
                let end = path[pos..].find('/').map_or(path.len(), |i| pos + i);
                let name = &path[pos + 1..end];
                if name.is_empty() {
                    return Err(invalid("parameter name must not be empty"));
                }
                if name.contains([':', '*']) {
                    return Err(invalid("parameter name must not contain ':' or '*'"));
                }
                tokens.push(Token::Param(name));
                pos = end;
                literal_start = end;
            }
            b'*' => {
                if pos + 1 != bytes.len() {
                    return Err(invalid("wildcard must be the final segment"));
                }
                if literal_start < pos {
                    tokens.push(Token::Static(&path[literal_start..pos]));
                }
                tokens.push(Token::Wildcard);
                pos += 1;
                literal_start = pos;
            }
            _ => pos += 1,
        }
    }

    if literal_start < path.len() {
        tokens.push(Token::Static(&path[literal_start..]));
    }
    Ok(tokens)
}

/// ASCII-lowercases the static text of a pattern, leaving parameter names alone.
///
/// Non-ASCII letters are kept as written, which keeps byte offsets stable
/// between a request path and its folded form.
pub(crate) fn fold_pattern(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.starts_with(':') {
                segment.to_owned()
            } else {
                segment.to_ascii_lowercase()
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

// Byte length of the longest common prefix, always on a char boundary.
fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .take_while(|((_, x), y)| x == y)
        .last()
        .map_or(0, |((i, x), _)| i + x.len_utf8())
}

/// What a terminal node resolves to.
#[derive(Clone)]
pub(crate) struct Endpoint {
    pub(crate) handlers: HandlersChain,
    /// Parameter names from the root down to this node, in capture order.
    pub(crate) param_names: Vec<String>,
}

/// Byte ranges of captured values in the matched path, in capture order.
pub(crate) type Captures = SmallVec<[(usize, usize); 4]>;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum NodeKind {
    #[default]
    Static,
    Param(String),
    Wildcard,
}

/// One node of a method's route tree.
#[derive(Default)]
pub struct Node {
    // Literal text matched by a static node; empty for param/wildcard nodes
    // and for the root.
    prefix: String,
    kind: NodeKind,
    // Static children, no two sharing a first character.
    children: Vec<Node>,
    param: Option<Box<Node>>,
    wildcard: Option<Box<Node>>,
    endpoint: Option<Endpoint>,
}

impl Node {
    /// Creates an empty tree root.
    pub fn new() -> Self {
        Self::default()
    }

    fn with_kind(prefix: &str, kind: NodeKind) -> Self {
        Self {
            prefix: prefix.to_owned(),
            kind,
            ..Self::default()
        }
    }

    /// Registers `path` with its handler chain.
    ///
    /// # Errors
    ///
    /// Returns [`RouteError::InvalidPattern`] for malformed patterns,
    /// [`RouteError::TooManyParams`] above `max_params`, and
    /// [`RouteError::Conflict`] when the pattern overlaps an existing route.
    /// A conflicting insert may have split nodes on the way down; splitting
    /// never changes which paths the tree accepts.
    pub fn insert(
        &mut self,
        path: &str,
        handlers: HandlersChain,
        max_params: usize,
    ) -> Result<(), RouteError> {
        let tokens = tokenize(path)?;
        let param_names = param_names(path)?;
        if param_names.len() > max_params {
            return Err(RouteError::TooManyParams {
                path: path.to_owned(),
                count: param_names.len(),
                max: max_params,
            });
        }

        let conflict = |reason| RouteError::Conflict {
            path: path.to_owned(),
            reason,
        };

        let mut node = self;
        for token in tokens {
            node = match token {
                Token::Static(literal) => node.insert_static(literal).map_err(conflict)?,
                Token::Param(name) => node.insert_param(name).map_err(conflict)?,
                Token::Wildcard => node.insert_wildcard().map_err(conflict)?,
            };
        }

        if node.endpoint.is_some() {
            return Err(conflict("a route is already registered for this pattern"));
        }
        node.endpoint = Some(Endpoint {
            handlers,
            param_names,
        });
        Ok(())
    }

    fn insert_static(&mut self, literal: &str) -> Result<&mut Node, &'static str> {
        let Some(first) = literal.chars().next() else {
            return Ok(self);
        };
        if self.param.is_some() {
            return Err("a static segment cannot share a position with a parameter");
        }
        if self.wildcard.is_some() {
            return Err("a static segment cannot share a position with a wildcard");
        }

        let Some(idx) = self
            .children
            .iter()
            .position(|child| child.prefix.starts_with(first))
        else {
            self.children.push(Node::with_kind(literal, NodeKind::Static));
            let last = self.children.len() - 1;
            return Ok(&mut self.children[last]);
        };

        let child = &mut self.children[idx];
        let common = common_prefix_len(&child.prefix, literal);
        if common < child.prefix.len() {
            child.split_at(common);
        }
        child.insert_static(&literal[common..])
    }

    fn insert_param(&mut self, name: &str) -> Result<&mut Node, &'static str> {
        if !self.children.is_empty() {
            return Err("a parameter cannot share a position with a static segment");
        }
        if self.wildcard.is_some() {
            return Err("a parameter cannot share a position with a wildcard");
        }

        let param = self
            .param
            .get_or_insert_with(|| Box::new(Node::with_kind("", NodeKind::Param(name.to_owned()))));
        if param.kind == NodeKind::Param(name.to_owned()) {
            Ok(param.as_mut())
        } else {
            Err("a different parameter name is already bound at this position")
        }
    }

    fn insert_wildcard(&mut self) -> Result<&mut Node, &'static str> {
        if !self.children.is_empty() {
            return Err("a wildcard cannot share a position with a static segment");
        }
        if self.param.is_some() {
            return Err("a wildcard cannot share a position with a parameter");
        }
        Ok(self
            .wildcard
            .get_or_insert_with(|| Box::new(Node::with_kind("", NodeKind::Wildcard)))
            .as_mut())
    }

    // Keep `prefix[..at]` here and push everything else one level down.
    fn split_at(&mut self, at: usize) {
        let lower = Node {
            prefix: self.prefix.split_off(at),
            kind: NodeKind::Static,
            children: mem::take(&mut self.children),
            param: self.param.take(),
            wildcard: self.wildcard.take(),
            endpoint: self.endpoint.take(),
        };
        self.children = vec![lower];
    }

    /// Resolves `path` to an endpoint and the byte ranges of its captures.
    ///
    /// Static children are tried first, then the parameter, then the
    /// wildcard.
    pub(crate) fn find(&self, path: &str) -> Option<(&Endpoint, Captures)> {
        let mut captures = Captures::new();
        let endpoint = self.find_from(path, 0, &mut captures)?;
        Some((endpoint, captures))
    }

    fn find_from(&self, path: &str, pos: usize, captures: &mut Captures) -> Option<&Endpoint> {
        // Param and wildcard nodes are entered with their capture already taken.
        let pos = if self.kind == NodeKind::Static {
            if !path[pos..].starts_with(self.prefix.as_str()) {
                return None;
            }
            pos + self.prefix.len()
        } else {
            pos
        };

        if self.kind == NodeKind::Wildcard {
            return self.endpoint.as_ref();
        }

        if pos == path.len() {
            if let Some(endpoint) = &self.endpoint {
                return Some(endpoint);
            }
        } else {
            let rest = &path[pos..];
            if let Some(child) = self
                .children
                .iter()
                .find(|child| rest.starts_with(child.prefix.as_str()))
            {
                if let Some(endpoint) = child.find_from(path, pos, captures) {
                    return Some(endpoint);
                }
            }

            if let Some(param) = &self.param {
                let end = rest.find('/').map_or(path.len(), |i| pos + i);
                if end > pos {
                    captures.push((pos, end));
                    if let Some(endpoint) = param.find_from(path, end, captures) {
                        return Some(endpoint);
                    }
                    captures.pop();
                }
            }
        }

        // A wildcard only ever hangs off a node whose text ends in '/', so the
        // capture starts one byte back to include that slash.
        if let Some(wildcard) = &self.wildcard {
            captures.push((pos - 1, path.len()));
            if let Some(endpoint) = wildcard.find_from(path, pos, captures) {
                return Some(endpoint);
            }
            captures.pop();
        }

        None
    }

    /// Visits every endpoint in the tree.
    pub(crate) fn for_each_endpoint_mut(&mut self, f: &mut dyn FnMut(&mut Endpoint)) {
        if let Some(endpoint) = &mut self.endpoint {
            f(endpoint);
        }
        for child in &mut self.children {
            child.for_each_endpoint_mut(f);
        }
        if let Some(param) = &mut self.param {
            param.for_each_endpoint_mut(f);
        }
        if let Some(wildcard) = &mut self.wildcard {
            wildcard.for_each_endpoint_mut(f);
        }
    }

    /// Number of routes registered in this tree.
    pub fn len(&self) -> usize {
        usize::from(self.endpoint.is_some())
            + self.children.iter().map(Node::len).sum::<usize>()
            + self.param.as_deref().map_or(0, Node::len)
            + self.wildcard.as_deref().map_or(0, Node::len)
    }

    /// Returns `true` if no route is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
