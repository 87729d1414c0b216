//! Pattern router backed by a segment trie.
//!
//! Each registered [`Pattern`] is inserted into a trie keyed by path
//! segments, one trie per host plus one for host-agnostic patterns. Lookup
//! walks the trie depth-first, trying at each node:
//!
//! 1. the literal child for the next segment,
//! 2. the single-segment wildcard child,
//! 3. the trailing multi-segment wildcard.
//!
//! Exact paths therefore beat wildcards, and among wildcard patterns the one
//! with the longest literal prefix wins. Host-specific tries are consulted
//! before the host-agnostic one. At a matching node, a route for the exact
//! method wins over a method-less route, and `HEAD` falls back to `GET`.
//!
//! A path without a trailing slash that only a trailing-slash pattern would
//! match exactly, such as `/dir` for `/dir/`, yields a redirect to the
//! slashed path.
//!
//! Ambiguities are rejected when registering, never when matching. The table
//! is built once and only read afterwards.

use std::collections::{BTreeSet, HashMap};

use http::Method;
use percent_encoding::percent_decode_str;

use crate::pattern::{Pattern, PatternError, Segment};

/// Errors raised while building a [`Router`].
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The pattern string does not parse.
    #[error(transparent)]
    Pattern(#[from] PatternError),

    /// The exact same pattern is already registered.
    #[error("pattern {0:?} is already registered")]
    DuplicatePattern(String),

    /// Another pattern would match exactly the same requests.
    #[error("pattern {new:?} conflicts with {existing:?}")]
    ConflictingPattern {
        /// The pattern being registered.
        new: String,
        /// The pattern already in the table.
        existing: String,
    },
}

/// Wildcard values captured while matching a request path.
///
/// Values are percent-decoded. The anonymous wildcard of a trailing-slash
/// pattern is not captured.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(Vec<(String, String)>);

impl PathParams {
    /// The value captured for wildcard `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Record `value` for wildcard `name`.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// Iterate over `(name, value)` pairs in pattern order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of captured values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was captured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Outcome of [`Router::lookup`].
#[derive(Debug)]
pub enum Lookup<'a, H> {
    /// A route matched.
    Found {
        /// The matched route's handler.
        handler: &'a H,
        /// The matched route's pattern.
        pattern: &'a Pattern,
        /// Captured wildcard values.
        params: PathParams,
    },
    /// The path matched, but only for other methods (sorted).
    MethodNotAllowed(Vec<String>),
    /// Only the path with a trailing slash appended matches; redirect there.
    Redirect(String),
    /// Nothing matched.
    NotFound,
}

#[derive(Debug)]
struct Route<H> {
    pattern: Pattern,
    /// Capture names in trie order; empty for the anonymous trailing wildcard.
    names: Vec<String>,
    handler: H,
}

#[derive(Debug)]
struct Node<H> {
    literals: HashMap<String, Node<H>>,
    wildcard: Option<Box<Node<H>>>,
    rest: Option<Box<Node<H>>>,
    routes: Vec<Route<H>>,
}

impl<H> Default for Node<H> {
    fn default() -> Self {
        Self {
            literals: HashMap::new(),
            wildcard: None,
            rest: None,
            routes: Vec::new(),
        }
    }
}

/// A route table mapping patterns to handlers.
#[derive(Debug)]
pub struct Router<H> {
    hosts: HashMap<String, Node<H>>,
    any_host: Node<H>,
    len: usize,
}

impl<H> Default for Router<H> {
    fn default() -> Self {
        Self {
            hosts: HashMap::new(),
            any_host: Node::default(),
            len: 0,
        }
    }
}

impl<H> Router<H> {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Parse `pattern` and register `handler` for it.
    pub fn register(&mut self, pattern: &str, handler: H) -> Result<(), RouteError> {
        self.register_pattern(Pattern::parse(pattern)?, handler)
    }

    /// Register `handler` for an already parsed pattern.
    pub fn register_pattern(&mut self, pattern: Pattern, handler: H) -> Result<(), RouteError> {
        let root = if pattern.host().is_empty() {
            &mut self.any_host
        } else {
            self.hosts
                .entry(pattern.host().to_ascii_lowercase())
                .or_default()
        };

        let mut node = root;
        let mut names = Vec::new();
        for segment in pattern.segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::End => node.literals.entry(String::new()).or_default(),
                Segment::Wildcard(name) => {
                    names.push(name.clone());
                    node.wildcard.get_or_insert_with(Box::default).as_mut()
                }
                Segment::Rest(name) => {
                    names.push(name.clone());
                    node.rest.get_or_insert_with(Box::default).as_mut()
                }
            };
        }

        if let Some(existing) = node
            .routes
            .iter()
            .find(|route| route.pattern.method() == pattern.method())
        {
            let (new, existing) = (pattern.to_string(), existing.pattern.to_string());
            return Err(if new == existing {
                RouteError::DuplicatePattern(new)
            } else {
                RouteError::ConflictingPattern { new, existing }
            });
        }

        node.routes.push(Route {
            pattern,
            names,
            handler,
        });
        self.len += 1;
        Ok(())
    }

    /// Find the handler for a request.
    ///
    /// `host` should not include a port. `path` should already be clean.
    pub fn lookup(&self, method: &Method, host: &str, path: &str) -> Lookup<'_, H> {
        let found = self.match_path(method, host, path);
        if path.ends_with('/')
            || matches!(&found, Lookup::Found { pattern, .. } if is_exact(pattern, path))
        {
            return found;
        }

        let slashed = format!("{path}/");
        match self.match_path(method, host, &slashed) {
            Lookup::Found { pattern, .. } if is_exact(pattern, &slashed) => {
                Lookup::Redirect(slashed)
            }
            _ => found,
        }
    }

    fn match_path(&self, method: &Method, host: &str, path: &str) -> Lookup<'_, H> {
        let segments: Vec<&str> = path.strip_prefix('/').unwrap_or(path).split('/').collect();
        let mut allowed = BTreeSet::new();

        let host = host.to_ascii_lowercase();
        let tries = self.hosts.get(&host).into_iter().chain([&self.any_host]);
        for root in tries {
            let mut captures = Vec::new();
            if let Some(route) = find(root, &segments, method, &mut captures, &mut allowed) {
                let params = route
                    .names
                    .iter()
                    .zip(captures)
                    .filter(|(name, _)| !name.is_empty())
                    .map(|(name, value)| (name.clone(), value))
                    .collect();
                return Lookup::Found {
                    handler: &route.handler,
                    pattern: &route.pattern,
                    params: PathParams(params),
                };
            }
        }

        if allowed.is_empty() {
            Lookup::NotFound
        } else {
            Lookup::MethodNotAllowed(allowed.into_iter().collect())
        }
    }
}

/// Whether `pattern` matches `path` without its trailing wildcard absorbing
/// any segment.
fn is_exact(pattern: &Pattern, path: &str) -> bool {
    if !matches!(pattern.segments().last(), Some(Segment::Rest(_))) {
        return true;
    }
    path.ends_with('/') && pattern.segments().len() == path.matches('/').count()
}

fn find<'a, H>(
    node: &'a Node<H>,
    segments: &[&str],
    method: &Method,
    captures: &mut Vec<String>,
    allowed: &mut BTreeSet<String>,
) -> Option<&'a Route<H>> {
    let Some((head, tail)) = segments.split_first() else {
        return select(&node.routes, method, allowed);
    };

    let decoded = decode(head);
    if let Some(child) = node.literals.get(decoded.as_str()) {
        if let Some(route) = find(child, tail, method, captures, allowed) {
            return Some(route);
        }
    }

    if !head.is_empty() {
        if let Some(child) = &node.wildcard {
            captures.push(decoded);
            if let Some(route) = find(child, tail, method, captures, allowed) {
                return Some(route);
            }
            captures.pop();
        }
    }

    if let Some(child) = &node.rest {
        captures.push(decode(&segments.join("/")));
        if let Some(route) = select(&child.routes, method, allowed) {
            return Some(route);
        }
        captures.pop();
    }

    None
}

/// Pick the route for `method` among routes sharing one path, recording the
/// methods that would have matched otherwise.
fn select<'a, H>(
    routes: &'a [Route<H>],
    method: &Method,
    allowed: &mut BTreeSet<String>,
) -> Option<&'a Route<H>> {
    let by_method = |m: &Method| routes.iter().find(|r| r.pattern.method() == Some(m));

    let found = by_method(method)
        .or_else(|| (*method == Method::HEAD).then(|| by_method(&Method::GET)).flatten())
        .or_else(|| routes.iter().find(|r| r.pattern.method().is_none()));
    if found.is_none() {
        for m in routes.iter().filter_map(|r| r.pattern.method()) {
            allowed.insert(m.to_string());
            if *m == Method::GET {
                allowed.insert(Method::HEAD.to_string());
            }
        }
    }
    found
}

fn decode(segment: &str) -> String {
    percent_decode_str(segment).decode_utf8_lossy().into_owned()
}
