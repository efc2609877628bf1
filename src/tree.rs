//! Segment trie: construction, lookup and middleware resolution.
//!
//! One tree per HTTP method. Each node is one `/`-delimited path segment.
//! A node holds a map of literal children plus at most one *dynamic* child
//! slot, which is a param (`:id`), a regex (`:id(^[0-9]+$)`) or a wildcard
//! (`*`). Because the slot is a single enum, a param and a wildcard can
//! never sit at the same position; trying to register one is a
//! [`RouteError::Conflict`].
//!
//! Lookup is non-backtracking. At every depth a literal child wins; failing
//! that, the dynamic slot is taken and there is no second attempt. A regex
//! child that rejects its segment fails the whole lookup.

use std::collections::{HashMap, VecDeque};
use std::ptr;

use http::Method;
use percent_encoding::percent_decode_str;
use regex::Regex;

use crate::error::RouteError;
use crate::handler::{Handler, Middleware};

// ── Pattern parsing ───────────────────────────────────────────────────────────

/// One parsed segment of a registration pattern.
#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Static(&'a str),
    Param(&'a str),
    Regex { name: &'a str, source: &'a str },
    Wildcard,
}

impl<'a> Segment<'a> {
    fn parse(seg: &'a str, pattern: &str) -> Result<Self, RouteError> {
        let invalid = |reason| RouteError::InvalidPattern { pattern: pattern.to_owned(), reason };

        if seg.contains(['(', ')']) {
            let (name, rest) = seg
                .strip_prefix(':')
                .and_then(|s| s.split_once('('))
                .ok_or_else(|| invalid("regex segments must look like `:name(regex)`"))?;
            let source = rest
                .strip_suffix(')')
                .ok_or_else(|| invalid("regex segment is missing its closing `)`"))?;
            if name.is_empty() {
                return Err(invalid("regex segment has an empty parameter name"));
            }
            return Ok(Self::Regex { name, source });
        }
        if seg == "*" {
            return Ok(Self::Wildcard);
        }
        if let Some(name) = seg.strip_prefix(':') {
            if name.is_empty() {
                return Err(invalid("parameter segment has an empty name"));
            }
            return Ok(Self::Param(name));
        }
        Ok(Self::Static(seg))
    }
}

/// Validates `pattern` and splits it into segments. `/` yields no segments.
pub(crate) fn split_pattern(pattern: &str) -> Result<Vec<&str>, RouteError> {
    let invalid = |reason| RouteError::InvalidPattern { pattern: pattern.to_owned(), reason };

    if pattern.is_empty() {
        return Err(invalid("route is empty"));
    }
    if !pattern.starts_with('/') {
        return Err(invalid("route must start with `/`"));
    }
    if pattern == "/" {
        return Ok(Vec::new());
    }
    if pattern.ends_with('/') {
        return Err(invalid("route must not end with `/`"));
    }
    let segments: Vec<&str> = pattern[1..].split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(invalid("route must not contain empty segments (`//`)"));
    }
    Ok(segments)
}

// ── Node ──────────────────────────────────────────────────────────────────────

/// The non-literal child slot of a node. At most one kind per position.
#[derive(Default)]
pub(crate) enum Dynamic {
    #[default]
    None,
    Param { name: String, node: Box<Node> },
    Regex { name: String, pattern: Regex, node: Box<Node> },
    Wildcard(Box<Node>),
}

impl Dynamic {
    fn node(&self) -> Option<&Node> {
        match self {
            Self::None => None,
            Self::Param { node, .. } | Self::Regex { node, .. } | Self::Wildcard(node) => Some(node.as_ref()),
        }
    }

    fn node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Self::None => None,
            Self::Param { node, .. } | Self::Regex { node, .. } | Self::Wildcard(node) => Some(node.as_mut()),
        }
    }
}

/// One trie vertex.
#[derive(Default)]
pub(crate) struct Node {
    /// The pattern segment as registered, e.g. `users`, `:id`, `*`.
    segment: String,
    children: HashMap<String, Node>,
    dynamic: Dynamic,
    pub(crate) handler: Option<Handler>,
    /// Middleware registered directly on this node.
    middleware: Vec<Middleware>,
    /// Ancestor-inclusive chain, filled in by [`Node::resolve_middleware`].
    pub(crate) resolved: Vec<Middleware>,
    /// Full pattern that terminates here; empty for structural nodes.
    pub(crate) route: String,
    /// The pattern whose registration created this node.
    origin: String,
}

/// A successful lookup.
pub(crate) struct Match<'a> {
    pub(crate) node: &'a Node,
    pub(crate) params: Option<HashMap<String, String>>,
}

impl Node {
    pub(crate) fn root() -> Self {
        Self { segment: "/".to_owned(), ..Self::default() }
    }

    fn with_segment(segment: &str, origin: &str) -> Self {
        Self { segment: segment.to_owned(), origin: origin.to_owned(), ..Self::default() }
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty() && matches!(self.dynamic, Dynamic::None)
    }

    // ── Construction ──────────────────────────────────────────────────────────

    /// Registers `pattern` under this root.
    ///
    /// With `handler == None` only the middleware is attached, which is how
    /// cross-cutting behaviour is added to an existing route after the fact.
    pub(crate) fn insert(
        &mut self,
        method: &Method,
        pattern: &str,
        handler: Option<Handler>,
        middleware: Vec<Middleware>,
    ) -> Result<(), RouteError> {
        let segments = split_pattern(pattern)?;

        let mut node = self;
        for seg in segments {
            node = node.child_or_create(seg, pattern)?;
        }

        if let Some(handler) = handler {
            if node.handler.is_some() {
                return Err(RouteError::Duplicate {
                    method: method.clone(),
                    pattern: pattern.to_owned(),
                });
            }
            node.handler = Some(handler);
        }
        node.middleware.extend(middleware);
        node.route = pattern.to_owned();
        Ok(())
    }

    fn child_or_create(&mut self, seg: &str, pattern: &str) -> Result<&mut Node, RouteError> {
        let parsed = Segment::parse(seg, pattern)?;
        if let Segment::Static(key) = parsed {
            return Ok(self
                .children
                .entry(key.to_owned())
                .or_insert_with(|| Node::with_segment(key, pattern)));
        }

        if let Some(existing) = self.dynamic.node() {
            // The segment text encodes kind, name and regex, so any
            // difference is a conflict.
            if existing.segment != seg {
                return Err(RouteError::Conflict {
                    pattern: pattern.to_owned(),
                    new: seg.to_owned(),
                    existing: existing.segment.clone(),
                    existing_route: existing.origin.clone(),
                });
            }
        } else {
            let node = Box::new(Node::with_segment(seg, pattern));
            self.dynamic = match parsed {
                Segment::Param(name) => Dynamic::Param { name: name.to_owned(), node },
                Segment::Regex { name, source } => Dynamic::Regex {
                    name: name.to_owned(),
                    pattern: Regex::new(source).map_err(|source| RouteError::InvalidRegex {
                        pattern: pattern.to_owned(),
                        segment: seg.to_owned(),
                        source,
                    })?,
                    node,
                },
                Segment::Wildcard => Dynamic::Wildcard(node),
                Segment::Static(_) => unreachable!("static segments return early"),
            };
        }

        match self.dynamic.node_mut() {
            Some(node) => Ok(node),
            None => unreachable!("dynamic slot populated above"),
        }
    }

    // ── Lookup ────────────────────────────────────────────────────────────────

    /// Walks `path` from this root. Returns the terminal node even when it
    /// has no handler; the caller decides what that means.
    ///
    /// `path` is the raw request path. Each segment is percent-decoded before
    /// it is matched or captured; a segment that does not decode to UTF-8
    /// matches nothing.
    pub(crate) fn find(&self, path: &str) -> Option<Match<'_>> {
        let mut params: Option<HashMap<String, String>> = None;
        if path == "/" {
            return Some(Match { node: self, params });
        }

        let mut node = self;
        for raw in path.trim_matches('/').split('/') {
            if raw.is_empty() {
                return None;
            }
            // Split first, then decode, so `%2F` stays inside its segment.
            let seg = percent_decode_str(raw).decode_utf8().ok()?;
            let seg = seg.as_ref();
            node = match node.children.get(seg) {
                Some(child) => child,
                None => match &node.dynamic {
                    Dynamic::None => return None,
                    Dynamic::Regex { name, pattern, node } => {
                        if !pattern.is_match(seg) {
                            return None;
                        }
                        params.get_or_insert_with(HashMap::new).insert(name.clone(), seg.to_owned());
                        node.as_ref()
                    }
                    Dynamic::Param { name, node } => {
                        params.get_or_insert_with(HashMap::new).insert(name.clone(), seg.to_owned());
                        node.as_ref()
                    }
                    Dynamic::Wildcard(node) => {
                        // A childless wildcard swallows the rest of the path.
                        if node.is_leaf() {
                            return Some(Match { node: node.as_ref(), params });
                        }
                        node.as_ref()
                    }
                },
            };
        }
        Some(Match { node, params })
    }

    // ── Middleware resolution ─────────────────────────────────────────────────

    /// Caches, on every node, the middleware that applies to requests ending
    /// there. Runs once, after registration and before serving.
    ///
    /// Returns the number of nodes visited.
    pub(crate) fn resolve_middleware(&mut self) -> usize {
        // Pass 1: breadth-first over the immutable tree, computing chains for
        // every node that terminates a route.
        let mut chains: HashMap<String, Vec<Middleware>> = HashMap::new();
        let mut queue: VecDeque<&Node> = VecDeque::from([&*self]);
        let mut visited = 0;
        while let Some(node) = queue.pop_front() {
            visited += 1;
            if !node.route.is_empty() {
                chains.insert(node.route.clone(), self.collect_middleware(node));
            }
            queue.extend(node.children.values());
            queue.extend(node.dynamic.node());
        }

        // Pass 2: store them. Structural nodes keep their own list.
        let mut stack: Vec<&mut Node> = vec![self];
        while let Some(node) = stack.pop() {
            node.resolved = chains
                .remove(&node.route)
                .unwrap_or_else(|| node.middleware.clone());
            stack.extend(node.children.values_mut());
            stack.extend(node.dynamic.node_mut());
        }
        visited
    }

    /// Concatenates the middleware of every node the terminal's pattern
    /// passes through, root first. At each depth both the literal child with
    /// the pattern's segment and the dynamic slot count, so middleware on
    /// `/a/*` also covers `/a/b`. The terminal's own list always goes last.
    fn collect_middleware(&self, terminal: &Node) -> Vec<Middleware> {
        let mut chain = Vec::new();
        if ptr::eq(self, terminal) {
            chain.extend_from_slice(&terminal.middleware);
            return chain;
        }
        chain.extend_from_slice(&self.middleware);

        let segments = terminal.route.trim_matches('/').split('/');
        let mut level: Vec<&Node> = vec![self];
        for seg in segments {
            let mut next = Vec::new();
            for node in level {
                let static_child = node.children.get(seg);
                for child in static_child.into_iter().chain(node.dynamic.node()) {
                    if !ptr::eq(child, terminal) {
                        chain.extend_from_slice(&child.middleware);
                    }
                    next.push(child);
                }
            }
            level = next;
        }

        chain.extend_from_slice(&terminal.middleware);
        chain
    }
}
