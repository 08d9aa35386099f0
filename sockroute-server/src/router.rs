//! Hierarchical route table.
//!
//! Every entry holds a single path segment. Registering a multi-segment path
//! builds a chain of nested tables, so `a/b/c` becomes `/a` -> `/b` -> `/c`.
//! A trailing slash yields an empty last segment: `l3/` registers the root of
//! a table mounted at `/l3`, reachable as `/l3/` and distinct from `/l3`.

use crate::error::ConfigError;
use crate::handler::Handler;
use serde::Serialize;
use sockroute_protocol::Method;
use std::fmt;
use std::sync::Arc;

const NO_DESCRIPTION: &str = "No description.";

/// Target of a route entry.
pub enum HandlerNode {
    Leaf(Arc<dyn Handler>),
    SubTable(RouteTable),
}

impl<H: Handler> From<H> for HandlerNode {
    fn from(handler: H) -> Self {
        HandlerNode::Leaf(Arc::new(handler))
    }
}

impl From<RouteTable> for HandlerNode {
    fn from(table: RouteTable) -> Self {
        HandlerNode::SubTable(table)
    }
}

impl fmt::Debug for HandlerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HandlerNode::Leaf(_) => f.write_str("Leaf"),
            HandlerNode::SubTable(table) => f.debug_tuple("SubTable").field(table).finish(),
        }
    }
}

/// A single `(method, segment, target)` entry.
#[derive(Debug)]
pub struct RouteEntry {
    pub method: Method,
    /// Starts with `/` and contains no other `/`.
    pub segment: String,
    pub target: HandlerNode,
}

/// A flattened route: the handler reachable at an absolute path.
#[derive(Clone)]
pub struct Route {
    pub method: Method,
    pub path: String,
    pub handler: Arc<dyn Handler>,
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .finish()
    }
}

/// Listing entry produced by [`RouteTable::describe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteDescription {
    pub method: Method,
    pub path: String,
    pub description: String,
}

/// Ordered collection of route entries.
#[derive(Debug, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `target` under `method` at `path`.
    ///
    /// The path gets a leading `/` if it lacks one. Multi-segment paths are
    /// split into a chain of single-segment nested tables.
    pub fn route(mut self, method: Method, path: &str, target: impl Into<HandlerNode>) -> Self {
        self.insert(method, path, target.into());
        self
    }

    /// Like [`route`](Self::route) with the method given as a token.
    pub fn register(
        self,
        method: &str,
        path: &str,
        target: impl Into<HandlerNode>,
    ) -> Result<Self, ConfigError> {
        let method = method.parse::<Method>()?;
        Ok(self.route(method, path, target))
    }

    /// Registers `target` at the table's own root, `/`.
    pub fn root(self, method: Method, target: impl Into<HandlerNode>) -> Self {
        self.route(method, "/", target)
    }

    pub fn get(self, path: &str, target: impl Into<HandlerNode>) -> Self {
        self.route(Method::Get, path, target)
    }

    pub fn post(self, path: &str, target: impl Into<HandlerNode>) -> Self {
        self.route(Method::Post, path, target)
    }

    pub fn put(self, path: &str, target: impl Into<HandlerNode>) -> Self {
        self.route(Method::Put, path, target)
    }

    pub fn delete(self, path: &str, target: impl Into<HandlerNode>) -> Self {
        self.route(Method::Delete, path, target)
    }

    fn insert(&mut self, method: Method, path: &str, target: HandlerNode) {
        let path = path.strip_prefix('/').unwrap_or(path);
        let (first, rest) = match path.split_once('/') {
            Some((first, rest)) => (first, Some(rest)),
            None => (path, None),
        };

        let target = match rest {
            Some(rest) => {
                let mut nested = RouteTable::new();
                nested.insert(method, rest, target);
                HandlerNode::SubTable(nested)
            }
            None => target,
        };

        self.entries.push(RouteEntry {
            method,
            segment: format!("/{}", first),
            target,
        });
    }

    /// Raw entries in registration order.
    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Visits every reachable handler depth-first in registration order.
    ///
    /// Nested paths are the concatenation of the segments from the root.
    /// A table mounted at the bare root segment is spliced into its parent,
    /// so `root(Get, table.get("x"))` yields `/x` rather than `//x`: paths stay
    /// normalized and never contain an empty segment. A table mounted at a named
    /// segment keeps its own root leaf as a trailing slash (`l3` gives `/l3/`).
    pub fn traverse<F>(&self, mut visit: F)
    where
        F: FnMut(Method, &str, &Arc<dyn Handler>),
    {
        self.walk("", &mut visit);
    }

    fn walk<F>(&self, prefix: &str, visit: &mut F)
    where
        F: FnMut(Method, &str, &Arc<dyn Handler>),
    {
        for entry in &self.entries {
            match &entry.target {
                HandlerNode::Leaf(handler) => {
                    let path = format!("{}{}", prefix, entry.segment);
                    visit(entry.method, &path, handler);
                }
                HandlerNode::SubTable(table) if entry.segment == "/" => {
                    table.walk(prefix, visit);
                }
                HandlerNode::SubTable(table) => {
                    let path = format!("{}{}", prefix, entry.segment);
                    table.walk(&path, visit);
                }
            }
        }
    }

    /// The flattened view of the table.
    pub fn routes(&self) -> Vec<Route> {
        let mut routes = Vec::new();
        self.traverse(|method, path, handler| {
            routes.push(Route {
                method,
                path: path.to_string(),
                handler: handler.clone(),
            });
        });
        routes
    }

    /// Lists every route with its handler description.
    pub fn describe(&self) -> Vec<RouteDescription> {
        let mut listing = Vec::new();
        self.traverse(|method, path, handler| {
            listing.push(RouteDescription {
                method,
                path: path.to_string(),
                description: handler.description().unwrap_or(NO_DESCRIPTION).to_string(),
            });
        });
        listing
    }
}
