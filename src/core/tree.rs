//! Compressed radix tree mapping route patterns to endpoints.
//!
//! Route syntax:
//! * literal segments, matched byte for byte
//! * `:name` captures a single segment (up to the next `/`)
//! * `*name` must be the final segment and captures the remainder of the
//!   path, including its leading `/`
//!
//! A request path matches at most one route. Each level keeps its children
//! ordered by priority (number of routes reachable through the child) so the
//! busiest branches are probed first; `indices` mirrors `children` with the
//! first byte of each child's path.
//!
//! The tree is built during a single-threaded registration phase and only
//! read afterwards, so lookups need no synchronisation.
use std::{fmt, mem};

use thiserror::Error;

use crate::core::params::Params;

/// Errors raised while registering or resolving routes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TreeError {
    #[error("route '{route}' must begin with '/'")]
    MissingLeadingSlash { route: String },

    #[error("wildcards must be named with a non-empty name in route '{route}'")]
    EmptyWildcardName { route: String },

    #[error("only one wildcard per path segment is allowed, has '{segment}' in route '{route}'")]
    MultipleWildcards { segment: String, route: String },

    #[error("catch-all routes are only allowed at the end of the path in route '{route}'")]
    CatchAllNotLast { route: String },

    #[error("no '/' before catch-all in route '{route}'")]
    MissingSlashBeforeCatchAll { route: String },

    #[error("catch-all conflicts with existing route for the path segment root in route '{route}'")]
    CatchAllConflict { route: String },

    #[error("wildcard segment '{wildcard}' conflicts with existing children in route '{route}'")]
    WildcardConflict { wildcard: String, route: String },

    #[error(
        "'{segment}' in new route '{route}' conflicts with existing wildcard '{wildcard}' in existing prefix '{prefix}'"
    )]
    ConflictingRoute {
        segment: String,
        route: String,
        wildcard: String,
        prefix: String,
    },

    #[error("duplicate route '{route}'")]
    DuplicateRoute { route: String },

    #[error("invalid node type {found} below '{prefix}'")]
    InvalidNodeType { found: NodeType, prefix: String },
}

/// Kind of a tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeType {
    Root,
    Static,
    Param,
    CatchAll,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeType::Root => "root",
            NodeType::Static => "static",
            NodeType::Param => "param",
            NodeType::CatchAll => "catch-all",
        };
        f.write_str(name)
    }
}

/// Result of resolving a path with [`Tree::get_value`].
#[derive(Debug)]
pub struct RouteMatch<'t, T> {
    /// Value registered for the route, `None` when nothing matched.
    pub value: Option<&'t T>,
    /// Path parameters in route order. Empty when `value` is `None`.
    pub params: Params,
    /// The path would match if a trailing slash were added or removed.
    pub tsr: bool,
}

/// Result of [`Tree::get_value_into`]; parameters land in the caller's buffer.
#[derive(Debug, Clone, Copy)]
pub struct Lookup<'t, T> {
    pub value: Option<&'t T>,
    pub tsr: bool,
}

impl<'t, T> Lookup<'t, T> {
    fn found(value: &'t T) -> Self {
        Self {
            value: Some(value),
            tsr: false,
        }
    }

    fn miss(tsr: bool) -> Self {
        Self { value: None, tsr }
    }
}

#[derive(Debug)]
struct Node<T> {
    path: Vec<u8>,
    indices: Vec<u8>,
    children: Vec<Node<T>>,
    node_type: NodeType,
    wild_child: bool,
    priority: u32,
    max_params: usize,
    value: Option<T>,
}

/// Radix tree of routes.
#[derive(Debug)]
pub struct Tree<T> {
    root: Node<T>,
}

impl<T> Default for Tree<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Tree<T> {
    pub fn new() -> Self {
        Self {
            root: Node::new(NodeType::Root),
        }
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.root.priority as usize
    }

    pub fn is_empty(&self) -> bool {
        self.root.priority == 0
    }

    /// Upper bound on the number of parameters any route captures.
    pub fn max_params(&self) -> usize {
        self.root.max_params
    }

    /// Register `value` under `route`.
    ///
    /// The pattern is fully validated before the tree is touched, and
    /// priorities are only updated once the insertion succeeded, so a
    /// rejected route leaves the tree answering lookups exactly as before.
    pub fn add_route(&mut self, route: &str, value: T) -> Result<(), TreeError> {
        if !route.starts_with('/') {
            return Err(TreeError::MissingLeadingSlash {
                route: route.to_string(),
            });
        }
        validate_pattern(route)?;

        let full = route.as_bytes();
        if self.root.path.is_empty() && self.root.children.is_empty() {
            self.root.insert_child(full, route, value)?;
            self.root.node_type = NodeType::Root;
        } else {
            self.root.insert(full, route, value)?;
        }
        self.root.record_insertion(full);
        Ok(())
    }

    /// Resolve `path`, allocating a parameter buffer sized for the deepest
    /// route.
    pub fn get_value(&self, path: &str) -> Result<RouteMatch<'_, T>, TreeError> {
        let mut params = Params::with_capacity(self.max_params());
        let lookup = self.get_value_into(path, &mut params)?;
        Ok(RouteMatch {
            value: lookup.value,
            params,
            tsr: lookup.tsr,
        })
    }

    /// Resolve `path`, appending captured parameters to `params`. On a miss
    /// `params` is left empty.
    pub fn get_value_into<'t>(
        &'t self,
        path: &str,
        params: &mut Params,
    ) -> Result<Lookup<'t, T>, TreeError> {
        params.clear();
        params.reserve(self.max_params());
        let lookup = self.root.lookup(path, params)?;
        if lookup.value.is_none() {
            params.clear();
        }
        Ok(lookup)
    }

    /// Case-insensitive lookup returning the path with the registered casing.
    ///
    /// With `fix_trailing_slash` a missing or superfluous trailing slash is
    /// corrected as well; otherwise only exact case-insensitive matches count.
    pub fn find_case_insensitive_path(
        &self,
        path: &str,
        fix_trailing_slash: bool,
    ) -> Result<Option<String>, TreeError> {
        let mut corrected = Vec::with_capacity(path.len() + 1);
        if self
            .root
            .find_case_insensitive(path.as_bytes(), &mut corrected, fix_trailing_slash)?
        {
            Ok(String::from_utf8(corrected).ok())
        } else {
            Ok(None)
        }
    }
}

impl<T> Node<T> {
    fn new(node_type: NodeType) -> Self {
        Self {
            path: Vec::new(),
            indices: Vec::new(),
            children: Vec::new(),
            node_type,
            wild_child: false,
            priority: 0,
            max_params: 0,
            value: None,
        }
    }

    /// Walk the existing tree along `full`, splitting edges as needed, and
    /// attach `value` where the new route diverges.
    fn insert(&mut self, full: &[u8], route: &str, value: T) -> Result<(), TreeError> {
        let mut n = self;
        let mut path = full;

        loop {
            let i = longest_common_prefix(path, &n.path);
            if i < n.path.len() {
                n.split_at(i);
            }

            if i == path.len() {
                if n.value.is_some() {
                    return Err(TreeError::DuplicateRoute {
                        route: route.to_string(),
                    });
                }
                n.value = Some(value);
                return Ok(());
            }

            path = &path[i..];

            if n.wild_child {
                n = &mut n.children[0];

                if n.node_type == NodeType::CatchAll && path == n.path.as_slice() {
                    return Err(TreeError::DuplicateRoute {
                        route: route.to_string(),
                    });
                }

                // Same wildcard, and not a longer name such as :name vs :names.
                let fits = path.starts_with(&n.path)
                    && n.node_type != NodeType::CatchAll
                    && (n.path.len() >= path.len() || path[n.path.len()] == b'/');
                if fits {
                    continue;
                }

                let segment = if n.node_type == NodeType::CatchAll {
                    path
                } else {
                    path.split(|&b| b == b'/').next().unwrap_or(path)
                };
                let segment = String::from_utf8_lossy(segment).into_owned();
                let at = route.find(segment.as_str()).unwrap_or(0);
                return Err(TreeError::ConflictingRoute {
                    prefix: format!("{}{}", &route[..at], String::from_utf8_lossy(&n.path)),
                    wildcard: String::from_utf8_lossy(&n.path).into_owned(),
                    route: route.to_string(),
                    segment,
                });
            }

            let c = path[0];

            // '/' after a param
            if n.node_type == NodeType::Param && c == b'/' && n.children.len() == 1 {
                n = &mut n.children[0];
                continue;
            }

            if let Some(pos) = n.indices.iter().position(|&b| b == c) {
                n = &mut n.children[pos];
                continue;
            }

            if c != b':' && c != b'*' {
                let mut child = Node::new(NodeType::Static);
                child.insert_child(path, route, value)?;
                n.indices.push(c);
                n.children.push(child);
                return Ok(());
            }

            return n.insert_child(path, route, value);
        }
    }

    /// Move everything from byte `i` of this node's path into a new static
    /// child.
    fn split_at(&mut self, i: usize) {
        let child = Node {
            path: self.path.split_off(i),
            indices: mem::take(&mut self.indices),
            children: mem::take(&mut self.children),
            node_type: NodeType::Static,
            wild_child: self.wild_child,
            priority: self.priority,
            max_params: self.max_params,
            value: self.value.take(),
        };
        self.indices = vec![child.path[0]];
        self.children = vec![child];
        self.wild_child = false;
    }

    /// Build the chain of nodes for `path` below this (childless) node.
    fn insert_child(&mut self, mut path: &[u8], route: &str, value: T) -> Result<(), TreeError> {
        let mut n = self;

        while let Some((start, wildcard, _)) = find_wildcard(path) {
            if !n.children.is_empty() {
                return Err(TreeError::WildcardConflict {
                    wildcard: String::from_utf8_lossy(wildcard).into_owned(),
                    route: route.to_string(),
                });
            }

            if wildcard[0] == b':' {
                if start > 0 {
                    n.path = path[..start].to_vec();
                    path = &path[start..];
                }

                let mut param = Node::new(NodeType::Param);
                param.path = wildcard.to_vec();
                n.wild_child = true;
                n.children = vec![param];
                n = &mut n.children[0];

                // More segments follow the param, starting with '/'.
                if wildcard.len() < path.len() {
                    path = &path[wildcard.len()..];
                    n.children = vec![Node::new(NodeType::Static)];
                    n = &mut n.children[0];
                    continue;
                }

                n.value = Some(value);
                return Ok(());
            }

            if n.path.last() == Some(&b'/') {
                return Err(TreeError::CatchAllConflict {
                    route: route.to_string(),
                });
            }
            let slash = match start.checked_sub(1) {
                Some(slash) if path[slash] == b'/' => slash,
                _ => {
                    return Err(TreeError::MissingSlashBeforeCatchAll {
                        route: route.to_string(),
                    });
                }
            };

            let mut leaf = Node::new(NodeType::CatchAll);
            leaf.path = path[slash..].to_vec();
            leaf.value = Some(value);

            let mut catch_all = Node::new(NodeType::CatchAll);
            catch_all.wild_child = true;
            catch_all.children = vec![leaf];

            n.path = path[..slash].to_vec();
            n.children = vec![catch_all];
            n.indices = vec![b'/'];
            return Ok(());
        }

        n.path = path.to_vec();
        n.value = Some(value);
        Ok(())
    }

    /// Bump priorities and parameter bounds along a freshly inserted route,
    /// re-sorting each level so busier children come first.
    fn record_insertion(&mut self, full: &[u8]) {
        let mut n = self;
        let mut path = full;
        n.priority += 1;

        loop {
            n.max_params = n.max_params.max(count_params(path));
            path = &path[n.path.len().min(path.len())..];
            if path.is_empty() || n.children.is_empty() {
                return;
            }

            let next = if n.wild_child || n.node_type == NodeType::Param {
                n.children[0].priority += 1;
                0
            } else {
                match n.indices.iter().position(|&b| b == path[0]) {
                    Some(pos) => n.promote_child(pos),
                    None => return,
                }
            };
            n = &mut n.children[next];
        }
    }

    /// Increment the priority of the child at `pos` and move it forward past
    /// siblings with a strictly lower priority. Returns its new position.
    fn promote_child(&mut self, pos: usize) -> usize {
        self.children[pos].priority += 1;
        let priority = self.children[pos].priority;

        let mut new_pos = pos;
        while new_pos > 0 && self.children[new_pos - 1].priority < priority {
            self.children.swap(new_pos - 1, new_pos);
            self.indices.swap(new_pos - 1, new_pos);
            new_pos -= 1;
        }
        new_pos
    }

    fn lookup<'t>(&'t self, full: &str, params: &mut Params) -> Result<Lookup<'t, T>, TreeError> {
        let mut n = self;
        let mut path = full.as_bytes();
        // Byte offset of `path` within `full`.
        let mut offset = 0;

        loop {
            let prefix = n.path.as_slice();

            if path.len() > prefix.len() {
                if path.starts_with(prefix) {
                    path = &path[prefix.len()..];
                    offset += prefix.len();

                    if !n.wild_child {
                        if let Some(pos) = n.indices.iter().position(|&b| b == path[0]) {
                            n = &n.children[pos];
                            continue;
                        }
                        // Only a trailing slash is left over.
                        return Ok(Lookup::miss(path == b"/" && n.value.is_some()));
                    }

                    n = &n.children[0];
                    match n.node_type {
                        NodeType::Param => {
                            let end = path.iter().position(|&b| b == b'/').unwrap_or(path.len());
                            params.push(
                                String::from_utf8_lossy(&n.path[1..]),
                                capture(full, offset, offset + end, &n.path)?,
                            );

                            if end < path.len() {
                                if !n.children.is_empty() {
                                    path = &path[end..];
                                    offset += end;
                                    n = &n.children[0];
                                    continue;
                                }
                                return Ok(Lookup::miss(path.len() == end + 1));
                            }

                            if let Some(value) = &n.value {
                                return Ok(Lookup::found(value));
                            }
                            if let [child] = n.children.as_slice() {
                                let tsr = (child.path == b"/" && child.value.is_some())
                                    || (child.path.is_empty() && child.indices == b"/");
                                return Ok(Lookup::miss(tsr));
                            }
                            return Ok(Lookup::miss(false));
                        }
                        NodeType::CatchAll => {
                            params.push(
                                String::from_utf8_lossy(n.path.get(2..).unwrap_or_default()),
                                capture(full, offset, full.len(), &n.path)?,
                            );
                            return Ok(match &n.value {
                                Some(value) => Lookup::found(value),
                                None => Lookup::miss(false),
                            });
                        }
                        found => {
                            return Err(TreeError::InvalidNodeType {
                                found,
                                prefix: String::from_utf8_lossy(&full.as_bytes()[..offset])
                                    .into_owned(),
                            });
                        }
                    }
                }
            } else if path == prefix {
                if let Some(value) = &n.value {
                    return Ok(Lookup::found(value));
                }

                // A wildcard child implies a route for this path plus a slash.
                if path == b"/" && n.wild_child && n.node_type != NodeType::Root {
                    return Ok(Lookup::miss(true));
                }
                if path == b"/" && n.node_type == NodeType::Static {
                    return Ok(Lookup::miss(true));
                }

                if let Some(pos) = n.indices.iter().position(|&b| b == b'/') {
                    let child = &n.children[pos];
                    return Ok(Lookup::miss(child.ends_route_with_slash()));
                }
                return Ok(Lookup::miss(false));
            }

            // Nothing found. Recommend the extra trailing slash when a leaf
            // exists for it.
            let tsr = path == b"/"
                || (prefix.len() == path.len() + 1
                    && prefix[path.len()] == b'/'
                    && path == &prefix[..path.len()]
                    && n.value.is_some());
            return Ok(Lookup::miss(tsr));
        }
    }

    /// This node is the `/` completing a route, or the catch-all below one.
    fn ends_route_with_slash(&self) -> bool {
        (self.path.len() == 1 && self.value.is_some())
            || (self.node_type == NodeType::CatchAll
                && self.children.first().is_some_and(|leaf| leaf.value.is_some()))
    }

    fn find_case_insensitive(
        &self,
        mut path: &[u8],
        corrected: &mut Vec<u8>,
        fix_trailing_slash: bool,
    ) -> Result<bool, TreeError> {
        let mut n = self;

        loop {
            let prefix = n.path.as_slice();

            if path.len() >= prefix.len() && path[..prefix.len()].eq_ignore_ascii_case(prefix) {
                path = &path[prefix.len()..];
                corrected.extend_from_slice(prefix);

                if path.is_empty() {
                    if n.value.is_some() {
                        return Ok(true);
                    }
                    if fix_trailing_slash {
                        if let Some(pos) = n.indices.iter().position(|&b| b == b'/') {
                            if n.children[pos].ends_route_with_slash() {
                                corrected.push(b'/');
                                return Ok(true);
                            }
                        }
                    }
                    return Ok(false);
                }

                if !n.wild_child {
                    let mark = corrected.len();
                    for (pos, index) in n.indices.iter().enumerate() {
                        if !index.eq_ignore_ascii_case(&path[0]) {
                            continue;
                        }
                        if n.children[pos].find_case_insensitive(path, corrected, fix_trailing_slash)? {
                            return Ok(true);
                        }
                        corrected.truncate(mark);
                    }
                    // Drop a superfluous trailing slash.
                    return Ok(fix_trailing_slash && path == b"/" && n.value.is_some());
                }

                n = &n.children[0];
                match n.node_type {
                    NodeType::Param => {
                        let end = path.iter().position(|&b| b == b'/').unwrap_or(path.len());
                        corrected.extend_from_slice(&path[..end]);

                        if end < path.len() {
                            if !n.children.is_empty() {
                                path = &path[end..];
                                n = &n.children[0];
                                continue;
                            }
                            return Ok(fix_trailing_slash && path.len() == end + 1);
                        }

                        if n.value.is_some() {
                            return Ok(true);
                        }
                        if fix_trailing_slash {
                            if let [child] = n.children.as_slice() {
                                if child.path == b"/" && child.value.is_some() {
                                    corrected.push(b'/');
                                    return Ok(true);
                                }
                            }
                        }
                        return Ok(false);
                    }
                    NodeType::CatchAll => {
                        corrected.extend_from_slice(path);
                        return Ok(n.value.is_some());
                    }
                    found => {
                        return Err(TreeError::InvalidNodeType {
                            found,
                            prefix: String::from_utf8_lossy(corrected).into_owned(),
                        });
                    }
                }
            }

            if fix_trailing_slash {
                if path == b"/" {
                    return Ok(true);
                }
                if path.len() + 1 == prefix.len()
                    && prefix[path.len()] == b'/'
                    && path.eq_ignore_ascii_case(&prefix[..path.len()])
                    && n.value.is_some()
                {
                    corrected.extend_from_slice(prefix);
                    return Ok(true);
                }
            }
            return Ok(false);
        }
    }
}

/// Slice a parameter value out of the request path.
fn capture(full: &str, start: usize, end: usize, wildcard: &[u8]) -> Result<String, TreeError> {
    full.get(start..end)
        .map(str::to_string)
        .ok_or_else(|| TreeError::InvalidNodeType {
            found: NodeType::Param,
            prefix: format!(
                "{} (capture {start}..{end} for '{}')",
                full.get(..start).unwrap_or_default(),
                String::from_utf8_lossy(wildcard)
            ),
        })
}

fn longest_common_prefix(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

fn count_params(path: &[u8]) -> usize {
    path.iter().filter(|&&b| b == b':' || b == b'*').count()
}

/// Locate the first wildcard in `path`: its start, the wildcard itself (up to
/// the next `/`), and whether its name is free of further `:`/`*`.
fn find_wildcard(path: &[u8]) -> Option<(usize, &[u8], bool)> {
    let start = path.iter().position(|&b| b == b':' || b == b'*')?;
    let mut valid = true;
    for (offset, &b) in path[start + 1..].iter().enumerate() {
        match b {
            b'/' => return Some((start, &path[start..start + 1 + offset], valid)),
            b':' | b'*' => valid = false,
            _ => {}
        }
    }
    Some((start, &path[start..], valid))
}

fn validate_pattern(route: &str) -> Result<(), TreeError> {
    let bytes = route.as_bytes();
    let mut offset = 0;

    while let Some((start, wildcard, valid)) = find_wildcard(&bytes[offset..]) {
        let start = offset + start;
        if !valid {
            return Err(TreeError::MultipleWildcards {
                segment: String::from_utf8_lossy(wildcard).into_owned(),
                route: route.to_string(),
            });
        }
        if wildcard.len() < 2 {
            return Err(TreeError::EmptyWildcardName {
                route: route.to_string(),
            });
        }
        if wildcard[0] == b'*' {
            if start + wildcard.len() != bytes.len() {
                return Err(TreeError::CatchAllNotLast {
                    route: route.to_string(),
                });
            }
            if start == 0 || bytes[start - 1] != b'/' {
                return Err(TreeError::MissingSlashBeforeCatchAll {
                    route: route.to_string(),
                });
            }
        }
        offset = start + wildcard.len();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(routes: &[&str]) -> Tree<String> {
        let mut tree = Tree::new();
        for route in routes {
            tree.add_route(route, route.to_string())
                .unwrap_or_else(|e| panic!("failed to insert {route}: {e}"));
        }
        tree
    }

    /// Returns the number of routes below `n`, asserting the priority
    /// invariant on the way.
    fn check_priorities<T>(n: &Node<T>) -> u32 {
        let mut priority: u32 = n.children.iter().map(check_priorities).sum();
        if n.value.is_some() {
            priority += 1;
        }
        assert_eq!(
            n.priority,
            priority,
            "priority mismatch for node '{}'",
            String::from_utf8_lossy(&n.path)
        );
        priority
    }

    fn check_children_sorted<T>(n: &Node<T>) {
        if !n.wild_child && n.node_type != NodeType::Param {
            assert_eq!(n.indices.len(), n.children.len());
        }
        for pair in n.children.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
        n.children.iter().for_each(check_children_sorted);
    }

    fn expect(tree: &Tree<String>, path: &str, route: Option<&str>, params: &[(&str, &str)]) {
        let matched = tree.get_value(path).unwrap();
        assert_eq!(matched.value.map(String::as_str), route, "route for {path}");
        let got: Vec<(&str, &str)> = matched
            .params
            .iter()
            .map(|p| (p.key.as_str(), p.value.as_str()))
            .collect();
        assert_eq!(got, params, "params for {path}");
        if route.is_some() {
            assert!(!matched.tsr, "unexpected tsr for {path}");
        }
    }

    #[test]
    fn test_static_routes() {
        let routes = [
            "/hi",
            "/contact",
            "/co",
            "/c",
            "/a",
            "/ab",
            "/doc/",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/α",
            "/β",
        ];
        let tree = build(&routes);

        for route in routes {
            expect(&tree, route, Some(route), &[]);
        }
        expect(&tree, "/", None, &[]);
        expect(&tree, "/con", None, &[]);
        expect(&tree, "/cona", None, &[]);
        expect(&tree, "/no", None, &[]);

        check_priorities(&tree.root);
        check_children_sorted(&tree.root);
        assert_eq!(tree.len(), routes.len());
    }

    #[test]
    fn test_wildcard_routes() {
        let tree = build(&[
            "/",
            "/cmd/:tool/:sub",
            "/cmd/:tool/",
            "/src/*filepath",
            "/search/",
            "/search/:query",
            "/user_:name",
            "/user_:name/about",
            "/files/:dir/*filepath",
            "/doc/",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/info/:user/public",
            "/info/:user/project/:project",
        ]);

        expect(&tree, "/", Some("/"), &[]);
        expect(&tree, "/cmd/test/", Some("/cmd/:tool/"), &[("tool", "test")]);
        expect(&tree, "/cmd/test", None, &[]);
        expect(
            &tree,
            "/cmd/test/3",
            Some("/cmd/:tool/:sub"),
            &[("tool", "test"), ("sub", "3")],
        );
        expect(&tree, "/src/", Some("/src/*filepath"), &[("filepath", "/")]);
        expect(
            &tree,
            "/src/some/file.png",
            Some("/src/*filepath"),
            &[("filepath", "/some/file.png")],
        );
        expect(&tree, "/search/", Some("/search/"), &[]);
        expect(
            &tree,
            "/search/someth!ng+in+ünìcodé",
            Some("/search/:query"),
            &[("query", "someth!ng+in+ünìcodé")],
        );
        expect(&tree, "/search/someth!ng+in+ünìcodé/", None, &[]);
        expect(&tree, "/user_gopher", Some("/user_:name"), &[("name", "gopher")]);
        expect(
            &tree,
            "/user_gopher/about",
            Some("/user_:name/about"),
            &[("name", "gopher")],
        );
        expect(
            &tree,
            "/files/js/inc/framework.js",
            Some("/files/:dir/*filepath"),
            &[("dir", "js"), ("filepath", "/inc/framework.js")],
        );
        expect(
            &tree,
            "/info/gordon/public",
            Some("/info/:user/public"),
            &[("user", "gordon")],
        );
        expect(
            &tree,
            "/info/gordon/project/go",
            Some("/info/:user/project/:project"),
            &[("user", "gordon"), ("project", "go")],
        );

        check_priorities(&tree.root);
        assert_eq!(tree.max_params(), 2);
    }

    #[test]
    fn test_wildcard_conflicts() {
        let cases: &[(&str, bool)] = &[
            ("/cmd/:tool/:sub", false),
            ("/cmd/vet", true),
            ("/src/*filepath", false),
            ("/src/*filepathx", true),
            ("/src/", true),
            ("/src1/", false),
            ("/src1/*filepath", true),
            ("/src2*filepath", true),
            ("/search/:query", false),
            ("/search/invalid", true),
            ("/user_:name", false),
            ("/user_x", true),
            ("/user_:name", true),
            ("/id:id", false),
            ("/id/:id", true),
        ];

        let mut tree = Tree::new();
        for (route, conflict) in cases {
            let result = tree.add_route(route, route.to_string());
            assert_eq!(result.is_err(), *conflict, "route {route}: {result:?}");
        }

        // Rejected routes leave the registered ones intact.
        check_priorities(&tree.root);
        expect(
            &tree,
            "/cmd/go/build",
            Some("/cmd/:tool/:sub"),
            &[("tool", "go"), ("sub", "build")],
        );
        expect(&tree, "/src1/", Some("/src1/"), &[]);
        expect(&tree, "/user_gordon", Some("/user_:name"), &[("name", "gordon")]);
    }

    #[test]
    fn test_child_conflicts() {
        let cases: &[(&str, bool)] = &[
            ("/cmd/vet", false),
            ("/cmd/:tool/:sub", true),
            ("/src/AUTHORS", false),
            ("/src/*filepath", true),
            ("/user_x", false),
            ("/user_:name", true),
            ("/id/:id", false),
            ("/id:id", true),
            ("/:id", true),
            ("/*filepath", true),
        ];

        let mut tree = Tree::new();
        for (route, conflict) in cases {
            let result = tree.add_route(route, route.to_string());
            assert_eq!(result.is_err(), *conflict, "route {route}: {result:?}");
        }
        check_priorities(&tree.root);
        expect(&tree, "/cmd/vet", Some("/cmd/vet"), &[]);
        expect(&tree, "/src/AUTHORS", Some("/src/AUTHORS"), &[]);
    }

    #[test]
    fn test_conflict_error_kinds() {
        let mut tree = build(&["/cmd/:tool/:sub"]);
        assert!(matches!(
            tree.add_route("/cmd/vet", String::new()),
            Err(TreeError::ConflictingRoute { .. })
        ));

        let mut tree = build(&["/cmd/vet"]);
        assert!(matches!(
            tree.add_route("/cmd/:tool", String::new()),
            Err(TreeError::WildcardConflict { .. })
        ));

        let mut tree = build(&["/src/"]);
        assert!(matches!(
            tree.add_route("/src/*filepath", String::new()),
            Err(TreeError::CatchAllConflict { .. })
        ));
    }

    #[test]
    fn test_duplicate_routes() {
        let routes = ["/", "/doc/", "/src/*filepath", "/search/:query", "/user_:name"];
        let mut tree = Tree::new();
        for route in routes {
            tree.add_route(route, route.to_string()).unwrap();
            assert_eq!(
                tree.add_route(route, format!("{route} again")),
                Err(TreeError::DuplicateRoute {
                    route: route.to_string()
                })
            );
        }

        // Distinct paths sharing a param name are fine.
        tree.add_route("/user_:name/about", "/user_:name/about".to_string())
            .unwrap();

        check_priorities(&tree.root);
        expect(&tree, "/", Some("/"), &[]);
        expect(&tree, "/doc/", Some("/doc/"), &[]);
        expect(
            &tree,
            "/src/some/file.png",
            Some("/src/*filepath"),
            &[("filepath", "/some/file.png")],
        );
        expect(
            &tree,
            "/search/someth!ng+in+ünìcodé",
            Some("/search/:query"),
            &[("query", "someth!ng+in+ünìcodé")],
        );
        expect(&tree, "/user_gopher", Some("/user_:name"), &[("name", "gopher")]);
    }

    #[test]
    fn test_invalid_patterns() {
        let mut tree: Tree<()> = Tree::new();
        assert!(matches!(
            tree.add_route("/:foo:bar", ()),
            Err(TreeError::MultipleWildcards { .. })
        ));
        assert!(matches!(
            tree.add_route("/:foo*bar", ()),
            Err(TreeError::MultipleWildcards { .. })
        ));
        assert!(matches!(
            tree.add_route("/user:", ()),
            Err(TreeError::EmptyWildcardName { .. })
        ));
        assert!(matches!(
            tree.add_route("/src/*", ()),
            Err(TreeError::EmptyWildcardName { .. })
        ));
        assert!(matches!(
            tree.add_route("/src/*filepath/x", ()),
            Err(TreeError::CatchAllNotLast { .. })
        ));
        assert!(matches!(
            tree.add_route("/src2*filepath", ()),
            Err(TreeError::MissingSlashBeforeCatchAll { .. })
        ));
        assert!(matches!(
            tree.add_route("no-slash", ()),
            Err(TreeError::MissingLeadingSlash { .. })
        ));
        assert!(tree.is_empty());
    }

    #[test]
    fn test_trailing_slash_recommendation() {
        let tree = build(&[
            "/hi",
            "/b/",
            "/search/:query",
            "/cmd/:tool/",
            "/src/*filepath",
            "/x",
            "/x/y",
            "/y/",
            "/y/z",
            "/0/:id",
            "/0/:id/1",
            "/1/:id/",
            "/1/:id/2",
            "/aa",
            "/a/",
            "/admin",
            "/admin/:category",
            "/admin/:category/:page",
            "/doc",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/no/a",
            "/no/b",
            "/api/hello/:name",
        ]);

        let tsr_routes = [
            "/hi/",
            "/b",
            "/search/gopher/",
            "/cmd/vet",
            "/src",
            "/x/",
            "/y",
            "/0/go/",
            "/1/go",
            "/a",
            "/admin/",
            "/admin/config/",
            "/admin/config/permissions/",
            "/doc/",
        ];
        for path in tsr_routes {
            let matched = tree.get_value(path).unwrap();
            assert!(matched.value.is_none(), "non-nil value for {path}");
            assert!(matched.tsr, "expected tsr for {path}");
            assert!(matched.params.is_empty());
        }

        let no_tsr_routes = ["/", "/no", "/no/", "/_", "/_/", "/api/world/abc"];
        for path in no_tsr_routes {
            let matched = tree.get_value(path).unwrap();
            assert!(matched.value.is_none(), "non-nil value for {path}");
            assert!(!matched.tsr, "unexpected tsr for {path}");
        }

        check_priorities(&tree.root);
    }

    #[test]
    fn test_trailing_slash_symmetry() {
        let tree = build(&["/doc/"]);
        assert!(tree.get_value("/doc").unwrap().tsr);

        let tree = build(&["/doc"]);
        assert!(tree.get_value("/doc/").unwrap().tsr);
    }

    #[test]
    fn test_root_trailing_slash() {
        let tree = build(&["/:test"]);
        let matched = tree.get_value("/").unwrap();
        assert!(matched.value.is_none());
        assert!(!matched.tsr);
    }

    #[test]
    fn test_find_case_insensitive_path() {
        let routes = [
            "/hi",
            "/b/",
            "/ABC/",
            "/search/:query",
            "/cmd/:tool/",
            "/src/*filepath",
            "/x",
            "/x/y",
            "/y/",
            "/y/z",
            "/0/:id",
            "/0/:id/1",
            "/1/:id/",
            "/1/:id/2",
            "/aa",
            "/a/",
            "/doc",
            "/doc/go_faq.html",
            "/doc/go1.html",
            "/doc/go/away",
            "/no/a",
            "/no/b",
        ];
        let tree = build(&routes);

        // Every route finds itself, with and without the slash fix.
        for route in routes {
            for fix in [true, false] {
                assert_eq!(
                    tree.find_case_insensitive_path(route, fix).unwrap().as_deref(),
                    Some(route),
                    "route {route}, fix {fix}"
                );
            }
        }

        let exact = [
            ("/HI", "/hi"),
            ("/B/", "/b/"),
            ("/abc/", "/ABC/"),
            ("/SEARCH/QUERY", "/search/QUERY"),
            ("/CMD/TOOL/", "/cmd/TOOL/"),
            ("/SRC/FILE/PATH", "/src/FILE/PATH"),
            ("/X/Y", "/x/y"),
            ("/DOC/GO_FAQ.HTML", "/doc/go_faq.html"),
        ];
        for (input, want) in exact {
            for fix in [true, false] {
                assert_eq!(
                    tree.find_case_insensitive_path(input, fix).unwrap().as_deref(),
                    Some(want),
                    "path {input}, fix {fix}"
                );
            }
        }

        let slash_fixes = [
            ("/HI/", "/hi"),
            ("/B", "/b/"),
            ("/abc", "/ABC/"),
            ("/SEARCH/QUERY/", "/search/QUERY"),
            ("/CMD/TOOL", "/cmd/TOOL/"),
            ("/X/", "/x"),
            ("/Y", "/y/"),
            ("/DOC/", "/doc"),
        ];
        for (input, want) in slash_fixes {
            assert_eq!(
                tree.find_case_insensitive_path(input, true).unwrap().as_deref(),
                Some(want),
                "path {input}"
            );
            assert_eq!(
                tree.find_case_insensitive_path(input, false).unwrap(),
                None,
                "path {input} without slash fix"
            );
        }

        assert_eq!(tree.find_case_insensitive_path("/NOPE", true).unwrap(), None);
    }

    #[test]
    fn test_priority_ordering() {
        let tree = build(&["/a", "/b", "/b/c", "/b/d"]);
        assert_eq!(tree.root.path, b"/");
        assert_eq!(tree.root.indices, b"ba");
        assert_eq!(tree.root.children[0].priority, 3);
        assert_eq!(tree.root.children[1].priority, 1);
        check_priorities(&tree.root);
    }

    #[test]
    fn test_equal_priorities_keep_insertion_order() {
        let tree = build(&["/a", "/b", "/c"]);
        assert_eq!(tree.root.indices, b"abc");
        check_children_sorted(&tree.root);
    }

    #[test]
    fn test_max_params() {
        let tree = build(&["/a/:b/:c", "/x/*y", "/static"]);
        assert_eq!(tree.max_params(), 2);

        let mut params = Params::new();
        let lookup = tree.get_value_into("/a/1/2", &mut params).unwrap();
        assert_eq!(lookup.value.map(String::as_str), Some("/a/:b/:c"));
        assert!(params.as_slice().len() == 2);

        let lookup = tree.get_value_into("/missing", &mut params).unwrap();
        assert!(lookup.value.is_none());
        assert!(params.is_empty());
    }

    #[test]
    fn test_invalid_node_type_is_an_error() {
        let mut tree: Tree<&str> = build_raw();
        // Corrupt the wildcard child into a static node.
        tree.root.children[0].node_type = NodeType::Static;

        let err = tree.get_value("/anything").unwrap_err();
        assert!(matches!(
            err,
            TreeError::InvalidNodeType {
                found: NodeType::Static,
                ..
            }
        ));
        assert!(tree.find_case_insensitive_path("/anything", true).is_err());
    }

    fn build_raw() -> Tree<&'static str> {
        let mut tree = Tree::new();
        tree.add_route("/:name", "/:name").unwrap();
        tree
    }
}
