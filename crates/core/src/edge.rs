//! # Edges - Named Tensor Indices
//!
//! An edge is the name of one index of a tensor. Two tensors that expose
//! the same edge inside a product are contracted along it; everywhere else
//! the name only has to be unique within the node that exposes it.
//!
//! Edges carry no dimension. Sizes are inferred at evaluation time from the
//! bound variables (see [`crate::shape`]).

use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The marker appended to an edge to name the dimension a derivative adds.
pub const PRIME: char = '\'';

/// An opaque edge name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Edge(String);

impl Edge {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// This edge with one more derivative marker: `x` → `x'`.
    pub fn primed(&self, marker: char) -> Edge {
        let mut name = self.0.clone();
        name.push(marker);
        Edge(name)
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Edge {
    fn from(name: &str) -> Self {
        Edge(name.to_string())
    }
}

impl From<String> for Edge {
    fn from(name: String) -> Self {
        Edge(name)
    }
}

impl From<&Edge> for Edge {
    fn from(edge: &Edge) -> Self {
        edge.clone()
    }
}

impl Borrow<str> for Edge {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Build an edge list from anything string-like.
///
/// ```rust
/// use tensorgrad_core::edge::{edges, Edge};
///
/// assert_eq!(edges(["i", "j"]), vec![Edge::from("i"), Edge::from("j")]);
/// ```
pub fn edges<I, S>(names: I) -> Vec<Edge>
where
    I: IntoIterator<Item = S>,
    S: Into<Edge>,
{
    names.into_iter().map(Into::into).collect()
}

/// The first edge that occurs twice in `edges`, if any.
pub fn find_duplicate(edges: &[Edge]) -> Option<&Edge> {
    let mut seen = HashSet::with_capacity(edges.len());
    edges.iter().find(|e| !seen.insert(*e))
}

/// Whether two edge lists hold the same names, ignoring order.
pub fn same_edge_set(a: &[Edge], b: &[Edge]) -> bool {
    a.len() == b.len() && {
        let set: HashSet<&Edge> = a.iter().collect();
        b.iter().all(|e| set.contains(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priming() {
        let x = Edge::from("x");
        assert_eq!(x.primed(PRIME).as_str(), "x'");
        assert_eq!(x.primed(PRIME).primed(PRIME).as_str(), "x''");
    }

    #[test]
    fn test_duplicates_and_sets() {
        let list = edges(["i", "j", "i"]);
        assert_eq!(find_duplicate(&list), Some(&Edge::from("i")));
        assert_eq!(find_duplicate(&edges(["i", "j"])), None);

        assert!(same_edge_set(&edges(["i", "j"]), &edges(["j", "i"])));
        assert!(!same_edge_set(&edges(["i", "j"]), &edges(["i", "k"])));
        assert!(!same_edge_set(&edges(["i"]), &edges(["i", "j"])));
    }

    #[test]
    fn test_serde_is_transparent() {
        let json = serde_json::to_string(&Edge::from("b")).unwrap();
        assert_eq!(json, "\"b\"");
    }
}
