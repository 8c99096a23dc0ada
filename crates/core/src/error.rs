//! # Error Types
//!
//! Errors in the expression graph are first-class: they describe an attempt
//! to build a tensor expression whose edges do not line up, or a traversal
//! that found the graph in a state no constructor can produce.
//!
//! Every variant names the offending edge and/or node index so the caller
//! can locate the sub-expression that needs fixing.

use std::fmt;

use thiserror::Error;

use crate::edge::Edge;

/// The structural rule a rejected construction would have broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Invariant {
    /// A node exposes the same free edge twice.
    UniqueFreeEdges,
    /// A product edge is used by three or more factors.
    ProductMultiplicity,
    /// Terms of a linear combination disagree on their free edges.
    SumEdgeSets,
    /// A function's outputs overlap the edges it consumes or broadcasts.
    FunctionEdges,
    /// A Copy node has no edges.
    EmptyCopy,
    /// A linear combination has no terms.
    EmptySum,
}

impl fmt::Display for Invariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rule = match self {
            Invariant::UniqueFreeEdges => "free edges must be unique",
            Invariant::ProductMultiplicity => "a product edge may occur at most twice",
            Invariant::SumEdgeSets => "sum terms must share their free edges",
            Invariant::FunctionEdges => "function outputs must be new edges",
            Invariant::EmptyCopy => "a copy needs at least one edge",
            Invariant::EmptySum => "a sum needs at least one term",
        };
        f.write_str(rule)
    }
}

/// Core errors for expression-graph construction and traversal.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// A constructor was asked to build a node that breaks a graph invariant.
    #[error("Invariant violation ({rule}): {detail}")]
    InvariantViolation { rule: Invariant, detail: String },

    /// Terms of a linear combination expose different free edges.
    #[error("Edge set mismatch: expected {expected:?}, got {got:?}")]
    EdgeSetMismatch { expected: Vec<Edge>, got: Vec<Edge> },

    /// A rename mapping references an edge the node does not expose.
    #[error("Edge '{edge}' not found on node {node}")]
    EdgeNotFound { edge: Edge, node: usize },

    /// Two occurrences of one edge disagree on their dimension.
    #[error("Shape mismatch on edge '{edge}': expected {expected}, got {got}")]
    ShapeMismatch {
        edge: Edge,
        expected: usize,
        got: usize,
    },

    /// No binding or rule determines the size of an edge.
    #[error("Cannot infer the dimension of edge '{edge}' on node {node}")]
    UnknownDimension { edge: Edge, node: usize },

    /// A traversal re-entered a node it was still processing.
    #[error("Cycle detected at node {node}")]
    CyclicGraph { node: usize },

    /// A node index does not belong to this graph.
    #[error("Node {node} does not exist")]
    InvalidNode { node: usize },

    /// A concrete tensor could not be built or combined.
    #[error("Bad tensor: {reason}")]
    BadTensor { reason: String },
}

impl CoreError {
    pub(crate) fn violation(rule: Invariant, detail: impl Into<String>) -> Self {
        CoreError::InvariantViolation {
            rule,
            detail: detail.into(),
        }
    }
}
