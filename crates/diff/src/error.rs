//! # Errors of the Calculus Passes
//!
//! Graph-level failures come from [`CoreError`]; this type adds the ways
//! differentiation and evaluation can be misused.

use tensorgrad_core::{CoreError, Edge};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum DiffError {
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Derivatives are only taken with respect to a variable node.
    #[error("Node {node} is not a variable")]
    NotAVariable { node: usize },

    #[error("No binding for variable '{name}'")]
    UnboundVariable { name: String },

    /// A binding's dimension names differ from the variable's declared edges.
    #[error("Binding for '{name}' names {got:?}, expected {expected:?}")]
    BindingMismatch {
        name: String,
        expected: Vec<Edge>,
        got: Vec<Edge>,
    },

    /// A function without a numeric implementation was evaluated.
    #[error("Function '{function}' has no forward implementation")]
    NotEvaluable { function: String },

    /// A contraction would hold a dense tensor over the configured size.
    #[error("Contraction needs a dense tensor of {elements} elements, limit is {limit}")]
    TooLarge { elements: usize, limit: usize },

    /// A library function was called with arguments it cannot accept.
    #[error("Invalid argument to {op}: {reason}")]
    InvalidArgument { op: &'static str, reason: String },

    #[error("Invalid options: {reason}")]
    Config { reason: String },
}
