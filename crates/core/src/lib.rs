//! # Core - Tensor Expression Graphs
//!
//! This crate provides the symbolic data model for tensor calculus:
//!
//! - **Edges**: named tensor indices; composition is by name, not position
//! - **Graph**: an append-only arena of tensor nodes (variables, copies,
//!   contractions, linear combinations, constants and function calls)
//! - **Functions**: differentiable maps whose behavior is carried as data
//! - **Renaming**: collision-safe substitution of free edges
//! - **Shapes**: edge-dimension inference over a built graph
//! - **Values**: dense tensors with named dimensions
//! - **Errors**: first-class construction and traversal failures
//!
//! ## Design Philosophy
//!
//! An expression is a value that can be inspected, transformed and checked
//! before anything is computed. Nodes are never mutated; every pass over the
//! graph returns a new root and leaves earlier roots valid.

pub mod edge;
pub mod error;
pub mod function;
pub mod graph;
pub mod rename;
pub mod shape;
pub mod value;

// Re-export key types at crate root for convenience
pub use edge::{edges, Edge};
pub use error::{CoreError, Invariant};
pub use function::{DimLink, FunctionCall, FunctionRule};
pub use graph::{Expr, ExprGraph, Kind, Memo, Node, NodeId};
pub use rename::{make_distinct, rename, Distinct};
pub use shape::DimTable;
pub use value::NamedTensor;
