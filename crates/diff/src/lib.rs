//! # Diff - Symbolic Tensor Calculus
//!
//! This crate works on expression graphs built with `tensorgrad-core`:
//!
//! - **Gradients**: [`grad`] builds the derivative of an expression with
//!   respect to a variable as a new expression
//! - **Simplification**: [`simplify`] rewrites an expression into a smaller
//!   equivalent one (flattening, like-term merging, copy fusion)
//! - **Canonical forms**: [`structural_key`] and [`equivalent`] compare
//!   expressions up to edge renaming and factor order
//! - **Evaluation**: [`evaluate`] computes the dense value of an expression
//! - **Functions**: [`ops`] builds common tensor functions from primitives
//!
//! ## Modules
//!
//! - [`grad`] - product and chain rule over the graph
//! - [`simplify`] - fixed-point rewriting
//! - [`canon`] - structural keys
//! - [`forward`] - numeric interpretation
//! - [`ops`] - the function library
//! - [`config`] - pass options
//!
//! ## Example
//!
//! ```rust
//! use tensorgrad_core::{edges, ExprGraph};
//! use tensorgrad_diff::{grad, simplify, Options};
//!
//! // d/dx (x·x) = 2x
//! let mut g = ExprGraph::new();
//! let x = g.variable("x", edges(["i"])).unwrap();
//! let xx = g.contract(vec![x, x]).unwrap();
//!
//! let options = Options::default();
//! let dx = grad(&mut g, xx, x, &options).unwrap();
//! let dx = simplify(&mut g, dx, &options).unwrap();
//! assert_eq!(g.free_edges(dx).unwrap().len(), 1);
//! ```

pub mod canon;
pub mod config;
pub mod error;
pub mod forward;
pub mod grad;
pub mod ops;
pub mod simplify;

pub use canon::{equivalent, structural_key, Canon, Token};
pub use config::Options;
pub use error::DiffError;
pub use forward::{evaluate, infer_dims, Bindings};
pub use grad::grad;
pub use simplify::simplify;
