//! # Functions - Differentiable Maps as Data
//!
//! A `Function` node applies a named map to one or more input tensors. The
//! map's behavior is not a new node type: it is a [`FunctionRule`] value
//! holding closures, so the set of node variants stays closed.
//!
//! ## Edges of a call
//!
//! - `input_edges[k]` are the edges of input `k` the function consumes.
//! - Every other edge of an input is a *broadcast* edge: the function is
//!   applied independently along it and the edge reappears on the output.
//! - `output_edges` are new edges the function produces.
//!
//! A pure elementwise map therefore has no consumed and no output edges:
//! all of its input edges are broadcast.

use std::fmt;
use std::rc::Rc;

use crate::edge::Edge;
use crate::error::CoreError;
use crate::graph::{ExprGraph, NodeId};
use crate::value::NamedTensor;

/// Builds the local Jacobian of a call with respect to one input.
///
/// Arguments are the graph, the call node, the input index and one fresh
/// *connection* edge per consumed edge of that input (same order). The
/// returned node must expose the call's free edges plus the connection
/// edges, and is taken to be diagonal over broadcast edges.
pub type DerivativeFn =
    dyn Fn(&mut ExprGraph, NodeId, usize, &[Edge]) -> Result<NodeId, CoreError>;

/// Numeric implementation of a function.
///
/// Input `k` is named by the free edges of the call's `k`-th input; the
/// result must be named by the call's free edges (in any order).
pub type ForwardFn = dyn Fn(&[NamedTensor]) -> Result<NamedTensor, CoreError>;

/// States that an output edge has the same size as a consumed input edge.
///
/// Links are positional so they survive renaming of the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DimLink {
    /// Index into `output_edges`.
    pub output: usize,
    /// Index of the input.
    pub input: usize,
    /// Index into `input_edges[input]`.
    pub consumed: usize,
}

/// The behaviors of a function: derivative, optional forward map and
/// dimension links.
#[derive(Clone)]
pub struct FunctionRule {
    derivative: Rc<DerivativeFn>,
    forward: Option<Rc<ForwardFn>>,
    dim_links: Vec<DimLink>,
}

impl FunctionRule {
    pub fn new(
        derivative: impl Fn(&mut ExprGraph, NodeId, usize, &[Edge]) -> Result<NodeId, CoreError>
            + 'static,
    ) -> Self {
        Self {
            derivative: Rc::new(derivative),
            forward: None,
            dim_links: Vec::new(),
        }
    }

    /// Attach a numeric implementation.
    pub fn with_forward(
        mut self,
        forward: impl Fn(&[NamedTensor]) -> Result<NamedTensor, CoreError> + 'static,
    ) -> Self {
        self.forward = Some(Rc::new(forward));
        self
    }

    pub fn with_dim_links(mut self, links: Vec<DimLink>) -> Self {
        self.dim_links = links;
        self
    }

    /// A purely symbolic function.
    ///
    /// Its derivative with respect to input `k` is another opaque call named
    /// `D{k}{name}` on the same inputs, exposing the connection edges as
    /// extra outputs. It has no forward map.
    pub fn opaque() -> Self {
        Self::new(opaque_derivative)
    }

    pub fn derivative(
        &self,
        graph: &mut ExprGraph,
        call: NodeId,
        input: usize,
        connection: &[Edge],
    ) -> Result<NodeId, CoreError> {
        (self.derivative)(graph, call, input, connection)
    }

    /// Run the forward map, or `None` if the function is symbolic only.
    pub fn forward(&self, inputs: &[NamedTensor]) -> Option<Result<NamedTensor, CoreError>> {
        self.forward.as_ref().map(|f| f(inputs))
    }

    pub fn is_evaluable(&self) -> bool {
        self.forward.is_some()
    }

    pub fn dim_links(&self) -> &[DimLink] {
        &self.dim_links
    }
}

impl fmt::Debug for FunctionRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionRule")
            .field("evaluable", &self.is_evaluable())
            .field("dim_links", &self.dim_links)
            .finish()
    }
}

/// One application of a function inside the graph.
#[derive(Debug, Clone)]
pub struct FunctionCall {
    pub name: String,
    pub inputs: Vec<NodeId>,
    pub input_edges: Vec<Vec<Edge>>,
    pub output_edges: Vec<Edge>,
    pub rule: FunctionRule,
}

impl FunctionCall {
    /// Edges of input `k` that pass through the call untouched.
    pub fn broadcast_edges(&self, input: usize, input_free: &[Edge]) -> Vec<Edge> {
        let consumed = &self.input_edges[input];
        input_free
            .iter()
            .filter(|e| !consumed.contains(e))
            .cloned()
            .collect()
    }
}

fn opaque_derivative(
    graph: &mut ExprGraph,
    call: NodeId,
    input: usize,
    connection: &[Edge],
) -> Result<NodeId, CoreError> {
    let f = graph
        .function_call(call)
        .cloned()
        .ok_or(CoreError::InvalidNode {
            node: call.index(),
        })?;

    let base = f.output_edges.len();
    let mut outputs = f.output_edges.clone();
    outputs.extend(connection.iter().cloned());

    let mut links = f.rule.dim_links().to_vec();
    links.extend((0..connection.len()).map(|i| DimLink {
        output: base + i,
        input,
        consumed: i,
    }));

    graph.function(
        format!("D{input}{}", f.name),
        f.inputs.clone(),
        f.input_edges.clone(),
        outputs,
        FunctionRule::opaque().with_dim_links(links),
    )
}
