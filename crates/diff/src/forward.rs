//! # Forward Evaluation
//!
//! This module gives an expression its numeric meaning: bind every variable
//! to a [`NamedTensor`], infer the size of every edge, then interpret each
//! node once (results are cached per node).
//!
//! ## Key Concepts
//!
//! - **Bindings**: keyed by variable name, dimensions named by the
//!   variable's declared edges
//! - **Dimension inference**: a [`DimTable`] seeded from the bindings
//! - **Interpretation**: products are dense named contractions, sums are
//!   aligned weighted sums, functions run their forward callable
//!
//! ## Example
//!
//! ```rust
//! use std::collections::HashMap;
//! use tensorgrad_core::{edges, ExprGraph, NamedTensor};
//! use tensorgrad_diff::{evaluate, Options};
//!
//! // y = A x
//! let mut g = ExprGraph::new();
//! let a = g.variable("A", edges(["i", "j"])).unwrap();
//! let x = g.variable("x", edges(["j"])).unwrap();
//! let y = g.contract(vec![a, x]).unwrap();
//!
//! let bindings = HashMap::from([
//!     ("A".to_string(), NamedTensor::from_shape_vec(["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap()),
//!     ("x".to_string(), NamedTensor::from_shape_vec(["j"], &[2], vec![1.0, 1.0]).unwrap()),
//! ]);
//! let out = evaluate(&g, y, &bindings, &Options::default()).unwrap();
//! assert_eq!(out.values(), vec![3.0, 7.0]);
//! ```

use std::collections::HashMap;
use std::rc::Rc;

use log::{debug, trace};
use tensorgrad_core::edge::same_edge_set;
use tensorgrad_core::{CoreError, DimTable, Edge, Expr, ExprGraph, Invariant, Memo, NamedTensor, NodeId};

use crate::config::Options;
use crate::error::DiffError;

/// Variable values by name.
pub type Bindings = HashMap<String, NamedTensor>;

/// Numerically evaluate `node`.
///
/// The result is named by the node's free edges, in their order.
pub fn evaluate(
    graph: &ExprGraph,
    node: NodeId,
    bindings: &Bindings,
    options: &Options,
) -> Result<NamedTensor, DiffError> {
    let dims = infer_dims(graph, node, bindings)?;
    let mut interpreter = Interpreter {
        graph,
        bindings,
        dims: &dims,
        options,
        values: Memo::new(),
    };
    let value = interpreter.eval(node)?;
    debug!(
        "evaluated node {}: {} nodes interpreted, shape {:?}",
        node.index(),
        interpreter.values.len(),
        value.shape()
    );
    Ok(value.as_ref().clone())
}

/// Build the dimension table for `node` and seed it from `bindings`.
pub fn infer_dims(graph: &ExprGraph, node: NodeId, bindings: &Bindings) -> Result<DimTable, DiffError> {
    let mut table = DimTable::build(graph, node)?;
    for id in graph.reachable(node) {
        let Expr::Variable { name, original } = graph.expr(id)? else {
            continue;
        };
        let value = binding(bindings, name, original)?;
        for (declared, current) in original.iter().zip(graph.free_edges(id)?) {
            if let Some(size) = value.dim(declared.as_str()) {
                table.assign(id, current, size)?;
            }
        }
    }
    Ok(table)
}

fn binding<'b>(bindings: &'b Bindings, name: &str, original: &[Edge]) -> Result<&'b NamedTensor, DiffError> {
    let value = bindings
        .get(name)
        .ok_or_else(|| DiffError::UnboundVariable {
            name: name.to_string(),
        })?;
    if !same_edge_set(value.names(), original) {
        return Err(DiffError::BindingMismatch {
            name: name.to_string(),
            expected: original.to_vec(),
            got: value.names().to_vec(),
        });
    }
    Ok(value)
}

struct Interpreter<'a> {
    graph: &'a ExprGraph,
    bindings: &'a Bindings,
    dims: &'a DimTable,
    options: &'a Options,
    values: Memo<Rc<NamedTensor>>,
}

impl Interpreter<'_> {
    fn eval(&mut self, id: NodeId) -> Result<Rc<NamedTensor>, DiffError> {
        if let Some(done) = self.values.get(id) {
            return Ok(done);
        }
        self.values.enter(id)?;
        let graph = self.graph;
        let node = graph.node(id)?;
        let edges = &node.edges;

        let value = match &node.expr {
            Expr::Variable { name, original } => {
                let bound = binding(self.bindings, name, original)?;
                let mapping: HashMap<Edge, Edge> =
                    original.iter().cloned().zip(edges.iter().cloned()).collect();
                bound.rename(&mapping)?.align_to(edges)?
            }
            Expr::Copy => {
                let size = self.dims.require(id, &edges[0])?;
                NamedTensor::delta(edges.clone(), size)?
            }
            Expr::Zero => NamedTensor::zeros(edges.clone(), &self.dims.dims_of(graph, id)?)?,
            Expr::Ones => NamedTensor::full(edges.clone(), &self.dims.dims_of(graph, id)?, 1.0)?,
            Expr::Product { factors } => {
                let mut values = Vec::with_capacity(factors.len());
                for &f in factors {
                    values.push(self.eval(f)?);
                }
                let inputs: Vec<&NamedTensor> = values.iter().map(Rc::as_ref).collect();
                let elements = NamedTensor::contraction_size(&inputs, edges);
                if elements > self.options.max_dense_elements {
                    return Err(DiffError::TooLarge {
                        elements,
                        limit: self.options.max_dense_elements,
                    });
                }
                trace!("contracting {} factors, largest tensor {} elements", inputs.len(), elements);
                NamedTensor::einsum(&inputs, edges)?
            }
            Expr::Sum { terms } => {
                let mut total: Option<NamedTensor> = None;
                for &(c, t) in terms {
                    let term = self.eval(t)?.scale(c);
                    total = Some(match total {
                        Some(acc) => acc.add(&term)?,
                        None => term,
                    });
                }
                total
                    .ok_or_else(|| CoreError::InvariantViolation {
                        rule: Invariant::EmptySum,
                        detail: format!("sum {} has no terms", id.index()),
                    })?
                    .align_to(edges)?
            }
            Expr::Function(call) => {
                let mut inputs = Vec::with_capacity(call.inputs.len());
                for &input in &call.inputs {
                    inputs.push(self.eval(input)?.as_ref().clone());
                }
                let result = call
                    .rule
                    .forward(&inputs)
                    .ok_or_else(|| DiffError::NotEvaluable {
                        function: call.name.clone(),
                    })??;
                if !same_edge_set(result.names(), edges) {
                    return Err(CoreError::InvariantViolation {
                        rule: Invariant::FunctionEdges,
                        detail: format!(
                            "'{}' produced {:?}, expected {:?}",
                            call.name,
                            result.names(),
                            edges
                        ),
                    }
                    .into());
                }
                for e in edges {
                    if let (Some(expected), Some(got)) = (self.dims.dim(id, e), result.dim(e.as_str())) {
                        if expected != got {
                            return Err(CoreError::ShapeMismatch {
                                edge: e.clone(),
                                expected,
                                got,
                            }
                            .into());
                        }
                    }
                }
                result.align_to(edges)?
            }
        };
        Ok(self.values.finish(id, Rc::new(value)))
    }
}
