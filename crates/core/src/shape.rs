//! # Shapes - Edge Dimensions Inferred by Union-Find
//!
//! Edges carry no size. Before an expression can be evaluated every
//! `(node, edge)` occurrence needs one, and the structure of the graph says
//! which occurrences must agree:
//!
//! - a factor edge and the same edge in its product's scope
//! - a term edge and the same edge on its sum
//! - all edges of one Copy
//! - a broadcast edge of a function input and the same edge on the call,
//!   plus any [`DimLink`](crate::function::DimLink) the rule declares
//! - the same declared position of two occurrences of one variable
//!
//! [`DimTable::build`] gathers these equalities into a union-find; sizes are
//! then assigned per class, and a second, different size is a mismatch.

use std::collections::HashMap;

use log::debug;
use petgraph::unionfind::UnionFind;

use crate::edge::Edge;
use crate::error::CoreError;
use crate::graph::{Expr, ExprGraph, NodeId};

/// Equality classes of edge occurrences, with a size per class.
#[derive(Debug, Clone)]
pub struct DimTable {
    slots: HashMap<(NodeId, Edge), usize>,
    classes: UnionFind<usize>,
    sizes: HashMap<usize, usize>,
}

impl DimTable {
    /// Gather the dimension equalities of every node reachable from `root`.
    pub fn build(graph: &ExprGraph, root: NodeId) -> Result<Self, CoreError> {
        let mut slots: HashMap<(NodeId, Edge), usize> = HashMap::new();
        let mut ties: Vec<(usize, usize)> = Vec::new();
        let mut first_use: HashMap<(String, Vec<Edge>), NodeId> = HashMap::new();

        let mut slot = |node: NodeId, edge: &Edge| -> usize {
            let next = slots.len();
            *slots.entry((node, edge.clone())).or_insert(next)
        };

        for id in graph.reachable(root) {
            let node = graph.node(id)?;
            for e in &node.edges {
                slot(id, e);
            }
            match &node.expr {
                Expr::Variable { name, original } => {
                    let first = *first_use
                        .entry((name.clone(), original.clone()))
                        .or_insert(id);
                    if first != id {
                        let first_edges = graph.free_edges(first)?;
                        for (a, b) in node.edges.iter().zip(first_edges) {
                            ties.push((slot(id, a), slot(first, b)));
                        }
                    }
                }
                Expr::Copy => {
                    let anchor = slot(id, &node.edges[0]);
                    for e in &node.edges[1..] {
                        ties.push((anchor, slot(id, e)));
                    }
                }
                Expr::Product { factors } => {
                    for &f in factors {
                        for e in graph.free_edges(f)? {
                            ties.push((slot(f, e), slot(id, e)));
                        }
                    }
                }
                Expr::Sum { terms } => {
                    for &(_, t) in terms {
                        for e in graph.free_edges(t)? {
                            ties.push((slot(t, e), slot(id, e)));
                        }
                    }
                }
                Expr::Function(call) => {
                    for (&input, consumed) in call.inputs.iter().zip(&call.input_edges) {
                        for e in graph.free_edges(input)? {
                            if !consumed.contains(e) {
                                ties.push((slot(input, e), slot(id, e)));
                            }
                        }
                    }
                    for link in call.rule.dim_links() {
                        let out = &call.output_edges[link.output];
                        let input = call.inputs[link.input];
                        let consumed = &call.input_edges[link.input][link.consumed];
                        ties.push((slot(id, out), slot(input, consumed)));
                    }
                }
                Expr::Zero | Expr::Ones => {}
            }
        }

        let mut classes = UnionFind::new(slots.len());
        for (a, b) in ties {
            classes.union(a, b);
        }
        debug!("dimension table: {} edge occurrences", slots.len());
        Ok(Self {
            slots,
            classes,
            sizes: HashMap::new(),
        })
    }

    fn class(&self, node: NodeId, edge: &Edge) -> Option<usize> {
        self.slots
            .get(&(node, edge.clone()))
            .map(|&s| self.classes.find(s))
    }

    /// Fix the size of `edge` on `node`, and of everything tied to it.
    pub fn assign(&mut self, node: NodeId, edge: &Edge, size: usize) -> Result<(), CoreError> {
        let class = self.class(node, edge).ok_or_else(|| CoreError::EdgeNotFound {
            edge: edge.clone(),
            node: node.index(),
        })?;
        match self.sizes.get(&class) {
            Some(&expected) if expected != size => Err(CoreError::ShapeMismatch {
                edge: edge.clone(),
                expected,
                got: size,
            }),
            Some(_) => Ok(()),
            None => {
                self.sizes.insert(class, size);
                Ok(())
            }
        }
    }

    /// Size of `edge` on `node`, if known.
    pub fn dim(&self, node: NodeId, edge: &Edge) -> Option<usize> {
        self.class(node, edge).and_then(|c| self.sizes.get(&c).copied())
    }

    /// Size of `edge` on `node`, or [`CoreError::UnknownDimension`].
    pub fn require(&self, node: NodeId, edge: &Edge) -> Result<usize, CoreError> {
        self.dim(node, edge).ok_or_else(|| CoreError::UnknownDimension {
            edge: edge.clone(),
            node: node.index(),
        })
    }

    /// Sizes of all free edges of `node`, in order.
    pub fn dims_of(&self, graph: &ExprGraph, node: NodeId) -> Result<Vec<usize>, CoreError> {
        graph
            .free_edges(node)?
            .iter()
            .map(|e| self.require(node, e))
            .collect()
    }

    /// Number of edge occurrences tracked.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
