//! # Symbolic Differentiation
//!
//! `grad(t, x)` builds the tensor `∂t/∂x` as a new expression. The result
//! keeps every free edge of `t` and gains one new edge per declared edge of
//! `x`, named by priming (`i` → `i'`, then `i''` if `i'` is taken):
//!
//! ```text
//!   ∂(A_ij x_j)/∂x  =  A_ij δ(j, j')        free edges: i, j'
//! ```
//!
//! The rules are the usual ones, expressed on named edges:
//!
//! - a variable differentiates to an outer product of 2-edge copies when it
//!   is the target, and to zero otherwise
//! - sums are linear and products follow the Leibniz rule
//! - functions follow the chain rule through their [`FunctionRule`]'s
//!   Jacobian, joined to the input derivative over fresh *connection* edges
//!
//! Sub-expressions that do not mention the target go straight to zero.
//!
//! [`FunctionRule`]: tensorgrad_core::FunctionRule

use std::collections::HashMap;

use log::{debug, trace};
use tensorgrad_core::edge::same_edge_set;
use tensorgrad_core::{rename, CoreError, Edge, Expr, ExprGraph, FunctionCall, Invariant, Memo, NodeId};

use crate::config::Options;
use crate::error::DiffError;

/// Differentiate `node` with respect to the variable `wrt`.
///
/// Every occurrence of the same variable (same name and declared edges)
/// counts as `wrt`, including renamed ones.
///
/// ```rust
/// use tensorgrad_core::{edges, ExprGraph};
/// use tensorgrad_diff::{grad, Options};
///
/// let mut g = ExprGraph::new();
/// let a = g.variable("A", edges(["i", "j"])).unwrap();
/// let x = g.variable("x", edges(["j"])).unwrap();
/// let ax = g.contract(vec![a, x]).unwrap();
///
/// let d = grad(&mut g, ax, x, &Options::default()).unwrap();
/// assert_eq!(g.free_edges(d).unwrap(), edges(["i", "j'"]).as_slice());
/// ```
pub fn grad(
    graph: &mut ExprGraph,
    node: NodeId,
    wrt: NodeId,
    options: &Options,
) -> Result<NodeId, DiffError> {
    let (name, original) = match graph.expr(wrt)? {
        Expr::Variable { name, original } => (name.clone(), original.clone()),
        _ => return Err(DiffError::NotAVariable { node: wrt.index() }),
    };

    let free = graph.free_edges(node)?.to_vec();
    let mut new_edges: Vec<Edge> = Vec::with_capacity(original.len());
    for e in &original {
        let mut candidate = e.primed(options.prime_marker);
        while free.contains(&candidate) || new_edges.contains(&candidate) {
            candidate = candidate.primed(options.prime_marker);
        }
        new_edges.push(candidate);
    }
    graph.reserve_edges(&new_edges);

    debug!(
        "grad of node {} wrt '{}': new edges {:?}, {} nodes before",
        node.index(),
        name,
        new_edges,
        graph.node_count()
    );
    let mut pass = Differentiator {
        name,
        original,
        new_edges,
        depends: Memo::new(),
        derived: Memo::new(),
    };
    let result = pass.derive(graph, node)?;
    debug!(
        "grad done: node {}, {} nodes after",
        result.index(),
        graph.node_count()
    );
    Ok(result)
}

struct Differentiator {
    name: String,
    original: Vec<Edge>,
    new_edges: Vec<Edge>,
    depends: Memo<bool>,
    derived: Memo<NodeId>,
}

impl Differentiator {
    fn is_target(&self, name: &str, original: &[Edge]) -> bool {
        name == self.name && original == self.original.as_slice()
    }

    fn depends(&mut self, graph: &ExprGraph, id: NodeId) -> Result<bool, DiffError> {
        if let Some(known) = self.depends.get(id) {
            return Ok(known);
        }
        self.depends.enter(id)?;
        let result = match graph.expr(id)? {
            Expr::Variable { name, original } => self.is_target(name, original),
            expr => {
                let mut any = false;
                for child in expr.children() {
                    if self.depends(graph, child)? {
                        any = true;
                        break;
                    }
                }
                any
            }
        };
        Ok(self.depends.finish(id, result))
    }

    /// Zero over the free edges of `id` plus the new edges.
    fn zero(&self, graph: &mut ExprGraph, id: NodeId) -> Result<NodeId, DiffError> {
        let mut edges = graph.free_edges(id)?.to_vec();
        edges.extend(self.new_edges.iter().cloned());
        Ok(graph.zero(edges)?)
    }

    fn derive(&mut self, graph: &mut ExprGraph, id: NodeId) -> Result<NodeId, DiffError> {
        if let Some(done) = self.derived.get(id) {
            return Ok(done);
        }
        if !self.depends(graph, id)? {
            let zero = self.zero(graph, id)?;
            return Ok(self.derived.finish(id, zero));
        }

        self.derived.enter(id)?;
        let result = match graph.expr(id)?.clone() {
            Expr::Variable { .. } => self.derive_variable(graph, id)?,
            Expr::Copy | Expr::Zero | Expr::Ones => self.zero(graph, id)?,
            Expr::Sum { terms } => {
                let mut derived = Vec::with_capacity(terms.len());
                for (c, t) in terms {
                    derived.push((c, self.derive(graph, t)?));
                }
                graph.combine(derived)?
            }
            Expr::Product { factors } => self.derive_product(graph, id, factors)?,
            Expr::Function(call) => self.derive_function(graph, id, call)?,
        };
        trace!("d(node {}) = node {}", id.index(), result.index());
        Ok(self.derived.finish(id, result))
    }

    /// `∂x_i/∂x_i'` is the identity pairing each position with its new edge.
    fn derive_variable(&mut self, graph: &mut ExprGraph, id: NodeId) -> Result<NodeId, DiffError> {
        let current = graph.free_edges(id)?.to_vec();
        let mut copies = Vec::with_capacity(current.len());
        for (cur, new) in current.into_iter().zip(self.new_edges.clone()) {
            copies.push(graph.copy(vec![cur, new])?);
        }
        Ok(match copies.len() {
            0 => graph.ones(Vec::new())?,
            1 => copies[0],
            _ => graph.contract(copies)?,
        })
    }

    fn derive_product(
        &mut self,
        graph: &mut ExprGraph,
        id: NodeId,
        factors: Vec<NodeId>,
    ) -> Result<NodeId, DiffError> {
        let free = graph.free_edges(id)?.to_vec();

        // Contracted names are scoped to this product; move those that would
        // clash with the new edges.
        let mut scoped: HashMap<Edge, Edge> = HashMap::new();
        for &f in &factors {
            for e in graph.free_edges(f)?.to_vec() {
                if !free.contains(&e) && self.new_edges.contains(&e) && !scoped.contains_key(&e) {
                    let fresh = graph.fresh_edge(&e);
                    scoped.insert(e, fresh);
                }
            }
        }
        let factors = if scoped.is_empty() {
            factors
        } else {
            let mut moved = Vec::with_capacity(factors.len());
            for f in factors {
                let local: HashMap<Edge, Edge> = graph
                    .free_edges(f)?
                    .iter()
                    .filter_map(|e| scoped.get(e).map(|to| (e.clone(), to.clone())))
                    .collect();
                moved.push(rename(graph, f, &local)?);
            }
            moved
        };

        let mut terms = Vec::new();
        for (i, &f) in factors.iter().enumerate() {
            if !self.depends(graph, f)? {
                continue;
            }
            let df = self.derive(graph, f)?;
            let mut replaced = factors.clone();
            replaced[i] = df;
            terms.push(graph.contract(replaced)?);
        }
        trace!("product rule at node {}: {} terms", id.index(), terms.len());
        self.join_terms(graph, id, terms)
    }

    fn derive_function(
        &mut self,
        graph: &mut ExprGraph,
        id: NodeId,
        call: FunctionCall,
    ) -> Result<NodeId, DiffError> {
        let call_free = graph.free_edges(id)?.to_vec();
        let mut terms = Vec::new();

        for (k, &input) in call.inputs.iter().enumerate() {
            if !self.depends(graph, input)? {
                continue;
            }
            let consumed = &call.input_edges[k];
            let connection: Vec<Edge> = consumed.iter().map(|e| graph.fresh_edge(e)).collect();

            let jacobian = call.rule.derivative(graph, id, k, &connection)?;
            let mut expected = call_free.clone();
            expected.extend(connection.iter().cloned());
            let got = graph.free_edges(jacobian)?;
            if !same_edge_set(&expected, got) {
                return Err(CoreError::InvariantViolation {
                    rule: Invariant::FunctionEdges,
                    detail: format!(
                        "derivative of '{}' wrt input {k} exposes {got:?}, expected {expected:?}",
                        call.name
                    ),
                }
                .into());
            }

            let to_connection: HashMap<Edge, Edge> =
                consumed.iter().cloned().zip(connection.iter().cloned()).collect();
            let connected = rename(graph, input, &to_connection)?;
            let d_input = self.derive(graph, connected)?;

            // The Jacobian is diagonal over broadcast edges: both sides keep
            // the edge, joined through a 3-edge copy.
            let input_free = graph.free_edges(input)?.to_vec();
            let mut j_map = HashMap::new();
            let mut d_map = HashMap::new();
            let mut copies = Vec::new();
            for b in call.broadcast_edges(k, &input_free) {
                let jb = graph.fresh_edge(&b);
                let db = graph.fresh_edge(&b);
                copies.push(graph.copy(vec![jb.clone(), db.clone(), b.clone()])?);
                j_map.insert(b.clone(), jb);
                d_map.insert(b, db);
            }
            let mut factors = vec![
                rename(graph, jacobian, &j_map)?,
                rename(graph, d_input, &d_map)?,
            ];
            factors.extend(copies);
            terms.push(graph.contract(factors)?);
        }
        trace!("chain rule at '{}': {} terms", call.name, terms.len());
        self.join_terms(graph, id, terms)
    }

    fn join_terms(
        &mut self,
        graph: &mut ExprGraph,
        id: NodeId,
        terms: Vec<NodeId>,
    ) -> Result<NodeId, DiffError> {
        match terms.len() {
            0 => self.zero(graph, id),
            1 => Ok(terms[0]),
            _ => Ok(graph.combine(terms.into_iter().map(|t| (1.0, t)).collect())?),
        }
    }
}
