//! # Renaming - Collision-Safe Edge Substitution
//!
//! Renaming rebuilds a node with some of its free edges replaced. Because
//! contracted edges are scoped to their product, a new free name can clash
//! with an internal name further down; such internal names are moved to
//! fresh names on the way down so the result means the same tensor.

use std::collections::{HashMap, HashSet};

use log::trace;

use crate::edge::{find_duplicate, Edge};
use crate::error::{CoreError, Invariant};
use crate::graph::{ExprGraph, Expr, NodeId};

type Mapping = Vec<(Edge, Edge)>;

/// Rename free edges of `node` according to `mapping`.
///
/// Keys must be free edges of `node`; edges not mentioned keep their name.
/// An empty or identity mapping returns `node` itself.
///
/// ```rust
/// use std::collections::HashMap;
/// use tensorgrad_core::edge::{edges, Edge};
/// use tensorgrad_core::graph::ExprGraph;
/// use tensorgrad_core::rename::rename;
///
/// let mut g = ExprGraph::new();
/// let x = g.variable("x", edges(["i"])).unwrap();
/// let mapping = HashMap::from([(Edge::from("i"), Edge::from("k"))]);
/// let y = rename(&mut g, x, &mapping).unwrap();
/// assert_eq!(g.free_edges(y).unwrap(), edges(["k"]).as_slice());
/// ```
pub fn rename(
    graph: &mut ExprGraph,
    node: NodeId,
    mapping: &HashMap<Edge, Edge>,
) -> Result<NodeId, CoreError> {
    Renamer::default().rename(graph, node, mapping)
}

#[derive(Default)]
struct Renamer {
    memo: HashMap<(NodeId, Mapping), NodeId>,
}

impl Renamer {
    fn rename(
        &mut self,
        graph: &mut ExprGraph,
        node: NodeId,
        mapping: &HashMap<Edge, Edge>,
    ) -> Result<NodeId, CoreError> {
        let free = graph.free_edges(node)?.to_vec();
        if let Some(missing) = mapping.keys().find(|e| !free.contains(e)) {
            return Err(CoreError::EdgeNotFound {
                edge: missing.clone(),
                node: node.index(),
            });
        }

        let mut key: Mapping = mapping
            .iter()
            .filter(|(from, to)| from != to)
            .map(|(from, to)| (from.clone(), to.clone()))
            .collect();
        if key.is_empty() {
            return Ok(node);
        }
        key.sort();

        let new_free = map_edges(&free, mapping);
        if let Some(dup) = find_duplicate(&new_free) {
            return Err(CoreError::violation(
                Invariant::UniqueFreeEdges,
                format!("renaming node {} would expose '{dup}' twice", node.index()),
            ));
        }

        let memo_key = (node, key);
        if let Some(&done) = self.memo.get(&memo_key) {
            return Ok(done);
        }

        let renamed = match graph.expr(node)?.clone() {
            Expr::Variable { name, original } => graph.renamed_variable(name, original, new_free)?,
            Expr::Copy => graph.copy(new_free)?,
            Expr::Zero => graph.zero(new_free)?,
            Expr::Ones => graph.ones(new_free)?,
            Expr::Sum { terms } => {
                let mut renamed = Vec::with_capacity(terms.len());
                for (c, t) in terms {
                    renamed.push((c, self.rename(graph, t, mapping)?));
                }
                graph.combine(renamed)?
            }
            Expr::Product { factors } => self.rename_product(graph, &free, factors, mapping)?,
            Expr::Function(call) => {
                let targets: HashSet<&Edge> = mapping.values().collect();
                let mut inputs = Vec::with_capacity(call.inputs.len());
                let mut input_edges = Vec::with_capacity(call.inputs.len());
                for (&input, consumed) in call.inputs.iter().zip(&call.input_edges) {
                    let mut local: HashMap<Edge, Edge> = HashMap::new();
                    for e in graph.free_edges(input)?.to_vec() {
                        if consumed.contains(&e) {
                            if targets.contains(&e) {
                                let fresh = graph.fresh_edge(&e);
                                local.insert(e, fresh);
                            }
                        } else if let Some(to) = mapping.get(&e) {
                            local.insert(e, to.clone());
                        }
                    }
                    inputs.push(self.rename(graph, input, &local)?);
                    input_edges.push(map_edges(consumed, &local));
                }
                let outputs = map_edges(&call.output_edges, mapping);
                graph.function(call.name, inputs, input_edges, outputs, call.rule)?
            }
        };

        trace!("renamed node {} to {}", node.index(), renamed.index());
        self.memo.insert(memo_key, renamed);
        Ok(renamed)
    }

    fn rename_product(
        &mut self,
        graph: &mut ExprGraph,
        free: &[Edge],
        factors: Vec<NodeId>,
        mapping: &HashMap<Edge, Edge>,
    ) -> Result<NodeId, CoreError> {
        let targets: HashSet<&Edge> = mapping.values().collect();
        let mut scoped: HashMap<Edge, Edge> = HashMap::new();
        for &f in &factors {
            for e in graph.free_edges(f)?.to_vec() {
                if !free.contains(&e) && targets.contains(&e) && !scoped.contains_key(&e) {
                    let fresh = graph.fresh_edge(&e);
                    scoped.insert(e, fresh);
                }
            }
        }

        let mut renamed = Vec::with_capacity(factors.len());
        for f in factors {
            let local: HashMap<Edge, Edge> = graph
                .free_edges(f)?
                .iter()
                .filter_map(|e| {
                    mapping
                        .get(e)
                        .or_else(|| scoped.get(e))
                        .map(|to| (e.clone(), to.clone()))
                })
                .collect();
            renamed.push(self.rename(graph, f, &local)?);
        }
        graph.contract(renamed)
    }
}

fn map_edges(edges: &[Edge], mapping: &HashMap<Edge, Edge>) -> Vec<Edge> {
    edges
        .iter()
        .map(|e| mapping.get(e).cloned().unwrap_or_else(|| e.clone()))
        .collect()
}

/// Nodes renamed apart, with the mapping applied to each.
#[derive(Debug, Clone)]
pub struct Distinct {
    pub nodes: Vec<NodeId>,
    /// Per input node: original edge → new edge, for renamed edges only.
    pub renames: Vec<HashMap<Edge, Edge>>,
}

/// Rename `nodes` so that no two of them share an edge.
///
/// Every free edge that occurs on more than one node, or is `reserved`,
/// gets a fresh name at each occurrence, unless it is listed in `shared`.
pub fn make_distinct(
    graph: &mut ExprGraph,
    nodes: &[NodeId],
    reserved: &[Edge],
    shared: &[Edge],
) -> Result<Distinct, CoreError> {
    let mut count: HashMap<Edge, usize> = HashMap::new();
    for &n in nodes {
        for e in graph.free_edges(n)? {
            *count.entry(e.clone()).or_insert(0) += 1;
        }
    }
    graph.reserve_edges(reserved);

    let mut renamed = Vec::with_capacity(nodes.len());
    let mut renames = Vec::with_capacity(nodes.len());
    for &n in nodes {
        let mut local = HashMap::new();
        for e in graph.free_edges(n)?.to_vec() {
            if shared.contains(&e) {
                continue;
            }
            if count[&e] > 1 || reserved.contains(&e) {
                let fresh = graph.fresh_edge(&e);
                local.insert(e, fresh);
            }
        }
        renamed.push(rename(graph, n, &local)?);
        renames.push(local);
    }
    Ok(Distinct {
        nodes: renamed,
        renames,
    })
}
