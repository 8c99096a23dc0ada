//! # Expression Graph - Named-Edge Tensor Networks
//!
//! An expression is a DAG of tensor nodes. Each node exposes an ordered list
//! of *free edges*; composing nodes is done purely by edge names:
//!
//! - **Product**: an edge shared by exactly two factors is summed over
//! - **Sum**: all terms expose the same edges
//! - **Copy**: every incident edge takes the same index value
//!
//! ## Storage
//!
//! All nodes live in one append-only arena backed by a petgraph `DiGraph`.
//! A [`NodeId`] is a stable index; links run parent → child and record the
//! child's slot. A node is never modified after it is added, so every pass
//! (rename, grad, simplify) returns a new root and earlier roots stay valid.
//! Children are always added before their parents, which makes cycles
//! unrepresentable through the public constructors.

use std::collections::{HashMap, HashSet};
use std::fmt;

use log::trace;
use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use serde::{Deserialize, Serialize};

use crate::edge::{find_duplicate, same_edge_set, Edge};
use crate::error::{CoreError, Invariant};
use crate::function::{FunctionCall, FunctionRule};

/// Stable handle of a node inside an [`ExprGraph`].
pub type NodeId = NodeIndex;

/// Variant discriminator, for serializers and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Variable,
    Copy,
    Product,
    Sum,
    Zero,
    Ones,
    Function,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// The variant-specific payload of a node.
#[derive(Debug, Clone)]
pub enum Expr {
    /// A leaf bound at evaluation time.
    ///
    /// `original` is the declared edge list; the node's free edges hold the
    /// current name of each declared position.
    Variable { name: String, original: Vec<Edge> },
    /// Generalized Kronecker delta over the free edges.
    Copy,
    /// Generalized contraction of the factors.
    Product { factors: Vec<NodeId> },
    /// Linear combination `Σ cᵢ·tᵢ`.
    Sum { terms: Vec<(f64, NodeId)> },
    /// All zeros over the free edges.
    Zero,
    /// All ones over the free edges.
    Ones,
    Function(FunctionCall),
}

impl Expr {
    pub fn kind(&self) -> Kind {
        match self {
            Expr::Variable { .. } => Kind::Variable,
            Expr::Copy => Kind::Copy,
            Expr::Product { .. } => Kind::Product,
            Expr::Sum { .. } => Kind::Sum,
            Expr::Zero => Kind::Zero,
            Expr::Ones => Kind::Ones,
            Expr::Function(_) => Kind::Function,
        }
    }

    /// Sub-nodes in slot order; empty for leaves.
    pub fn children(&self) -> Vec<NodeId> {
        match self {
            Expr::Product { factors } => factors.clone(),
            Expr::Sum { terms } => terms.iter().map(|&(_, t)| t).collect(),
            Expr::Function(call) => call.inputs.clone(),
            _ => Vec::new(),
        }
    }
}

/// A tensor node: payload plus free edges.
#[derive(Debug, Clone)]
pub struct Node {
    pub expr: Expr,
    pub edges: Vec<Edge>,
}

impl Node {
    pub fn kind(&self) -> Kind {
        self.expr.kind()
    }
}

/// Position of a child among its parent's sub-nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot(pub usize);

/// The node arena.
#[derive(Debug, Clone, Default)]
pub struct ExprGraph {
    graph: DiGraph<Node, Slot>,
    /// Every edge name ever used, so fresh names never collide.
    names: HashSet<Edge>,
    fresh_counters: HashMap<Edge, usize>,
}

impl ExprGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, expr: Expr, edges: Vec<Edge>) -> NodeId {
        let children = expr.children();
        self.names.extend(edges.iter().cloned());
        let id = self.graph.add_node(Node { expr, edges });
        for (slot, child) in children.into_iter().enumerate() {
            self.graph.add_edge(id, child, Slot(slot));
        }
        trace!("added {} node {}", self.graph[id].kind(), id.index());
        id
    }

    fn check_unique(edges: &[Edge], what: &str) -> Result<(), CoreError> {
        match find_duplicate(edges) {
            Some(dup) => Err(CoreError::violation(
                Invariant::UniqueFreeEdges,
                format!("{what} exposes edge '{dup}' twice"),
            )),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Constructors
    // ------------------------------------------------------------------

    /// A named leaf with fixed edges.
    pub fn variable(&mut self, name: impl Into<String>, edges: Vec<Edge>) -> Result<NodeId, CoreError> {
        let name = name.into();
        Self::check_unique(&edges, &format!("variable '{name}'"))?;
        Ok(self.push(
            Expr::Variable {
                name,
                original: edges.clone(),
            },
            edges,
        ))
    }

    /// A variable whose declared edges currently go by other names.
    pub(crate) fn renamed_variable(
        &mut self,
        name: String,
        original: Vec<Edge>,
        edges: Vec<Edge>,
    ) -> Result<NodeId, CoreError> {
        Self::check_unique(&edges, &format!("variable '{name}'"))?;
        Ok(self.push(Expr::Variable { name, original }, edges))
    }

    /// The generalized identity over `edges`.
    pub fn copy(&mut self, edges: Vec<Edge>) -> Result<NodeId, CoreError> {
        if edges.is_empty() {
            return Err(CoreError::violation(Invariant::EmptyCopy, "copy over no edges"));
        }
        Self::check_unique(&edges, "copy")?;
        Ok(self.push(Expr::Copy, edges))
    }

    pub fn zero(&mut self, edges: Vec<Edge>) -> Result<NodeId, CoreError> {
        Self::check_unique(&edges, "zero")?;
        Ok(self.push(Expr::Zero, edges))
    }

    pub fn ones(&mut self, edges: Vec<Edge>) -> Result<NodeId, CoreError> {
        Self::check_unique(&edges, "ones")?;
        Ok(self.push(Expr::Ones, edges))
    }

    /// Contract `factors` along every edge shared by two of them.
    ///
    /// ```rust
    /// use tensorgrad_core::edge::edges;
    /// use tensorgrad_core::graph::ExprGraph;
    ///
    /// let mut g = ExprGraph::new();
    /// let a = g.variable("A", edges(["i", "j"])).unwrap();
    /// let x = g.variable("x", edges(["j"])).unwrap();
    /// let ax = g.contract(vec![a, x]).unwrap();
    /// assert_eq!(g.free_edges(ax).unwrap(), edges(["i"]).as_slice());
    /// ```
    pub fn contract(&mut self, factors: Vec<NodeId>) -> Result<NodeId, CoreError> {
        let mut order: Vec<Edge> = Vec::new();
        let mut uses: HashMap<Edge, usize> = HashMap::new();
        for &f in &factors {
            for e in self.free_edges(f)? {
                let count = uses.entry(e.clone()).or_insert(0);
                if *count == 0 {
                    order.push(e.clone());
                }
                *count += 1;
            }
        }
        if let Some(e) = order.iter().find(|e| uses[*e] > 2) {
            return Err(CoreError::violation(
                Invariant::ProductMultiplicity,
                format!("edge '{e}' is used by {} factors", uses[e]),
            ));
        }
        let free = order.into_iter().filter(|e| uses[e] == 1).collect();
        Ok(self.push(Expr::Product { factors }, free))
    }

    /// The linear combination `Σ cᵢ·tᵢ`; every term must expose the same edges.
    pub fn combine(&mut self, terms: Vec<(f64, NodeId)>) -> Result<NodeId, CoreError> {
        let Some(&(_, first)) = terms.first() else {
            return Err(CoreError::violation(Invariant::EmptySum, "sum of no terms"));
        };
        let expected = self.free_edges(first)?.to_vec();
        for &(_, t) in &terms[1..] {
            let got = self.free_edges(t)?;
            if !same_edge_set(&expected, got) {
                return Err(CoreError::EdgeSetMismatch {
                    expected,
                    got: got.to_vec(),
                });
            }
        }
        Ok(self.push(Expr::Sum { terms }, expected))
    }

    pub fn add(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, CoreError> {
        self.combine(vec![(1.0, a), (1.0, b)])
    }

    /// `a - b`, as a combination with a negated coefficient.
    pub fn subtract(&mut self, a: NodeId, b: NodeId) -> Result<NodeId, CoreError> {
        self.combine(vec![(1.0, a), (-1.0, b)])
    }

    /// `c·t`, as a single-term combination.
    pub fn scale(&mut self, coefficient: f64, t: NodeId) -> Result<NodeId, CoreError> {
        self.combine(vec![(coefficient, t)])
    }

    pub fn neg(&mut self, t: NodeId) -> Result<NodeId, CoreError> {
        self.scale(-1.0, t)
    }

    /// Apply a function rule to `inputs`.
    ///
    /// `input_edges[k]` lists the edges of input `k` the function consumes;
    /// the remaining edges are broadcast. The call exposes `output_edges`
    /// followed by the broadcast edges.
    pub fn function(
        &mut self,
        name: impl Into<String>,
        inputs: Vec<NodeId>,
        input_edges: Vec<Vec<Edge>>,
        output_edges: Vec<Edge>,
        rule: FunctionRule,
    ) -> Result<NodeId, CoreError> {
        let name = name.into();
        if inputs.len() != input_edges.len() {
            return Err(CoreError::violation(
                Invariant::FunctionEdges,
                format!(
                    "function '{name}' has {} inputs but {} input edge lists",
                    inputs.len(),
                    input_edges.len()
                ),
            ));
        }

        let mut broadcast: Vec<Edge> = Vec::new();
        for (k, (&input, consumed)) in inputs.iter().zip(&input_edges).enumerate() {
            Self::check_unique(consumed, &format!("input {k} of function '{name}'"))?;
            let free = self.free_edges(input)?;
            if let Some(missing) = consumed.iter().find(|e| !free.contains(e)) {
                return Err(CoreError::EdgeNotFound {
                    edge: missing.clone(),
                    node: input.index(),
                });
            }
            for e in free {
                if !consumed.contains(e) && !broadcast.contains(e) {
                    broadcast.push(e.clone());
                }
            }
        }

        let consumed_all: HashSet<&Edge> = input_edges.iter().flatten().collect();
        if let Some(e) = broadcast.iter().find(|e| consumed_all.contains(e)) {
            return Err(CoreError::violation(
                Invariant::FunctionEdges,
                format!("function '{name}' both consumes and broadcasts edge '{e}'"),
            ));
        }
        if let Some(e) = output_edges
            .iter()
            .find(|e| consumed_all.contains(e) || broadcast.contains(e))
        {
            return Err(CoreError::violation(
                Invariant::FunctionEdges,
                format!("output edge '{e}' of function '{name}' is not new"),
            ));
        }
        Self::check_unique(&output_edges, &format!("function '{name}'"))?;

        for link in rule.dim_links() {
            let valid = link.output < output_edges.len()
                && input_edges
                    .get(link.input)
                    .is_some_and(|c| link.consumed < c.len());
            if !valid {
                return Err(CoreError::violation(
                    Invariant::FunctionEdges,
                    format!("function '{name}' has an out-of-range dimension link {link:?}"),
                ));
            }
        }

        let mut edges = output_edges.clone();
        edges.extend(broadcast);
        Ok(self.push(
            Expr::Function(FunctionCall {
                name,
                inputs,
                input_edges,
                output_edges,
                rule,
            }),
            edges,
        ))
    }

    // ------------------------------------------------------------------
    // Read-only traversal interface
    // ------------------------------------------------------------------

    pub fn node(&self, id: NodeId) -> Result<&Node, CoreError> {
        self.graph
            .node_weight(id)
            .ok_or(CoreError::InvalidNode { node: id.index() })
    }

    pub fn expr(&self, id: NodeId) -> Result<&Expr, CoreError> {
        Ok(&self.node(id)?.expr)
    }

    pub fn kind(&self, id: NodeId) -> Result<Kind, CoreError> {
        Ok(self.node(id)?.kind())
    }

    pub fn free_edges(&self, id: NodeId) -> Result<&[Edge], CoreError> {
        Ok(&self.node(id)?.edges)
    }

    pub fn children(&self, id: NodeId) -> Result<Vec<NodeId>, CoreError> {
        Ok(self.node(id)?.expr.children())
    }

    /// Nodes that list `id` among their children.
    pub fn parents(&self, id: NodeId) -> Vec<NodeId> {
        let mut parents: Vec<NodeId> = self
            .graph
            .neighbors_directed(id, Direction::Incoming)
            .collect();
        parents.sort();
        parents.dedup();
        parents
    }

    pub fn function_call(&self, id: NodeId) -> Option<&FunctionCall> {
        match self.graph.node_weight(id).map(|n| &n.expr) {
            Some(Expr::Function(call)) => Some(call),
            _ => None,
        }
    }

    pub fn variable_name(&self, id: NodeId) -> Option<&str> {
        match self.graph.node_weight(id).map(|n| &n.expr) {
            Some(Expr::Variable { name, .. }) => Some(name),
            _ => None,
        }
    }

    pub fn coefficients(&self, id: NodeId) -> Option<Vec<f64>> {
        match self.graph.node_weight(id).map(|n| &n.expr) {
            Some(Expr::Sum { terms }) => Some(terms.iter().map(|&(c, _)| c).collect()),
            _ => None,
        }
    }

    /// Every node reachable from `root`, `root` first.
    pub fn reachable(&self, root: NodeId) -> Vec<NodeId> {
        let mut dfs = Dfs::new(&self.graph, root);
        let mut out = Vec::new();
        while let Some(id) = dfs.next(&self.graph) {
            out.push(id);
        }
        out
    }

    /// Total number of nodes in the arena, reachable or not.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn check_acyclic(&self) -> Result<(), CoreError> {
        toposort(&self.graph, None)
            .map(|_| ())
            .map_err(|cycle| CoreError::CyclicGraph {
                node: cycle.node_id().index(),
            })
    }

    // ------------------------------------------------------------------
    // Edge names
    // ------------------------------------------------------------------

    /// A name derived from `base` that no node of this graph has ever used.
    pub fn fresh_edge(&mut self, base: &Edge) -> Edge {
        let counter = self.fresh_counters.entry(base.clone()).or_insert(0);
        loop {
            let candidate = Edge::new(format!("{base}_{counter}"));
            *counter += 1;
            if self.names.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    /// Mark names as taken without creating a node.
    pub fn reserve_edges<'a>(&mut self, edges: impl IntoIterator<Item = &'a Edge>) {
        self.names.extend(edges.into_iter().cloned());
    }
}

/// Per-pass memo table keyed by node identity, with a cycle guard.
///
/// ```rust
/// use tensorgrad_core::graph::{Memo, NodeId};
///
/// let mut memo: Memo<u32> = Memo::new();
/// let id = NodeId::new(0);
/// memo.enter(id).unwrap();
/// assert!(memo.enter(id).is_err());
/// assert_eq!(memo.finish(id, 7), 7);
/// assert_eq!(memo.get(id), Some(7));
/// ```
#[derive(Debug, Clone)]
pub struct Memo<T> {
    done: HashMap<NodeId, T>,
    active: HashSet<NodeId>,
}

impl<T: Clone> Memo<T> {
    pub fn new() -> Self {
        Self {
            done: HashMap::new(),
            active: HashSet::new(),
        }
    }

    pub fn get(&self, id: NodeId) -> Option<T> {
        self.done.get(&id).cloned()
    }

    /// Mark `id` as in progress; re-entering an in-progress node is a cycle.
    pub fn enter(&mut self, id: NodeId) -> Result<(), CoreError> {
        if self.active.insert(id) {
            Ok(())
        } else {
            Err(CoreError::CyclicGraph { node: id.index() })
        }
    }

    pub fn finish(&mut self, id: NodeId, value: T) -> T {
        self.active.remove(&id);
        self.done.insert(id, value.clone());
        value
    }

    /// Number of finished nodes.
    pub fn len(&self) -> usize {
        self.done.len()
    }

    pub fn is_empty(&self) -> bool {
        self.done.is_empty()
    }
}

impl<T: Clone> Default for Memo<T> {
    fn default() -> Self {
        Self::new()
    }
}
