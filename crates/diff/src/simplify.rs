//! # Algebraic Simplification
//!
//! Derivatives come out of [`grad`](crate::grad::grad) full of zeros,
//! single-term sums and identity copies. `simplify` rewrites bottom-up until
//! the root's structural key stops changing:
//!
//! | rule | before | after |
//! |------|--------|-------|
//! | flatten | `(a + b) + c`, `(a·b)·c` | `a + b + c`, `a·b·c` (unless `a·b` is shared) |
//! | zero | `0·a`, `a + 0` | `0`, `a` |
//! | unit | `1·a` (edge-less ones) | `a` |
//! | like terms | `2a + 3a` | `5a` |
//! | hoist | `(2a)·b` | `2(a·b)` |
//! | copy merge | `δ(a,b,s)·δ(s,c)` | `δ(a,b,c)` |
//! | identity | `δ(i,k)·x_i` | `x_k` |
//!
//! A result of `simplify` simplifies to itself.

use std::collections::{HashMap, VecDeque};

use log::{debug, trace};
use tensorgrad_core::edge::same_edge_set;
use tensorgrad_core::{rename, CoreError, Edge, Expr, ExprGraph, Invariant, Kind, Memo, NodeId};

use crate::canon::{Canon, Token};
use crate::config::Options;
use crate::error::DiffError;

/// Simplify `node`, returning an equal tensor with the same free edges.
pub fn simplify(graph: &mut ExprGraph, node: NodeId, options: &Options) -> Result<NodeId, DiffError> {
    let mut canon = Canon::new();
    let mut current = node;
    let mut key = canon.structural_key(graph, current)?;
    debug!(
        "simplify node {}: {} reachable nodes",
        node.index(),
        graph.reachable(node).len()
    );

    for round in 0..options.max_simplify_rounds {
        let mut pass = Simplifier {
            options,
            canon: &mut canon,
            memo: Memo::new(),
        };
        let next = pass.simplify(graph, current)?;
        let next_key = canon.structural_key(graph, next)?;
        if next_key == key {
            debug!(
                "simplify converged after {} rounds: node {}, {} reachable nodes",
                round + 1,
                current.index(),
                graph.reachable(current).len()
            );
            return Ok(current);
        }
        current = next;
        key = next_key;
    }
    debug!(
        "simplify stopped at the round limit ({})",
        options.max_simplify_rounds
    );
    Ok(current)
}

struct Simplifier<'a> {
    options: &'a Options,
    canon: &'a mut Canon,
    memo: Memo<NodeId>,
}

impl Simplifier<'_> {
    fn simplify(&mut self, graph: &mut ExprGraph, id: NodeId) -> Result<NodeId, DiffError> {
        if let Some(done) = self.memo.get(id) {
            return Ok(done);
        }
        self.memo.enter(id)?;
        let result = match graph.expr(id)?.clone() {
            Expr::Variable { .. } | Expr::Copy | Expr::Zero | Expr::Ones => id,
            Expr::Sum { terms } => self.sum(graph, id, terms)?,
            Expr::Product { factors } => self.product(graph, id, factors)?,
            Expr::Function(call) => {
                let mut inputs = Vec::with_capacity(call.inputs.len());
                for &input in &call.inputs {
                    inputs.push(self.simplify(graph, input)?);
                }
                if inputs == call.inputs {
                    id
                } else {
                    graph.function(
                        call.name,
                        inputs,
                        call.input_edges,
                        call.output_edges,
                        call.rule,
                    )?
                }
            }
        };
        Ok(self.memo.finish(id, result))
    }

    fn sum(
        &mut self,
        graph: &mut ExprGraph,
        id: NodeId,
        terms: Vec<(f64, NodeId)>,
    ) -> Result<NodeId, DiffError> {
        let mut flat: Vec<(f64, NodeId)> = Vec::with_capacity(terms.len());
        for &(c, t) in &terms {
            let t = self.simplify(graph, t)?;
            match graph.expr(t)? {
                Expr::Sum { terms: inner } => {
                    trace!("flattening sum {} into {}", t.index(), id.index());
                    flat.extend(inner.iter().map(|&(c2, u)| (c * c2, u)));
                }
                _ => flat.push((c, t)),
            }
        }

        let mut kept: Vec<(f64, NodeId)> = Vec::with_capacity(flat.len());
        for (c, t) in flat {
            if c == 0.0 || graph.kind(t)? == Kind::Zero {
                continue;
            }
            kept.push((c, t));
        }

        if self.options.combine_like_terms {
            let mut merged: Vec<(f64, NodeId)> = Vec::with_capacity(kept.len());
            let mut seen: HashMap<Vec<Token>, usize> = HashMap::new();
            for (c, t) in kept {
                let key = self.canon.structural_key(graph, t)?;
                match seen.get(&key) {
                    Some(&slot) => {
                        trace!("like terms: node {} joins node {}", t.index(), merged[slot].1.index());
                        merged[slot].0 += c;
                    }
                    None => {
                        seen.insert(key, merged.len());
                        merged.push((c, t));
                    }
                }
            }
            kept = merged.into_iter().filter(|&(c, _)| c != 0.0).collect();
        }

        match kept.as_slice() {
            [] => {
                let edges = graph.free_edges(id)?.to_vec();
                Ok(graph.zero(edges)?)
            }
            [(c, t)] if *c == 1.0 => Ok(*t),
            _ if kept == terms => Ok(id),
            _ => Ok(graph.combine(kept)?),
        }
    }

    fn product(
        &mut self,
        graph: &mut ExprGraph,
        id: NodeId,
        factors: Vec<NodeId>,
    ) -> Result<NodeId, DiffError> {
        let free = graph.free_edges(id)?.to_vec();
        let mut queue: VecDeque<NodeId> = VecDeque::with_capacity(factors.len());
        for &f in &factors {
            queue.push_back(self.simplify(graph, f)?);
        }

        // A product reached from more than one place stays a single node;
        // splicing it into each user would copy it once per path.
        let listed: Vec<NodeId> = queue.iter().copied().collect();
        let shared = |graph: &ExprGraph, f: NodeId| {
            listed.iter().filter(|&&g| g == f).count() > 1 || graph.parents(f).len() > 1
        };

        let mut coefficient = 1.0;
        let mut out: Vec<NodeId> = Vec::with_capacity(queue.len());
        while let Some(f) = queue.pop_front() {
            let edgeless = graph.free_edges(f)?.is_empty();
            match graph.expr(f)?.clone() {
                Expr::Product { factors: inner } if !shared(&*graph, f) => {
                    let spliced = self.splice_product(graph, f, inner, &free, &out, &queue)?;
                    for g in spliced.into_iter().rev() {
                        queue.push_front(g);
                    }
                }
                Expr::Sum { terms } if terms.len() == 1 => {
                    trace!("hoisting coefficient {} out of node {}", terms[0].0, f.index());
                    coefficient *= terms[0].0;
                    queue.push_front(terms[0].1);
                }
                Expr::Zero => {
                    trace!("zero factor in product {}", id.index());
                    return Ok(graph.zero(free)?);
                }
                Expr::Ones if edgeless => {}
                _ => out.push(f),
            }
        }

        while self.merge_copies(graph, &mut out)? {}
        if self.options.eliminate_identities {
            while self.eliminate_identity(graph, &mut out)? {}
        }

        if coefficient == 0.0 {
            return Ok(graph.zero(free)?);
        }
        if coefficient == 1.0 && out == factors {
            return Ok(id);
        }
        let core = match out.as_slice() {
            [] => graph.ones(Vec::new())?,
            [single] => *single,
            _ => graph.contract(out)?,
        };
        let got = graph.free_edges(core)?;
        if !same_edge_set(&free, got) {
            return Err(CoreError::InvariantViolation {
                rule: Invariant::ProductMultiplicity,
                detail: format!(
                    "simplified product {} exposes {got:?}, expected {free:?}",
                    id.index()
                ),
            }
            .into());
        }
        if coefficient == 1.0 {
            Ok(core)
        } else {
            Ok(graph.scale(coefficient, core)?)
        }
    }

    /// The factors of an inner product, with its contracted edges renamed
    /// away from every edge visible at the outer level.
    fn splice_product(
        &mut self,
        graph: &mut ExprGraph,
        inner_id: NodeId,
        inner: Vec<NodeId>,
        free: &[Edge],
        out: &[NodeId],
        queue: &VecDeque<NodeId>,
    ) -> Result<Vec<NodeId>, DiffError> {
        trace!("flattening product {}", inner_id.index());
        let inner_free = graph.free_edges(inner_id)?.to_vec();
        let mut taken: Vec<Edge> = free.to_vec();
        for &g in out.iter().chain(queue.iter()) {
            taken.extend(graph.free_edges(g)?.iter().cloned());
        }

        let mut moved: HashMap<Edge, Edge> = HashMap::new();
        for &g in &inner {
            for e in graph.free_edges(g)?.to_vec() {
                if !inner_free.contains(&e) && taken.contains(&e) && !moved.contains_key(&e) {
                    let fresh = graph.fresh_edge(&e);
                    moved.insert(e, fresh);
                }
            }
        }
        if moved.is_empty() {
            return Ok(inner);
        }
        let mut renamed = Vec::with_capacity(inner.len());
        for g in inner {
            let local: HashMap<Edge, Edge> = graph
                .free_edges(g)?
                .iter()
                .filter_map(|e| moved.get(e).map(|to| (e.clone(), to.clone())))
                .collect();
            renamed.push(rename(graph, g, &local)?);
        }
        Ok(renamed)
    }

    /// Merge one pair of copies sharing an edge; `false` when none is left.
    fn merge_copies(&mut self, graph: &mut ExprGraph, out: &mut Vec<NodeId>) -> Result<bool, DiffError> {
        for i in 0..out.len() {
            if graph.kind(out[i])? != Kind::Copy {
                continue;
            }
            for j in i + 1..out.len() {
                if graph.kind(out[j])? != Kind::Copy {
                    continue;
                }
                let a = graph.free_edges(out[i])?.to_vec();
                let b = graph.free_edges(out[j])?.to_vec();
                if !a.iter().any(|e| b.contains(e)) {
                    continue;
                }
                let mut merged: Vec<Edge> = a.iter().filter(|e| !b.contains(e)).cloned().collect();
                merged.extend(b.iter().filter(|e| !a.contains(e)).cloned());
                if merged.is_empty() {
                    continue;
                }
                trace!("merging copies {} and {}", out[i].index(), out[j].index());
                out[i] = graph.copy(merged)?;
                out.remove(j);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Absorb one 2-edge copy into a neighbour; `false` when none applies.
    fn eliminate_identity(&mut self, graph: &mut ExprGraph, out: &mut Vec<NodeId>) -> Result<bool, DiffError> {
        for i in 0..out.len() {
            let c = out[i];
            if graph.kind(c)? != Kind::Copy {
                continue;
            }
            let edges = graph.free_edges(c)?.to_vec();
            let [a, b] = edges.as_slice() else {
                continue;
            };
            for (from, to) in [(a, b), (b, a)] {
                let neighbour = out.iter().enumerate().find_map(|(j, &g)| {
                    (j != i && graph.free_edges(g).is_ok_and(|e| e.contains(from))).then_some(j)
                });
                let Some(j) = neighbour else {
                    continue;
                };
                let g = out[j];
                if graph.kind(g)? == Kind::Copy || graph.free_edges(g)?.contains(to) {
                    continue;
                }
                trace!("identity {}: renaming {from} to {to} on node {}", c.index(), g.index());
                let mapping = HashMap::from([(from.clone(), to.clone())]);
                out[j] = rename(graph, g, &mapping)?;
                out.remove(i);
                return Ok(true);
            }
        }
        Ok(false)
    }
}
