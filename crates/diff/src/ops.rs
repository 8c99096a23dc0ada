//! # Tensor Function Library
//!
//! Common tensor operations, built from the graph primitives. Most are pure
//! wiring: copies join edges, products contract them.
//!
//! ## Operations
//!
//! | Op | Built as | Derivative |
//! |----|----------|------------|
//! | `frobenius2(t)` | `t · t` | product rule |
//! | `einsum(ts, out)` | renamed operands + joining copies | product rule |
//! | `kronecker(ts)` | renamed operands, outer product | product rule |
//! | `diag(v, es)` | `δ(es…, e) · v_e` | product rule |
//! | `sum(t, es)` | `t · δ(e)` for each summed edge | product rule |
//! | `trace(t)` | `t · δ(edges of t)` | product rule |
//! | `hadamard(a, b)` | shared edges joined by 3-edge copies | product rule |
//! | `exp`, `log`, `pow(k)` | elementwise function | `exp`, `pow(-1)`, `k·pow(k-1)` |
//! | `softmax`, `cross_entropy` | composed from the above | chain rule |
//! | `opaque(...)` | symbolic function | another opaque function |

use std::collections::HashMap;

use tensorgrad_core::edge::find_duplicate;
use tensorgrad_core::{make_distinct, CoreError, Edge, ExprGraph, FunctionRule, NodeId};

use crate::error::DiffError;

fn invalid(op: &'static str, reason: impl Into<String>) -> DiffError {
    DiffError::InvalidArgument {
        op,
        reason: reason.into(),
    }
}

fn require_edges(graph: &ExprGraph, t: NodeId, wanted: &[Edge]) -> Result<(), DiffError> {
    let free = graph.free_edges(t)?;
    match wanted.iter().find(|e| !free.contains(e)) {
        Some(missing) => Err(CoreError::EdgeNotFound {
            edge: missing.clone(),
            node: t.index(),
        }
        .into()),
        None => Ok(()),
    }
}

/// The squared Frobenius norm `Σ t²`.
pub fn frobenius2(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    Ok(graph.contract(vec![t, t])?)
}

/// Einstein summation by edge name.
///
/// Operands sharing an edge take one index value along it. Edges in
/// `output` are kept, every other edge is summed over.
///
/// ```rust
/// use tensorgrad_core::{edges, ExprGraph};
/// use tensorgrad_diff::ops::einsum;
///
/// let mut g = ExprGraph::new();
/// let a = g.variable("a", edges(["i", "j"])).unwrap();
/// let b = g.variable("b", edges(["j", "k"])).unwrap();
/// let ab = einsum(&mut g, &[a, b], &edges(["i", "k"])).unwrap();
/// assert_eq!(g.free_edges(ab).unwrap().len(), 2);
/// ```
pub fn einsum(graph: &mut ExprGraph, tensors: &[NodeId], output: &[Edge]) -> Result<NodeId, DiffError> {
    if let Some(dup) = find_duplicate(output) {
        return Err(invalid("einsum", format!("output edge '{dup}' is listed twice")));
    }

    let mut order: Vec<Edge> = Vec::new();
    let mut count: HashMap<Edge, usize> = HashMap::new();
    for &t in tensors {
        for e in graph.free_edges(t)? {
            let n = count.entry(e.clone()).or_insert(0);
            if *n == 0 {
                order.push(e.clone());
            }
            *n += 1;
        }
    }
    if let Some(missing) = output.iter().find(|e| !count.contains_key(*e)) {
        return Err(invalid("einsum", format!("output edge '{missing}' is on no operand")));
    }

    // An output edge on a single operand can stay where it is.
    let (kept, joined): (Vec<Edge>, Vec<Edge>) = order
        .into_iter()
        .partition(|e| count[e] == 1 && output.contains(e));
    let distinct = make_distinct(graph, tensors, &joined, &kept)?;

    let mut factors = distinct.nodes;
    for e in joined {
        let mut copy_edges: Vec<Edge> = distinct
            .renames
            .iter()
            .filter_map(|r| r.get(&e).cloned())
            .collect();
        if output.contains(&e) {
            copy_edges.push(e);
        }
        factors.push(graph.copy(copy_edges)?);
    }
    Ok(graph.contract(factors)?)
}

/// The tensor (outer) product; shared edge names are renamed apart first.
pub fn kronecker(graph: &mut ExprGraph, tensors: &[NodeId]) -> Result<NodeId, DiffError> {
    let distinct = make_distinct(graph, tensors, &[], &[])?;
    Ok(graph.contract(distinct.nodes)?)
}

/// The diagonal tensor over `new_edges` with the vector `t` on its diagonal.
pub fn diag(graph: &mut ExprGraph, t: NodeId, new_edges: &[Edge]) -> Result<NodeId, DiffError> {
    let free = graph.free_edges(t)?;
    if free.len() != 1 {
        return Err(invalid(
            "diag",
            format!("expected a vector, got a tensor with edges {free:?}"),
        ));
    }
    let distinct = make_distinct(graph, &[t], new_edges, &[])?;
    let v = distinct.nodes[0];
    let mut copy_edges = new_edges.to_vec();
    copy_edges.extend(graph.free_edges(v)?.iter().cloned());
    let copy = graph.copy(copy_edges)?;
    Ok(graph.contract(vec![copy, v])?)
}

/// Sum `t` over `edges` (all of its edges when `None`).
///
/// With `keepdims` the summed edges are broadcast back with ones.
pub fn sum(
    graph: &mut ExprGraph,
    t: NodeId,
    edges: Option<&[Edge]>,
    keepdims: bool,
) -> Result<NodeId, DiffError> {
    let edges = match edges {
        Some(edges) => {
            require_edges(graph, t, edges)?;
            edges.to_vec()
        }
        None => graph.free_edges(t)?.to_vec(),
    };
    let mut factors = vec![t];
    for e in &edges {
        factors.push(graph.copy(vec![e.clone()])?);
    }
    let summed = graph.contract(factors)?;
    if keepdims {
        let ones = graph.ones(edges)?;
        Ok(graph.contract(vec![summed, ones])?)
    } else {
        Ok(summed)
    }
}

/// Contract all edges of `t` with one copy.
pub fn trace(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    let edges = graph.free_edges(t)?.to_vec();
    let copy = graph.copy(edges)?;
    Ok(graph.contract(vec![t, copy])?)
}

/// Elementwise product. Shared edges are kept, the rest broadcast.
pub fn hadamard(graph: &mut ExprGraph, a: NodeId, b: NodeId) -> Result<NodeId, DiffError> {
    let b_free = graph.free_edges(b)?.to_vec();
    let shared: Vec<Edge> = graph
        .free_edges(a)?
        .iter()
        .filter(|e| b_free.contains(e))
        .cloned()
        .collect();
    let distinct = make_distinct(graph, &[a, b], &[], &[])?;
    let mut factors = distinct.nodes.clone();
    for e in shared {
        let (Some(left), Some(right)) = (distinct.renames[0].get(&e), distinct.renames[1].get(&e)) else {
            continue;
        };
        factors.push(graph.copy(vec![left.clone(), right.clone(), e])?);
    }
    Ok(graph.contract(factors)?)
}

/// A scalar function applied to every element of `t`.
///
/// `df` builds the elementwise derivative from the (possibly renamed) input
/// of the call.
pub fn elementwise<F, D>(
    graph: &mut ExprGraph,
    name: impl Into<String>,
    t: NodeId,
    f: F,
    df: D,
) -> Result<NodeId, DiffError>
where
    F: Fn(f64) -> f64 + 'static,
    D: Fn(&mut ExprGraph, NodeId) -> Result<NodeId, CoreError> + 'static,
{
    Ok(elementwise_node(graph, name.into(), t, f, df)?)
}

fn elementwise_node<F, D>(
    graph: &mut ExprGraph,
    name: String,
    t: NodeId,
    f: F,
    df: D,
) -> Result<NodeId, CoreError>
where
    F: Fn(f64) -> f64 + 'static,
    D: Fn(&mut ExprGraph, NodeId) -> Result<NodeId, CoreError> + 'static,
{
    let rule = FunctionRule::new(move |g, call, _input, _connection| {
        let input = g
            .function_call(call)
            .and_then(|c| c.inputs.first().copied())
            .ok_or(CoreError::InvalidNode { node: call.index() })?;
        df(g, input)
    })
    .with_forward(move |inputs| match inputs {
        [x] => Ok(x.map(&f)),
        _ => Err(CoreError::BadTensor {
            reason: format!("an elementwise function takes 1 input, got {}", inputs.len()),
        }),
    });
    graph.function(name, vec![t], vec![Vec::new()], Vec::new(), rule)
}

fn exp_node(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, CoreError> {
    elementwise_node(graph, "exp".to_string(), t, f64::exp, exp_node)
}

fn log_node(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, CoreError> {
    elementwise_node(graph, "log".to_string(), t, f64::ln, |g, x| pow_node(g, x, -1))
}

fn pow_node(graph: &mut ExprGraph, t: NodeId, k: i32) -> Result<NodeId, CoreError> {
    if k == 0 {
        let edges = graph.free_edges(t)?.to_vec();
        return graph.ones(edges);
    }
    elementwise_node(
        graph,
        format!("pow({k})"),
        t,
        move |x| x.powi(k),
        move |g, x| {
            let lower = pow_node(g, x, k - 1)?;
            g.scale(f64::from(k), lower)
        },
    )
}

pub fn exp(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    Ok(exp_node(graph, t)?)
}

/// Natural logarithm; its derivative is `pow(t, -1)`.
pub fn log(graph: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    Ok(log_node(graph, t)?)
}

/// Elementwise `t^k`. `pow(t, 0)` is ones over the edges of `t`.
pub fn pow(graph: &mut ExprGraph, t: NodeId, k: i32) -> Result<NodeId, DiffError> {
    Ok(pow_node(graph, t, k)?)
}

/// `exp(t) / Σ_dims exp(t)`.
pub fn softmax(graph: &mut ExprGraph, t: NodeId, dims: &[Edge]) -> Result<NodeId, DiffError> {
    require_edges(graph, t, dims)?;
    let e = exp(graph, t)?;
    let total = sum(graph, e, Some(dims), true)?;
    let inverse = pow(graph, total, -1)?;
    hadamard(graph, e, inverse)
}

/// `-Σ_dims y · log(softmax(t))`.
pub fn cross_entropy(
    graph: &mut ExprGraph,
    t: NodeId,
    y: NodeId,
    dims: &[Edge],
) -> Result<NodeId, DiffError> {
    require_edges(graph, t, dims)?;
    let probabilities = softmax(graph, t, dims)?;
    let log_p = log(graph, probabilities)?;
    let weighted = hadamard(graph, y, log_p)?;
    let total = sum(graph, weighted, Some(dims), false)?;
    Ok(graph.neg(total)?)
}

/// A purely symbolic function of `inputs`.
pub fn opaque(
    graph: &mut ExprGraph,
    name: impl Into<String>,
    inputs: Vec<NodeId>,
    input_edges: Vec<Vec<Edge>>,
    output_edges: Vec<Edge>,
) -> Result<NodeId, DiffError> {
    Ok(graph.function(name, inputs, input_edges, output_edges, FunctionRule::opaque())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tensorgrad_core::{edges, Kind};

    #[test]
    fn test_einsum_rejects_repeated_output() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i"])).unwrap();
        assert!(matches!(
            einsum(&mut g, &[a], &edges(["i", "i"])),
            Err(DiffError::InvalidArgument { op: "einsum", .. })
        ));
        assert!(matches!(
            einsum(&mut g, &[a], &edges(["k"])),
            Err(DiffError::InvalidArgument { op: "einsum", .. })
        ));
    }

    #[test]
    fn test_einsum_edges() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i", "j"])).unwrap();
        let b = g.variable("b", edges(["j", "k"])).unwrap();
        let c = g.variable("c", edges(["k", "l"])).unwrap();
        let abc = einsum(&mut g, &[a, b, c], &edges(["i", "l"])).unwrap();
        let mut free = g.free_edges(abc).unwrap().to_vec();
        free.sort();
        assert_eq!(free, edges(["i", "l"]));

        let hadamard_like = einsum(&mut g, &[a, a], &edges(["i", "j"])).unwrap();
        let mut free = g.free_edges(hadamard_like).unwrap().to_vec();
        free.sort();
        assert_eq!(free, edges(["i", "j"]));
    }

    #[test]
    fn test_kronecker_renames_shared_edges() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i"])).unwrap();
        let k = kronecker(&mut g, &[a, a]).unwrap();
        assert_eq!(g.free_edges(k).unwrap().len(), 2);
    }

    #[test]
    fn test_diag_needs_a_vector() {
        let mut g = ExprGraph::new();
        let m = g.variable("m", edges(["i", "j"])).unwrap();
        assert!(matches!(
            diag(&mut g, m, &edges(["a", "b"])),
            Err(DiffError::InvalidArgument { op: "diag", .. })
        ));

        let v = g.variable("v", edges(["a"])).unwrap();
        let d = diag(&mut g, v, &edges(["a", "b"])).unwrap();
        assert_eq!(g.free_edges(d).unwrap(), edges(["a", "b"]).as_slice());
    }

    #[test]
    fn test_sum_keepdims() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i", "j"])).unwrap();
        let s = sum(&mut g, a, Some(&edges(["i"])), false).unwrap();
        assert_eq!(g.free_edges(s).unwrap(), edges(["j"]).as_slice());
        let kept = sum(&mut g, a, Some(&edges(["i"])), true).unwrap();
        assert_eq!(g.free_edges(kept).unwrap(), edges(["j", "i"]).as_slice());
        let all = sum(&mut g, a, None, false).unwrap();
        assert!(g.free_edges(all).unwrap().is_empty());
        assert!(sum(&mut g, a, Some(&edges(["k"])), false).is_err());
    }

    #[test]
    fn test_pow_zero_is_ones() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i"])).unwrap();
        let p = pow(&mut g, a, 0).unwrap();
        assert_eq!(g.kind(p).unwrap(), Kind::Ones);
        assert_eq!(g.free_edges(p).unwrap(), edges(["i"]).as_slice());
    }

    #[test]
    fn test_elementwise_broadcasts_every_edge() {
        let mut g = ExprGraph::new();
        let a = g.variable("a", edges(["i", "j"])).unwrap();
        let e = exp(&mut g, a).unwrap();
        assert_eq!(g.free_edges(e).unwrap(), edges(["i", "j"]).as_slice());
        let call = g.function_call(e).unwrap();
        assert!(call.rule.is_evaluable());
        assert_eq!(call.name, "exp");
    }

    #[test]
    fn test_softmax_checks_dims() {
        let mut g = ExprGraph::new();
        let t = g.variable("t", edges(["b", "c"])).unwrap();
        assert!(matches!(
            softmax(&mut g, t, &edges(["z"])),
            Err(DiffError::Core(CoreError::EdgeNotFound { .. }))
        ));
        let s = softmax(&mut g, t, &edges(["c"])).unwrap();
        let mut free = g.free_edges(s).unwrap().to_vec();
        free.sort();
        assert_eq!(free, edges(["b", "c"]));
    }
}
