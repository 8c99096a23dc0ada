//! Smoke tests for the core crate.
//!
//! These tests verify that the basic infrastructure works:
//! - Expressions can be built from named edges
//! - Invariant violations are reported with the offending edge
//! - Renaming never captures a contracted edge
//! - Kinds and edges serialize for external emitters

use std::collections::HashMap;

use tensorgrad_core::{edges, rename, CoreError, Edge, Expr, ExprGraph, Invariant, Kind};

// ============================================================================
// Construction
// ============================================================================

#[test]
fn smoke_build_least_squares() {
    // ‖Ax − y‖²
    let mut g = ExprGraph::new();
    let a = g.variable("A", edges(["x", "y"])).unwrap();
    let x = g.variable("x", edges(["x"])).unwrap();
    let y = g.variable("y", edges(["y"])).unwrap();

    let ax = g.contract(vec![a, x]).unwrap();
    assert_eq!(g.free_edges(ax).unwrap(), edges(["y"]).as_slice());

    let r = g.subtract(ax, y).unwrap();
    let loss = g.contract(vec![r, r]).unwrap();

    assert_eq!(g.kind(loss).unwrap(), Kind::Product);
    assert!(g.free_edges(loss).unwrap().is_empty());
    assert_eq!(g.children(loss).unwrap(), vec![r, r]);
    assert!(g.check_acyclic().is_ok());

    let reach = g.reachable(loss);
    for id in [a, x, y, ax, r] {
        assert!(reach.contains(&id));
    }
}

#[test]
fn smoke_sum_order_follows_first_term() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i", "j"])).unwrap();
    let b = g.variable("b", edges(["j", "i"])).unwrap();
    let s = g.add(b, a).unwrap();
    assert_eq!(g.free_edges(s).unwrap(), edges(["j", "i"]).as_slice());
}

#[test]
fn smoke_scale_and_neg() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let s = g.scale(2.5, a).unwrap();
    let n = g.neg(a).unwrap();
    assert_eq!(g.coefficients(s), Some(vec![2.5]));
    assert_eq!(g.coefficients(n), Some(vec![-1.0]));
    assert_eq!(g.variable_name(a), Some("a"));
    assert_eq!(g.variable_name(s), None);
}

// ============================================================================
// Invariants
// ============================================================================

#[test]
fn smoke_triple_edge_is_rejected() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let b = g.variable("b", edges(["i"])).unwrap();
    let c = g.variable("c", edges(["i"])).unwrap();

    match g.contract(vec![a, b, c]) {
        Err(CoreError::InvariantViolation { rule, detail }) => {
            assert_eq!(rule, Invariant::ProductMultiplicity);
            assert!(detail.contains("'i'"));
        }
        other => panic!("expected an invariant violation, got {other:?}"),
    }
}

#[test]
fn smoke_sum_edge_mismatch() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let b = g.variable("b", edges(["j"])).unwrap();
    assert_eq!(
        g.add(a, b),
        Err(CoreError::EdgeSetMismatch {
            expected: edges(["i"]),
            got: edges(["j"]),
        })
    );
}

#[test]
fn smoke_invalid_node() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let mut other = ExprGraph::new();
    assert!(matches!(
        other.contract(vec![a]),
        Err(CoreError::InvalidNode { .. })
    ));
}

// ============================================================================
// Renaming
// ============================================================================

#[test]
fn smoke_rename_sum_renames_every_term() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let b = g.variable("b", edges(["i"])).unwrap();
    let s = g.subtract(a, b).unwrap();

    let r = rename(&mut g, s, &HashMap::from([(Edge::from("i"), Edge::from("k"))])).unwrap();
    assert_eq!(g.free_edges(r).unwrap(), edges(["k"]).as_slice());
    assert_eq!(g.coefficients(r), Some(vec![1.0, -1.0]));
    for t in g.children(r).unwrap() {
        assert_eq!(g.free_edges(t).unwrap(), edges(["k"]).as_slice());
        assert!(matches!(g.expr(t).unwrap(), Expr::Variable { .. }));
    }
}

#[test]
fn smoke_rename_leaves_original_intact() {
    let mut g = ExprGraph::new();
    let a = g.variable("A", edges(["i", "j"])).unwrap();
    let x = g.variable("x", edges(["j"])).unwrap();
    let ax = g.contract(vec![a, x]).unwrap();
    let before = g.node_count();

    let r = rename(&mut g, ax, &HashMap::from([(Edge::from("i"), Edge::from("j"))])).unwrap();
    assert_ne!(r, ax);
    assert!(g.node_count() > before);
    assert_eq!(g.free_edges(ax).unwrap(), edges(["i"]).as_slice());
    assert_eq!(g.free_edges(r).unwrap(), edges(["j"]).as_slice());
}

// ============================================================================
// Serialization
// ============================================================================

#[test]
fn smoke_kind_and_edge_serialize() {
    assert_eq!(serde_json::to_string(&Kind::Copy).unwrap(), "\"Copy\"");
    let list: Vec<Edge> = serde_json::from_str("[\"i\", \"j'\"]").unwrap();
    assert_eq!(list, edges(["i", "j'"]));
}
