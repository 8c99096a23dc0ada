//! # Shape Tests
//!
//! Tests for edge-dimension inference:
//! - Sizes flow through products, sums, copies and function calls
//! - Conflicting sizes are reported as mismatches
//! - Edges nothing determines stay unknown

use rstest::rstest;
use tensorgrad_core::{edges, CoreError, DimLink, DimTable, Edge, ExprGraph, FunctionRule};

// ============================================================================
// Propagation
// ============================================================================

#[rstest]
#[case(2, 3)]
#[case(1, 1)]
#[case(5, 4)]
fn test_matvec_sizes(#[case] rows: usize, #[case] cols: usize) {
    let mut g = ExprGraph::new();
    let a = g.variable("A", edges(["i", "j"])).unwrap();
    let x = g.variable("x", edges(["j"])).unwrap();
    let y = g.variable("y", edges(["i"])).unwrap();
    let ax = g.contract(vec![a, x]).unwrap();
    let r = g.subtract(ax, y).unwrap();

    let mut table = DimTable::build(&g, r).unwrap();
    table.assign(a, &Edge::from("i"), rows).unwrap();
    table.assign(a, &Edge::from("j"), cols).unwrap();

    assert_eq!(table.dim(x, &Edge::from("j")), Some(cols));
    assert_eq!(table.dim(y, &Edge::from("i")), Some(rows));
    assert_eq!(table.dims_of(&g, r).unwrap(), vec![rows]);
}

#[test]
fn test_sum_ties_reordered_terms() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i", "j"])).unwrap();
    let b = g.variable("b", edges(["j", "i"])).unwrap();
    let s = g.add(a, b).unwrap();

    let mut table = DimTable::build(&g, s).unwrap();
    table.assign(a, &Edge::from("i"), 2).unwrap();
    table.assign(b, &Edge::from("j"), 3).unwrap();
    assert_eq!(table.dims_of(&g, s).unwrap(), vec![2, 3]);
    assert_eq!(table.dims_of(&g, b).unwrap(), vec![3, 2]);
}

#[test]
fn test_broadcast_edge_passes_through_function() {
    let mut g = ExprGraph::new();
    let t = g.variable("t", edges(["b", "i"])).unwrap();
    let f = g
        .function(
            "f",
            vec![t],
            vec![edges(["i"])],
            edges(["o"]),
            FunctionRule::opaque().with_dim_links(vec![DimLink {
                output: 0,
                input: 0,
                consumed: 0,
            }]),
        )
        .unwrap();

    let mut table = DimTable::build(&g, f).unwrap();
    table.assign(t, &Edge::from("b"), 8).unwrap();
    table.assign(t, &Edge::from("i"), 3).unwrap();
    assert_eq!(table.dim(f, &Edge::from("b")), Some(8));
    assert_eq!(table.dim(f, &Edge::from("o")), Some(3));
}

// ============================================================================
// Failures
// ============================================================================

#[rstest]
#[case(3, 3, true)]
#[case(3, 4, false)]
fn test_copy_requires_equal_sizes(#[case] first: usize, #[case] second: usize, #[case] ok: bool) {
    let mut g = ExprGraph::new();
    let c = g.copy(edges(["a", "b"])).unwrap();
    let mut table = DimTable::build(&g, c).unwrap();
    table.assign(c, &Edge::from("a"), first).unwrap();
    let result = table.assign(c, &Edge::from("b"), second);
    assert_eq!(result.is_ok(), ok);
    if !ok {
        assert!(matches!(result, Err(CoreError::ShapeMismatch { .. })));
    }
}

#[test]
fn test_unconstrained_output_is_unknown() {
    let mut g = ExprGraph::new();
    let t = g.variable("t", edges(["i"])).unwrap();
    let f = g
        .function("f", vec![t], vec![edges(["i"])], edges(["o"]), FunctionRule::opaque())
        .unwrap();
    let mut table = DimTable::build(&g, f).unwrap();
    table.assign(t, &Edge::from("i"), 3).unwrap();
    assert_eq!(
        table.require(f, &Edge::from("o")),
        Err(CoreError::UnknownDimension {
            edge: Edge::from("o"),
            node: f.index(),
        })
    );
}

#[test]
fn test_assign_unknown_slot() {
    let mut g = ExprGraph::new();
    let x = g.variable("x", edges(["i"])).unwrap();
    let mut table = DimTable::build(&g, x).unwrap();
    assert!(matches!(
        table.assign(x, &Edge::from("k"), 2),
        Err(CoreError::EdgeNotFound { .. })
    ));
}
