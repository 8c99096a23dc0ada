//! Tests of the function library: values against dense references and
//! derivatives against central differences.

use rstest::rstest;

use tensorgrad_core::edge::same_edge_set;
use tensorgrad_core::{edges, ExprGraph, NamedTensor, NodeId};
use tensorgrad_diff::ops;
use tensorgrad_diff::{evaluate, grad, simplify, Bindings, DiffError, Options};

type Builder = fn(&mut ExprGraph, NodeId) -> Result<NodeId, DiffError>;

fn tensor(names: &[&str], shape: &[usize], values: Vec<f64>) -> NamedTensor {
    NamedTensor::from_shape_vec(names.iter().copied(), shape, values).unwrap()
}

fn eval(g: &ExprGraph, node: NodeId, bindings: &Bindings, order: &[&str]) -> NamedTensor {
    evaluate(g, node, bindings, &Options::default())
        .unwrap()
        .align_to(&edges(order.iter().copied()))
        .unwrap()
}

fn vector_bindings(name: &str, edge: &str, values: Vec<f64>) -> Bindings {
    let n = values.len();
    Bindings::from([(name.to_string(), tensor(&[edge], &[n], values))])
}

/// Central difference of the scalar `loss` along element `k` of `name`.
fn finite_difference(g: &ExprGraph, loss: NodeId, bindings: &Bindings, name: &str, k: usize) -> f64 {
    let h = 1e-6;
    let base = &bindings[name];
    let shifted = |delta: f64| {
        let mut values = base.values();
        values[k] += delta;
        let mut moved = bindings.clone();
        moved.insert(
            name.to_string(),
            NamedTensor::from_shape_vec(base.names(), base.shape(), values).unwrap(),
        );
        evaluate(g, loss, &moved, &Options::default())
            .unwrap()
            .to_scalar()
            .unwrap()
    };
    (shifted(h) - shifted(-h)) / (2.0 * h)
}

fn square(g: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    ops::pow(g, t, 2)
}

fn cube(g: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    ops::pow(g, t, 3)
}

fn reciprocal(g: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    ops::pow(g, t, -1)
}

fn log_exp(g: &mut ExprGraph, t: NodeId) -> Result<NodeId, DiffError> {
    let e = ops::exp(g, t)?;
    let l = ops::log(g, e)?;
    ops::hadamard(g, l, t)
}

// ============================================================================
// Values
// ============================================================================

#[test]
fn test_frobenius2_value() {
    let mut g = ExprGraph::new();
    let m = g.variable("M", edges(["i", "j"])).unwrap();
    let f = ops::frobenius2(&mut g, m).unwrap();
    let b = Bindings::from([(
        "M".to_string(),
        tensor(&["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]),
    )]);
    assert_eq!(eval(&g, f, &b, &[]).to_scalar(), Some(30.0));
}

#[test]
fn test_diag_value() {
    let mut g = ExprGraph::new();
    let v = g.variable("v", edges(["i"])).unwrap();
    let d = ops::diag(&mut g, v, &edges(["i", "j"])).unwrap();
    let b = vector_bindings("v", "i", vec![1.0, 2.0, 3.0]);
    let got = eval(&g, d, &b, &["i", "j"]);
    let want = tensor(
        &["i", "j"],
        &[3, 3],
        vec![1.0, 0.0, 0.0, 0.0, 2.0, 0.0, 0.0, 0.0, 3.0],
    );
    assert!(got.approx_eq(&want, 0.0));
}

#[test]
fn test_trace_value() {
    let mut g = ExprGraph::new();
    let m = g.variable("M", edges(["i", "j"])).unwrap();
    let t = ops::trace(&mut g, m).unwrap();
    let b = Bindings::from([(
        "M".to_string(),
        tensor(&["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]),
    )]);
    assert_eq!(eval(&g, t, &b, &[]).to_scalar(), Some(5.0));
}

#[test]
fn test_einsum_two_operands() {
    // a_ij b_jk with j summed and i, k kept
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i", "j"])).unwrap();
    let b = g.variable("b", edges(["j", "k"])).unwrap();
    let ab = ops::einsum(&mut g, &[a, b], &edges(["i", "k"])).unwrap();
    let bindings = Bindings::from([
        ("a".to_string(), tensor(&["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0])),
        ("b".to_string(), tensor(&["j", "k"], &[2, 2], vec![5.0, 6.0, 7.0, 8.0])),
    ]);
    let got = eval(&g, ab, &bindings, &["i", "k"]);
    assert_eq!(got.values(), vec![19.0, 22.0, 43.0, 50.0]);
}

#[test]
fn test_einsum_keeps_shared_output_edge() {
    // a_i b_i c_i with i kept is the elementwise triple product
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i"])).unwrap();
    let b = g.variable("b", edges(["i"])).unwrap();
    let c = g.variable("c", edges(["i"])).unwrap();
    let abc = ops::einsum(&mut g, &[a, b, c], &edges(["i"])).unwrap();
    let bindings = Bindings::from([
        ("a".to_string(), tensor(&["i"], &[2], vec![1.0, 2.0])),
        ("b".to_string(), tensor(&["i"], &[2], vec![3.0, 4.0])),
        ("c".to_string(), tensor(&["i"], &[2], vec![5.0, 6.0])),
    ]);
    assert_eq!(eval(&g, abc, &bindings, &["i"]).values(), vec![15.0, 48.0]);

    let total = ops::einsum(&mut g, &[a, b, c], &[]).unwrap();
    assert_eq!(eval(&g, total, &bindings, &[]).to_scalar(), Some(63.0));
}

#[test]
fn test_kronecker_edges() {
    let mut g = ExprGraph::new();
    let a = g.variable("a", edges(["i", "j"])).unwrap();
    let b = g.variable("b", edges(["k", "l"])).unwrap();
    let k = ops::kronecker(&mut g, &[a, b]).unwrap();
    assert_eq!(g.free_edges(k).unwrap(), edges(["i", "j", "k", "l"]).as_slice());
}

#[rstest]
#[case::first(&["i"], &["j"], vec![4.0, 6.0])]
#[case::second(&["j"], &["i"], vec![3.0, 7.0])]
#[case::both(&["i", "j"], &[], vec![10.0])]
fn test_sum_value(#[case] over: &[&str], #[case] kept: &[&str], #[case] want: Vec<f64>) {
    let mut g = ExprGraph::new();
    let m = g.variable("M", edges(["i", "j"])).unwrap();
    let s = ops::sum(&mut g, m, Some(&edges(over.iter().copied())), false).unwrap();
    assert_eq!(g.free_edges(s).unwrap(), edges(kept.iter().copied()).as_slice());
    let b = Bindings::from([(
        "M".to_string(),
        tensor(&["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]),
    )]);
    assert_eq!(eval(&g, s, &b, kept).values(), want);
}

#[test]
fn test_softmax_rows_sum_to_one() {
    let mut g = ExprGraph::new();
    let t = g.variable("t", edges(["b", "c"])).unwrap();
    let s = ops::softmax(&mut g, t, &edges(["c"])).unwrap();
    let bindings = Bindings::from([(
        "t".to_string(),
        tensor(&["b", "c"], &[2, 3], vec![0.1, 0.2, 0.3, -1.0, 0.0, 2.0]),
    )]);
    let got = eval(&g, s, &bindings, &["b", "c"]);
    for row in 0..2 {
        let total: f64 = (0..3).map(|c| got.at(&[row, c]).unwrap()).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }
}

// ============================================================================
// Derivatives
// ============================================================================

#[rstest]
#[case::exp(ops::exp)]
#[case::log(ops::log)]
#[case::square(square)]
#[case::cube(cube)]
#[case::reciprocal(reciprocal)]
#[case::log_exp(log_exp)]
fn test_elementwise_derivative(#[case] build: Builder) {
    let mut g = ExprGraph::new();
    let x = g.variable("x", edges(["i"])).unwrap();
    let y = build(&mut g, x).unwrap();
    let loss = ops::sum(&mut g, y, None, false).unwrap();
    let options = Options::default();
    let d = grad(&mut g, loss, x, &options).unwrap();
    let s = simplify(&mut g, d, &options).unwrap();

    let bindings = vector_bindings("x", "i", vec![0.5, 1.25, 2.0]);
    let raw = eval(&g, d, &bindings, &["i'"]);
    let simplified = eval(&g, s, &bindings, &["i'"]);
    for k in 0..3 {
        let numeric = finite_difference(&g, loss, &bindings, "x", k);
        assert!((raw.at(&[k]).unwrap() - numeric).abs() < 1e-5, "{k}: {} vs {numeric}", raw.at(&[k]).unwrap());
        assert!((simplified.at(&[k]).unwrap() - numeric).abs() < 1e-5);
    }
}

#[test]
fn test_softmax_jacobian() {
    let mut g = ExprGraph::new();
    let t = g.variable("t", edges(["c"])).unwrap();
    let s = ops::softmax(&mut g, t, &edges(["c"])).unwrap();
    let d = grad(&mut g, s, t, &Options::default()).unwrap();
    assert!(same_edge_set(g.free_edges(d).unwrap(), &edges(["c", "c'"])));

    let bindings = vector_bindings("t", "c", vec![0.3, -0.2, 1.1]);
    let p = eval(&g, s, &bindings, &["c"]);
    let jac = eval(&g, d, &bindings, &["c", "c'"]);
    for a in 0..3 {
        for b in 0..3 {
            let delta = if a == b { 1.0 } else { 0.0 };
            let want = p.at(&[a]).unwrap() * (delta - p.at(&[b]).unwrap());
            assert!((jac.at(&[a, b]).unwrap() - want).abs() < 1e-9);
        }
    }
}

#[test]
fn test_cross_entropy_gradient() {
    let mut g = ExprGraph::new();
    let t = g.variable("t", edges(["c"])).unwrap();
    let y = g.variable("y", edges(["c"])).unwrap();
    let loss = ops::cross_entropy(&mut g, t, y, &edges(["c"])).unwrap();
    assert!(g.free_edges(loss).unwrap().is_empty());
    let d = grad(&mut g, loss, t, &Options::default()).unwrap();

    let bindings = Bindings::from([
        ("t".to_string(), tensor(&["c"], &[3], vec![0.3, -0.2, 1.1])),
        ("y".to_string(), tensor(&["c"], &[3], vec![0.2, 0.5, 0.3])),
    ]);
    let p = {
        let s = ops::softmax(&mut g, t, &edges(["c"])).unwrap();
        eval(&g, s, &bindings, &["c"])
    };
    let got = eval(&g, d, &bindings, &["c'"]);
    let y_values = bindings["y"].values();
    for k in 0..3 {
        // y sums to one, so the gradient is softmax(t) - y
        assert!((got.at(&[k]).unwrap() - (p.at(&[k]).unwrap() - y_values[k])).abs() < 1e-9);
        let numeric = finite_difference(&g, loss, &bindings, "t", k);
        assert!((got.at(&[k]).unwrap() - numeric).abs() < 1e-5);
    }
}

#[test]
fn test_custom_elementwise() {
    // sin with cos as its derivative
    let mut g = ExprGraph::new();
    let x = g.variable("x", edges(["i"])).unwrap();
    let y = ops::elementwise(&mut g, "sin", x, f64::sin, |g, t| {
        let rule = tensorgrad_core::FunctionRule::new(|_, _, _, _| {
            Err(tensorgrad_core::CoreError::BadTensor {
                reason: "second derivative not needed".to_string(),
            })
        })
        .with_forward(|inputs| Ok(inputs[0].map(f64::cos)));
        g.function("cos", vec![t], vec![Vec::new()], Vec::new(), rule)
    })
    .unwrap();
    let loss = ops::sum(&mut g, y, None, false).unwrap();
    let d = grad(&mut g, loss, x, &Options::default()).unwrap();

    let values = vec![0.1, 0.7, -1.3];
    let bindings = vector_bindings("x", "i", values.clone());
    let got = eval(&g, d, &bindings, &["i'"]);
    for (k, v) in values.iter().enumerate() {
        assert!((got.at(&[k]).unwrap() - v.cos()).abs() < 1e-12);
    }
}
