//! Least squares, differentiated symbolically.
//!
//! Run with: cargo run -p tensorgrad-diff --example least_squares
//! (set RUST_LOG=debug to see the passes at work)
//!
//! This example demonstrates:
//! - The gradient of ‖Ax − y‖² and its numeric value
//! - The Hessian and how derivative edges are named (x', x'')
//! - The gradient with respect to a matrix
//! - A broadcast bias term
//! - The chain rule through purely symbolic functions

use tensorgrad_core::{edges, ExprGraph, NamedTensor, NodeId};
use tensorgrad_diff::ops::{frobenius2, opaque};
use tensorgrad_diff::{evaluate, grad, simplify, Bindings, DiffError, Options};

fn describe(g: &ExprGraph, label: &str, node: NodeId) -> Result<(), DiffError> {
    println!(
        "  {label}: free edges {:?}, {} reachable nodes",
        g.free_edges(node)?.iter().map(|e| e.as_str()).collect::<Vec<_>>(),
        g.reachable(node).len()
    );
    Ok(())
}

fn show(value: &NamedTensor) -> String {
    let names: Vec<&str> = value.names().iter().map(|e| e.as_str()).collect();
    format!("{names:?} {:?}", value.values())
}

fn main() -> Result<(), DiffError> {
    env_logger::init();
    let options = Options::default();

    println!("=== Least Squares: ‖Ax − y‖² ===\n");

    // -------------------------------------------------------------------------
    // 1. Gradient with respect to x
    // -------------------------------------------------------------------------
    println!("1. Gradient wrt x");
    println!("-----------------");

    let mut g = ExprGraph::new();
    let a = g.variable("A", edges(["x", "y"]))?;
    let x = g.variable("x", edges(["x"]))?;
    let y = g.variable("y", edges(["y"]))?;
    let ax = g.contract(vec![a, x])?;
    let r = g.subtract(ax, y)?;
    let loss = frobenius2(&mut g, r)?;

    let dx = grad(&mut g, loss, x, &options)?;
    describe(&g, "raw", dx)?;
    let dx = simplify(&mut g, dx, &options)?;
    describe(&g, "simplified", dx)?;

    let bindings = Bindings::from([
        (
            "A".to_string(),
            NamedTensor::from_shape_vec(["x", "y"], &[2, 3], vec![1.0, 0.0, 2.0, -1.0, 1.0, 0.5])?,
        ),
        ("x".to_string(), NamedTensor::from_shape_vec(["x"], &[2], vec![0.5, -1.0])?),
        ("y".to_string(), NamedTensor::from_shape_vec(["y"], &[3], vec![1.0, 1.0, 1.0])?),
    ]);
    println!("  loss = {}", show(&evaluate(&g, loss, &bindings, &options)?));
    println!("  ∂loss/∂x = 2Aᵀ(Ax − y) = {}", show(&evaluate(&g, dx, &bindings, &options)?));
    println!();

    // -------------------------------------------------------------------------
    // 2. Second derivative
    // -------------------------------------------------------------------------
    println!("2. Hessian wrt x");
    println!("---------------");

    let hessian = grad(&mut g, dx, x, &options)?;
    let hessian = simplify(&mut g, hessian, &options)?;
    describe(&g, "simplified", hessian)?;
    println!("  2AᵀA = {}", show(&evaluate(&g, hessian, &bindings, &options)?));
    println!();

    // -------------------------------------------------------------------------
    // 3. Gradient with respect to the matrix
    // -------------------------------------------------------------------------
    println!("3. Gradient wrt A");
    println!("-----------------");

    let da = grad(&mut g, loss, a, &options)?;
    let da = simplify(&mut g, da, &options)?;
    describe(&g, "simplified", da)?;
    println!("  ∂loss/∂A = {}", show(&evaluate(&g, da, &bindings, &options)?));
    println!();

    // -------------------------------------------------------------------------
    // 4. A batch with a bias
    // -------------------------------------------------------------------------
    println!("4. Batched least squares with bias: ‖XW + 1b − T‖²");
    println!("---------------------------------------------------");

    let mut g = ExprGraph::new();
    let xs = g.variable("X", edges(["batch", "x"]))?;
    let w = g.variable("W", edges(["x", "y"]))?;
    let b = g.variable("b", edges(["y"]))?;
    let t = g.variable("T", edges(["batch", "y"]))?;
    let ones = g.ones(edges(["batch"]))?;
    let xw = g.contract(vec![xs, w])?;
    let bias = g.contract(vec![ones, b])?;
    let pred = g.add(xw, bias)?;
    let r = g.subtract(pred, t)?;
    let loss = frobenius2(&mut g, r)?;

    for (label, wrt) in [("W", w), ("b", b)] {
        let d = grad(&mut g, loss, wrt, &options)?;
        let d = simplify(&mut g, d, &options)?;
        describe(&g, &format!("∂loss/∂{label}"), d)?;
    }
    println!();

    // -------------------------------------------------------------------------
    // 5. Symbolic functions
    // -------------------------------------------------------------------------
    println!("5. Chain rule through f(v(x))");
    println!("-----------------------------");

    let mut g = ExprGraph::new();
    let x = g.variable("x", edges(["x"]))?;
    let v = opaque(&mut g, "v", vec![x], vec![edges(["x"])], edges(["y"]))?;
    let f = opaque(&mut g, "f", vec![v], vec![edges(["y"])], Vec::new())?;
    let d = grad(&mut g, f, x, &options)?;
    let d = simplify(&mut g, d, &options)?;
    describe(&g, "∂f/∂x", d)?;
    let calls: Vec<&str> = g
        .reachable(d)
        .into_iter()
        .filter_map(|n| g.function_call(n).map(|c| c.name.as_str()))
        .collect();
    println!("  functions used: {calls:?}");

    Ok(())
}
