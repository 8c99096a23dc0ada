//! # Named Tensors - Concrete Values
//!
//! A [`NamedTensor`] is a dense `f64` array whose axes are identified by
//! [`Edge`] names instead of positions. Axis order is an implementation
//! detail: two named tensors are combined by name, and [`NamedTensor::align_to`]
//! fixes an order when one is needed.
//!
//! This is the value type the evaluator produces and the type a
//! [`crate::function::FunctionRule`] forward callable consumes.

use std::collections::HashMap;

use ndarray::{Array3, ArrayD, Axis, Dimension, IxDyn};

use crate::edge::{edges, find_duplicate, same_edge_set, Edge};
use crate::error::CoreError;

/// A dense tensor with named dimensions.
#[derive(Debug, Clone, PartialEq)]
pub struct NamedTensor {
    names: Vec<Edge>,
    data: ArrayD<f64>,
}

fn bad(reason: impl Into<String>) -> CoreError {
    CoreError::BadTensor {
        reason: reason.into(),
    }
}

impl NamedTensor {
    /// Wrap an array, one name per axis.
    pub fn new(names: Vec<Edge>, data: ArrayD<f64>) -> Result<Self, CoreError> {
        if let Some(dup) = find_duplicate(&names) {
            return Err(bad(format!("dimension '{dup}' named twice")));
        }
        if names.len() != data.ndim() {
            return Err(bad(format!(
                "{} names for a {}-dimensional array",
                names.len(),
                data.ndim()
            )));
        }
        Ok(Self { names, data })
    }

    /// Build from row-major values.
    ///
    /// ```rust
    /// use tensorgrad_core::value::NamedTensor;
    ///
    /// let m = NamedTensor::from_shape_vec(["i", "j"], &[2, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
    /// assert_eq!(m.dim("j"), Some(2));
    /// assert_eq!(m.at(&[1, 0]), Some(3.0));
/// assert_eq!(m.at(&[2, 0]), None);
    /// ```
    pub fn from_shape_vec<I, S>(names: I, shape: &[usize], values: Vec<f64>) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = S>,
        S: Into<Edge>,
    {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values).map_err(|e| bad(e.to_string()))?;
        Self::new(edges(names), data)
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            names: Vec::new(),
            data: ArrayD::from_elem(IxDyn(&[]), value),
        }
    }

    /// A tensor holding `value` everywhere.
    pub fn full(names: Vec<Edge>, dims: &[usize], value: f64) -> Result<Self, CoreError> {
        Self::new(names, ArrayD::from_elem(IxDyn(dims), value))
    }

    pub fn zeros(names: Vec<Edge>, dims: &[usize]) -> Result<Self, CoreError> {
        Self::full(names, dims, 0.0)
    }

    /// The generalized Kronecker delta: 1 where every index is equal, else 0.
    pub fn delta(names: Vec<Edge>, dim: usize) -> Result<Self, CoreError> {
        let shape = vec![dim; names.len()];
        let data = ArrayD::from_shape_fn(IxDyn(&shape), |ix| {
            let ix = ix.slice();
            if ix.windows(2).all(|w| w[0] == w[1]) {
                1.0
            } else {
                0.0
            }
        });
        Self::new(names, data)
    }

    pub fn names(&self) -> &[Edge] {
        &self.names
    }

    pub fn data(&self) -> &ArrayD<f64> {
        &self.data
    }

    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Size of the named dimension.
    pub fn dim(&self, name: &str) -> Option<usize> {
        self.names
            .iter()
            .position(|e| e.as_str() == name)
            .map(|axis| self.data.shape()[axis])
    }

    /// Element at `index`, given in the order of [`names`](Self::names);
    /// `None` when the index has the wrong rank or is out of range.
    pub fn at(&self, index: &[usize]) -> Option<f64> {
        self.data.get(index).copied()
    }

    /// All elements in row-major order of the current axes.
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// The value of a 0-dimensional tensor.
    pub fn to_scalar(&self) -> Option<f64> {
        if self.data.ndim() == 0 {
            self.data.iter().next().copied()
        } else {
            None
        }
    }

    /// Rename dimensions; names missing from `mapping` are kept.
    pub fn rename(&self, mapping: &HashMap<Edge, Edge>) -> Result<Self, CoreError> {
        let names = self
            .names
            .iter()
            .map(|e| mapping.get(e).cloned().unwrap_or_else(|| e.clone()))
            .collect();
        Self::new(names, self.data.clone())
    }

    /// Permute axes so they follow `order`, which must name every dimension.
    pub fn align_to(&self, order: &[Edge]) -> Result<Self, CoreError> {
        if self.names == order {
            return Ok(self.clone());
        }
        if !same_edge_set(&self.names, order) {
            return Err(bad(format!(
                "cannot align {:?} to {:?}",
                self.names, order
            )));
        }
        let perm: Vec<usize> = order
            .iter()
            .filter_map(|e| self.names.iter().position(|n| n == e))
            .collect();
        let data = self.data.view().permuted_axes(perm.as_slice()).to_owned();
        Ok(Self {
            names: order.to_vec(),
            data,
        })
    }

    /// Multiply every element by `factor`.
    pub fn scale(&self, factor: f64) -> Self {
        Self {
            names: self.names.clone(),
            data: &self.data * factor,
        }
    }

    /// Elementwise sum; `other` is aligned to this tensor's names first.
    pub fn add(&self, other: &NamedTensor) -> Result<Self, CoreError> {
        let other = other.align_to(&self.names)?;
        self.check_same_dims(&other)?;
        Ok(Self {
            names: self.names.clone(),
            data: &self.data + &other.data,
        })
    }

    /// Apply `f` to every element.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            names: self.names.clone(),
            data: self.data.mapv(f),
        }
    }

    fn check_same_dims(&self, other: &NamedTensor) -> Result<(), CoreError> {
        for (axis, name) in self.names.iter().enumerate() {
            let (expected, got) = (self.data.shape()[axis], other.data.shape()[axis]);
            if expected != got {
                return Err(CoreError::ShapeMismatch {
                    edge: name.clone(),
                    expected,
                    got,
                });
            }
        }
        Ok(())
    }

    /// Whether both tensors have the same names, sizes and (within `tol`) values.
    pub fn approx_eq(&self, other: &NamedTensor, tol: f64) -> bool {
        let Ok(other) = other.align_to(&self.names) else {
            return false;
        };
        self.shape() == other.shape()
            && self
                .data
                .iter()
                .zip(other.data.iter())
                .all(|(a, b)| (a - b).abs() <= tol)
    }

    /// Element count of the largest dense tensor
    /// [`einsum`](Self::einsum)`(inputs, output)` holds at once: an input or
    /// the result of one pairwise step.
    pub fn contraction_size(inputs: &[&NamedTensor], output: &[Edge]) -> usize {
        let mut sigs: Vec<Signature> = inputs.iter().map(|t| t.signature()).collect();
        let mut peak = sigs.iter().map(|s| volume(s)).max().unwrap_or(1);
        // names private to one input are summed before the first pair
        sigs = (0..sigs.len())
            .map(|k| {
                sigs[k]
                    .iter()
                    .filter(|(e, _)| needed_elsewhere(e, &sigs, (k, k), output))
                    .cloned()
                    .collect()
            })
            .collect();
        while sigs.len() > 1 {
            let (i, j) = choose_pair(&sigs, output);
            let (merged, _) = merge_signatures(&sigs, (i, j), output);
            peak = peak.max(volume(&merged));
            sigs.remove(j);
            sigs.remove(i);
            sigs.push(merged);
        }
        peak
    }

    /// Generalized Einstein summation over named dimensions.
    ///
    /// A name shared by several inputs takes one index value across all of
    /// them. Names listed in `output` are kept (in that order); every other
    /// name is summed over. Inputs are contracted two at a time, smallest
    /// intermediate first, each step as a batched matrix product.
    ///
    /// ```rust
    /// use tensorgrad_core::edge::edges;
    /// use tensorgrad_core::value::NamedTensor;
    ///
    /// let a = NamedTensor::from_shape_vec(["i", "j"], &[1, 2], vec![1.0, 2.0]).unwrap();
    /// let b = NamedTensor::from_shape_vec(["j"], &[2], vec![3.0, 4.0]).unwrap();
    /// let c = NamedTensor::einsum(&[&a, &b], &edges(["i"])).unwrap();
    /// assert_eq!(c.values(), vec![11.0]);
    /// ```
    pub fn einsum(inputs: &[&NamedTensor], output: &[Edge]) -> Result<NamedTensor, CoreError> {
        if let Some(dup) = find_duplicate(output) {
            return Err(bad(format!("output dimension '{dup}' listed twice")));
        }

        let mut sizes: HashMap<&Edge, usize> = HashMap::new();
        for t in inputs {
            for (name, &d) in t.names.iter().zip(t.data.shape()) {
                match sizes.get(name) {
                    Some(&expected) if expected != d => {
                        return Err(CoreError::ShapeMismatch {
                            edge: name.clone(),
                            expected,
                            got: d,
                        });
                    }
                    Some(_) => {}
                    None => {
                        sizes.insert(name, d);
                    }
                }
            }
        }
        if let Some(missing) = output.iter().find(|e| !sizes.contains_key(e)) {
            return Err(bad(format!("output dimension '{missing}' is not an input dimension")));
        }

        // Names private to one input and absent from the output are summed first.
        let mut ops: Vec<NamedTensor> = Vec::with_capacity(inputs.len());
        for (k, t) in inputs.iter().enumerate() {
            ops.push(t.sum_out(|e| {
                output.contains(e)
                    || inputs
                        .iter()
                        .enumerate()
                        .any(|(m, u)| m != k && u.names.contains(e))
            }));
        }

        while ops.len() > 1 {
            let sigs: Vec<Signature> = ops.iter().map(NamedTensor::signature).collect();
            let (i, j) = choose_pair(&sigs, output);
            let joined =
                ops[i].contract_pair(&ops[j], |e| needed_elsewhere(e, &sigs, (i, j), output))?;
            ops.remove(j);
            ops.remove(i);
            ops.push(joined);
        }

        let last = match ops.pop() {
            Some(t) => t.sum_out(|e| output.contains(e)),
            None => Self::scalar(1.0),
        };
        last.align_to(output)
    }

    fn signature(&self) -> Signature {
        self.names
            .iter()
            .cloned()
            .zip(self.data.shape().iter().copied())
            .collect()
    }

    /// Sum over every dimension `keep` rejects.
    fn sum_out(&self, keep: impl Fn(&Edge) -> bool) -> NamedTensor {
        let mut names = self.names.clone();
        let mut data = self.data.clone();
        for axis in (0..names.len()).rev() {
            if !keep(&names[axis]) {
                data = data.sum_axis(Axis(axis));
                names.remove(axis);
            }
        }
        NamedTensor { names, data }
    }

    /// Contract two tensors over their shared names.
    ///
    /// Shared names that `keep` accepts stay as batch dimensions. The result
    /// is named batch, then names only in `self`, then names only in `other`.
    fn contract_pair(
        &self,
        other: &NamedTensor,
        keep: impl Fn(&Edge) -> bool,
    ) -> Result<NamedTensor, CoreError> {
        let (batch, summed): (Vec<Edge>, Vec<Edge>) = self
            .names
            .iter()
            .filter(|e| other.names.contains(e))
            .cloned()
            .partition(|e| keep(e));
        let lhs_only: Vec<Edge> = self
            .names
            .iter()
            .filter(|e| !other.names.contains(e))
            .cloned()
            .collect();
        let rhs_only: Vec<Edge> = other
            .names
            .iter()
            .filter(|e| !self.names.contains(e))
            .cloned()
            .collect();

        let (nb, nm, nk) = (self.extent(&batch), self.extent(&lhs_only), self.extent(&summed));
        let nn = other.extent(&rhs_only);
        let lhs = self.stacked(&[&batch[..], &lhs_only, &summed].concat(), (nb, nm, nk))?;
        let rhs = other.stacked(&[&batch[..], &summed, &rhs_only].concat(), (nb, nk, nn))?;

        let mut out = Array3::<f64>::zeros((nb, nm, nn));
        for k in 0..nb {
            let product = lhs.index_axis(Axis(0), k).dot(&rhs.index_axis(Axis(0), k));
            out.index_axis_mut(Axis(0), k).assign(&product);
        }

        let mut shape = Vec::with_capacity(batch.len() + lhs_only.len() + rhs_only.len());
        shape.extend(batch.iter().chain(&lhs_only).filter_map(|e| self.dim(e.as_str())));
        shape.extend(rhs_only.iter().filter_map(|e| other.dim(e.as_str())));
        let mut names = batch;
        names.extend(lhs_only);
        names.extend(rhs_only);
        let data = ArrayD::from_shape_vec(IxDyn(&shape), out.iter().copied().collect())
            .map_err(|e| bad(e.to_string()))?;
        Self::new(names, data)
    }

    fn extent(&self, group: &[Edge]) -> usize {
        group.iter().filter_map(|e| self.dim(e.as_str())).product()
    }

    /// Axes permuted to `order` and folded into a stack of matrices.
    fn stacked(
        &self,
        order: &[Edge],
        shape: (usize, usize, usize),
    ) -> Result<Array3<f64>, CoreError> {
        let aligned = self.align_to(order)?;
        Array3::from_shape_vec(shape, aligned.data.iter().copied().collect())
            .map_err(|e| bad(e.to_string()))
    }
}

/// Names and sizes of one operand, for contraction planning.
type Signature = Vec<(Edge, usize)>;

fn volume(sig: &[(Edge, usize)]) -> usize {
    sig.iter().fold(1usize, |acc, &(_, d)| acc.saturating_mul(d))
}

/// Whether `name` is in the output or on an operand other than `skip`.
fn needed_elsewhere(name: &Edge, sigs: &[Signature], skip: (usize, usize), output: &[Edge]) -> bool {
    output.contains(name)
        || sigs
            .iter()
            .enumerate()
            .any(|(k, s)| k != skip.0 && k != skip.1 && s.iter().any(|(e, _)| e == name))
}

/// The signature of contracting `pair`, and the index space that step visits.
fn merge_signatures(sigs: &[Signature], pair: (usize, usize), output: &[Edge]) -> (Signature, usize) {
    let (a, b) = (&sigs[pair.0], &sigs[pair.1]);
    let mut merged = Vec::with_capacity(a.len() + b.len());
    let mut work = 1usize;
    for (e, d) in a {
        work = work.saturating_mul(*d);
        let shared = b.iter().any(|(f, _)| f == e);
        if !shared || needed_elsewhere(e, sigs, pair, output) {
            merged.push((e.clone(), *d));
        }
    }
    for (e, d) in b {
        if !a.iter().any(|(f, _)| f == e) {
            work = work.saturating_mul(*d);
            merged.push((e.clone(), *d));
        }
    }
    (merged, work)
}

/// The pair whose contraction leaves the smallest intermediate.
fn choose_pair(sigs: &[Signature], output: &[Edge]) -> (usize, usize) {
    let mut best = (0, 1);
    let mut best_cost = (usize::MAX, usize::MAX);
    for i in 0..sigs.len() {
        for j in i + 1..sigs.len() {
            let (merged, work) = merge_signatures(sigs, (i, j), output);
            let cost = (volume(&merged), work);
            if cost < best_cost {
                best_cost = cost;
                best = (i, j);
            }
        }
    }
    best
}
