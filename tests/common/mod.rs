//! Reference evaluator used to check gradient expressions numerically.
//!
//! Straightforward dense `f64` arithmetic with numpy broadcasting; only meant
//! for the tiny tensors the tests build.

#![allow(dead_code)]

use std::collections::HashMap;

use anyhow::{anyhow, bail, Result};

use gradgraph::graph::{Expr, NodeId, Op, Tensor};
use gradgraph::shapes::{broadcast_shapes, element_count, reduce_shape};
use gradgraph::visit::Visitor;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[derive(Default)]
pub struct Evaluator {
    feeds: HashMap<String, Tensor>,
    cache: HashMap<NodeId, Tensor>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(mut self, name: &str, value: Tensor) -> Self {
        self.feeds.insert(name.to_string(), value);
        self
    }

    pub fn eval(&mut self, node: &Expr) -> Result<Tensor> {
        if let Some(hit) = self.cache.get(&node.id()) {
            return Ok(hit.clone());
        }
        let value = node.accept(self, None)?;
        if value.shape() != node.shape() {
            bail!(
                "{} evaluated to shape {:?}, node declares {:?}",
                node.name(),
                value.shape(),
                node.shape()
            );
        }
        self.cache.insert(node.id(), value.clone());
        Ok(value)
    }

    fn unary(&mut self, node: &Expr, f: impl Fn(f64) -> f64) -> Result<Tensor> {
        let base = self.eval(node.op().operands()[0])?;
        let data = base.data().iter().map(|&v| f(v)).collect();
        Ok(Tensor::new(base.shape().to_vec(), data)?)
    }

    fn binary(&mut self, node: &Expr, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
        let operands = node.op().operands();
        let a = self.eval(operands[0])?;
        let b = self.eval(operands[1])?;
        zip(&a, &b, f)
    }

    fn reduce(&mut self, node: &Expr, mean: bool) -> Result<Tensor> {
        let (base, axes, keep_dims) = match node.op() {
            Op::ReduceSum {
                base,
                axes,
                keep_dims,
            }
            | Op::ReduceMean {
                base,
                axes,
                keep_dims,
            } => (base, axes, *keep_dims),
            _ => bail!("not a reduction"),
        };
        let input = self.eval(base)?;
        let out_shape = reduce_shape(input.shape(), axes, keep_dims);
        let mut out = vec![0.0; element_count(&out_shape)];
        for (i, &v) in input.data().iter().enumerate() {
            let idx = unravel(i, input.shape());
            let mut out_idx = Vec::new();
            for (axis, &coord) in idx.iter().enumerate() {
                if axes.contains(&axis) {
                    if keep_dims {
                        out_idx.push(0);
                    }
                } else {
                    out_idx.push(coord);
                }
            }
            out[ravel(&out_idx, &out_shape)] += v;
        }
        if mean {
            let count: usize = axes.iter().map(|&a| input.shape()[a]).product();
            for v in &mut out {
                *v /= count as f64;
            }
        }
        Ok(Tensor::new(out_shape, out)?)
    }
}

fn unravel(mut i: usize, shape: &[usize]) -> Vec<usize> {
    let mut idx = vec![0; shape.len()];
    for axis in (0..shape.len()).rev() {
        idx[axis] = i % shape[axis];
        i /= shape[axis];
    }
    idx
}

fn ravel(idx: &[usize], shape: &[usize]) -> usize {
    idx.iter().zip(shape).fold(0, |acc, (&i, &d)| acc * d + i)
}

/// Offset into `src` for an index of the broadcast output.
fn broadcast_offset(src: &[usize], out_idx: &[usize]) -> usize {
    let lead = out_idx.len() - src.len();
    src.iter().enumerate().fold(0, |acc, (j, &d)| {
        let coord = if d == 1 { 0 } else { out_idx[j + lead] };
        acc * d + coord
    })
}

fn zip(a: &Tensor, b: &Tensor, f: impl Fn(f64, f64) -> f64) -> Result<Tensor> {
    let shape = broadcast_shapes(a.shape(), b.shape())?;
    let data = (0..element_count(&shape))
        .map(|i| {
            let idx = unravel(i, &shape);
            f(
                a.data()[broadcast_offset(a.shape(), &idx)],
                b.data()[broadcast_offset(b.shape(), &idx)],
            )
        })
        .collect();
    Ok(Tensor::new(shape, data)?)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

impl Visitor for Evaluator {
    type Param = ();
    type Output = Tensor;
    type Error = anyhow::Error;

    fn name(&self) -> &'static str {
        "reference evaluator"
    }

    fn visit_constant(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        match node.op() {
            Op::Constant(t) => Ok(t.clone()),
            _ => bail!("not a constant"),
        }
    }

    fn visit_parameter(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        match node.op() {
            Op::Parameter(p) => Ok(p.get()),
            _ => bail!("not a parameter"),
        }
    }

    fn visit_variable(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.feeds
            .get(node.name())
            .cloned()
            .ok_or_else(|| anyhow!("no feed for variable {}", node.name()))
    }

    fn visit_fill(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        match node.op() {
            Op::Fill { value } => Ok(Tensor::filled(node.shape().to_vec(), *value)),
            _ => bail!("not a fill"),
        }
    }

    fn visit_add(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.binary(node, |a, b| a + b)
    }

    fn visit_subtract(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.binary(node, |a, b| a - b)
    }

    fn visit_multiply(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.binary(node, |a, b| a * b)
    }

    fn visit_divide(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.binary(node, |a, b| a / b)
    }

    fn visit_power(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.binary(node, f64::powf)
    }

    fn visit_negate(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| -v)
    }

    fn visit_abs(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, f64::abs)
    }

    fn visit_sign(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| if v == 0.0 { 0.0 } else { v.signum() })
    }

    fn visit_square(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| v * v)
    }

    fn visit_sigmoid(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, sigmoid)
    }

    fn visit_sigmoid_grad(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| sigmoid(v) * (1.0 - sigmoid(v)))
    }

    fn visit_relu(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| v.max(0.0))
    }

    fn visit_step(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.unary(node, |v| if v > 0.0 { 1.0 } else { 0.0 })
    }

    fn visit_reduce_sum(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.reduce(node, false)
    }

    fn visit_reduce_mean(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        self.reduce(node, true)
    }

    fn visit_matmul(&mut self, node: &Expr, _: Option<()>) -> Result<Tensor> {
        let Op::MatMul {
            left,
            right,
            transpose_left,
            transpose_right,
        } = node.op()
        else {
            bail!("not a matmul");
        };
        let a = self.eval(left)?;
        let b = self.eval(right)?;
        let at = |i: usize, k: usize| {
            let cols = a.shape()[1];
            if *transpose_left {
                a.data()[k * cols + i]
            } else {
                a.data()[i * cols + k]
            }
        };
        let bt = |k: usize, j: usize| {
            let cols = b.shape()[1];
            if *transpose_right {
                b.data()[j * cols + k]
            } else {
                b.data()[k * cols + j]
            }
        };
        let (m, n) = (node.shape()[0], node.shape()[1]);
        let depth = if *transpose_left {
            a.shape()[0]
        } else {
            a.shape()[1]
        };
        let mut out = vec![0.0; m * n];
        for i in 0..m {
            for j in 0..n {
                out[i * n + j] = (0..depth).map(|k| at(i, k) * bt(k, j)).sum();
            }
        }
        Ok(Tensor::new(vec![m, n], out)?)
    }
}

pub fn assert_close(actual: &Tensor, expected: &[f64]) {
    assert_eq!(
        actual.data().len(),
        expected.len(),
        "length mismatch: {:?} vs {:?}",
        actual.data(),
        expected
    );
    for (i, (a, e)) in actual.data().iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < 1e-9,
            "element {i}: got {a}, expected {e} (full: {:?})",
            actual.data()
        );
    }
}
