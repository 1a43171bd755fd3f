// Copyright 2025 STARGA Inc.
// Licensed under the Apache License, Version 2.0 (the “License”);
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an “AS IS” BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Node construction.
//!
//! Every constructor validates operand shapes and returns a [`ShapeError`] on
//! mismatch. `create_add` and `create_multiply` simplify against the
//! [`zero`] and [`identity`](super::identity) sentinels before allocating,
//! so the returned handle may be one of the operands (or `zero()` itself)
//! rather than a new node. Only the sentinel instances trigger simplification; a freshly built
//! scalar constant holding `0.0` does not.

use log::debug;

use super::{zero, Expr, Op, ParamValue, Tensor};
use crate::shapes::{
    broadcast_shapes, element_count, matmul_shape, normalize_axes, reduce_shape, Shape,
    ShapeError,
};

pub fn create_constant(name: impl Into<String>, value: Tensor) -> Expr {
    let shape = value.shape().to_vec();
    Expr::new(name, Op::Constant(value), shape)
}

/// Scalar constant. Never returns a sentinel.
pub fn create_scalar(name: impl Into<String>, value: f64) -> Expr {
    create_constant(name, Tensor::scalar(value))
}

pub fn create_parameter(name: impl Into<String>, value: Tensor) -> Expr {
    let shape = value.shape().to_vec();
    Expr::new(name, Op::Parameter(ParamValue::new(value)), shape)
}

/// Placeholder whose value is supplied at execution time.
pub fn create_variable(name: impl Into<String>, shape: Shape) -> Expr {
    Expr::new(name, Op::Variable, shape)
}

pub fn create_fill(name: impl Into<String>, value: f64, shape: Shape) -> Expr {
    Expr::new(name, Op::Fill { value }, shape)
}

pub fn create_add(name: impl Into<String>, left: &Expr, right: &Expr) -> Result<Expr, ShapeError> {
    if left.is_zero() {
        debug!("add: dropped ZERO lhs, reusing {}", right.name());
        return Ok(right.clone());
    }
    if right.is_zero() {
        debug!("add: dropped ZERO rhs, reusing {}", left.name());
        return Ok(left.clone());
    }
    binary(name, left, right, Op::Add)
}

pub fn create_subtract(
    name: impl Into<String>,
    left: &Expr,
    right: &Expr,
) -> Result<Expr, ShapeError> {
    binary(name, left, right, Op::Subtract)
}

pub fn create_multiply(
    name: impl Into<String>,
    left: &Expr,
    right: &Expr,
) -> Result<Expr, ShapeError> {
    if left.is_identity() {
        debug!("multiply: dropped IDENTITY lhs, reusing {}", right.name());
        return Ok(right.clone());
    }
    if left.is_zero() {
        debug!("multiply: ZERO lhs collapses product");
        return Ok(zero().clone());
    }
    if right.is_identity() {
        debug!("multiply: dropped IDENTITY rhs, reusing {}", left.name());
        return Ok(left.clone());
    }
    if right.is_zero() {
        debug!("multiply: ZERO rhs collapses product");
        return Ok(zero().clone());
    }
    binary(name, left, right, Op::Multiply)
}

pub fn create_divide(
    name: impl Into<String>,
    left: &Expr,
    right: &Expr,
) -> Result<Expr, ShapeError> {
    binary(name, left, right, Op::Divide)
}

pub fn create_power(
    name: impl Into<String>,
    base: &Expr,
    exponent: &Expr,
) -> Result<Expr, ShapeError> {
    let shape = broadcast_shapes(base.shape(), exponent.shape())?;
    let op = Op::Power {
        base: base.clone(),
        exponent: exponent.clone(),
    };
    Ok(Expr::new(name, op, shape))
}

pub fn create_matmul(
    name: impl Into<String>,
    left: &Expr,
    right: &Expr,
    transpose_left: bool,
    transpose_right: bool,
) -> Result<Expr, ShapeError> {
    let shape = matmul_shape(left.shape(), right.shape(), transpose_left, transpose_right)?;
    let op = Op::MatMul {
        left: left.clone(),
        right: right.clone(),
        transpose_left,
        transpose_right,
    };
    Ok(Expr::new(name, op, shape))
}

pub fn create_negate(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Negate)
}

pub fn create_abs(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Abs)
}

pub fn create_sign(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Sign)
}

pub fn create_square(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Square)
}

pub fn create_sigmoid(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Sigmoid)
}

/// Derivative of the sigmoid evaluated at `base`: `s(x) * (1 - s(x))`.
pub fn create_sigmoid_grad(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::SigmoidGrad)
}

pub fn create_relu(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Relu)
}

/// Heaviside step: `1` where `base > 0`, else `0`.
pub fn create_step(name: impl Into<String>, base: &Expr) -> Expr {
    unary(name, base, Op::Step)
}

/// Sum over `axes`. An empty axis list leaves the operand's shape untouched.
pub fn create_reduce_sum(
    name: impl Into<String>,
    base: &Expr,
    axes: &[usize],
    keep_dims: bool,
) -> Result<Expr, ShapeError> {
    let axes = normalize_axes(axes, base.rank())?;
    let shape = reduce_shape(base.shape(), &axes, keep_dims);
    let op = Op::ReduceSum {
        base: base.clone(),
        axes,
        keep_dims,
    };
    Ok(Expr::new(name, op, shape))
}

pub fn create_reduce_sum_all(name: impl Into<String>, base: &Expr) -> Expr {
    let axes: Vec<usize> = (0..base.rank()).collect();
    let op = Op::ReduceSum {
        base: base.clone(),
        axes,
        keep_dims: false,
    };
    Expr::new(name, op, Vec::new())
}

/// Mean over `axes`. An empty axis list leaves the operand's shape untouched.
pub fn create_reduce_mean(
    name: impl Into<String>,
    base: &Expr,
    axes: &[usize],
    keep_dims: bool,
) -> Result<Expr, ShapeError> {
    let axes = normalize_axes(axes, base.rank())?;
    let shape = reduce_shape(base.shape(), &axes, keep_dims);
    let op = Op::ReduceMean {
        base: base.clone(),
        axes,
        keep_dims,
    };
    Ok(Expr::new(name, op, shape))
}

pub fn create_reduce_mean_all(name: impl Into<String>, base: &Expr) -> Expr {
    let axes: Vec<usize> = (0..base.rank()).collect();
    let op = Op::ReduceMean {
        base: base.clone(),
        axes,
        keep_dims: false,
    };
    Expr::new(name, op, Vec::new())
}

/// Bundle expressions that are evaluated together. A group has no value.
pub fn create_group(name: impl Into<String>, members: &[Expr]) -> Expr {
    Expr::new(name, Op::Group(members.to_vec()), Vec::new())
}

/// Write `value` into a parameter or variable of the same shape.
pub fn create_assign(
    name: impl Into<String>,
    target: &Expr,
    value: &Expr,
) -> Result<Expr, ShapeError> {
    if target.shape() != value.shape() {
        return Err(ShapeError::Mismatch {
            expected: target.shape().to_vec(),
            found: value.shape().to_vec(),
        });
    }
    let op = Op::Assign {
        target: target.clone(),
        value: value.clone(),
    };
    Ok(Expr::new(name, op, target.shape().to_vec()))
}

/// Number of elements folded into each output element by a reduction.
pub fn reduced_count(base_shape: &[usize], axes: &[usize]) -> usize {
    let picked: Vec<usize> = axes
        .iter()
        .filter_map(|&axis| base_shape.get(axis).copied())
        .collect();
    element_count(&picked)
}

fn unary(name: impl Into<String>, base: &Expr, build: fn(Expr) -> Op) -> Expr {
    Expr::new(name, build(base.clone()), base.shape().to_vec())
}

fn binary(
    name: impl Into<String>,
    left: &Expr,
    right: &Expr,
    build: fn(Expr, Expr) -> Op,
) -> Result<Expr, ShapeError> {
    let shape = broadcast_shapes(left.shape(), right.shape())?;
    Ok(Expr::new(name, build(left.clone(), right.clone()), shape))
}
