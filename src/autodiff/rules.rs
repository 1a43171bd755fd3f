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

use crate::graph::factory::{
    create_divide, create_fill, create_matmul, create_multiply, create_negate, create_power,
    create_reduce_sum, create_scalar, create_sigmoid, create_sigmoid_grad, create_sign,
    create_step, create_subtract, reduced_count,
};
use crate::graph::{identity, two, zero, Expr, Op};
use crate::shapes::{reduction_axes, ShapeError};
use crate::visit::{Unsupported, Visitor};

use super::engine::{AutodiffError, MeanGradient};
use super::table::{Contribution, GradientTable};

/// Operand still to be differentiated, paired with the gradient flowing in.
type Pending = Vec<(Expr, Expr)>;

/// Reverse-mode derivative rules.
///
/// Each `visit_*` builds the local gradient of every operand, records it in
/// the table against the current node, and hands the operands back to the
/// driver for further descent. Leaves yield nothing further. Fill, Group and
/// Assign have no rule and are rejected.
pub struct ReverseGradient<'t> {
    table: &'t mut GradientTable,
    mean: MeanGradient,
}

impl<'t> ReverseGradient<'t> {
    pub fn new(table: &'t mut GradientTable, mean: MeanGradient) -> Self {
        Self { table, mean }
    }

    fn incoming(node: &Expr, grad: Option<Expr>) -> Expr {
        grad.unwrap_or_else(|| {
            create_fill(format!("{}/seed", node.name()), 1.0, node.shape().to_vec())
        })
    }

    /// Record `gradient` for `operand` and return it for further descent.
    /// A `ZERO` gradient is recorded but not descended.
    fn emit(
        &mut self,
        consumer: &Expr,
        slot: usize,
        operand: &Expr,
        gradient: Expr,
    ) -> Option<(Expr, Expr)> {
        self.table.record(
            operand,
            Contribution {
                consumer: consumer.id(),
                consumer_name: consumer.name().to_string(),
                slot,
                gradient: gradient.clone(),
            },
        );
        (!gradient.is_zero()).then(|| (operand.clone(), gradient))
    }
}

fn grad_name(node: &Expr, operand: &Expr) -> String {
    format!("{}/grad_{}", node.name(), operand.name())
}

/// Gradient names for both operands of a binary node. When the same node
/// sits in both slots the slot number is appended so the names stay distinct.
fn grad_names(node: &Expr, left: &Expr, right: &Expr) -> (String, String) {
    let (left_name, right_name) = (grad_name(node, left), grad_name(node, right));
    if left.ptr_eq(right) {
        (format!("{left_name}$1"), format!("{right_name}$2"))
    } else {
        (left_name, right_name)
    }
}

/// Operands of a binary node, checked against the variant `kind` the calling
/// rule handles.
fn binary_operands<'n>(
    visitor: &'static str,
    node: &'n Expr,
    kind: &str,
) -> Result<(&'n Expr, &'n Expr), Unsupported> {
    match node.op() {
        op if op.kind() != kind => Err(Unsupported::new(visitor, node)),
        Op::Add(l, r) | Op::Subtract(l, r) | Op::Multiply(l, r) | Op::Divide(l, r) => Ok((l, r)),
        Op::MatMul { left, right, .. } => Ok((left, right)),
        Op::Power { base, exponent } => Ok((base, exponent)),
        _ => Err(Unsupported::new(visitor, node)),
    }
}

fn unary_operand<'n>(
    visitor: &'static str,
    node: &'n Expr,
    kind: &str,
) -> Result<&'n Expr, Unsupported> {
    match node.op() {
        op if op.kind() != kind => Err(Unsupported::new(visitor, node)),
        Op::Negate(x)
        | Op::Abs(x)
        | Op::Sign(x)
        | Op::Square(x)
        | Op::Sigmoid(x)
        | Op::SigmoidGrad(x)
        | Op::Relu(x)
        | Op::Step(x)
        | Op::ReduceSum { base: x, .. }
        | Op::ReduceMean { base: x, .. } => Ok(x),
        _ => Err(Unsupported::new(visitor, node)),
    }
}

/// Sum a broadcast gradient back down to `target` shape.
///
/// Axes `target` lacks are dropped; axes where `target` has extent 1 are
/// kept as size 1. Returns `grad` untouched when no axis needs folding.
fn fold_to(name: String, grad: Expr, target: &[usize]) -> Result<Expr, ShapeError> {
    let axes = reduction_axes(grad.shape(), target)?.rhs;
    if axes.is_empty() {
        return Ok(grad);
    }
    let leading = grad.rank().saturating_sub(target.len());
    let (dropped, kept): (Vec<usize>, Vec<usize>) = axes.into_iter().partition(|&a| a < leading);

    let mut out = grad;
    if !kept.is_empty() {
        let kept_name = if dropped.is_empty() {
            name.clone()
        } else {
            format!("{name}/keep")
        };
        out = create_reduce_sum(kept_name, &out, &kept, true)?;
    }
    if !dropped.is_empty() {
        out = create_reduce_sum(name, &out, &dropped, false)?;
    }
    Ok(out)
}

/// Stretch a reduced gradient back over the reduction's operand.
///
/// Works when the reduction kept its axes or dropped only leading ones;
/// otherwise the product cannot broadcast and a [`ShapeError`] is returned.
fn broadcast_back(name: String, grad: Expr, target: &[usize]) -> Result<Expr, ShapeError> {
    if grad.shape() == target {
        return Ok(grad);
    }
    let ones = create_fill(format!("{name}/ones"), 1.0, target.to_vec());
    let out = create_multiply(name, &grad, &ones)?;
    if out.shape() != target {
        return Err(ShapeError::Mismatch {
            expected: target.to_vec(),
            found: grad.shape().to_vec(),
        });
    }
    Ok(out)
}

/// `grad * local`, named after the gradient edge.
fn chain(name: String, grad: &Expr, local: &Expr) -> Result<Expr, ShapeError> {
    create_multiply(name, grad, local)
}

impl<'t> Visitor for ReverseGradient<'t> {
    type Param = Expr;
    type Output = Pending;
    type Error = AutodiffError;

    fn name(&self) -> &'static str {
        "reverse gradient"
    }

    fn visit_constant(&mut self, _: &Expr, _: Option<Expr>) -> Result<Pending, AutodiffError> {
        Ok(Vec::new())
    }

    fn visit_parameter(&mut self, _: &Expr, _: Option<Expr>) -> Result<Pending, AutodiffError> {
        Ok(Vec::new())
    }

    fn visit_variable(&mut self, _: &Expr, _: Option<Expr>) -> Result<Pending, AutodiffError> {
        Ok(Vec::new())
    }

    fn visit_add(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let (left, right) = binary_operands(self.name(), node, "add")?;
        let (left_name, right_name) = grad_names(node, left, right);
        let left_grad = fold_to(left_name, grad.clone(), left.shape())?;
        let right_grad = fold_to(right_name, grad, right.shape())?;
        let first = self.emit(node, 0, left, left_grad);
        let second = self.emit(node, 1, right, right_grad);
        Ok(first.into_iter().chain(second).collect())
    }

    fn visit_subtract(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let (left, right) = binary_operands(self.name(), node, "subtract")?;
        let (left_name, right_name) = grad_names(node, left, right);
        let left_grad = fold_to(left_name, grad.clone(), left.shape())?;
        let folded = fold_to(format!("{right_name}/sum"), grad, right.shape())?;
        let right_grad = create_negate(right_name, &folded);
        let first = self.emit(node, 0, left, left_grad);
        let second = self.emit(node, 1, right, right_grad);
        Ok(first.into_iter().chain(second).collect())
    }

    fn visit_multiply(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let (left, right) = binary_operands(self.name(), node, "multiply")?;
        let (left_name, right_name) = grad_names(node, left, right);

        let left_grad = create_multiply(left_name.clone(), &grad, right)?;
        let left_grad = fold_to(format!("{left_name}/sum"), left_grad, left.shape())?;
        let right_grad = create_multiply(right_name.clone(), left, &grad)?;
        let right_grad = fold_to(format!("{right_name}/sum"), right_grad, right.shape())?;
        let first = self.emit(node, 0, left, left_grad);
        let second = self.emit(node, 1, right, right_grad);
        Ok(first.into_iter().chain(second).collect())
    }

    fn visit_divide(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let (left, right) = binary_operands(self.name(), node, "divide")?;
        let (left_name, right_name) = grad_names(node, left, right);

        let left_grad = create_divide(left_name.clone(), &grad, right)?;
        let left_grad = fold_to(format!("{left_name}/sum"), left_grad, left.shape())?;

        // d(l / r)/dr = -l / r / r
        let negated = create_negate(format!("{right_name}$1"), left);
        let quotient = create_divide(format!("{right_name}$2"), &negated, right)?;
        let quotient = create_divide(format!("{right_name}$3"), &quotient, right)?;
        let right_grad = chain(right_name.clone(), &grad, &quotient)?;
        let right_grad = fold_to(format!("{right_name}/sum"), right_grad, right.shape())?;
        let first = self.emit(node, 0, left, left_grad);
        let second = self.emit(node, 1, right, right_grad);
        Ok(first.into_iter().chain(second).collect())
    }

    fn visit_matmul(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let Op::MatMul {
            left,
            right,
            transpose_left: ta,
            transpose_right: tb,
        } = node.op()
        else {
            return Err(Unsupported::new(self.name(), node).into());
        };
        let (ta, tb) = (*ta, *tb);

        // y = op(A) op(B); the gradient of a transposed operand is the
        // transpose of the untransposed rule.
        let (left_name, right_name) = grad_names(node, left, right);
        let left_grad = if ta {
            create_matmul(left_name, right, &grad, tb, true)?
        } else {
            create_matmul(left_name, &grad, right, false, !tb)?
        };
        let right_grad = if tb {
            create_matmul(right_name, &grad, left, true, ta)?
        } else {
            create_matmul(right_name, left, &grad, !ta, false)?
        };
        let first = self.emit(node, 0, left, left_grad);
        let second = self.emit(node, 1, right, right_grad);
        Ok(first.into_iter().chain(second).collect())
    }

    fn visit_power(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let (base, exponent) = binary_operands(self.name(), node, "power")?;
        if !matches!(exponent.op(), Op::Constant(_)) {
            return Err(Unsupported {
                visitor: self.name(),
                op: "power with non-constant exponent",
                node: node.name().to_string(),
            }
            .into());
        }
        let name = grad_name(node, base);
        let reduced = create_subtract(format!("{name}/exp_minus_one"), exponent, identity())?;
        let raised = create_power(format!("{name}/pow"), base, &reduced)?;
        let local = create_multiply(format!("{name}/local"), exponent, &raised)?;
        let base_grad = chain(name.clone(), &grad, &local)?;
        let base_grad = fold_to(format!("{name}/sum"), base_grad, base.shape())?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_negate(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "negate")?;
        let base_grad = create_negate(grad_name(node, base), &grad);
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_abs(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "abs")?;
        let name = grad_name(node, base);
        let sign = create_sign(format!("{name}/sign"), base);
        let base_grad = chain(name, &grad, &sign)?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_sign(&mut self, node: &Expr, _: Option<Expr>) -> Result<Pending, AutodiffError> {
        // Piecewise constant: the recorded gradient is ZERO, which ends descent.
        let base = unary_operand(self.name(), node, "sign")?;
        Ok(self.emit(node, 0, base, zero().clone()).into_iter().collect())
    }

    fn visit_step(&mut self, node: &Expr, _: Option<Expr>) -> Result<Pending, AutodiffError> {
        let base = unary_operand(self.name(), node, "step")?;
        Ok(self.emit(node, 0, base, zero().clone()).into_iter().collect())
    }

    fn visit_square(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "square")?;
        let name = grad_name(node, base);
        let doubled = create_multiply(format!("{name}/mul"), base, two())?;
        let base_grad = chain(name, &grad, &doubled)?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_sigmoid(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "sigmoid")?;
        let name = grad_name(node, base);
        let local = create_sigmoid_grad(format!("{name}/sigmoid_grad"), base);
        let base_grad = chain(name, &grad, &local)?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_sigmoid_grad(
        &mut self,
        node: &Expr,
        grad: Option<Expr>,
    ) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "sigmoid_grad")?;
        let name = grad_name(node, base);
        // d/dx s(x)(1 - s(x)) = s'(x) * (1 - 2 s(x))
        let s = create_sigmoid(format!("{name}/sigmoid"), base);
        let twice = create_multiply(format!("{name}/twice"), two(), &s)?;
        let factor = create_subtract(format!("{name}/factor"), identity(), &twice)?;
        let slope = create_sigmoid_grad(format!("{name}/sigmoid_grad"), base);
        let local = create_multiply(format!("{name}/local"), &slope, &factor)?;
        let base_grad = chain(name, &grad, &local)?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_relu(&mut self, node: &Expr, grad: Option<Expr>) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "relu")?;
        let name = grad_name(node, base);
        let step = create_step(format!("{name}/step"), base);
        let base_grad = chain(name, &grad, &step)?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_reduce_sum(
        &mut self,
        node: &Expr,
        grad: Option<Expr>,
    ) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let base = unary_operand(self.name(), node, "reduce_sum")?;
        let base_grad = broadcast_back(grad_name(node, base), grad, base.shape())?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }

    fn visit_reduce_mean(
        &mut self,
        node: &Expr,
        grad: Option<Expr>,
    ) -> Result<Pending, AutodiffError> {
        let grad = Self::incoming(node, grad);
        let Op::ReduceMean { base, axes, .. } = node.op() else {
            return Err(Unsupported::new(self.name(), node).into());
        };
        let name = grad_name(node, base);
        let grad = match self.mean {
            MeanGradient::PassThrough => grad,
            MeanGradient::Scaled => {
                let count = reduced_count(base.shape(), axes) as f64;
                let count = create_scalar(format!("{name}/count"), count);
                create_divide(format!("{name}/scaled"), &grad, &count)?
            }
        };
        let base_grad = broadcast_back(name, grad, base.shape())?;
        Ok(self.emit(node, 0, base, base_grad).into_iter().collect())
    }
}
