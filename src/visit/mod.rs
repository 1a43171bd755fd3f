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

//! Double dispatch over node variants.
//!
//! A traversal implements [`Visitor`] and calls [`Expr::accept`]; the node
//! routes the call to the `visit_*` method matching its own variant. Every
//! method has a default that rejects the variant with [`Unsupported`], so a
//! traversal only overrides the variants it handles.
//!
//! The optional `param` follows one convention: when present it is the value
//! flowing in from the caller (for differentiation, the incoming gradient);
//! `None` marks the traversal root.

mod collect;

pub use collect::{collect_parameters, ParameterCollector};

use crate::graph::{Expr, Op};

/// A visitor was asked to handle a variant it has no rule for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{visitor} does not support {op} node '{node}'")]
pub struct Unsupported {
    pub visitor: &'static str,
    pub op: &'static str,
    pub node: String,
}

impl Unsupported {
    pub fn new(visitor: &'static str, node: &Expr) -> Self {
        Self {
            visitor,
            op: node.op().kind(),
            node: node.name().to_string(),
        }
    }
}

macro_rules! visit_methods {
    ($($method:ident),* $(,)?) => {
        $(
            fn $method(
                &mut self,
                node: &Expr,
                param: Option<Self::Param>,
            ) -> Result<Self::Output, Self::Error> {
                let _ = param;
                Err(Unsupported::new(self.name(), node).into())
            }
        )*
    };
}

/// One entry point per node variant.
pub trait Visitor {
    type Param;
    type Output;
    type Error: From<Unsupported>;

    /// Name reported in [`Unsupported`] errors.
    fn name(&self) -> &'static str;

    visit_methods!(
        visit_constant,
        visit_parameter,
        visit_variable,
        visit_add,
        visit_subtract,
        visit_multiply,
        visit_divide,
        visit_negate,
        visit_abs,
        visit_sign,
        visit_square,
        visit_power,
        visit_matmul,
        visit_sigmoid,
        visit_sigmoid_grad,
        visit_relu,
        visit_step,
        visit_reduce_sum,
        visit_reduce_mean,
        visit_fill,
        visit_group,
        visit_assign,
    );
}

impl Expr {
    /// Dispatch to the `visit_*` method of `visitor` matching this node.
    pub fn accept<V: Visitor + ?Sized>(
        &self,
        visitor: &mut V,
        param: Option<V::Param>,
    ) -> Result<V::Output, V::Error> {
        match self.op() {
            Op::Constant(_) => visitor.visit_constant(self, param),
            Op::Parameter(_) => visitor.visit_parameter(self, param),
            Op::Variable => visitor.visit_variable(self, param),
            Op::Add(..) => visitor.visit_add(self, param),
            Op::Subtract(..) => visitor.visit_subtract(self, param),
            Op::Multiply(..) => visitor.visit_multiply(self, param),
            Op::Divide(..) => visitor.visit_divide(self, param),
            Op::Negate(_) => visitor.visit_negate(self, param),
            Op::Abs(_) => visitor.visit_abs(self, param),
            Op::Sign(_) => visitor.visit_sign(self, param),
            Op::Square(_) => visitor.visit_square(self, param),
            Op::Power { .. } => visitor.visit_power(self, param),
            Op::MatMul { .. } => visitor.visit_matmul(self, param),
            Op::Sigmoid(_) => visitor.visit_sigmoid(self, param),
            Op::SigmoidGrad(_) => visitor.visit_sigmoid_grad(self, param),
            Op::Relu(_) => visitor.visit_relu(self, param),
            Op::Step(_) => visitor.visit_step(self, param),
            Op::ReduceSum { .. } => visitor.visit_reduce_sum(self, param),
            Op::ReduceMean { .. } => visitor.visit_reduce_mean(self, param),
            Op::Fill { .. } => visitor.visit_fill(self, param),
            Op::Group(_) => visitor.visit_group(self, param),
            Op::Assign { .. } => visitor.visit_assign(self, param),
        }
    }
}
