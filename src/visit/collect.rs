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

use std::collections::BTreeSet;

use super::{Unsupported, Visitor};
use crate::graph::Expr;

/// Gathers parameter nodes; every other variant is accepted and ignored.
#[derive(Debug, Default)]
pub struct ParameterCollector {
    params: Vec<Expr>,
}

impl ParameterCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_parameters(self) -> Vec<Expr> {
        self.params
    }
}

macro_rules! ignore {
    ($($method:ident),* $(,)?) => {
        $(
            fn $method(&mut self, _: &Expr, _: Option<()>) -> Result<(), Unsupported> {
                Ok(())
            }
        )*
    };
}

impl Visitor for ParameterCollector {
    type Param = ();
    type Output = ();
    type Error = Unsupported;

    fn name(&self) -> &'static str {
        "parameter collector"
    }

    fn visit_parameter(&mut self, node: &Expr, _: Option<()>) -> Result<(), Unsupported> {
        self.params.push(node.clone());
        Ok(())
    }

    ignore!(
        visit_constant,
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

/// Parameters reachable from `root`, each listed once, in depth-first
/// left-to-right order.
pub fn collect_parameters(root: &Expr) -> Result<Vec<Expr>, Unsupported> {
    let mut collector = ParameterCollector::new();
    let mut seen = BTreeSet::new();
    let mut stack = vec![root.clone()];
    while let Some(node) = stack.pop() {
        if !seen.insert(node.id()) {
            continue;
        }
        node.accept(&mut collector, None)?;
        stack.extend(node.op().operands().into_iter().rev().cloned());
    }
    Ok(collector.into_parameters())
}
