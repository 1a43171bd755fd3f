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

use std::collections::{BTreeMap, BTreeSet};

use crate::graph::factory::create_add;
use crate::graph::{zero, Expr, NodeId};
use crate::shapes::ShapeError;

use super::engine::AutodiffError;

/// Gradient flowing into a node through one consuming edge.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub consumer: NodeId,
    pub consumer_name: String,
    /// Operand position of the node inside the consumer.
    pub slot: usize,
    pub gradient: Expr,
}

/// Per-node gradient contributions collected by one backward pass.
///
/// Entries are only ever appended: a node reached twice through the same
/// consumer (along two paths) holds two entries.
#[derive(Debug, Clone, Default)]
pub struct GradientTable {
    entries: BTreeMap<NodeId, Vec<Contribution>>,
}

impl GradientTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn record(&mut self, node: &Expr, contribution: Contribution) {
        self.entries.entry(node.id()).or_default().push(contribution);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Number of nodes holding at least one contribution.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, node: &Expr) -> bool {
        self.entries.contains_key(&node.id())
    }

    pub fn contributions(&self, node: &Expr) -> &[Contribution] {
        self.entries
            .get(&node.id())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Distinct consumers that contributed to `node`.
    pub fn consumers(&self, node: &Expr) -> BTreeSet<NodeId> {
        self.contributions(node)
            .iter()
            .map(|c| c.consumer)
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &[Contribution])> {
        self.entries.iter().map(|(id, list)| (*id, list.as_slice()))
    }

    /// Sum of every contribution recorded for `node`.
    pub fn total_gradient(&self, node: &Expr) -> Result<Expr, AutodiffError> {
        let list = self.contributions(node);
        let Some((first, rest)) = list.split_first() else {
            return Err(AutodiffError::MissingGradient(node.name().to_string()));
        };
        let mut total = first.gradient.clone();
        for (k, contribution) in rest.iter().enumerate() {
            let name = format!("{}/total${}", node.name(), k + 1);
            total = create_add(name, &total, &contribution.gradient)?;
        }
        Ok(total)
    }

    /// Like [`total_gradient`](Self::total_gradient), but a node without
    /// contributions yields the `ZERO` sentinel.
    pub fn total_gradient_or_zero(&self, node: &Expr) -> Result<Expr, ShapeError> {
        match self.total_gradient(node) {
            Ok(total) => Ok(total),
            Err(AutodiffError::Shape(err)) => Err(err),
            Err(_) => Ok(zero().clone()),
        }
    }
}
