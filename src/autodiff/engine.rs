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

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use crate::graph::factory::{create_fill, create_multiply};
use crate::graph::Expr;
use crate::shapes::{broadcast_shapes, ShapeError};
use crate::visit::Unsupported;

use super::rules::ReverseGradient;
use super::table::GradientTable;

/// Errors returned by the autodiff engine.
#[derive(Debug, thiserror::Error)]
pub enum AutodiffError {
    /// Building a gradient expression hit incompatible shapes.
    #[error(transparent)]
    Shape(#[from] ShapeError),
    /// The traversal reached a variant without a differentiation rule.
    #[error(transparent)]
    Unsupported(#[from] Unsupported),
    /// A gradient total was requested for a node that received none.
    #[error("no gradient recorded for node '{0}'")]
    MissingGradient(String),
}

/// How the gradient of a mean reduction is formed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MeanGradient {
    /// Forward the incoming gradient unchanged, as for a sum.
    #[default]
    PassThrough,
    /// Divide the incoming gradient by the number of reduced elements.
    Scaled,
}

/// Knobs for a backward pass.
#[derive(Debug, Clone, Default)]
pub struct GradientOptions {
    pub mean: MeanGradient,
    /// Gradient fed into the output. Defaults to ones shaped like the output.
    pub seed: Option<Expr>,
}

impl GradientOptions {
    pub fn with_seed(mut self, seed: Expr) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_mean(mut self, mean: MeanGradient) -> Self {
        self.mean = mean;
        self
    }
}

/// Differentiate `output` with respect to every node upstream of it.
pub fn backward(output: &Expr) -> Result<GradientTable, AutodiffError> {
    backward_with_options(output, &GradientOptions::default())
}

pub fn backward_with_options(
    output: &Expr,
    options: &GradientOptions,
) -> Result<GradientTable, AutodiffError> {
    let mut table = GradientTable::new();
    backward_into(output, options, &mut table)?;
    Ok(table)
}

/// Run a backward pass, reusing `table`. The table is cleared first.
///
/// Nodes are processed from an explicit stack, left operand before right, so
/// graph depth is not bounded by the call stack. A node reached along several
/// paths is processed once per path. The first error aborts the pass and
/// leaves the table partially filled.
pub fn backward_into(
    output: &Expr,
    options: &GradientOptions,
    table: &mut GradientTable,
) -> Result<(), AutodiffError> {
    table.clear();
    let seed = match &options.seed {
        Some(seed) => Some(expand_seed(output, seed)?),
        None => None,
    };

    debug!(
        "backward pass from {} {:?} (mean rule {:?})",
        output.name(),
        output.shape(),
        options.mean
    );

    let mut visitor = ReverseGradient::new(table, options.mean);
    let mut stack = output.accept(&mut visitor, seed)?;
    stack.reverse();
    let mut visits = 1usize;
    while let Some((node, grad)) = stack.pop() {
        trace!("visit {} '{}' with {}", node.op().kind(), node.name(), grad.name());
        let mut next = node.accept(&mut visitor, Some(grad))?;
        next.reverse();
        stack.extend(next);
        visits += 1;
    }

    debug!(
        "backward pass from {} done: {} visits, {} nodes with gradients",
        output.name(),
        visits,
        table.len()
    );
    Ok(())
}

/// Stretch an explicit seed to the output's shape.
///
/// The seed must broadcast to exactly that shape; a smaller one is multiplied
/// by ones so every rule sees a full-shaped incoming gradient.
fn expand_seed(output: &Expr, seed: &Expr) -> Result<Expr, ShapeError> {
    let joined = broadcast_shapes(seed.shape(), output.shape())?;
    if joined != output.shape() {
        return Err(ShapeError::Mismatch {
            expected: output.shape().to_vec(),
            found: seed.shape().to_vec(),
        });
    }
    if seed.shape() == output.shape() {
        return Ok(seed.clone());
    }
    let name = format!("{}/seed", output.name());
    if seed.is_zero() {
        return Ok(create_fill(name, 0.0, joined));
    }
    let ones = create_fill(format!("{name}/ones"), 1.0, joined);
    create_multiply(name, seed, &ones)
}
