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

//! Shape rules shared by graph construction and the gradient visitor.
//!
//! Shapes are plain lists of non-negative extents. Broadcasting follows the
//! numpy convention: shapes are aligned from the right and a dimension of `1`
//! stretches to match the other operand.

use std::collections::BTreeSet;

/// A rank-N tensor shape represented as a list of extents.
pub type Shape = Vec<usize>;

/// Error type returned by the shape helpers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShapeError {
    #[error("cannot broadcast shapes {lhs:?} and {rhs:?}")]
    BroadcastIncompatible { lhs: Shape, rhs: Shape },
    #[error("expected rank {expected} but found {found}")]
    RankMismatch { expected: usize, found: usize },
    #[error("matmul contraction mismatch: {lhs:?} x {rhs:?} (transpose {transpose_lhs}/{transpose_rhs})")]
    ContractionMismatch {
        lhs: Shape,
        rhs: Shape,
        transpose_lhs: bool,
        transpose_rhs: bool,
    },
    #[error("axis {axis} out of range for rank {rank}")]
    AxisOutOfRange { axis: usize, rank: usize },
    #[error("duplicate axis {axis}")]
    DuplicateAxis { axis: usize },
    #[error("shape {shape:?} holds {expected} elements but {found} were given")]
    ElementCountMismatch {
        shape: Shape,
        expected: usize,
        found: usize,
    },
    #[error("shape {found:?} does not match required shape {expected:?}")]
    Mismatch { expected: Shape, found: Shape },
}

/// Number of elements held by a tensor of `shape` (`1` for scalars).
pub fn element_count(shape: &[usize]) -> usize {
    shape.iter().product()
}

/// Dimension of `shape` at aligned position `i`, counting from the right.
///
/// Missing leading dimensions read as `None`.
fn dim_from_right(shape: &[usize], i: usize) -> Option<usize> {
    shape.len().checked_sub(i + 1).map(|idx| shape[idx])
}

/// Compute the broadcasted shape for two input shapes.
///
/// Shapes are aligned from the right; dimensions must be equal or 1,
/// otherwise broadcasting fails.
pub fn broadcast_shapes(lhs: &[usize], rhs: &[usize]) -> Result<Shape, ShapeError> {
    let max_rank = lhs.len().max(rhs.len());
    let mut out = Vec::with_capacity(max_rank);
    for i in 0..max_rank {
        let a = dim_from_right(lhs, i).unwrap_or(1);
        let b = dim_from_right(rhs, i).unwrap_or(1);
        let dim = if a == b || a == 1 {
            b
        } else if b == 1 {
            a
        } else {
            return Err(ShapeError::BroadcastIncompatible {
                lhs: lhs.to_vec(),
                rhs: rhs.to_vec(),
            });
        };
        out.push(dim);
    }
    out.reverse();
    Ok(out)
}

/// Axes to sum over when folding a broadcast gradient back onto each operand.
///
/// Axis indices are expressed in the coordinates of the broadcast result,
/// i.e. a gradient of rank `max(lhs.len(), rhs.len())`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReductionAxes {
    pub lhs: Vec<usize>,
    pub rhs: Vec<usize>,
}

/// Resolve which axes of a broadcast gradient belong to each operand's
/// reduction set.
///
/// An axis is reduced for an operand when that operand lacks it entirely or
/// holds extent `1` while the other operand is larger. Two extents that both
/// exceed `1` and differ are not broadcastable.
pub fn reduction_axes(lhs: &[usize], rhs: &[usize]) -> Result<ReductionAxes, ShapeError> {
    let rank = lhs.len().max(rhs.len());
    let mut axes = ReductionAxes::default();
    for axis in 0..rank {
        let i = rank - 1 - axis;
        let a = dim_from_right(lhs, i);
        let b = dim_from_right(rhs, i);
        match (a, b) {
            (Some(x), Some(y)) if x > 1 && y > 1 && x != y => {
                return Err(ShapeError::BroadcastIncompatible {
                    lhs: lhs.to_vec(),
                    rhs: rhs.to_vec(),
                });
            }
            (Some(x), Some(y)) => {
                if x == 1 && y > 1 {
                    axes.lhs.push(axis);
                } else if y == 1 && x > 1 {
                    axes.rhs.push(axis);
                }
            }
            (None, Some(_)) => axes.lhs.push(axis),
            (Some(_), None) => axes.rhs.push(axis),
            (None, None) => {}
        }
    }
    Ok(axes)
}

/// Validate a list of reduction axes against `rank`, returning them sorted.
pub fn normalize_axes(axes: &[usize], rank: usize) -> Result<Vec<usize>, ShapeError> {
    let mut seen = BTreeSet::new();
    for &axis in axes {
        if axis >= rank {
            return Err(ShapeError::AxisOutOfRange { axis, rank });
        }
        if !seen.insert(axis) {
            return Err(ShapeError::DuplicateAxis { axis });
        }
    }
    Ok(seen.into_iter().collect())
}

/// Shape produced by reducing `shape` over already-normalized `axes`.
pub fn reduce_shape(shape: &[usize], axes: &[usize], keep_dims: bool) -> Shape {
    if keep_dims {
        let mut out = shape.to_vec();
        for &axis in axes {
            if axis < out.len() {
                out[axis] = 1;
            }
        }
        out
    } else {
        shape
            .iter()
            .enumerate()
            .filter(|(idx, _)| !axes.contains(idx))
            .map(|(_, dim)| *dim)
            .collect()
    }
}

/// Output shape of a rank-2 matrix product with optional operand transposes.
pub fn matmul_shape(
    lhs: &[usize],
    rhs: &[usize],
    transpose_lhs: bool,
    transpose_rhs: bool,
) -> Result<Shape, ShapeError> {
    for shape in [lhs, rhs] {
        if shape.len() != 2 {
            return Err(ShapeError::RankMismatch {
                expected: 2,
                found: shape.len(),
            });
        }
    }
    let (m, k_lhs) = if transpose_lhs {
        (lhs[1], lhs[0])
    } else {
        (lhs[0], lhs[1])
    };
    let (k_rhs, n) = if transpose_rhs {
        (rhs[1], rhs[0])
    } else {
        (rhs[0], rhs[1])
    };
    if k_lhs != k_rhs {
        return Err(ShapeError::ContractionMismatch {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
            transpose_lhs,
            transpose_rhs,
        });
    }
    Ok(vec![m, n])
}
