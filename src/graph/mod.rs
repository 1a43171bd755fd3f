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

//! Symbolic tensor expression graph.
//!
//! Nodes are immutable once built and shared through [`Expr`] handles, so a
//! sub-expression may feed any number of consumers. Nodes are only created
//! through the functions in [`factory`], which validate shapes and apply
//! algebraic simplification first.

pub mod factory;

use std::fmt;
use std::mem;
use std::ops::Deref;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::shapes::{element_count, Shape, ShapeError};

/// Process-unique node identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

impl NodeId {
    fn fresh() -> Self {
        static COUNTER: AtomicUsize = AtomicUsize::new(0);
        NodeId(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "%{}", self.0)
    }
}

/// Dense tensor payload carried by constants and parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Shape,
    data: Vec<f64>,
}

impl Tensor {
    pub fn new(shape: Shape, data: Vec<f64>) -> Result<Self, ShapeError> {
        let expected = element_count(&shape);
        if expected != data.len() {
            return Err(ShapeError::ElementCountMismatch {
                shape,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    pub fn scalar(value: f64) -> Self {
        Self {
            shape: Vec::new(),
            data: vec![value],
        }
    }

    pub fn filled(shape: Shape, value: f64) -> Self {
        let len = element_count(&shape);
        Self {
            shape,
            data: vec![value; len],
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    pub fn into_data(self) -> Vec<f64> {
        self.data
    }
}

/// Externally mutable value of a parameter.
///
/// Clones share the same storage. The shape is fixed at construction so the
/// node's frozen shape stays truthful.
#[derive(Debug, Clone)]
pub struct ParamValue {
    shape: Shape,
    cell: Arc<RwLock<Tensor>>,
}

impl ParamValue {
    fn new(tensor: Tensor) -> Self {
        Self {
            shape: tensor.shape.clone(),
            cell: Arc::new(RwLock::new(tensor)),
        }
    }

    pub fn get(&self) -> Tensor {
        self.cell
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the stored tensor; the new value must keep the original shape.
    pub fn set(&self, tensor: Tensor) -> Result<(), ShapeError> {
        if tensor.shape != self.shape {
            return Err(ShapeError::Mismatch {
                expected: self.shape.clone(),
                found: tensor.shape,
            });
        }
        *self.cell.write().unwrap_or_else(PoisonError::into_inner) = tensor;
        Ok(())
    }
}

/// Operation carried by a node, together with its operands.
#[derive(Debug, Clone)]
pub enum Op {
    Constant(Tensor),
    Parameter(ParamValue),
    Variable,
    Add(Expr, Expr),
    Subtract(Expr, Expr),
    Multiply(Expr, Expr),
    Divide(Expr, Expr),
    Negate(Expr),
    Abs(Expr),
    Sign(Expr),
    Square(Expr),
    Power {
        base: Expr,
        exponent: Expr,
    },
    MatMul {
        left: Expr,
        right: Expr,
        transpose_left: bool,
        transpose_right: bool,
    },
    Sigmoid(Expr),
    SigmoidGrad(Expr),
    Relu(Expr),
    Step(Expr),
    ReduceSum {
        base: Expr,
        axes: Vec<usize>,
        keep_dims: bool,
    },
    ReduceMean {
        base: Expr,
        axes: Vec<usize>,
        keep_dims: bool,
    },
    Fill {
        value: f64,
    },
    Group(Vec<Expr>),
    Assign {
        target: Expr,
        value: Expr,
    },
}

impl Op {
    /// Stable lowercase name of the variant, used in logs and errors.
    pub fn kind(&self) -> &'static str {
        match self {
            Op::Constant(_) => "constant",
            Op::Parameter(_) => "parameter",
            Op::Variable => "variable",
            Op::Add(..) => "add",
            Op::Subtract(..) => "subtract",
            Op::Multiply(..) => "multiply",
            Op::Divide(..) => "divide",
            Op::Negate(_) => "negate",
            Op::Abs(_) => "abs",
            Op::Sign(_) => "sign",
            Op::Square(_) => "square",
            Op::Power { .. } => "power",
            Op::MatMul { .. } => "matmul",
            Op::Sigmoid(_) => "sigmoid",
            Op::SigmoidGrad(_) => "sigmoid_grad",
            Op::Relu(_) => "relu",
            Op::Step(_) => "step",
            Op::ReduceSum { .. } => "reduce_sum",
            Op::ReduceMean { .. } => "reduce_mean",
            Op::Fill { .. } => "fill",
            Op::Group(_) => "group",
            Op::Assign { .. } => "assign",
        }
    }

    /// Operands in positional order.
    pub fn operands(&self) -> Vec<&Expr> {
        match self {
            Op::Constant(_) | Op::Parameter(_) | Op::Variable | Op::Fill { .. } => Vec::new(),
            Op::Add(l, r) | Op::Subtract(l, r) | Op::Multiply(l, r) | Op::Divide(l, r) => {
                vec![l, r]
            }
            Op::Power { base, exponent } => vec![base, exponent],
            Op::MatMul { left, right, .. } => vec![left, right],
            Op::Assign { target, value } => vec![target, value],
            Op::Negate(x)
            | Op::Abs(x)
            | Op::Sign(x)
            | Op::Square(x)
            | Op::Sigmoid(x)
            | Op::SigmoidGrad(x)
            | Op::Relu(x)
            | Op::Step(x)
            | Op::ReduceSum { base: x, .. }
            | Op::ReduceMean { base: x, .. } => vec![x],
            Op::Group(members) => members.iter().collect(),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self, Op::Constant(_) | Op::Parameter(_) | Op::Variable)
    }

    fn into_operands(self) -> Vec<Expr> {
        match self {
            Op::Constant(_) | Op::Parameter(_) | Op::Variable | Op::Fill { .. } => Vec::new(),
            Op::Add(l, r) | Op::Subtract(l, r) | Op::Multiply(l, r) | Op::Divide(l, r) => {
                vec![l, r]
            }
            Op::Power { base, exponent } => vec![base, exponent],
            Op::MatMul { left, right, .. } => vec![left, right],
            Op::Assign { target, value } => vec![target, value],
            Op::Negate(x)
            | Op::Abs(x)
            | Op::Sign(x)
            | Op::Square(x)
            | Op::Sigmoid(x)
            | Op::SigmoidGrad(x)
            | Op::Relu(x)
            | Op::Step(x)
            | Op::ReduceSum { base: x, .. }
            | Op::ReduceMean { base: x, .. } => vec![x],
            Op::Group(members) => members,
        }
    }
}

/// One operation or leaf value in the expression DAG.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    name: String,
    op: Op,
    shape: Shape,
}

impl Node {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    fn take_operands(&mut self) -> Vec<Expr> {
        mem::replace(&mut self.op, Op::Variable).into_operands()
    }
}

// Operand chains are released from a local stack: a node whose last handle
// goes away hands its operands over instead of dropping them in place.
impl Drop for Node {
    fn drop(&mut self) {
        let mut pending = self.take_operands();
        while let Some(expr) = pending.pop() {
            if let Some(mut node) = Arc::into_inner(expr.0) {
                pending.extend(node.take_operands());
            }
        }
    }
}

/// Shared handle to a [`Node`].
///
/// Equality is identity: two handles are equal only when they point at the
/// same node.
#[derive(Clone)]
pub struct Expr(Arc<Node>);

impl Expr {
    pub(crate) fn new(name: impl Into<String>, op: Op, shape: Shape) -> Self {
        Expr(Arc::new(Node {
            id: NodeId::fresh(),
            name: name.into(),
            op,
            shape,
        }))
    }

    pub fn ptr_eq(&self, other: &Expr) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_zero(&self) -> bool {
        self.ptr_eq(zero())
    }

    pub fn is_identity(&self) -> bool {
        self.ptr_eq(identity())
    }
}

impl Deref for Expr {
    type Target = Node;

    fn deref(&self) -> &Node {
        &self.0
    }
}

impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Expr {}

impl fmt::Debug for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}({} {:?} {:?})",
            self.op.kind(),
            self.id,
            self.name,
            self.shape
        )
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

fn sentinel(cell: &'static OnceLock<Expr>, name: &str, value: f64) -> &'static Expr {
    cell.get_or_init(|| Expr::new(name, Op::Constant(Tensor::scalar(value)), Vec::new()))
}

/// The canonical scalar `0`. Simplification keys off this exact instance.
pub fn zero() -> &'static Expr {
    static ZERO: OnceLock<Expr> = OnceLock::new();
    sentinel(&ZERO, "ZERO", 0.0)
}

/// The canonical scalar `1`. Simplification keys off this exact instance.
pub fn identity() -> &'static Expr {
    static IDENTITY: OnceLock<Expr> = OnceLock::new();
    sentinel(&IDENTITY, "IDENTITY", 1.0)
}

/// Shared scalar `2`, used by the square rule.
pub fn two() -> &'static Expr {
    static TWO: OnceLock<Expr> = OnceLock::new();
    sentinel(&TWO, "TWO", 2.0)
}
