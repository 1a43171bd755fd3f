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

//! Reverse-mode automatic differentiation over expression graphs.
//!
//! The entry point is [`backward`], which walks the graph from an output node
//! toward its inputs and records, for every node it reaches, the gradient
//! expression contributed by each consuming edge. Gradients are themselves
//! expression nodes built through the graph factory, so zero and identity
//! simplification happens as they are constructed.
//!
//! Contributions are kept in a [`GradientTable`] owned by the caller rather
//! than on the nodes, so the same graph can be differentiated repeatedly (or
//! from several outputs) without stale entries leaking between passes. Summing
//! the contributions of a node is left to [`GradientTable::total_gradient`].

mod engine;
mod rules;
mod table;

pub use engine::{
    backward, backward_into, backward_with_options, AutodiffError, GradientOptions, MeanGradient,
};
pub use rules::ReverseGradient;
pub use table::{Contribution, GradientTable};
