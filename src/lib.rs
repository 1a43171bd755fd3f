//! Symbolic tensor expression graphs with reverse-mode automatic
//! differentiation.
//!
//! Graphs are built with the constructors in [`graph::factory`], which check
//! shapes and fold additive zeros and multiplicative identities as nodes are
//! created. [`autodiff::backward`] walks a graph from an output node and
//! returns a [`GradientTable`] holding, for each upstream node, the gradient
//! expression contributed by every consuming edge.
//!
//! ```
//! use gradgraph::graph::factory::{create_add, create_multiply, create_parameter};
//! use gradgraph::graph::Tensor;
//!
//! let x = create_parameter("x", Tensor::filled(vec![2, 3], 1.0));
//! let y = create_parameter("y", Tensor::filled(vec![2, 3], 2.0));
//! let xy = create_multiply("xy", &x, &y).unwrap();
//! let z = create_add("z", &xy, &x).unwrap();
//!
//! let table = gradgraph::backward(&z).unwrap();
//! assert_eq!(table.contributions(&x).len(), 2);
//! assert_eq!(table.total_gradient(&x).unwrap().shape(), &[2, 3]);
//! ```

pub mod autodiff;
pub mod config;
pub mod graph;
pub mod shapes;
pub mod visit;

pub use autodiff::{backward, backward_with_options, AutodiffError, GradientOptions, GradientTable};
pub use graph::{Expr, NodeId, Op, Tensor};
pub use shapes::ShapeError;
