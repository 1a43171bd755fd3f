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

use gradgraph::graph::factory::*;
use gradgraph::graph::{identity, two, zero, Op, Tensor};
use gradgraph::shapes::ShapeError;

#[test]
fn add_simplifies_only_the_zero_sentinel() {
    let x = create_variable("x", vec![2, 3]);
    assert!(create_add("a", zero(), &x).unwrap().ptr_eq(&x));
    assert!(create_add("b", &x, zero()).unwrap().ptr_eq(&x));
    let built = create_add("c", identity(), &x).unwrap();
    assert!(matches!(built.op(), Op::Add(..)));
    assert_eq!(built.shape(), &[2, 3]);
}

#[test]
fn multiply_simplifies_identity_and_zero() {
    let x = create_variable("x", vec![3]);
    assert!(create_multiply("a", identity(), &x).unwrap().ptr_eq(&x));
    assert!(create_multiply("b", &x, identity()).unwrap().ptr_eq(&x));
    assert!(create_multiply("c", zero(), &x).unwrap().ptr_eq(zero()));
    assert!(create_multiply("d", &x, zero()).unwrap().ptr_eq(zero()));
    assert!(matches!(
        create_multiply("e", two(), &x).unwrap().op(),
        Op::Multiply(..)
    ));
}

#[test]
fn simplification_runs_before_shape_checks() {
    // ZERO is a scalar, so it broadcasts anyway; identity of the returned
    // handle is what matters.
    let x = create_variable("x", vec![4]);
    let y = create_add("y", zero(), &x).unwrap();
    assert_eq!(y.id(), x.id());
}

#[test]
fn equal_valued_constants_are_not_sentinels() {
    let one = create_scalar("one", 1.0);
    let x = create_variable("x", vec![2]);
    let product = create_multiply("p", &one, &x).unwrap();
    assert!(!product.ptr_eq(&x));
    assert!(!one.is_identity());
    assert!(identity().is_identity());
}

#[test]
fn binary_ops_reject_incompatible_shapes() {
    let a = create_variable("a", vec![2, 3]);
    let b = create_variable("b", vec![3, 2]);
    for result in [
        create_add("add", &a, &b),
        create_subtract("sub", &a, &b),
        create_multiply("mul", &a, &b),
        create_divide("div", &a, &b),
        create_power("pow", &a, &b),
    ] {
        assert!(matches!(
            result,
            Err(ShapeError::BroadcastIncompatible { .. })
        ));
    }
}

#[test]
fn shapes_are_computed_at_construction() {
    let a = create_variable("a", vec![4, 1]);
    let b = create_variable("b", vec![3]);
    assert_eq!(create_add("s", &a, &b).unwrap().shape(), &[4, 3]);

    let m = create_variable("m", vec![3, 5]);
    let n = create_variable("n", vec![2, 5]);
    let mm = create_matmul("mm", &m, &n, false, true).unwrap();
    assert_eq!(mm.shape(), &[3, 2]);
    assert_eq!(mm.rank(), 2);

    let r = create_reduce_mean("r", &m, &[0], true).unwrap();
    assert_eq!(r.shape(), &[1, 5]);
    let r = create_reduce_sum("r", &m, &[1], false).unwrap();
    assert_eq!(r.shape(), &[3]);

    let sig = create_sigmoid("sig", &m);
    assert_eq!(sig.shape(), m.shape());
}

#[test]
fn reductions_validate_axes() {
    let m = create_variable("m", vec![3, 5]);
    assert_eq!(
        create_reduce_sum("r", &m, &[2], false).unwrap_err(),
        ShapeError::AxisOutOfRange { axis: 2, rank: 2 }
    );
    assert_eq!(
        create_reduce_mean("r", &m, &[1, 1], false).unwrap_err(),
        ShapeError::DuplicateAxis { axis: 1 }
    );
}

#[test]
fn matmul_validates_contraction() {
    let a = create_variable("a", vec![2, 3]);
    let b = create_variable("b", vec![2, 3]);
    assert!(create_matmul("bad", &a, &b, false, false).is_err());
    assert_eq!(
        create_matmul("ok", &a, &b, true, false).unwrap().shape(),
        &[3, 3]
    );
}

#[test]
fn tensors_check_element_count() {
    assert!(Tensor::new(vec![2, 2], vec![1.0; 3]).is_err());
    assert_eq!(Tensor::scalar(4.0).shape(), &[] as &[usize]);
}

#[test]
fn parameter_values_are_replaceable_but_shape_is_frozen() {
    let p = create_parameter("p", Tensor::filled(vec![2], 0.0));
    let Op::Parameter(value) = p.op() else {
        panic!("expected parameter");
    };
    value.set(Tensor::filled(vec![2], 3.0)).unwrap();
    assert_eq!(value.get().data(), &[3.0, 3.0]);
    assert!(value.set(Tensor::filled(vec![3], 1.0)).is_err());
    assert_eq!(p.shape(), &[2]);
}

#[test]
fn group_and_assign_shapes() {
    let p = create_parameter("p", Tensor::filled(vec![2, 2], 0.0));
    let v = create_variable("v", vec![2, 2]);
    let assign = create_assign("assign", &p, &v).unwrap();
    assert_eq!(assign.shape(), &[2, 2]);
    let group = create_group("group", &[assign.clone(), p.clone()]);
    assert_eq!(group.rank(), 0);
    assert_eq!(group.op().operands().len(), 2);
}
