//! Property-based tests for the reference kernels.

use proptest::prelude::*;
use refgraph_core::shape::{default_order, shape_size};
use refgraph_core::AxisSet;
use refgraph_kernels::{linalg, movement, reduction};

fn shape_and_values() -> impl Strategy<Value = (Vec<usize>, Vec<i64>)> {
    prop::collection::vec(1usize..5, 1..4).prop_flat_map(|shape| {
        let size = shape_size(&shape);
        (Just(shape), prop::collection::vec(-100i64..100, size))
    })
}

proptest! {
    #[test]
    fn test_reduction_over_no_axes_is_identity((shape, values) in shape_and_values()) {
        let mut out = vec![0i64; values.len()];
        reduction::sum(&values, &mut out, &shape, &AxisSet::new()).unwrap();
        prop_assert_eq!(&out, &values);
        reduction::max(&values, &mut out, &shape, &AxisSet::new()).unwrap();
        prop_assert_eq!(out, values);
    }

    #[test]
    fn test_total_sum_over_all_axes((shape, values) in shape_and_values()) {
        let axes: AxisSet = (0..shape.len()).collect();
        let mut out = [0i64];
        reduction::sum(&values, &mut out, &shape, &axes).unwrap();
        prop_assert_eq!(out[0], values.iter().sum::<i64>());
    }

    #[test]
    fn test_partial_sums_add_up((shape, values) in shape_and_values()) {
        // Reducing axis 0 first and then the rest equals the total.
        let first: AxisSet = [0].into_iter().collect();
        let mut partial = vec![0i64; shape_size(&shape[1..])];
        reduction::sum(&values, &mut partial, &shape, &first).unwrap();
        prop_assert_eq!(partial.iter().sum::<i64>(), values.iter().sum::<i64>());
    }

    #[test]
    fn test_double_transpose_is_identity((shape, values) in shape_and_values()) {
        let reversed: Vec<usize> = default_order(shape.len()).into_iter().rev().collect();
        let transposed_shape = movement::permuted_shape(&shape, &reversed);
        let mut once = vec![0i64; values.len()];
        movement::reshape(&values, &mut once, &shape, &reversed).unwrap();
        let mut twice = vec![0i64; values.len()];
        movement::reshape(&once, &mut twice, &transposed_shape, &reversed).unwrap();
        prop_assert_eq!(twice, values);
    }

    #[test]
    fn test_matmul_agrees_with_dot(
        m in 1usize..5,
        k in 1usize..5,
        n in 1usize..5,
        seed in prop::collection::vec(-10i64..10, 50)
    ) {
        let a: Vec<i64> = seed.iter().cycle().take(m * k).copied().collect();
        let b: Vec<i64> = seed.iter().rev().cycle().take(k * n).copied().collect();
        let mut via_dot = vec![0i64; m * n];
        let mut via_matmul = vec![0i64; m * n];
        linalg::dot(&a, &b, &mut via_dot, &[m, k], &[k, n], 1).unwrap();
        linalg::matmul(&a, &b, &mut via_matmul, &[m, k], &[k, n], false, false).unwrap();
        prop_assert_eq!(via_dot, via_matmul);
    }
}
