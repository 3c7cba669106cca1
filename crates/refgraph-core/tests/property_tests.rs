//! Property-based tests for shapes, broadcasting and slice plans.
//!
//! This module uses proptest to validate invariants that should hold for
//! every input the interpreter can feed these helpers.

use proptest::prelude::*;
use refgraph_core::shape::{
    broadcast_shape, coordinate_of, offset, row_major_strides, shape_size, CoordinateIter,
};
use refgraph_core::slice_plan::make_slice_plan;
use refgraph_core::{AutoBroadcast, SliceMasks};

// Strategy for generating valid tensor shapes
fn tensor_shape_strategy() -> impl Strategy<Value = Vec<usize>> {
    prop::collection::vec(1usize..6, 1..4)
}

proptest! {
    #[test]
    fn test_coordinate_iteration_visits_every_offset(shape in tensor_shape_strategy()) {
        let strides = row_major_strides(&shape);
        let offsets: Vec<usize> = CoordinateIter::new(&shape)
            .map(|c| offset(&c, &strides))
            .collect();
        prop_assert_eq!(offsets.len(), shape_size(&shape));
        for (expected, actual) in offsets.iter().enumerate() {
            prop_assert_eq!(expected, *actual);
            prop_assert_eq!(coordinate_of(expected, &shape), coordinate_of(*actual, &shape));
        }
    }

    #[test]
    fn test_broadcast_is_symmetric(
        shape in tensor_shape_strategy(),
        mask in prop::collection::vec(any::<bool>(), 3)
    ) {
        // Collapse some axes to one so the shapes always broadcast.
        let other: Vec<usize> = shape
            .iter()
            .zip(mask.iter().cycle())
            .map(|(&d, &keep)| if keep { d } else { 1 })
            .collect();
        let ab = broadcast_shape(&shape, &other, AutoBroadcast::Numpy).unwrap();
        let ba = broadcast_shape(&other, &shape, AutoBroadcast::Numpy).unwrap();
        prop_assert_eq!(&ab, &ba);
        prop_assert_eq!(ab, shape);
    }

    #[test]
    fn test_unit_stride_plan_matches_clipped_range(
        dim in 1usize..12,
        begin in -15i64..15,
        end in -15i64..15
    ) {
        let plan = make_slice_plan(&[dim], &[begin], &[end], &[], &SliceMasks::default()).unwrap();
        let clip = |v: i64| {
            let v = if v < 0 { v + dim as i64 } else { v };
            v.clamp(0, dim as i64) as usize
        };
        let expected = clip(end).saturating_sub(clip(begin));
        prop_assert_eq!(plan.reshape_out_shape, vec![expected]);
        prop_assert!(plan.reverse_axes.is_empty());
    }

    #[test]
    fn test_negative_stride_plan_stays_in_bounds(
        dim in 1usize..12,
        begin in -15i64..15,
        end in -15i64..15,
        stride in 1i64..4
    ) {
        let plan = make_slice_plan(&[dim], &[begin], &[end], &[-stride], &SliceMasks::default())
            .unwrap();
        prop_assert!(plan.ends[0] <= dim);
        prop_assert!(plan.begins[0] <= plan.ends[0]);
        let count = plan.reshape_out_shape[0];
        prop_assert_eq!(count, plan.reshape_in_shape[0]);
        if count > 0 {
            prop_assert!(plan.reverse_axes.contains(&0));
            prop_assert_eq!(plan.strides[0], stride as usize);
        }
    }
}
