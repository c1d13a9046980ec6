//! Forest serialization laws.

use canopy::config::TrainConfig;
use canopy::forest::Forest;
use canopy::frame::FrameBuilder;
use canopy::predict::{predict_ctg, predict_reg, TestFrame};
use canopy::train::{train_ctg, train_reg};

fn mixed_frame(n: usize) -> canopy::frame::PredictorFrame {
    FrameBuilder::new(n)
        .add_numeric((0..n).map(|i| ((i * 19) % n) as f64).collect())
        .add_numeric((0..n).map(|i| ((i * 7) % 31) as f64).collect())
        .add_factor((0..n).map(|i| (i % 5) as u32).collect(), 5)
        .build()
        .unwrap()
}

fn mixed_test(n: usize) -> TestFrame {
    TestFrame::new(
        vec![
            (0..n).map(|i| ((i * 19) % n) as f64).collect(),
            (0..n).map(|i| ((i * 7) % 31) as f64).collect(),
        ],
        vec![(0..n).map(|i| (i % 5) as u32).collect()],
    )
    .unwrap()
}

#[test]
fn round_trip_preserves_regression_predictions() {
    let n = 80;
    let frame = mixed_frame(n);
    let y: Vec<f64> = (0..n).map(|i| ((i * 3) % 13) as f64).collect();
    let config = TrainConfig {
        n_tree: 10,
        min_node: 2,
        seed: 71,
        ..Default::default()
    };

    let trained = train_reg(&frame, y, None, &config).unwrap();

    let mut bytes = Vec::new();
    trained.forest.encode(&mut bytes).unwrap();
    let decoded = Forest::decode(&mut bytes.as_slice()).unwrap();
    assert_eq!(trained.forest, decoded);

    let test = mixed_test(n);
    let (before, _) = predict_reg(&trained.forest, &test);
    let (after, _) = predict_reg(&decoded, &test);
    assert_eq!(before, after);
}

#[test]
fn round_trip_preserves_classification_predictions() {
    let n = 60;
    let frame = mixed_frame(n);
    let y_ctg: Vec<u32> = (0..n).map(|i| ((i * 11) % 3) as u32).collect();
    let config = TrainConfig {
        n_tree: 8,
        min_node: 2,
        seed: 5,
        ..Default::default()
    };

    let trained = train_ctg(&frame, y_ctg, 3, None, None, &config).unwrap();

    let mut bytes = Vec::new();
    trained.forest.encode(&mut bytes).unwrap();
    let decoded = Forest::decode(&mut bytes.as_slice()).unwrap();

    let test = mixed_test(n);
    let (before, census_before, _) = predict_ctg(&trained.forest, 3, &test);
    let (after, census_after, _) = predict_ctg(&decoded, 3, &test);
    assert_eq!(before, after);
    assert_eq!(census_before, census_after);
}

#[test]
fn leaf_merge_bounds_trained_leaves() {
    // A deep tree merged down to ten leaves: the budget binds exactly and
    // predictions still traverse cleanly.
    let n = 128;
    let frame = FrameBuilder::new(n)
        .add_numeric((0..n).map(|i| i as f64).collect())
        .build()
        .unwrap();
    let y: Vec<f64> = (0..n).map(|i| ((i * 37) % n) as f64).collect();

    let unmerged = train_reg(
        &frame,
        y.clone(),
        None,
        &TrainConfig {
            n_tree: 1,
            min_node: 1,
            seed: 9,
            ..Default::default()
        },
    )
    .unwrap();
    let full_leaves = unmerged
        .forest
        .tree_nodes(0)
        .iter()
        .filter(|node| node.is_leaf())
        .count();
    assert!(full_leaves > 10);

    let merged = train_reg(
        &frame,
        y,
        None,
        &TrainConfig {
            n_tree: 1,
            min_node: 1,
            leaf_max: 10,
            seed: 9,
            ..Default::default()
        },
    )
    .unwrap();
    let merged_leaves = merged
        .forest
        .tree_nodes(0)
        .iter()
        .filter(|node| node.is_leaf())
        .count();
    assert_eq!(merged_leaves, 10);

    let test = TestFrame::new(vec![(0..n).map(|i| i as f64).collect()], Vec::new()).unwrap();
    let (y_pred, _) = predict_reg(&merged.forest, &test);
    assert!(y_pred.iter().all(|p| p.is_finite()));
}

#[test]
fn leaf_merge_noop_at_bag_count() {
    // A leaf budget at the bag count can never bind.
    let n = 32;
    let frame = FrameBuilder::new(n)
        .add_numeric((0..n).map(|i| i as f64).collect())
        .build()
        .unwrap();
    let y: Vec<f64> = (0..n).map(|i| ((i * 5) % 11) as f64).collect();

    let unbounded = TrainConfig {
        n_tree: 2,
        min_node: 1,
        seed: 21,
        ..Default::default()
    };
    let bounded = TrainConfig {
        leaf_max: n,
        ..unbounded.clone()
    };

    let a = train_reg(&frame, y.clone(), None, &unbounded).unwrap();
    let b = train_reg(&frame, y, None, &bounded).unwrap();
    assert_eq!(a.forest, b.forest);
}
