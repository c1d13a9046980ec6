//! Sparse (CSC) ingest and splitting.

use canopy::config::TrainConfig;
use canopy::error::DataError;
use canopy::frame::FrameBuilder;
use canopy::predict::{predict_reg, TestFrame};
use canopy::train::train_reg;

#[test]
fn sparse_column_splits_on_implicit_block() {
    // Ten rows, one predictor: rows 2 and 7 carry 5.0 explicitly, every
    // other row is implicitly zero. With the response marking the explicit
    // rows, the root must place rows 2 and 7 in one child and the implicit
    // block in the other.
    let frame = FrameBuilder::new(10)
        .add_sparse_numeric(vec![2, 7], vec![5.0, 5.0])
        .build()
        .unwrap();
    let y: Vec<f64> = (0..10)
        .map(|row| if row == 2 || row == 7 { 100.0 } else { 1.0 })
        .collect();
    let config = TrainConfig {
        n_tree: 1,
        n_samp: 10,
        replace: false,
        min_node: 1,
        ..Default::default()
    };

    let trained = train_reg(&frame, y, None, &config).unwrap();
    let root = trained.forest.tree_nodes(0)[0];
    assert!(!root.is_leaf());
    // The cut separates zero from five.
    assert!(root.cut_value() > 0.0 && root.cut_value() < 5.0);

    let test = TestFrame::new(vec![vec![0.0, 5.0, 3.0]], Vec::new()).unwrap();
    let (y_pred, _) = predict_reg(&trained.forest, &test);
    assert_eq!(y_pred[0], 1.0);
    assert_eq!(y_pred[1], 100.0);
    // A value between the blocks follows the cut placement.
    let expected = if 3.0 <= root.cut_value() { 1.0 } else { 100.0 };
    assert_eq!(y_pred[2], expected);
}

#[test]
fn csc_ingest_matches_dense_equivalent() {
    // The same column expressed densely and as CSC entries must train the
    // same single tree.
    let dense_vals = vec![0.0, 3.0, 0.0, 0.0, 7.0, 0.0, 3.0, 0.0];
    let y: Vec<f64> = dense_vals.iter().map(|v| v * 2.0 + 1.0).collect();
    let config = TrainConfig {
        n_tree: 1,
        n_samp: 8,
        replace: false,
        min_node: 1,
        seed: 11,
        ..Default::default()
    };

    let dense = FrameBuilder::new(8)
        .auto_compress(0.5)
        .add_numeric(dense_vals)
        .build()
        .unwrap();
    let sparse = FrameBuilder::new(8)
        .add_csc(&[0, 3], &[1, 4, 6], &[3.0, 7.0, 3.0])
        .build()
        .unwrap();

    let from_dense = train_reg(&dense, y.clone(), None, &config).unwrap();
    let from_sparse = train_reg(&sparse, y, None, &config).unwrap();
    assert_eq!(from_dense.forest, from_sparse.forest);
}

#[test]
fn malformed_csc_rejected_without_panic() {
    // Non-monotone column pointers: the builder defers the error into
    // build's result rather than slicing out of order.
    let err = FrameBuilder::new(8)
        .add_csc(&[0, 5, 2], &[1, 2, 3, 4, 5], &[1.0, 2.0, 3.0, 4.0, 5.0])
        .build()
        .unwrap_err();
    assert!(matches!(err, DataError::SparseColumn { .. }));

    // A final pointer past the entry count is equally malformed.
    let err = FrameBuilder::new(8)
        .add_csc(&[0, 9], &[1, 4, 6], &[3.0, 7.0, 3.0])
        .build()
        .unwrap_err();
    assert!(matches!(err, DataError::SparseColumn { .. }));
}

#[test]
fn deep_sparse_training_restages_dense_runs() {
    // A sparse predictor alongside a dense one, trained deep enough that
    // implicit runs restage through several levels.
    let n = 64;
    let rows: Vec<u32> = (0..n as u32).filter(|r| r % 5 == 0).collect();
    let values: Vec<f64> = rows.iter().map(|&r| f64::from(r % 7 + 1)).collect();
    let frame = FrameBuilder::new(n)
        .add_sparse_numeric(rows, values)
        .add_numeric((0..n).map(|i| ((i * 23) % n) as f64).collect())
        .build()
        .unwrap();
    let y: Vec<f64> = (0..n).map(|i| ((i * 13) % 17) as f64).collect();
    let config = TrainConfig {
        n_tree: 4,
        min_node: 2,
        seed: 29,
        ..Default::default()
    };

    let trained = train_reg(&frame, y, None, &config).unwrap();
    assert_eq!(trained.forest.n_tree(), 4);

    // Every leaf is reachable and scores are finite.
    for tree_idx in 0..4 {
        for (node, score) in trained
            .forest
            .tree_nodes(tree_idx)
            .iter()
            .zip(trained.forest.tree_scores(tree_idx))
        {
            if node.is_leaf() {
                assert!(score.is_finite());
            }
        }
    }
}
