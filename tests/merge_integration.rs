//! Session Merge Integration Tests
//!
//! Drives `SessionMerger` over real `.npz` files in a temporary directory:
//! discovery order, skip handling, row alignment across keys and the
//! fatal column-mismatch path.

use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::{Path, PathBuf};

use trajprep::merge::{FileStatus, MergeError, MergeOutcome, SessionMerger};
use trajprep::store::{self, DatasetReader};

const KEYS: [&str; 3] = ["x_current", "x_ref", "u_opt"];

fn keys() -> Vec<String> {
    KEYS.iter().map(|k| k.to_string()).collect()
}

fn random_array(rng: &mut StdRng, rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |_| rng.gen_range(-10.0..10.0))
}

/// Write a session with the standard key set. `ref_cols` lets tests break
/// column agreement on purpose.
fn write_session(dir: &Path, name: &str, rng: &mut StdRng, rows: usize, ref_cols: usize) -> PathBuf {
    let path = dir.join(name);
    let arrays = vec![
        ("x_current".to_string(), random_array(rng, rows, 12)),
        ("x_ref".to_string(), random_array(rng, rows, ref_cols)),
        ("u_opt".to_string(), random_array(rng, rows, 4)),
    ];
    store::write_arrays(&path, &arrays).expect("write session");
    path
}

fn expect_written(outcome: MergeOutcome) -> trajprep::merge::MergeSummary {
    match outcome {
        MergeOutcome::Written(summary) => summary,
        MergeOutcome::NothingToMerge { .. } => panic!("expected a written merge"),
    }
}

// ============================================================================
// Happy path
// ============================================================================

#[test]
fn merged_rows_equal_sum_of_sessions_in_path_order() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(7);
    // Written out of order on purpose.
    let b = write_session(dir.path(), "data_ins_b.npz", &mut rng, 5, 24);
    let a = write_session(dir.path(), "data_ins_a.npz", &mut rng, 3, 24);
    let c = write_session(dir.path(), "data_ins_c.npz", &mut rng, 2, 24);
    std::fs::write(dir.path().join("notes.txt"), "not a session").expect("write");

    let output = dir.path().join("out").join("merged_rows.npz");
    let merger = SessionMerger::new(keys());
    let summary = expect_written(
        merger
            .merge_directory(dir.path(), "data_ins_", ".npz", &output)
            .expect("merge"),
    );

    assert_eq!(summary.files.len(), 3);
    assert_eq!(summary.skipped().count(), 0);
    let offsets: Vec<(PathBuf, usize, usize)> = summary
        .sources
        .iter()
        .map(|s| (s.path.clone(), s.offset, s.rows))
        .collect();
    assert_eq!(offsets, vec![(a.clone(), 0, 3), (b.clone(), 3, 5), (c.clone(), 8, 2)]);

    let mut reader = DatasetReader::open(&output).expect("open merged");
    for key in KEYS {
        let merged = reader.read(key).expect("read merged");
        assert_eq!(merged.nrows(), 10, "{key}");

        // Every source row lands at offset + i.
        for span in &summary.sources {
            let source = store::read_array(&span.path, key).expect("read source");
            for i in 0..span.rows {
                assert_eq!(merged.row(span.offset + i), source.row(i), "{key} row {i}");
            }
        }
    }
}

#[test]
fn merge_is_idempotent() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(11);
    write_session(dir.path(), "data_ins_0.npz", &mut rng, 4, 24);
    write_session(dir.path(), "data_ins_1.npz", &mut rng, 6, 24);

    let first = dir.path().join("first.npz");
    let second = dir.path().join("second.npz");
    let merger = SessionMerger::new(keys());
    merger.merge_directory(dir.path(), "data_ins_", ".npz", &first).expect("merge 1");
    merger.merge_directory(dir.path(), "data_ins_", ".npz", &second).expect("merge 2");

    for key in KEYS {
        assert_eq!(
            store::read_array(&first, key).expect("first"),
            store::read_array(&second, key).expect("second"),
            "{key}"
        );
    }
}

#[test]
fn parallel_reads_match_sequential() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(23);
    for i in 0..6 {
        write_session(dir.path(), &format!("data_ins_{i:02}.npz"), &mut rng, i + 1, 24);
    }

    let sequential = dir.path().join("sequential.npz");
    let parallel = dir.path().join("parallel.npz");
    let merger = SessionMerger::new(keys());
    let seq = expect_written(
        merger
            .merge_directory(dir.path(), "data_ins_", ".npz", &sequential)
            .expect("sequential"),
    );
    let par = expect_written(
        merger
            .clone()
            .with_parallel_reads(true)
            .merge_directory(dir.path(), "data_ins_", ".npz", &parallel)
            .expect("parallel"),
    );

    assert_eq!(seq.sources, par.sources);
    for key in KEYS {
        assert_eq!(
            store::read_array(&sequential, key).expect("seq"),
            store::read_array(&parallel, key).expect("par"),
        );
    }
}

// ============================================================================
// Skips
// ============================================================================

#[test]
fn session_missing_a_key_is_skipped_whole() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(3);
    write_session(dir.path(), "data_ins_0.npz", &mut rng, 4, 24);
    let partial = dir.path().join("data_ins_1.npz");
    store::write_arrays(
        &partial,
        &[
            ("x_current".to_string(), random_array(&mut rng, 9, 12)),
            ("x_ref".to_string(), random_array(&mut rng, 9, 24)),
        ],
    )
    .expect("write partial");

    let output = dir.path().join("merged.npz");
    let summary = expect_written(
        SessionMerger::new(keys())
            .merge_directory(dir.path(), "data_ins_", ".npz", &output)
            .expect("merge"),
    );

    let skipped: Vec<_> = summary.skipped().collect();
    assert_eq!(skipped.len(), 1);
    assert_eq!(skipped[0].path, partial);
    match &skipped[0].status {
        FileStatus::Skipped { reason } => assert!(reason.contains("u_opt"), "{reason}"),
        other => panic!("expected skip, got {other:?}"),
    }

    // No key picked up the partial session's 9 rows.
    for key in KEYS {
        assert_eq!(store::read_array(&output, key).expect("read").nrows(), 4, "{key}");
    }
}

#[test]
fn corrupt_session_is_skipped() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(5);
    write_session(dir.path(), "data_ins_a.npz", &mut rng, 2, 24);
    std::fs::write(dir.path().join("data_ins_b.npz"), b"definitely not a zip").expect("write");
    write_session(dir.path(), "data_ins_c.npz", &mut rng, 3, 24);

    let output = dir.path().join("merged.npz");
    let summary = expect_written(
        SessionMerger::new(keys())
            .merge_directory(dir.path(), "data_ins_", ".npz", &output)
            .expect("merge"),
    );

    assert_eq!(summary.skipped().count(), 1);
    assert_eq!(summary.sources.len(), 2);
    assert_eq!(store::read_array(&output, "u_opt").expect("read").nrows(), 5);
}

// ============================================================================
// No-op and fatal paths
// ============================================================================

#[test]
fn empty_file_list_is_nothing_to_merge() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let output = dir.path().join("merged.npz");

    let outcome = SessionMerger::new(keys()).merge(&[], &output).expect("merge");
    assert!(matches!(outcome, MergeOutcome::NothingToMerge { ref files } if files.is_empty()));
    assert!(!output.exists());
}

#[test]
fn all_sessions_skipped_is_nothing_to_merge() {
    let dir = tempfile::tempdir().expect("tmpdir");
    std::fs::write(dir.path().join("data_ins_0.npz"), b"garbage").expect("write");

    let output = dir.path().join("merged.npz");
    let outcome = SessionMerger::new(keys())
        .merge_directory(dir.path(), "data_ins_", ".npz", &output)
        .expect("merge");
    match outcome {
        MergeOutcome::NothingToMerge { files } => assert_eq!(files.len(), 1),
        MergeOutcome::Written(_) => panic!("nothing should have been written"),
    }
    assert!(!output.exists());
}

#[test]
fn column_mismatch_aborts_without_output() {
    let dir = tempfile::tempdir().expect("tmpdir");
    let mut rng = StdRng::seed_from_u64(13);
    write_session(dir.path(), "data_ins_0.npz", &mut rng, 3, 24);
    write_session(dir.path(), "data_ins_1.npz", &mut rng, 3, 36);

    let output = dir.path().join("merged.npz");
    let err = SessionMerger::new(keys())
        .merge_directory(dir.path(), "data_ins_", ".npz", &output)
        .unwrap_err();

    match err {
        MergeError::ShapeMismatch { key, expected, found, .. } => {
            assert_eq!(key, "x_ref");
            assert_eq!((expected, found), (24, 36));
        }
        other => panic!("expected shape mismatch, got {other:?}"),
    }
    assert!(!output.exists());
    assert!(!dir.path().join("merged.npz.tmp").exists());
}
