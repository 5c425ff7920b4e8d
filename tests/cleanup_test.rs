//! Cleanup-loop scenarios over fabricated WAL layouts.

use std::fs;
use std::path::Path;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use walship::cleanup::{CleanupConfig, CleanupRunner};
use walship::domain::PersistedState;
use walship::state::StateStore;

/// Writes a segment pair of `size` payload bytes plus a small sidecar.
fn write_sized_segment(dir: &Path, number: u32, size: usize) {
    fs::write(
        dir.join(format!("seg-{number:06}.wal.gz")),
        vec![0u8; size],
    )
    .unwrap();
    fs::write(
        dir.join(format!("seg-{number:06}.wal.idx")),
        vec![b'x'; 10],
    )
    .unwrap();
}

fn runner(wal: &Path, state: &Path, high: u64, low: u64) -> CleanupRunner {
    CleanupRunner::new(
        CleanupConfig {
            interval: Duration::from_secs(3600),
            high_watermark: high,
            low_watermark: low,
        },
        wal,
        StateStore::new(state),
    )
}

#[test]
fn active_day_and_newer_are_protected() {
    let wal = TempDir::new().unwrap();
    for day in ["2025-12-05", "2025-12-06", "2025-12-07"] {
        let dir = wal.path().join(day);
        fs::create_dir_all(&dir).unwrap();
        write_sized_segment(&dir, 1, 100);
        write_sized_segment(&dir, 2, 100);
    }

    let active_idx = wal.path().join("2025-12-06").join("seg-000001.wal.idx");
    let store = StateStore::new(wal.path());
    store
        .save(&PersistedState {
            idx_path: active_idx.to_string_lossy().into_owned(),
            ..Default::default()
        })
        .unwrap();

    // Well above the high watermark; low watermark of zero asks the pass
    // to delete everything it is allowed to.
    let runner = runner(wal.path(), wal.path(), 100, 0);
    let freed = runner.run_once(&CancellationToken::new()).unwrap();

    assert!(freed > 0);
    assert!(!wal.path().join("2025-12-05/seg-000001.wal.gz").exists());
    assert!(!wal.path().join("2025-12-05/seg-000002.wal.gz").exists());
    assert!(wal.path().join("2025-12-06/seg-000001.wal.gz").exists());
    assert!(wal.path().join("2025-12-06/seg-000002.wal.gz").exists());
    assert!(wal.path().join("2025-12-07/seg-000001.wal.gz").exists());
}

#[test]
fn day_less_layout_trims_oldest_top_level_segments() {
    let wal = TempDir::new().unwrap();
    for number in 1..=3 {
        write_sized_segment(wal.path(), number, 100);
    }

    // Totals: 330 bytes. Trim until at or below 140: segments 1 and 2 go.
    let runner = runner(wal.path(), wal.path(), 150, 140);
    runner.run_once(&CancellationToken::new()).unwrap();

    assert!(!wal.path().join("seg-000001.wal.gz").exists());
    assert!(!wal.path().join("seg-000001.wal.idx").exists());
    assert!(!wal.path().join("seg-000002.wal.gz").exists());
    assert!(wal.path().join("seg-000003.wal.gz").exists());
}

#[test]
fn under_the_high_watermark_nothing_is_touched() {
    let wal = TempDir::new().unwrap();
    write_sized_segment(wal.path(), 1, 100);

    let runner = runner(wal.path(), wal.path(), 1 << 20, 1 << 19);
    let freed = runner.run_once(&CancellationToken::new()).unwrap();

    assert_eq!(freed, 0);
    assert!(wal.path().join("seg-000001.wal.gz").exists());
}

#[test]
fn sidecar_is_removed_with_its_blob() {
    let wal = TempDir::new().unwrap();
    write_sized_segment(wal.path(), 1, 100);

    let runner = runner(wal.path(), wal.path(), 50, 0);
    runner.run_once(&CancellationToken::new()).unwrap();

    assert!(!wal.path().join("seg-000001.wal.gz").exists());
    assert!(!wal.path().join("seg-000001.wal.idx").exists());
}

#[test]
fn cancellation_aborts_the_pass() {
    let wal = TempDir::new().unwrap();
    for number in 1..=3 {
        write_sized_segment(wal.path(), number, 100);
    }

    let cancel = CancellationToken::new();
    cancel.cancel();

    let runner = runner(wal.path(), wal.path(), 100, 0);
    let freed = runner.run_once(&cancel).unwrap();

    assert_eq!(freed, 0);
    assert!(wal.path().join("seg-000001.wal.gz").exists());
}

#[test]
fn missing_state_file_protects_nothing() {
    let wal = TempDir::new().unwrap();
    let day = wal.path().join("2025-12-05");
    fs::create_dir_all(&day).unwrap();
    write_sized_segment(&day, 1, 100);

    let state_dir = TempDir::new().unwrap();
    let runner = runner(wal.path(), state_dir.path(), 50, 0);
    runner.run_once(&CancellationToken::new()).unwrap();

    assert!(!day.join("seg-000001.wal.gz").exists());
}
