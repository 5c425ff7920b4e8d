//! Disk-bounded trimming of old WAL segments.
//!
//! A periodic pass sums the WAL directory, and when it exceeds the high
//! watermark deletes the oldest segments until the directory shrinks
//! below the low watermark. The day currently being shipped (read from
//! the on-disk state file, never from in-memory state) and every newer
//! day are protected.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::reader::discover::{day_directories, is_day_dir, segment_number};
use crate::state::StateStore;

pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(72 * 3600);
pub const DEFAULT_HIGH_WATERMARK: u64 = 2 << 30; // 2 GiB
pub const DEFAULT_LOW_WATERMARK: u64 = 3 << 29; // 1.5 GiB

#[derive(Debug, Clone)]
pub struct CleanupConfig {
    pub interval: Duration,
    /// Total WAL size that starts a trimming pass.
    pub high_watermark: u64,
    /// Target size a pass trims down to.
    pub low_watermark: u64,
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_CLEANUP_INTERVAL,
            high_watermark: DEFAULT_HIGH_WATERMARK,
            low_watermark: DEFAULT_LOW_WATERMARK,
        }
    }
}

#[derive(Error, Debug)]
pub enum CleanupError {
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// One removable segment: the blob, its optional sidecar, and their
/// sizes at scan time.
#[derive(Debug)]
struct Segment {
    gz_path: PathBuf,
    gz_size: u64,
    idx_path: Option<PathBuf>,
    idx_size: u64,
}

pub struct CleanupRunner {
    config: CleanupConfig,
    wal_dir: PathBuf,
    state_store: StateStore,
}

impl CleanupRunner {
    pub fn new(config: CleanupConfig, wal_dir: impl Into<PathBuf>, state_store: StateStore) -> Self {
        Self {
            config,
            wal_dir: wal_dir.into(),
            state_store,
        }
    }

    /// Runs the cleanup ticker until cancellation. The first pass runs
    /// immediately.
    pub async fn run(self, cancel: CancellationToken) {
        self.pass(&cancel);

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.pass(&cancel),
            }
        }
    }

    fn pass(&self, cancel: &CancellationToken) {
        match self.run_once(cancel) {
            Ok(0) => {}
            Ok(freed) => debug!(freed, "cleanup pass done"),
            Err(err) => error!(error = %err, "cleanup pass failed"),
        }
    }

    /// Executes one trimming pass and returns the bytes freed. Listing
    /// or size-query failures abort the pass; per-segment removal
    /// failures are logged and skipped.
    pub fn run_once(&self, cancel: &CancellationToken) -> Result<u64, CleanupError> {
        let mut total = dir_size(&self.wal_dir)?;
        if total <= self.config.high_watermark {
            return Ok(0);
        }

        let protected_day = self.active_day();
        if let Some(day) = &protected_day {
            debug!(day = %day, "cleanup: protecting active day and newer");
        }

        let segments = self.removable_segments(protected_day.as_deref())?;
        let mut freed = 0u64;

        for segment in segments {
            if cancel.is_cancelled() {
                break;
            }
            if total <= self.config.low_watermark {
                break;
            }
            match remove_segment(&segment) {
                Ok(bytes) => {
                    total = total.saturating_sub(bytes);
                    freed += bytes;
                }
                Err(err) => {
                    error!(
                        segment = %segment.gz_path.display(),
                        error = %err,
                        "cleanup: segment removal failed"
                    );
                }
            }
        }

        if freed > 0 {
            info!(
                freed = %format_bytes(freed),
                remaining = %format_bytes(total),
                "wal cleanup completed"
            );
        }
        Ok(freed)
    }

    /// The day directory currently being shipped, discovered through
    /// the persisted state file. A stale snapshot is safe: the check is
    /// conservative and only ever protects more.
    fn active_day(&self) -> Option<String> {
        let state = self.state_store.load().ok()?;
        if state.idx_path.is_empty() {
            return None;
        }
        let day = Path::new(&state.idx_path)
            .parent()?
            .file_name()?
            .to_str()?
            .to_string();
        is_day_dir(&day).then_some(day)
    }

    /// Candidates in deletion order: top-level segments first (by
    /// number), then each day directory strictly older than the
    /// protected day (oldest day first, numeric order within).
    fn removable_segments(&self, protected_day: Option<&str>) -> Result<Vec<Segment>, CleanupError> {
        let mut segments = scan_segment_dir(&self.wal_dir)?;

        for day in day_directories(&self.wal_dir).map_err(io_from_read)? {
            if let Some(protected) = protected_day
                && day.as_str() >= protected
            {
                continue;
            }
            segments.extend(scan_segment_dir(&self.wal_dir.join(day))?);
        }

        Ok(segments)
    }
}

fn io_from_read(err: crate::reader::ReadError) -> CleanupError {
    match err {
        crate::reader::ReadError::Io(io_err) => CleanupError::Io(io_err),
        other => CleanupError::Io(io::Error::other(other)),
    }
}

/// Collects complete segments (a `.wal.gz` with an optional `.wal.idx`)
/// directly inside `dir`, ordered by segment number. Anything not
/// matching the strict naming pattern is ignored.
fn scan_segment_dir(dir: &Path) -> Result<Vec<Segment>, CleanupError> {
    let mut by_number: BTreeMap<u32, Segment> = BTreeMap::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let size = entry.metadata()?.len();

        if let Some(number) = segment_number(&name, ".wal.gz") {
            let segment = by_number.entry(number).or_insert_with(|| Segment {
                gz_path: PathBuf::new(),
                gz_size: 0,
                idx_path: None,
                idx_size: 0,
            });
            segment.gz_path = dir.join(&name);
            segment.gz_size = size;
        } else if let Some(number) = segment_number(&name, ".wal.idx") {
            let segment = by_number.entry(number).or_insert_with(|| Segment {
                gz_path: PathBuf::new(),
                gz_size: 0,
                idx_path: None,
                idx_size: 0,
            });
            segment.idx_path = Some(dir.join(&name));
            segment.idx_size = size;
        }
    }

    // Only segments with a blob are removable; an orphan idx frees
    // nothing worth tracking.
    Ok(by_number
        .into_values()
        .filter(|segment| !segment.gz_path.as_os_str().is_empty())
        .collect())
}

/// Deletes the blob, then the sidecar (missing sidecar tolerated).
/// Returns the bytes freed.
fn remove_segment(segment: &Segment) -> io::Result<u64> {
    fs::remove_file(&segment.gz_path)?;
    let mut freed = segment.gz_size;

    if let Some(idx_path) = &segment.idx_path {
        match fs::remove_file(idx_path) {
            Ok(()) => freed += segment.idx_size,
            Err(err) if err.kind() == io::ErrorKind::NotFound => freed += segment.idx_size,
            Err(err) => return Err(err),
        }
    }
    Ok(freed)
}

/// Recursive byte total of every file under `root`.
fn dir_size(root: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            total += dir_size(&entry.path())?;
        } else if file_type.is_file() {
            total += entry.metadata()?.len();
        }
    }
    Ok(total)
}

fn format_bytes(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;
    const GIB: f64 = MIB * 1024.0;

    let value = bytes as f64;
    if value >= GIB {
        format!("{:.2}GiB", value / GIB)
    } else if value >= MIB {
        format!("{:.2}MiB", value / MIB)
    } else if value >= KIB {
        format!("{:.2}KiB", value / KIB)
    } else {
        format!("{bytes}B")
    }
}
