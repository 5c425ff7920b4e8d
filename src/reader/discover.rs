//! Discovery and rotation over the on-disk WAL layout.
//!
//! Segments are `seg-NNNNNN.wal.gz` + `seg-NNNNNN.wal.idx` pairs, either
//! directly under the WAL root or inside `YYYY-MM-DD` day directories.
//! Ordering is by day lexicographically, then by segment number.

use std::fs;
use std::path::{Path, PathBuf};

use super::ReadError;

/// A day directory is exactly `YYYY-MM-DD`: length 10 with two dashes.
pub fn is_day_dir(name: &str) -> bool {
    name.len() == 10 && name.bytes().filter(|&b| b == b'-').count() == 2
}

/// Parses the number out of `seg-NNNNNN<suffix>`; the number must be
/// exactly six decimal digits.
pub fn segment_number(name: &str, suffix: &str) -> Option<u32> {
    let digits = name.strip_prefix("seg-")?.strip_suffix(suffix)?;
    if digits.len() != 6 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Locates the oldest index in the WAL directory: the smallest segment
/// of the earliest day directory, or the smallest top-level index when
/// no day directories exist.
pub fn oldest_index(wal_dir: &Path) -> Result<PathBuf, ReadError> {
    let days = day_directories(wal_dir)?;

    if let Some(earliest) = days.first() {
        let day_dir = wal_dir.join(earliest);
        return smallest_index_in(&day_dir)?.ok_or_else(|| ReadError::NoIndex(day_dir));
    }

    smallest_index_in(wal_dir)?.ok_or_else(|| ReadError::NoIndex(wal_dir.to_path_buf()))
}

/// Chooses the index that follows `cur_idx_path` in read order:
/// `seg-(N+1)` in the same directory, else `seg-000001.wal.idx` of the
/// next day directory. `None` means nothing newer has been published.
pub fn next_index_after(cur_idx_path: &Path) -> Result<Option<PathBuf>, ReadError> {
    let name = cur_idx_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let number = segment_number(name, ".wal.idx")
        .ok_or_else(|| ReadError::UnrecognizedIndexName(name.to_string()))?;

    let dir = cur_idx_path.parent().unwrap_or(Path::new("."));
    let candidate = dir.join(format!("seg-{:06}.wal.idx", number + 1));
    if candidate.exists() {
        return Ok(Some(candidate));
    }

    // Day rotation: find the smallest day directory strictly newer than
    // the current one. An index at the top level has no current day, so
    // any day directory qualifies.
    let cur_day = dir.file_name().and_then(|n| n.to_str()).filter(|n| is_day_dir(n));
    let root = if cur_day.is_some() {
        dir.parent().unwrap_or(Path::new("."))
    } else {
        dir
    };

    let next_day = day_directories(root)?
        .into_iter()
        .find(|day| cur_day.is_none_or(|cur| day.as_str() > cur));

    if let Some(day) = next_day {
        let first = root.join(day).join("seg-000001.wal.idx");
        if first.exists() {
            return Ok(Some(first));
        }
    }

    Ok(None)
}

/// Sorted list of day directory names directly under `dir`.
pub fn day_directories(dir: &Path) -> Result<Vec<String>, ReadError> {
    let mut days = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str()
            && is_day_dir(name)
        {
            days.push(name.to_string());
        }
    }
    days.sort();
    Ok(days)
}

/// Lexicographically smallest `.wal.idx` directly inside `dir`.
fn smallest_index_in(dir: &Path) -> Result<Option<PathBuf>, ReadError> {
    let mut smallest: Option<String> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        if !name.ends_with(".wal.idx") && !name.ends_with(".idx") {
            continue;
        }
        if smallest.as_deref().is_none_or(|cur| name.as_str() < cur) {
            smallest = Some(name);
        }
    }
    Ok(smallest.map(|name| dir.join(name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn day_dir_pattern_is_strict() {
        assert!(is_day_dir("2025-01-02"));
        assert!(is_day_dir("2025-12-31"));
        assert!(!is_day_dir("2025-1-2"));
        assert!(!is_day_dir("20250102"));
        assert!(!is_day_dir("2025-01-02-extra"));
        assert!(!is_day_dir("notaday"));
    }

    #[test]
    fn segment_number_requires_six_digits() {
        assert_eq!(segment_number("seg-000042.wal.gz", ".wal.gz"), Some(42));
        assert_eq!(segment_number("seg-000001.wal.idx", ".wal.idx"), Some(1));
        assert_eq!(segment_number("seg-42.wal.gz", ".wal.gz"), None);
        assert_eq!(segment_number("seg-00004x.wal.gz", ".wal.gz"), None);
        assert_eq!(segment_number("other-000042.wal.gz", ".wal.gz"), None);
    }

    #[test]
    fn oldest_index_prefers_earliest_day() {
        let tmp = TempDir::new().unwrap();
        for day in ["2025-03-01", "2025-02-01"] {
            let dir = tmp.path().join(day);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("seg-000002.wal.idx"), "").unwrap();
            fs::write(dir.join("seg-000001.wal.idx"), "").unwrap();
        }

        let oldest = oldest_index(tmp.path()).unwrap();
        assert_eq!(
            oldest,
            tmp.path().join("2025-02-01").join("seg-000001.wal.idx")
        );
    }

    #[test]
    fn oldest_index_falls_back_to_top_level() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("seg-000003.wal.idx"), "").unwrap();
        fs::write(tmp.path().join("seg-000002.wal.idx"), "").unwrap();

        let oldest = oldest_index(tmp.path()).unwrap();
        assert_eq!(oldest, tmp.path().join("seg-000002.wal.idx"));
    }

    #[test]
    fn oldest_index_reports_empty_directory() {
        let tmp = TempDir::new().unwrap();
        assert!(matches!(
            oldest_index(tmp.path()),
            Err(ReadError::NoIndex(_))
        ));
    }

    #[test]
    fn next_index_prefers_same_day() {
        let tmp = TempDir::new().unwrap();
        let day = tmp.path().join("2025-01-02");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("seg-000001.wal.idx"), "").unwrap();
        fs::write(day.join("seg-000002.wal.idx"), "").unwrap();

        let next = next_index_after(&day.join("seg-000001.wal.idx")).unwrap();
        assert_eq!(next, Some(day.join("seg-000002.wal.idx")));
    }

    #[test]
    fn next_index_crosses_into_next_day() {
        let tmp = TempDir::new().unwrap();
        let day1 = tmp.path().join("2025-01-02");
        let day2 = tmp.path().join("2025-01-03");
        fs::create_dir_all(&day1).unwrap();
        fs::create_dir_all(&day2).unwrap();
        fs::write(day1.join("seg-000009.wal.idx"), "").unwrap();
        fs::write(day2.join("seg-000001.wal.idx"), "").unwrap();

        let next = next_index_after(&day1.join("seg-000009.wal.idx")).unwrap();
        assert_eq!(next, Some(day2.join("seg-000001.wal.idx")));
    }

    #[test]
    fn next_index_waits_when_nothing_newer() {
        let tmp = TempDir::new().unwrap();
        let day = tmp.path().join("2025-01-02");
        fs::create_dir_all(&day).unwrap();
        fs::write(day.join("seg-000001.wal.idx"), "").unwrap();

        let next = next_index_after(&day.join("seg-000001.wal.idx")).unwrap();
        assert_eq!(next, None);

        // A next day without its first segment is not ready either.
        fs::create_dir_all(tmp.path().join("2025-01-03")).unwrap();
        let next = next_index_after(&day.join("seg-000001.wal.idx")).unwrap();
        assert_eq!(next, None);
    }

    #[test]
    fn unrecognized_index_name_is_an_error() {
        let err = next_index_after(Path::new("/wal/strange.idx")).unwrap_err();
        assert!(matches!(err, ReadError::UnrecognizedIndexName(_)));
    }
}
