pub mod discover;

use std::fs::File;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use crate::domain::{Frame, FrameMeta, FrameRecord};

/// 64 KiB, comfortably larger than any index line.
const IDX_BUFFER_SIZE: usize = 64 * 1024;

#[derive(Error, Debug)]
pub enum ReadError {
    #[error(
        "no index files under {0}: check that the WAL directory is correct and contains .wal.idx files"
    )]
    NoIndex(PathBuf),
    #[error("unrecognized index name: {0}")]
    UnrecognizedIndexName(String),
    #[error("bad index line in {path} at offset {offset}: {source}")]
    BadIndexLine {
        path: PathBuf,
        offset: u64,
        source: serde_json::Error,
    },
    #[error("short read in {file}: {length} bytes at offset {offset} not available")]
    ShortRead {
        file: String,
        offset: u64,
        length: u64,
    },
    #[error("reader is not open")]
    NotOpen,
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ReadError {
    /// Fatal errors indicate a corrupt or inconsistent WAL and must stop
    /// the agent; everything else is a filesystem race worth retrying
    /// after a poll interval.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ReadError::BadIndexLine { .. }
                | ReadError::UnrecognizedIndexName(_)
                | ReadError::ShortRead { .. }
                | ReadError::NotOpen
        )
    }
}

/// Resumable tail over WAL index sidecars with random-access reads of
/// the compressed segment blobs.
///
/// The reader owns the open index and blob file handles. The index
/// cursor (`idx_offset`) advances only when [`IndexReader::next`]
/// returns a frame, so the position reported by
/// [`IndexReader::current_position`] is always safe to persist.
pub struct IndexReader {
    wal_dir: PathBuf,
    idx: Option<BufReader<File>>,
    idx_path: PathBuf,
    idx_offset: u64,
    gz: Option<File>,
    cur_gz: String,
}

impl IndexReader {
    pub fn new(wal_dir: impl Into<PathBuf>) -> Self {
        Self {
            wal_dir: wal_dir.into(),
            idx: None,
            idx_path: PathBuf::new(),
            idx_offset: 0,
            gz: None,
            cur_gz: String::new(),
        }
    }

    /// Prepares the reader at the given position. An empty `idx_path`
    /// starts from the oldest index in the WAL directory at offset 0.
    /// A non-empty `cur_gz` is opened eagerly; failure to open it is
    /// ignored here because the next frame re-opens it on demand.
    pub fn open(&mut self, idx_path: &str, idx_offset: u64, cur_gz: &str) -> Result<(), ReadError> {
        let (path, offset) = if idx_path.is_empty() {
            (discover::oldest_index(&self.wal_dir)?, 0)
        } else {
            (PathBuf::from(idx_path), idx_offset)
        };

        let file = File::open(&path)?;
        let mut reader = BufReader::with_capacity(IDX_BUFFER_SIZE, file);
        if offset > 0 {
            reader.seek(SeekFrom::Start(offset))?;
        }

        self.idx = Some(reader);
        self.idx_path = path;
        self.idx_offset = offset;

        if !cur_gz.is_empty()
            && let Some(dir) = self.idx_path.parent()
            && let Ok(file) = File::open(dir.join(cur_gz))
        {
            self.gz = Some(file);
            self.cur_gz = cur_gz.to_string();
        }

        Ok(())
    }

    /// Returns the next frame with its compressed payload, or `None`
    /// when no complete frame is available yet (end of data). At end of
    /// the current index the reader attempts a single rotation to the
    /// next segment before giving up for this tick.
    pub fn next(&mut self) -> Result<Option<FrameRecord>, ReadError> {
        let line = match self.read_line()? {
            Some(line) => line,
            None => {
                // End of the current index: try to rotate once.
                match discover::next_index_after(&self.idx_path)? {
                    Some(next) => {
                        self.advance_to(&next)?;
                        match self.read_line()? {
                            Some(line) => line,
                            None => return Ok(None),
                        }
                    }
                    None => return Ok(None),
                }
            }
        };

        let meta: FrameMeta =
            serde_json::from_slice(&line).map_err(|source| ReadError::BadIndexLine {
                path: self.idx_path.clone(),
                offset: self.idx_offset,
                source,
            })?;
        let frame = Frame::from(meta);

        let compressed = match self.read_blob(&frame) {
            Ok(bytes) => bytes,
            Err(err) => {
                if let ReadError::Io(io_err) = &err
                    && io_err.kind() == io::ErrorKind::NotFound
                {
                    // The appender has published the index line but not
                    // the blob yet. Rewind so the line is produced again
                    // on the next tick.
                    self.rewind_line()?;
                    debug!(file = %frame.file, "blob not present yet, retrying next poll");
                    return Ok(None);
                }
                return Err(err);
            }
        };

        self.idx_offset += line.len() as u64;

        Ok(Some(FrameRecord {
            frame,
            compressed,
            idx_line_len: line.len(),
        }))
    }

    /// Reports `(idx_path, idx_offset, cur_gz)` suitable for persisting.
    pub fn current_position(&self) -> (String, u64, String) {
        (
            self.idx_path.to_string_lossy().into_owned(),
            self.idx_offset,
            self.cur_gz.clone(),
        )
    }

    /// Releases the index and blob file handles.
    pub fn close(&mut self) {
        self.idx = None;
        self.gz = None;
        self.cur_gz.clear();
    }

    /// Reads one complete newline-terminated line starting at
    /// `idx_offset`. A truncated trailing line (the appender publishes a
    /// line in two writes) is rewound so the following call restarts it
    /// from the beginning rather than resuming mid-line.
    fn read_line(&mut self) -> Result<Option<Vec<u8>>, ReadError> {
        let reader = self.idx.as_mut().ok_or(ReadError::NotOpen)?;

        let mut line = Vec::new();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if line.last() != Some(&b'\n') {
            self.rewind_line()?;
            return Ok(None);
        }
        Ok(Some(line))
    }

    /// Repositions the index reader at the start of the current line.
    fn rewind_line(&mut self) -> Result<(), ReadError> {
        let reader = self.idx.as_mut().ok_or(ReadError::NotOpen)?;
        reader.seek(SeekFrom::Start(self.idx_offset))?;
        Ok(())
    }

    /// Reads exactly `frame.length` bytes at `frame.offset` from the
    /// segment blob, opening it first if the frame names a different
    /// segment than the one currently held.
    fn read_blob(&mut self, frame: &Frame) -> Result<Bytes, ReadError> {
        if self.gz.is_none() || self.cur_gz != frame.file {
            let dir = self.idx_path.parent().unwrap_or(Path::new("."));
            let file = File::open(dir.join(&frame.file))?;
            self.gz = Some(file);
            self.cur_gz = frame.file.clone();
        }

        let file = self.gz.as_ref().ok_or(ReadError::NotOpen)?;
        let mut buf = vec![0u8; frame.length as usize];
        read_exact_at(file, &mut buf, frame.offset).map_err(|err| {
            if err.kind() == io::ErrorKind::UnexpectedEof {
                ReadError::ShortRead {
                    file: frame.file.clone(),
                    offset: frame.offset,
                    length: frame.length,
                }
            } else {
                ReadError::Io(err)
            }
        })?;
        Ok(Bytes::from(buf))
    }

    /// Switches to the next index file after rotation. The blob handle
    /// is dropped; the first frame of the new segment re-opens it.
    fn advance_to(&mut self, next: &Path) -> Result<(), ReadError> {
        let file = File::open(next)?;
        self.idx = Some(BufReader::with_capacity(IDX_BUFFER_SIZE, file));
        self.idx_path = next.to_path_buf();
        self.idx_offset = 0;
        self.gz = None;
        self.cur_gz.clear();
        Ok(())
    }
}

/// Positional read that never moves shared seek state on unix.
#[cfg(unix)]
fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(not(unix))]
fn read_exact_at(mut file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::io::Read;
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(buf)
}
