//! Observational frame verification for the `--verify` debug flag.

use std::io::{self, Read};

use flate2::read::GzDecoder;

#[derive(Debug, Clone, Copy)]
pub(crate) struct FrameDigest {
    pub crc32: u32,
    pub lines: usize,
    pub uncompressed_len: u64,
}

/// Decompresses a frame's gzip member and computes a CRC32 and line
/// count over the plaintext. Purely observational: the caller logs the
/// digest and never acts on it.
pub(crate) fn inspect_frame(compressed: &[u8]) -> io::Result<FrameDigest> {
    let mut decoder = GzDecoder::new(compressed);
    let mut hasher = crc32fast::Hasher::new();
    let mut lines = 0usize;
    let mut uncompressed_len = 0u64;
    let mut buf = [0u8; 64 * 1024];

    loop {
        let n = decoder.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        lines += buf[..n].iter().filter(|&&b| b == b'\n').count();
        uncompressed_len += n as u64;
    }

    Ok(FrameDigest {
        crc32: hasher.finalize(),
        lines,
        uncompressed_len,
    })
}
