//! Line-oriented readers over hash files.
//!
//! Hash files are read either through a buffered reader or, past the
//! streaming threshold, through a memory map scanned for newline boundaries.
//! Both paths yield owned lines with CRLF endings trimmed, so the index and
//! the identifier never care which one served them. `read_tail_window` feeds
//! the watcher's tail fingerprinting.
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use anyhow::{Context, Result};
use memmap2::Mmap;

/// Threshold in bytes above which hash files are memory-mapped and the index
/// switches to streaming mode. Callers can override via API.
pub const STREAMING_THRESHOLD_BYTES: u64 = 50 * 1024 * 1024; // 50 MiB

pub type LineIter = Box<dyn Iterator<Item = io::Result<String>> + Send + 'static>;

/// Iterate the lines of a hash file, taking the mmap path for files at or
/// past `threshold_bytes`.
pub fn hash_lines<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<LineIter> {
    let meta =
        std::fs::metadata(&path).with_context(|| format!("stat {}", path.as_ref().display()))?;
    if meta.is_file() && meta.len() >= threshold_bytes {
        mapped_lines(path)
    } else {
        buffered_lines(path)
    }
}

/// Buffered line iteration, used below the streaming threshold.
pub fn buffered_lines<P: AsRef<Path>>(path: P) -> Result<LineIter> {
    let file = File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    Ok(Box::new(BufReader::new(file).lines()))
}

/// Memory-mapped line iteration for large dumps. Skips read-syscall copies
/// but still allocates per returned line.
pub fn mapped_lines<P: AsRef<Path>>(path: P) -> Result<LineIter> {
    let file = File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    let mmap =
        unsafe { Mmap::map(&file) }.with_context(|| format!("mmap {}", path.as_ref().display()))?;
    Ok(Box::new(MappedLines { mmap, pos: 0 }))
}

struct MappedLines {
    mmap: Mmap,
    pos: usize,
}

impl Iterator for MappedLines {
    type Item = io::Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        let data: &[u8] = &self.mmap;
        if self.pos >= data.len() {
            return None;
        }
        let start = self.pos;
        let end = match memchr::memchr(b'\n', &data[start..]) {
            Some(off) => {
                self.pos = start + off + 1; // skip the newline
                start + off
            }
            None => {
                // Last line without a trailing newline
                self.pos = data.len();
                data.len()
            }
        };
        let mut line = &data[start..end];
        // Trim a trailing '\r' so CRLF dumps read like LF ones
        if line.ends_with(b"\r") {
            line = &line[..line.len() - 1];
        }
        Some(Ok(match std::str::from_utf8(line) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(line).into_owned(),
        }))
    }
}

/// Count non-empty lines in a file without retaining them.
pub fn count_nonempty_lines<P: AsRef<Path>>(path: P, threshold_bytes: u64) -> Result<usize> {
    let mut count = 0usize;
    for line in hash_lines(&path, threshold_bytes)?.flatten() {
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

/// Read up to `window` bytes from the end of a file. Used by the watcher to
/// fingerprint file tails without reading the whole file.
pub fn read_tail_window<P: AsRef<Path>>(path: P, window: u64) -> Result<Vec<u8>> {
    let mut file =
        File::open(&path).with_context(|| format!("open {}", path.as_ref().display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("stat {}", path.as_ref().display()))?
        .len();
    let start = len.saturating_sub(window);
    file.seek(SeekFrom::Start(start))?;
    let mut buf = Vec::with_capacity((len - start) as usize);
    file.read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn buffered_and_mapped_agree() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("hashes.txt");
        let mut f = File::create(&path).unwrap();
        writeln!(f, "aaaa").unwrap();
        writeln!(f, "bbbb\r").unwrap();
        write!(f, "cccc").unwrap(); // no trailing newline
        drop(f);

        let buffered: Vec<String> = buffered_lines(&path).unwrap().flatten().collect();
        let mapped: Vec<String> = mapped_lines(&path).unwrap().flatten().collect();
        assert_eq!(mapped, vec!["aaaa", "bbbb", "cccc"]);
        // BufRead::lines also strips the '\r'; the two paths must agree.
        assert_eq!(buffered, mapped);
    }

    #[test]
    fn threshold_selects_the_reader_without_changing_content() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("hashes.txt");
        std::fs::write(&path, "h1\nh2\n").unwrap();
        let via_map: Vec<String> = hash_lines(&path, 0).unwrap().flatten().collect();
        let via_buf: Vec<String> = hash_lines(&path, u64::MAX).unwrap().flatten().collect();
        assert_eq!(via_map, via_buf);
    }

    #[test]
    fn counts_skip_blank_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("hashes.txt");
        std::fs::write(&path, "a\n\nb\n   \nc\n").unwrap();
        assert_eq!(count_nonempty_lines(&path, u64::MAX).unwrap(), 3);
    }

    #[test]
    fn tail_window_reads_last_bytes_only() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("big.txt");
        std::fs::write(&path, b"0123456789").unwrap();
        assert_eq!(read_tail_window(&path, 4).unwrap(), b"6789");
        assert_eq!(read_tail_window(&path, 100).unwrap(), b"0123456789");
    }
}
