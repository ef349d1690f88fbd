//! Parser and incremental tail reader for hashcat potfile content.
//!
//! Each line is `hash:plaintext` where only the first `:` splits the fields;
//! the plaintext may contain additional colons. Blank and malformed lines are
//! ignored by bulk parsing. [`PotfileTail`] tracks a per-path byte offset so
//! the supervisor can poll for new cracks without re-reading the whole file.
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
/// Errors returned while parsing potfile lines.
pub enum PotError {
    #[error("malformed pot line: {0}")]
    MalformedLine(String),
}

/// Parse a single `hash:plaintext` potfile line. Only first `:` splits.
pub fn parse_pot_line(line: &str) -> Result<(String, String), PotError> {
    // hash:plaintext, only first ':' splits; allow empty plaintext
    if let Some((hash, rest)) = line.split_once(':') {
        Ok((hash.trim().to_string(), rest.trim().to_string()))
    } else {
        Err(PotError::MalformedLine(line.to_string()))
    }
}

/// Parse entire potfile contents into a hash->plaintext map.
pub fn parse_pot_contents(contents: &str) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Ok((h, p)) = parse_pot_line(line) {
            map.insert(h, p);
        }
    }
    map
}

/// Incremental reader over an append-only potfile.
///
/// Remembers the byte offset of the last read; a shrinking file (truncated or
/// replaced) rewinds to the start. A missing file yields no entries and keeps
/// the offset at zero.
#[derive(Debug)]
pub struct PotfileTail {
    path: PathBuf,
    offset: u64,
}

impl PotfileTail {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            offset: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Return `(hash, plaintext)` pairs appended since the previous call.
    /// Lines without a colon are skipped.
    pub fn new_cracks_since_last_call(&mut self) -> std::io::Result<Vec<(String, String)>> {
        let mut cracks = Vec::new();
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(cracks),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        if len < self.offset {
            // Truncated or replaced underneath us; start over.
            self.offset = 0;
        }
        if len == self.offset {
            return Ok(cracks);
        }
        let mut reader = BufReader::new(file);
        reader.seek(SeekFrom::Start(self.offset))?;
        let mut line = String::new();
        loop {
            line.clear();
            let read = reader.read_line(&mut line)?;
            if read == 0 {
                break;
            }
            self.offset += read as u64;
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            if let Ok((h, p)) = parse_pot_line(trimmed) {
                cracks.push((h, p));
            }
        }
        Ok(cracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn parses_plaintext_with_colons() {
        let (h, p) = parse_pot_line("abcdef:pa:ss:wd").unwrap();
        assert_eq!(h, "abcdef");
        assert_eq!(p, "pa:ss:wd");
    }

    #[test]
    fn ignores_malformed_and_blank_lines() {
        let map = parse_pot_contents("\nno_colon\n123:abc\n");
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("123").unwrap(), "abc");
    }

    #[test]
    fn tail_reads_only_appended_lines() {
        let tmp = tempdir().unwrap();
        let pot = tmp.path().join("hashwrap.potfile");
        std::fs::write(&pot, "aaaa:first\n").unwrap();

        let mut tail = PotfileTail::new(&pot);
        let first = tail.new_cracks_since_last_call().unwrap();
        assert_eq!(first, vec![("aaaa".to_string(), "first".to_string())]);

        // No growth, nothing new.
        assert!(tail.new_cracks_since_last_call().unwrap().is_empty());

        let mut f = std::fs::OpenOptions::new().append(true).open(&pot).unwrap();
        writeln!(f, "bbbb:sec:ond").unwrap();
        writeln!(f, "no_colon_line").unwrap();
        drop(f);

        let second = tail.new_cracks_since_last_call().unwrap();
        assert_eq!(second, vec![("bbbb".to_string(), "sec:ond".to_string())]);
    }

    #[test]
    fn two_calls_concatenated_equal_one_late_call() {
        let tmp = tempdir().unwrap();
        let pot = tmp.path().join("pot");
        std::fs::write(&pot, "h1:p1\n").unwrap();

        let mut early = PotfileTail::new(&pot);
        let mut late = PotfileTail::new(&pot);

        let mut concatenated = early.new_cracks_since_last_call().unwrap();
        let mut f = std::fs::OpenOptions::new().append(true).open(&pot).unwrap();
        writeln!(f, "h2:p2").unwrap();
        drop(f);
        concatenated.extend(early.new_cracks_since_last_call().unwrap());

        assert_eq!(concatenated, late.new_cracks_since_last_call().unwrap());
    }

    #[test]
    fn truncation_rewinds_to_start() {
        let tmp = tempdir().unwrap();
        let pot = tmp.path().join("pot");
        std::fs::write(&pot, "h1:p1\nh2:p2\n").unwrap();

        let mut tail = PotfileTail::new(&pot);
        assert_eq!(tail.new_cracks_since_last_call().unwrap().len(), 2);

        std::fs::write(&pot, "h3:p3\n").unwrap();
        let after = tail.new_cracks_since_last_call().unwrap();
        assert_eq!(after, vec![("h3".to_string(), "p3".to_string())]);
    }

    #[test]
    fn missing_file_yields_nothing() {
        let tmp = tempdir().unwrap();
        let mut tail = PotfileTail::new(tmp.path().join("absent"));
        assert!(tail.new_cracks_since_last_call().unwrap().is_empty());
    }
}
