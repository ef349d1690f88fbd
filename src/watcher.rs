//! Hot-reload watcher: detects growth of watched hash files and ingests
//! files dropped into the ingestion directory.
//!
//! Every poll (~5 s) each watched file is compared against its recorded
//! (mtime, size, tail checksum); on growth only the appended region is read
//! and validated. Dropped files with a known extension are validated in
//! parallel, fed to the index, and moved into the `processed/` subdirectory
//! under a timestamped name. Invalid lines are dropped with a warning and
//! never abort ingestion.
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rayon::prelude::*;

use crate::error::Result;
use crate::index::HashIndex;
use crate::io::read_tail_window;
use crate::ratelimit::TokenBucket;
use crate::sandbox::{PathSandbox, validate_hash_format};

/// Poll cadence for watched files and the ingestion directory.
pub const WATCH_INTERVAL: Duration = Duration::from_secs(5);
/// Window hashed to fingerprint a file tail.
const TAIL_WINDOW: u64 = 1024 * 1024;
/// Extensions picked up from the ingestion directory.
const INGEST_EXTENSIONS: [&str; 3] = ["txt", "lst", "hashes"];

#[derive(Debug, Clone, Default)]
pub struct WatcherStats {
    pub files_processed: usize,
    pub hashes_added: usize,
    pub last_check: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
struct WatchedFile {
    mtime: SystemTime,
    size: u64,
    tail_md5: String,
}

fn fingerprint(path: &Path) -> Result<WatchedFile> {
    let meta = std::fs::metadata(path)
        .map_err(|e| crate::error::Error::from_io(e, "watch_file", path))?;
    let tail = read_tail_window(path, TAIL_WINDOW).map_err(|e| {
        crate::error::Error::new(
            crate::error::ErrorKind::FileAccess,
            crate::error::Severity::Recoverable,
            "watch_file",
            "tail_read_failed",
            e.to_string(),
        )
    })?;
    Ok(WatchedFile {
        mtime: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
        size: meta.len(),
        tail_md5: format!("{:x}", md5::compute(&tail)),
    })
}

/// Watches hash files and the ingestion directory, feeding validated lines
/// into the index.
pub struct HashWatcher {
    index: Arc<HashIndex>,
    limiter: Arc<TokenBucket>,
    ingest_dir: PathBuf,
    processed_dir: PathBuf,
    interval: Duration,
    watched: Mutex<HashMap<PathBuf, WatchedFile>>,
    stats: Mutex<WatcherStats>,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl HashWatcher {
    /// Build a watcher over `ingest_dir`, creating it (and `processed/`)
    /// with owner-only permissions. The sandbox validates the directory
    /// itself; individual dropped files inherit containment from it.
    pub fn new(
        index: Arc<HashIndex>,
        sandbox: &PathSandbox,
        limiter: Arc<TokenBucket>,
        ingest_dir: &Path,
    ) -> Result<Arc<Self>> {
        std::fs::create_dir_all(ingest_dir)
            .map_err(|e| crate::error::Error::from_io(e, "create_ingest_dir", ingest_dir))?;
        let ingest_dir = sandbox.validate_path(ingest_dir, true)?;
        let processed_dir = ingest_dir.join("processed");
        std::fs::create_dir_all(&processed_dir)
            .map_err(|e| crate::error::Error::from_io(e, "create_ingest_dir", &processed_dir))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for dir in [&ingest_dir, &processed_dir] {
                std::fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700))
                    .map_err(|e| crate::error::Error::from_io(e, "create_ingest_dir", dir))?;
            }
        }
        Ok(Arc::new(Self {
            index,
            limiter,
            ingest_dir,
            processed_dir,
            interval: WATCH_INTERVAL,
            watched: Mutex::new(HashMap::new()),
            stats: Mutex::new(WatcherStats::default()),
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        }))
    }

    pub fn ingest_dir(&self) -> &Path {
        &self.ingest_dir
    }

    /// Record a file's current state and watch it for growth.
    pub fn add_watch_file(&self, path: &Path) -> Result<()> {
        let state = fingerprint(path)?;
        self.watched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_path_buf(), state);
        Ok(())
    }

    /// Start the background poll loop. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let watcher = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("hash-watcher".to_string())
            .spawn(move || {
                while watcher.running.load(Ordering::SeqCst) {
                    watcher.scan_once();
                    // Sleep in short slices so stop() returns promptly.
                    let mut slept = Duration::ZERO;
                    while slept < watcher.interval && watcher.running.load(Ordering::SeqCst) {
                        std::thread::sleep(Duration::from_millis(100));
                        slept += Duration::from_millis(100);
                    }
                }
            })
            .expect("spawn hash watcher");
        *self.handle.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
    }

    /// Stop the poll loop and wait for it to exit.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().unwrap_or_else(|e| e.into_inner()).take() {
            let _ = handle.join();
        }
    }

    pub fn stats(&self) -> WatcherStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// One poll: check watched files for growth, then sweep the ingestion
    /// directory. Public so callers with their own scheduling can drive it.
    pub fn scan_once(&self) {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).last_check = Some(Utc::now());
        self.check_watched_files();
        self.check_ingest_dir();
    }

    fn check_watched_files(&self) {
        let snapshot: Vec<(PathBuf, WatchedFile)> = {
            let watched = self.watched.lock().unwrap_or_else(|e| e.into_inner());
            watched.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        for (path, old) in snapshot {
            let Ok(meta) = std::fs::metadata(&path) else {
                continue;
            };
            if meta.len() < old.size {
                warn!("{} shrank; re-baselining without ingesting", path.display());
                self.refingerprint(path);
                continue;
            }
            if meta.len() == old.size {
                // Same size but a new mtime can still mean a rewrite; the
                // tail checksum decides.
                let mtime = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                if mtime != old.mtime {
                    if let Ok(state) = fingerprint(&path) {
                        if state.tail_md5 != old.tail_md5 {
                            warn!(
                                "{} was rewritten in place; re-baselining",
                                path.display()
                            );
                        }
                        self.watched
                            .lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .insert(path, state);
                    }
                }
                continue;
            }
            match read_appended_region(&path, old.size) {
                Ok(hashes) => {
                    if !hashes.is_empty() {
                        let added = self.index.add_hashes(&hashes);
                        self.note_added(added, &format!("appended to {}", path.display()));
                    }
                }
                Err(e) => warn!("reading appended region of {} failed: {e}", path.display()),
            }
            self.refingerprint(path);
        }
    }

    fn refingerprint(&self, path: PathBuf) {
        match fingerprint(&path) {
            Ok(state) => {
                self.watched
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .insert(path, state);
            }
            Err(e) => warn!("re-fingerprint failed: {e}"),
        }
    }

    fn check_ingest_dir(&self) {
        let entries = match std::fs::read_dir(&self.ingest_dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("reading ingest dir failed: {e}");
                return;
            }
        };
        let mut candidates: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|ext| INGEST_EXTENSIONS.contains(&ext))
            })
            .collect();
        candidates.sort();

        // Validate dropped files in parallel; each file's lines stand alone.
        let validated: Vec<(PathBuf, Vec<String>)> = candidates
            .into_par_iter()
            .filter_map(|path| {
                if !self.limiter.try_acquire() {
                    debug!("ingestion rate limit reached, deferring {}", path.display());
                    return None;
                }
                match validate_file_lines(&path) {
                    Ok(hashes) => Some((path, hashes)),
                    Err(e) => {
                        warn!("ingesting {} failed: {e}", path.display());
                        None
                    }
                }
            })
            .collect();

        for (path, hashes) in validated {
            if !hashes.is_empty() {
                let added = self.index.add_hashes(&hashes);
                self.note_added(added, &format!("file {}", path.display()));
            }
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).files_processed += 1;
            let stamped = self.processed_dir.join(format!(
                "{}_{}",
                Utc::now().format("%Y%m%d_%H%M%S"),
                path.file_name().and_then(|n| n.to_str()).unwrap_or("dropped")
            ));
            if let Err(e) = std::fs::rename(&path, &stamped) {
                warn!("moving {} to processed failed: {e}", path.display());
            }
        }
    }

    fn note_added(&self, added: usize, source: &str) {
        if added > 0 {
            self.stats.lock().unwrap_or_else(|e| e.into_inner()).hashes_added += added;
            info!("added {added} new hashes from {source}");
        }
    }
}

impl std::fmt::Debug for HashWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashWatcher")
            .field("ingest_dir", &self.ingest_dir)
            .field("running", &self.running.load(Ordering::SeqCst))
            .finish()
    }
}

/// Read lines appended past `offset`, keeping only validated hashes.
fn read_appended_region(path: &Path, offset: u64) -> std::io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let mut reader = BufReader::new(file);
    reader.seek(SeekFrom::Start(offset))?;
    let mut hashes = Vec::new();
    for line in reader.lines() {
        collect_valid_line(&line?, &mut hashes);
    }
    Ok(hashes)
}

fn validate_file_lines(path: &Path) -> std::io::Result<Vec<String>> {
    let file = std::fs::File::open(path)?;
    let reader = BufReader::new(file);
    let mut hashes = Vec::new();
    for line in reader.lines() {
        collect_valid_line(&line?, &mut hashes);
    }
    Ok(hashes)
}

fn collect_valid_line(line: &str, out: &mut Vec<String>) {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return;
    }
    match validate_hash_format(trimmed) {
        Ok(hash) => out.push(hash),
        Err(e) => warn!("skipping invalid hash line: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    fn setup(dir: &Path) -> (Arc<HashIndex>, Arc<HashWatcher>) {
        let hashes = dir.join("hashes.txt");
        let pot = dir.join("pot");
        std::fs::write(&hashes, "8846f7eaee8fb117ad06bdd830b7586c\n").unwrap();
        std::fs::write(&pot, "").unwrap();
        let index = Arc::new(HashIndex::open(&hashes, &pot, false).unwrap());
        let sandbox = PathSandbox::new(&[dir.to_path_buf()]);
        let limiter = Arc::new(TokenBucket::default());
        let watcher = HashWatcher::new(
            Arc::clone(&index),
            &sandbox,
            limiter,
            &dir.join("incoming"),
        )
        .unwrap();
        (index, watcher)
    }

    #[test]
    fn dropped_file_is_ingested_validated_and_archived() {
        let tmp = tempdir().unwrap();
        let (index, watcher) = setup(tmp.path());
        let rx = index.take_signal_receiver().unwrap();

        let dropped = watcher.ingest_dir().join("extra.txt");
        let mut f = std::fs::File::create(&dropped).unwrap();
        writeln!(f, "aad3b435b51404eeaad3b435b51404ee").unwrap();
        writeln!(f, "31d6cfe0d16ae931b73c59d7e0c089c0").unwrap();
        writeln!(f, "not a hash!!").unwrap();
        writeln!(f, "# comment").unwrap();
        drop(f);

        watcher.scan_once();

        assert_eq!(index.total_count(), 3);
        assert_eq!(rx.try_recv().unwrap(), 2);
        assert!(!dropped.exists());
        let processed: Vec<_> = std::fs::read_dir(watcher.ingest_dir().join("processed"))
            .unwrap()
            .flatten()
            .collect();
        assert_eq!(processed.len(), 1);
        assert!(
            processed[0]
                .file_name()
                .to_string_lossy()
                .ends_with("extra.txt")
        );
        let stats = watcher.stats();
        assert_eq!(stats.files_processed, 1);
        assert_eq!(stats.hashes_added, 2);
    }

    #[test]
    fn unknown_extensions_are_left_alone() {
        let tmp = tempdir().unwrap();
        let (index, watcher) = setup(tmp.path());
        let skipped = watcher.ingest_dir().join("notes.md");
        std::fs::write(&skipped, "aad3b435b51404eeaad3b435b51404ee\n").unwrap();

        watcher.scan_once();
        assert!(skipped.exists());
        assert_eq!(index.total_count(), 1);
    }

    #[test]
    fn watched_file_growth_reads_only_the_appended_region() {
        let tmp = tempdir().unwrap();
        let (index, watcher) = setup(tmp.path());
        let hash_file = tmp.path().join("hashes.txt");
        watcher.add_watch_file(&hash_file).unwrap();

        // No growth: nothing happens.
        watcher.scan_once();
        assert_eq!(index.total_count(), 1);

        let mut f = std::fs::OpenOptions::new().append(true).open(&hash_file).unwrap();
        writeln!(f, "5f4dcc3b5aa765d61d8327deb882cf99").unwrap();
        writeln!(f, "garbage line here").unwrap();
        drop(f);

        watcher.scan_once();
        assert_eq!(index.total_count(), 2);
        let stats = watcher.stats();
        assert_eq!(stats.hashes_added, 1);
        assert!(stats.last_check.is_some());
    }

    #[test]
    fn growth_detection_is_cumulative_across_polls() {
        let tmp = tempdir().unwrap();
        let (index, watcher) = setup(tmp.path());
        let hash_file = tmp.path().join("hashes.txt");
        watcher.add_watch_file(&hash_file).unwrap();

        for (i, hash) in ["a", "b"].iter().enumerate() {
            let mut f = std::fs::OpenOptions::new()
                .append(true)
                .open(&hash_file)
                .unwrap();
            writeln!(f, "{}", hash.repeat(32)).unwrap();
            drop(f);
            watcher.scan_once();
            assert_eq!(index.total_count(), 2 + i);
        }
    }

    #[test]
    fn start_and_stop_are_clean() {
        let tmp = tempdir().unwrap();
        let (_, watcher) = setup(tmp.path());
        watcher.start();
        watcher.start(); // idempotent
        std::thread::sleep(Duration::from_millis(50));
        watcher.stop();
    }
}
