//! Streaming hash index: the set of target hashes, the cracked subset, and
//! cheap materialization of what remains.
//!
//! Files at or under the streaming threshold are held fully in memory. Above
//! it the index keeps only an authoritative count plus a bounded sample for
//! analysis, and `materialize_remaining` re-streams the source file filtering
//! against the cracked key set. A single mutex serializes all mutation;
//! additions are broadcast over a bounded channel of counts that readers must
//! treat as "at least one batch".
use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::RngCore;

use crate::io::{STREAMING_THRESHOLD_BYTES, hash_lines};
use crate::pot::PotfileTail;

/// Bounded sample retained for analysis in streaming mode.
const STREAMING_SAMPLE_CAP: usize = 100_000;
/// Capacity of the new-hashes signal channel.
const SIGNAL_CHANNEL_BOUND: usize = 64;
/// Materialized files smaller than this are overwritten before unlinking.
const SECURE_OVERWRITE_CAP: u64 = 1024 * 1024;

/// Details recorded for one cracked hash. The first crack wins; the crediting
/// attack is never reassigned.
#[derive(Debug, Clone)]
pub struct CrackInfo {
    pub plaintext: String,
    pub cracked_at: DateTime<Utc>,
    pub attack: Option<String>,
}

/// Outcome of a potfile reload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReloadOutcome {
    pub newly_cracked: Vec<(String, String)>,
    pub total_cracked: usize,
    pub remaining: usize,
    pub all_cracked: bool,
}

/// Point-in-time statistics for reporting and checkpoints.
#[derive(Debug, Clone, Default)]
pub struct IndexStats {
    pub total_hashes: usize,
    pub cracked: usize,
    pub remaining: usize,
    pub success_rate: f64,
    /// Crack counts credited per attack name.
    pub attack_effectiveness: HashMap<String, usize>,
    /// Most recent cracks, newest first.
    pub recent_cracks: Vec<(String, String, DateTime<Utc>)>,
}

struct Inner {
    /// Full target set, or a bounded sample in streaming mode.
    original: HashSet<String>,
    cracked: HashMap<String, CrackInfo>,
    /// Potfile entries for hashes that are not (yet) targets. Consulted when
    /// a matching hash is hot-added so earlier cracks are honored.
    foreign: HashMap<String, String>,
    /// Streaming mode only: hashes added at runtime that the source file
    /// does not contain. Disjoint from the source targets.
    hot_added: HashSet<String>,
    /// Authoritative count; equals `original.len()` when not streaming.
    total_count: usize,
    /// Target lines the source file held at open time. Membership scans
    /// stop there so lines appended later are not mistaken for counted
    /// targets.
    source_lines: usize,
    streaming: bool,
    tail: PotfileTail,
    temp_files: Vec<PathBuf>,
    shut_down: bool,
}

/// Concurrent index over one hash file and its session potfile.
pub struct HashIndex {
    hash_file: PathBuf,
    potfile: PathBuf,
    inner: Mutex<Inner>,
    signal_tx: SyncSender<usize>,
    signal_rx: Mutex<Option<Receiver<usize>>>,
}

impl HashIndex {
    /// Load the initial state: the target set (or count + sample beyond the
    /// streaming threshold, or always when `force_streaming`), then any
    /// cracks already present in the potfile.
    pub fn open(hash_file: &Path, potfile: &Path, force_streaming: bool) -> Result<Self> {
        let size = std::fs::metadata(hash_file)
            .with_context(|| format!("stat {}", hash_file.display()))?
            .len();
        let streaming = force_streaming || size > STREAMING_THRESHOLD_BYTES;

        let mut original = HashSet::new();
        let total_count;
        if streaming {
            total_count = count_lines_filtered(hash_file)?;
            for line in hash_lines(hash_file, STREAMING_THRESHOLD_BYTES)?.flatten() {
                if let Some(h) = normalize(&line) {
                    original.insert(h);
                    if original.len() >= STREAMING_SAMPLE_CAP {
                        break;
                    }
                }
            }
            info!(
                "streaming mode for {} ({:.1} MiB, {} hashes)",
                hash_file.display(),
                size as f64 / (1024.0 * 1024.0),
                total_count
            );
        } else {
            for line in hash_lines(hash_file, STREAMING_THRESHOLD_BYTES)?.flatten() {
                if let Some(h) = normalize(&line) {
                    original.insert(h);
                }
            }
            total_count = original.len();
        }

        let (signal_tx, signal_rx) = sync_channel(SIGNAL_CHANNEL_BOUND);
        let index = Self {
            hash_file: hash_file.to_path_buf(),
            potfile: potfile.to_path_buf(),
            inner: Mutex::new(Inner {
                original,
                cracked: HashMap::new(),
                foreign: HashMap::new(),
                hot_added: HashSet::new(),
                total_count,
                source_lines: total_count,
                streaming,
                tail: PotfileTail::new(potfile),
                temp_files: Vec::new(),
                shut_down: false,
            }),
            signal_tx,
            signal_rx: Mutex::new(Some(signal_rx)),
        };
        // Honor cracks from a pre-existing potfile (resume path).
        index.reload_potfile(None)?;
        Ok(index)
    }

    pub fn hash_file(&self) -> &Path {
        &self.hash_file
    }

    pub fn potfile(&self) -> &Path {
        &self.potfile
    }

    /// Take the receiving end of the new-hashes signal. Single consumer; the
    /// engine drains it non-blockingly each loop iteration.
    pub fn take_signal_receiver(&self) -> Option<Receiver<usize>> {
        self.signal_rx
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    /// Merge potfile growth into the cracked map. The potfile is ground
    /// truth: entries never leave the map, and the first crack keeps its
    /// crediting attack. Entries whose hash is not a target are parked
    /// until a matching hash is hot-added.
    pub fn reload_potfile(&self, attack: Option<&str>) -> Result<ReloadOutcome> {
        let mut inner = self.lock();
        let pairs = inner
            .tail
            .new_cracks_since_last_call()
            .with_context(|| format!("tail {}", self.potfile.display()))?;

        // In streaming mode the sample cannot vouch for every hash. Entries
        // seen mid-run can only name hashes we handed the cracker; entries
        // found at load time (no attack context) are resolved against the
        // opening region of the source in one pass.
        let verified: Option<HashSet<String>> = if inner.streaming && attack.is_none() {
            let unknown: HashSet<String> = pairs
                .iter()
                .filter(|(h, _)| {
                    !inner.cracked.contains_key(h)
                        && !inner.original.contains(h)
                        && !inner.hot_added.contains(h)
                })
                .map(|(h, _)| h.clone())
                .collect();
            if unknown.is_empty() {
                None
            } else {
                Some(scan_source_membership(
                    &self.hash_file,
                    &unknown,
                    inner.source_lines,
                )?)
            }
        } else {
            None
        };

        let mut newly_cracked = Vec::new();
        for (hash, plaintext) in pairs {
            if inner.cracked.contains_key(&hash) {
                continue;
            }
            let is_target = if inner.original.contains(&hash) || inner.hot_added.contains(&hash)
            {
                true
            } else if inner.streaming {
                match &verified {
                    Some(found) => found.contains(&hash),
                    None => attack.is_some(),
                }
            } else {
                false
            };
            if !is_target {
                inner.foreign.insert(hash, plaintext);
                continue;
            }
            inner.cracked.insert(
                hash.clone(),
                CrackInfo {
                    plaintext: plaintext.clone(),
                    cracked_at: Utc::now(),
                    attack: attack.map(str::to_string),
                },
            );
            newly_cracked.push((hash, plaintext));
        }
        if !newly_cracked.is_empty() {
            debug!("potfile reload: {} new cracks", newly_cracked.len());
        }
        let remaining = remaining_of(&inner);
        Ok(ReloadOutcome {
            total_cracked: inner.cracked.len(),
            remaining,
            all_cracked: remaining == 0,
            newly_cracked,
        })
    }

    /// Add validated hashes at runtime. Returns how many were genuinely new;
    /// a nonzero addition is signalled to the engine.
    pub fn add_hashes<I, S>(&self, lines: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut inner = self.lock();
        let mut added = 0usize;
        if inner.streaming {
            // The sample cannot say whether a hash is already a counted
            // target; resolve unknowns against the opening region of the
            // source in one pass.
            let mut unknown: HashSet<String> = HashSet::new();
            for line in lines {
                let Some(hash) = normalize(line.as_ref()) else {
                    continue;
                };
                if !inner.original.contains(&hash) && !inner.hot_added.contains(&hash) {
                    unknown.insert(hash);
                }
            }
            if !unknown.is_empty() {
                let existing =
                    match scan_source_membership(&self.hash_file, &unknown, inner.source_lines) {
                        Ok(found) => found,
                        Err(e) => {
                            warn!(
                                "membership scan of {} failed: {e}",
                                self.hash_file.display()
                            );
                            HashSet::new()
                        }
                    };
                for hash in unknown {
                    if existing.contains(&hash) {
                        // Counted by the opening pass; keep it in the sample
                        // for analysis without touching the total.
                        inner.original.insert(hash);
                        continue;
                    }
                    inner.hot_added.insert(hash.clone());
                    inner.total_count += 1;
                    if let Some(plaintext) = inner.foreign.remove(&hash) {
                        inner.cracked.insert(
                            hash,
                            CrackInfo {
                                plaintext,
                                cracked_at: Utc::now(),
                                attack: None,
                            },
                        );
                    } else if !inner.cracked.contains_key(&hash) {
                        added += 1;
                    }
                }
            }
        } else {
            for line in lines {
                let Some(hash) = normalize(line.as_ref()) else {
                    continue;
                };
                if inner.original.insert(hash.clone()) {
                    inner.total_count += 1;
                    if let Some(plaintext) = inner.foreign.remove(&hash) {
                        inner.cracked.insert(
                            hash,
                            CrackInfo {
                                plaintext,
                                cracked_at: Utc::now(),
                                attack: None,
                            },
                        );
                    } else if !inner.cracked.contains_key(&hash) {
                        added += 1;
                    }
                }
            }
        }
        if added > 0 {
            // Full channel means a signal is already pending; the reader
            // treats any value as "at least one batch".
            if self.signal_tx.try_send(added).is_err() {
                debug!("new-hashes signal channel full, coalescing");
            }
        }
        added
    }

    pub fn total_count(&self) -> usize {
        self.lock().total_count
    }

    pub fn cracked_count(&self) -> usize {
        self.lock().cracked.len()
    }

    pub fn remaining_count(&self) -> usize {
        let inner = self.lock();
        remaining_of(&inner)
    }

    pub fn should_continue(&self) -> bool {
        self.remaining_count() > 0
    }

    pub fn statistics(&self) -> IndexStats {
        let inner = self.lock();
        let total = inner.total_count;
        let cracked = inner.cracked.len();
        let mut effectiveness: HashMap<String, usize> = HashMap::new();
        for info in inner.cracked.values() {
            if let Some(attack) = &info.attack {
                *effectiveness.entry(attack.clone()).or_insert(0) += 1;
            }
        }
        let mut recent: Vec<(String, String, DateTime<Utc>)> = inner
            .cracked
            .iter()
            .map(|(h, info)| (h.clone(), info.plaintext.clone(), info.cracked_at))
            .collect();
        recent.sort_by(|a, b| b.2.cmp(&a.2));
        recent.truncate(5);
        IndexStats {
            total_hashes: total,
            cracked,
            remaining: remaining_of(&inner),
            // Mid-run potfile entries are taken on trust in streaming mode,
            // so the count can overshoot the total; never report past 100%.
            success_rate: if total > 0 {
                (cracked as f64 / total as f64 * 100.0).min(100.0)
            } else {
                0.0
            },
            attack_effectiveness: effectiveness,
            recent_cracks: recent,
        }
    }

    /// Plaintexts of all cracked hashes, for password-pattern analysis.
    pub fn cracked_plaintexts(&self) -> Vec<String> {
        let inner = self.lock();
        inner.cracked.values().map(|i| i.plaintext.clone()).collect()
    }

    /// Cracked `hash -> plaintext` pairs.
    pub fn cracked_pairs(&self) -> Vec<(String, String)> {
        let inner = self.lock();
        inner
            .cracked
            .iter()
            .map(|(h, i)| (h.clone(), i.plaintext.clone()))
            .collect()
    }

    /// Write the uncracked set to an owner-only temp file and return its
    /// path. The file is tracked and secure-deleted on shutdown; callers may
    /// also delete it early via [`HashIndex::secure_delete`].
    pub fn materialize_remaining(&self) -> Result<PathBuf> {
        let mut inner = self.lock();
        let mut file = tempfile::Builder::new()
            .prefix("hashwrap_remaining_")
            .suffix(".txt")
            .tempfile()
            .context("create remaining-hashes file")?;

        if inner.streaming {
            // Sample is partial; re-stream the source against cracked keys.
            let mut written = 0usize;
            let mut hot_seen: HashSet<String> = HashSet::new();
            for line in hash_lines(&self.hash_file, STREAMING_THRESHOLD_BYTES)?.flatten() {
                if let Some(h) = normalize(&line) {
                    if inner.hot_added.contains(&h) {
                        hot_seen.insert(h.clone());
                    }
                    if !inner.cracked.contains_key(&h) {
                        writeln!(file, "{h}")?;
                        written += 1;
                    }
                }
            }
            // Hot-added hashes live outside the source file but are part of
            // the remaining set all the same.
            for h in &inner.hot_added {
                if !hot_seen.contains(h) && !inner.cracked.contains_key(h) {
                    writeln!(file, "{h}")?;
                    written += 1;
                }
            }
            debug!("materialized {} uncracked hashes (streaming)", written);
        } else {
            for h in &inner.original {
                if !inner.cracked.contains_key(h) {
                    writeln!(file, "{h}")?;
                }
            }
        }
        file.flush()?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(file.path(), std::fs::Permissions::from_mode(0o600))?;
        }

        let (_, path) = file.keep().context("persist remaining-hashes file")?;
        inner.temp_files.push(path.clone());
        Ok(path)
    }

    /// Overwrite (when small) and unlink one tracked temp file.
    pub fn secure_delete(&self, path: &Path) {
        let mut inner = self.lock();
        inner.temp_files.retain(|p| p != path);
        secure_delete_file(path);
    }

    /// Secure-delete every tracked remaining-hashes file. Idempotent.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        if inner.shut_down {
            return;
        }
        inner.shut_down = true;
        let files = std::mem::take(&mut inner.temp_files);
        drop(inner);
        for path in files {
            secure_delete_file(&path);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for HashIndex {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for HashIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HashIndex")
            .field("hash_file", &self.hash_file)
            .field("potfile", &self.potfile)
            .finish()
    }
}

fn remaining_of(inner: &Inner) -> usize {
    inner.total_count.saturating_sub(inner.cracked.len())
}

/// Strip whitespace and drop blank/comment lines.
fn normalize(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Single-pass count of target lines, skipping blanks and comments.
fn count_lines_filtered(path: &Path) -> Result<usize> {
    let mut count = 0usize;
    for line in hash_lines(path, STREAMING_THRESHOLD_BYTES)?.flatten() {
        if normalize(&line).is_some() {
            count += 1;
        }
    }
    Ok(count)
}

/// One pass over the first `limit` target lines of the source file,
/// returning which of `candidates` appear there. Lines past `limit` were
/// appended after the opening count and are not counted targets.
fn scan_source_membership(
    path: &Path,
    candidates: &HashSet<String>,
    limit: usize,
) -> Result<HashSet<String>> {
    let mut found = HashSet::new();
    let mut examined = 0usize;
    for line in hash_lines(path, STREAMING_THRESHOLD_BYTES)?.flatten() {
        if let Some(h) = normalize(&line) {
            examined += 1;
            if candidates.contains(&h) {
                found.insert(h);
                if found.len() == candidates.len() {
                    break;
                }
            }
            if examined >= limit {
                break;
            }
        }
    }
    Ok(found)
}

/// Overwrite small files with random bytes of the same length, then unlink.
fn secure_delete_file(path: &Path) {
    let Ok(meta) = std::fs::metadata(path) else {
        return;
    };
    if meta.len() < SECURE_OVERWRITE_CAP {
        let mut noise = vec![0u8; meta.len() as usize];
        rand::thread_rng().fill_bytes(&mut noise);
        if let Err(e) = std::fs::write(path, &noise) {
            warn!("overwrite {} failed: {}", path.display(), e);
        }
    }
    if let Err(e) = std::fs::remove_file(path) {
        warn!("unlink {} failed: {}", path.display(), e);
    }
}
