//! Crash-safe session persistence.
//!
//! Each session owns a directory under the sessions root holding the
//! canonical `session.json`, its transient `.tmp`/`.lock` siblings, the
//! per-session potfile, and (when the cracker wrote one) a native restore
//! file. Checkpoints are the only writer of the session record and follow a
//! fixed protocol: exclusive lock on the sibling lock file with bounded
//! exponential retry, serialize to the tmp file, restrict permissions, then
//! rename over the canonical file. A `sessions.json` index at the root maps
//! ids to directories and is updated with the same atomic-rename step.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::attack::{Attack, AttackResult};
use crate::error::{Error, ErrorKind, Result, Severity};
use crate::index::IndexStats;
use crate::sandbox::validate_session_name;

/// Default sessions root, relative to the working directory.
pub const DEFAULT_SESSIONS_ROOT: &str = ".hashwrap_sessions";
/// Minimum interval between unforced checkpoints.
pub const CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);
/// Attempts to take the checkpoint lock before giving up.
const LOCK_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Created,
    Running,
    Paused,
    Completed,
    Aborted,
    Error,
}

/// Aggregate counters carried in the session record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStatistics {
    pub attacks_completed: u32,
    pub attacks_skipped: u32,
    pub total_hashes: usize,
    pub cracked_hashes: usize,
    pub remaining_hashes: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedAttack {
    pub attack: Attack,
    pub result: AttackResult,
}

/// The survivable state of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: String,
    /// Explicit operator-chosen name; doubles as the cracker's `--session`.
    pub session_name: Option<String>,
    pub hash_file: PathBuf,
    pub potfile: PathBuf,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    pub last_checkpoint: DateTime<Utc>,
    pub runtime_seconds: u64,
    pub pending_attacks: Vec<Attack>,
    pub completed_attacks: Vec<CompletedAttack>,
    pub current_attack: Option<Attack>,
    pub hot_reload_enabled: bool,
    pub statistics: SessionStatistics,
}

/// Lightweight row for `hashwrap status`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub status: SessionStatus,
    pub hash_file: PathBuf,
    pub total_hashes: usize,
    pub cracked_hashes: usize,
    pub start_time: DateTime<Utc>,
    pub runtime_seconds: u64,
}

/// Handle on a live session directory. The store is the only writer of the
/// session record; reads go through [`SessionStore::state`].
pub struct SessionStore {
    root: PathBuf,
    session_dir: PathBuf,
    session_file: PathBuf,
    state: Mutex<SessionState>,
    last_write: Mutex<Option<Instant>>,
    /// Set on resume when a native restore file exists; consumed by exactly
    /// one subsequent attack.
    restore_pending: AtomicBool,
}

impl SessionStore {
    /// Create a fresh session. A `session_name` becomes the id verbatim;
    /// otherwise a UTC `YYYYMMDD_HHMMSS` id is generated.
    pub fn create(
        root: &Path,
        hash_file: &Path,
        session_name: Option<&str>,
        hot_reload_enabled: bool,
    ) -> Result<Self> {
        let session_id = match session_name {
            Some(name) => {
                validate_session_name(name)?;
                name.to_string()
            }
            None => Utc::now().format("%Y%m%d_%H%M%S").to_string(),
        };
        let session_dir = root.join(format!("session_{session_id}"));
        std::fs::create_dir_all(&session_dir)
            .map_err(|e| Error::from_io(e, "create_session", &session_dir))?;
        let potfile = session_dir.join("hashwrap.potfile");

        let now = Utc::now();
        let state = SessionState {
            session_id: session_id.clone(),
            session_name: session_name.map(str::to_string),
            hash_file: hash_file.to_path_buf(),
            potfile,
            status: SessionStatus::Created,
            start_time: now,
            last_checkpoint: now,
            runtime_seconds: 0,
            pending_attacks: Vec::new(),
            completed_attacks: Vec::new(),
            current_attack: None,
            hot_reload_enabled,
            statistics: SessionStatistics::default(),
        };

        let store = Self {
            root: root.to_path_buf(),
            session_file: session_dir.join("session.json"),
            session_dir,
            state: Mutex::new(state),
            last_write: Mutex::new(None),
            restore_pending: AtomicBool::new(false),
        };
        store.checkpoint(true)?;
        store.update_index()?;
        info!("created session {session_id}");
        Ok(store)
    }

    /// Load a session record by id or name, consulting the index when the
    /// conventional directory is absent.
    pub fn load(root: &Path, id: &str) -> Result<SessionState> {
        let direct = root.join(format!("session_{id}")).join("session.json");
        let session_file = if direct.exists() {
            direct
        } else {
            let index = read_index(root)?;
            match index.get(id) {
                Some(entry) => PathBuf::from(&entry.path).join("session.json"),
                None => return Err(session_not_found(id)),
            }
        };
        if !session_file.exists() {
            return Err(session_not_found(id));
        }
        let raw = std::fs::read_to_string(&session_file)
            .map_err(|e| Error::from_io(e, "load_session", &session_file))?;
        let state: SessionState = serde_json::from_str(&raw).map_err(|e| {
            Error::new(
                ErrorKind::Configuration,
                Severity::Critical,
                "load_session",
                "corrupt_session_record",
                e.to_string(),
            )
            .with_context("path", session_file.display().to_string())
        })?;
        Ok(state)
    }

    /// Resume a previous session: validate the hash file still exists, mark
    /// the session running, and arm the restore flag when the cracker left a
    /// native restore file for a named session.
    pub fn resume(root: &Path, id: &str) -> Result<Self> {
        let mut state = Self::load(root, id)?;
        if !state.hash_file.exists() {
            return Err(Error::new(
                ErrorKind::FileAccess,
                Severity::Critical,
                "resume_session",
                "hash_file_missing",
                format!(
                    "session hash file no longer accessible: {}",
                    state.hash_file.display()
                ),
            ));
        }
        let session_dir = root.join(format!("session_{}", state.session_id));
        let restore = state.session_name.is_some() && restore_file(&session_dir, id).exists();
        state.status = SessionStatus::Running;
        // An attack interrupted mid-run never completed; put it back in front
        // of the pending snapshot so the rebuilt queue retries it.
        if let Some(current) = state.current_attack.take() {
            state.pending_attacks.insert(0, current);
        }

        let store = Self {
            root: root.to_path_buf(),
            session_file: session_dir.join("session.json"),
            session_dir,
            state: Mutex::new(state),
            last_write: Mutex::new(None),
            restore_pending: AtomicBool::new(restore),
        };
        store.checkpoint(true)?;
        info!("resumed session {id} (restore={restore})");
        Ok(store)
    }

    pub fn session_dir(&self) -> &Path {
        &self.session_dir
    }

    pub fn state(&self) -> SessionState {
        self.lock_state().clone()
    }

    pub fn session_id(&self) -> String {
        self.lock_state().session_id.clone()
    }

    pub fn potfile(&self) -> PathBuf {
        self.lock_state().potfile.clone()
    }

    /// Path of the cracker-native restore file for this session.
    pub fn restore_file(&self) -> PathBuf {
        let id = self.session_id();
        restore_file(&self.session_dir, &id)
    }

    /// One-shot restore flag: true exactly once after a resume that found a
    /// native restore file.
    pub fn take_restore(&self) -> bool {
        self.restore_pending.swap(false, Ordering::SeqCst)
    }

    /// Take the per-session engine lock, held for the lifetime of a run so a
    /// second engine cannot attach to the same session directory. Dropping
    /// the returned file releases it.
    pub fn lock_instance(&self) -> Result<File> {
        let path = self.session_dir.join("engine.lock");
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| Error::from_io(e, "lock_instance", &path))?;
        file.try_lock_exclusive().map_err(|e| {
            Error::new(
                ErrorKind::Process,
                Severity::Critical,
                "lock_instance",
                "session_busy",
                format!(
                    "another engine instance owns session {}",
                    self.session_id()
                ),
            )
            .with_source(e)
        })?;
        Ok(file)
    }

    /// Replace the pending-attacks snapshot.
    pub fn set_pending(&self, attacks: Vec<Attack>) -> Result<()> {
        self.lock_state().pending_attacks = attacks;
        self.checkpoint(true).map(|_| ())
    }

    /// Record an attack start: drop it from pending, make it current, mark
    /// the session running. Forces a checkpoint so the on-disk record always
    /// trails reality, never leads it.
    pub fn start_attack(&self, attack: &Attack) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.pending_attacks.retain(|a| a.name != attack.name);
            state.current_attack = Some(attack.clone());
            state.status = SessionStatus::Running;
        }
        self.checkpoint(true).map(|_| ())
    }

    /// Record an attack completion and clear the current slot.
    pub fn complete_attack(&self, attack: &Attack, result: AttackResult) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.pending_attacks.retain(|a| a.name != attack.name);
            state.current_attack = None;
            state.statistics.attacks_completed += 1;
            state.completed_attacks.push(CompletedAttack {
                attack: attack.clone(),
                result,
            });
        }
        self.checkpoint(true).map(|_| ())
    }

    pub fn record_skipped_attack(&self) {
        self.lock_state().statistics.attacks_skipped += 1;
    }

    /// Fold index statistics into the session record. Unforced: the next
    /// checkpoint picks it up.
    pub fn record_index_stats(&self, stats: &IndexStats) {
        let mut state = self.lock_state();
        state.statistics.total_hashes = stats.total_hashes;
        state.statistics.cracked_hashes = stats.cracked;
        state.statistics.remaining_hashes = stats.remaining;
    }

    pub fn set_status(&self, status: SessionStatus) -> Result<()> {
        {
            let mut state = self.lock_state();
            state.status = status;
            if status != SessionStatus::Running {
                state.current_attack = None;
            }
        }
        self.checkpoint(true).map(|_| ())
    }

    pub fn pause(&self) -> Result<()> {
        self.set_status(SessionStatus::Paused)
    }

    /// Write the current state to disk. Unforced calls are rate-limited to
    /// one per [`CHECKPOINT_INTERVAL`]. Returns whether a write happened.
    pub fn checkpoint(&self, force: bool) -> Result<bool> {
        {
            let last = self.last_write.lock().unwrap_or_else(|e| e.into_inner());
            if !force {
                if let Some(at) = *last {
                    if at.elapsed() < CHECKPOINT_INTERVAL {
                        return Ok(false);
                    }
                }
            }
        }

        let lock_path = self.session_file.with_extension("lock");
        let lock = acquire_lock(&lock_path)?;

        let snapshot = {
            let mut state = self.lock_state();
            state.last_checkpoint = Utc::now();
            state.runtime_seconds = (state.last_checkpoint - state.start_time)
                .num_seconds()
                .max(0) as u64;
            state.clone()
        };
        let result = write_record_atomic(&self.session_file, &snapshot);

        drop(lock);
        if let Err(e) = std::fs::remove_file(&lock_path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("remove {} failed: {}", lock_path.display(), e);
            }
        }
        result?;

        *self.last_write.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        debug!("checkpointed session {}", snapshot.session_id);
        Ok(true)
    }

    fn update_index(&self) -> Result<()> {
        let (id, dir) = {
            let state = self.lock_state();
            (state.session_id.clone(), self.session_dir.clone())
        };
        let mut index = read_index(&self.root)?;
        index.insert(
            id,
            IndexEntry {
                path: dir.display().to_string(),
                created: Utc::now(),
            },
        );
        write_index(&self.root, &index)
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("session_dir", &self.session_dir)
            .finish()
    }
}

fn restore_file(session_dir: &Path, id: &str) -> PathBuf {
    session_dir.join(format!("{id}.restore"))
}

fn session_not_found(id: &str) -> Error {
    Error::new(
        ErrorKind::FileAccess,
        Severity::Recoverable,
        "load_session",
        "session_not_found",
        format!("session not found: {id}"),
    )
}

/// Take the checkpoint lock with bounded exponential retry (100 ms base).
fn acquire_lock(lock_path: &Path) -> Result<File> {
    let mut attempt = 0u32;
    loop {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(lock_path)
            .map_err(|e| Error::from_io(e, "checkpoint_lock", lock_path))?;
        match file.try_lock_exclusive() {
            Ok(()) => return Ok(file),
            Err(_) if attempt + 1 < LOCK_ATTEMPTS => {
                std::thread::sleep(Duration::from_millis(100u64 << attempt));
                attempt += 1;
            }
            Err(e) => {
                return Err(Error::from_io(e, "checkpoint_lock", lock_path)
                    .with_context("attempts", LOCK_ATTEMPTS));
            }
        }
    }
}

/// Serialize to the sibling tmp file with owner-only permissions, then
/// rename over the canonical record.
fn write_record_atomic<T: Serialize>(target: &Path, value: &T) -> Result<()> {
    let tmp = target.with_extension("tmp");
    let json = serde_json::to_string_pretty(value).map_err(|e| {
        Error::new(
            ErrorKind::Unknown,
            Severity::Critical,
            "checkpoint",
            "serialize_failed",
            e.to_string(),
        )
    })?;
    std::fs::write(&tmp, json).map_err(|e| Error::from_io(e, "checkpoint", &tmp))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| Error::from_io(e, "checkpoint", &tmp))?;
    }
    #[cfg(windows)]
    {
        if target.exists() {
            std::fs::remove_file(target).map_err(|e| Error::from_io(e, "checkpoint", target))?;
        }
    }
    std::fs::rename(&tmp, target).map_err(|e| Error::from_io(e, "checkpoint", target))?;
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    path: String,
    created: DateTime<Utc>,
}

type SessionsIndex = std::collections::BTreeMap<String, IndexEntry>;

fn index_file(root: &Path) -> PathBuf {
    root.join("sessions.json")
}

fn read_index(root: &Path) -> Result<SessionsIndex> {
    let path = index_file(root);
    if !path.exists() {
        return Ok(SessionsIndex::new());
    }
    let raw =
        std::fs::read_to_string(&path).map_err(|e| Error::from_io(e, "read_index", &path))?;
    serde_json::from_str(&raw).map_err(|e| {
        Error::new(
            ErrorKind::Configuration,
            Severity::Critical,
            "read_index",
            "corrupt_sessions_index",
            e.to_string(),
        )
    })
}

fn write_index(root: &Path, index: &SessionsIndex) -> Result<()> {
    std::fs::create_dir_all(root).map_err(|e| Error::from_io(e, "write_index", root))?;
    write_record_atomic(&index_file(root), index)
}

/// Summaries of every session under `root`, newest first.
pub fn list_sessions(root: &Path) -> Result<Vec<SessionSummary>> {
    let mut sessions = Vec::new();
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
        Err(e) => return Err(Error::from_io(e, "list_sessions", root)),
    };
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        let Some(id) = name.strip_prefix("session_") else {
            continue;
        };
        match SessionStore::load(root, id) {
            Ok(state) => sessions.push(SessionSummary {
                id: state.session_id,
                name: state.session_name,
                status: state.status,
                hash_file: state.hash_file,
                total_hashes: state.statistics.total_hashes,
                cracked_hashes: state.statistics.cracked_hashes,
                start_time: state.start_time,
                runtime_seconds: state.runtime_seconds,
            }),
            Err(e) => warn!("skipping unreadable session {name}: {e}"),
        }
    }
    sessions.sort_by(|a, b| b.start_time.cmp(&a.start_time));
    Ok(sessions)
}
