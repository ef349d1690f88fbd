//! Engine: orchestrates analysis, planning, supervised attack execution,
//! hot-reload, and checkpointing for one session.
//!
//! The engine exclusively owns all mutable state. Collaborators (sandbox,
//! rate limiter, error sink) are passed in at construction; the CLI builds
//! the defaults. Typical usage:
//!
//! ```no_run
//! use std::sync::Arc;
//! use hashwrap::engine::{Engine, EngineConfig};
//! use hashwrap::error::ErrorSink;
//! use hashwrap::ratelimit::TokenBucket;
//! use hashwrap::sandbox::PathSandbox;
//! # fn main() -> anyhow::Result<()> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     PathSandbox::new(&[]),
//!     Arc::new(TokenBucket::default()),
//!     Arc::new(ErrorSink::new()),
//! );
//! let report = engine.run_auto(std::path::Path::new("hashes.txt"))?;
//! println!("cracked {}", report.stats.cracked);
//! # Ok(())
//! # }
//! ```
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use chrono::Utc;
use log::{info, warn};

use crate::attack::{AttackResult, ExitDisposition, SuccessTracker};
use crate::command::{CommandBuilder, CommandParams};
use crate::error::{Error, ErrorKind, ErrorSink, Severity};
use crate::identify::{FileAnalysis, analyze_file};
use crate::index::{HashIndex, IndexStats};
use crate::planner::{PasswordPolicy, Resources, generate_plan, hot_reload_plan};
use crate::queue::AttackQueue;
use crate::ratelimit::TokenBucket;
use crate::sandbox::{PathSandbox, validate_hash_format, validate_session_name};
use crate::session::{CompletedAttack, SessionStatus, SessionStore, list_sessions};
use crate::stats::{PasswordAnalysis, analyze_passwords};
use crate::supervisor::{RunOptions, Supervisor};
use crate::watcher::{HashWatcher, WatcherStats};

/// Default wall-clock budget for a single attack.
pub const DEFAULT_ATTACK_TIMEOUT: Duration = Duration::from_secs(3600);
/// Cadence of the hot-reload statistics log line.
const HOT_RELOAD_LOG_INTERVAL: Duration = Duration::from_secs(30);

static SIGNAL_HANDLER: Once = Once::new();

/// Construction-time engine settings.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub sessions_root: PathBuf,
    pub cracker_binary: PathBuf,
    pub session_name: Option<String>,
    pub workload_profile: Option<u32>,
    pub status_timer: Option<u32>,
    pub status_json: bool,
    pub status_file: Option<PathBuf>,
    pub hot_reload: bool,
    pub attack_timeout: Duration,
    pub force_streaming: bool,
    pub policy: Option<PasswordPolicy>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sessions_root: PathBuf::from(crate::session::DEFAULT_SESSIONS_ROOT),
            cracker_binary: PathBuf::from("hashcat"),
            session_name: None,
            workload_profile: None,
            status_timer: None,
            status_json: false,
            status_file: None,
            hot_reload: true,
            attack_timeout: DEFAULT_ATTACK_TIMEOUT,
            force_streaming: false,
            policy: None,
        }
    }
}

/// What one engine run produced; rendered by `report` and `export`.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub session_id: String,
    pub status: SessionStatus,
    pub stats: IndexStats,
    pub completed: Vec<CompletedAttack>,
    pub most_effective: Vec<(String, f64)>,
    pub password_analysis: PasswordAnalysis,
    pub watcher: Option<WatcherStats>,
}

/// Snapshot host resources for the planner.
pub fn detect_resources() -> Resources {
    let cpu_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    let available_memory_mb = read_available_memory_mb().unwrap_or(2048);
    Resources {
        gpu_count: 0,
        cpu_threads,
        available_memory_mb,
    }
}

#[cfg(target_os = "linux")]
fn read_available_memory_mb() -> Option<u64> {
    let meminfo = std::fs::read_to_string("/proc/meminfo").ok()?;
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemAvailable:") {
            let kb: u64 = rest.trim().trim_end_matches(" kB").trim().parse().ok()?;
            return Some(kb / 1024);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_available_memory_mb() -> Option<u64> {
    None
}

/// The orchestrator for one process. See the module docs for usage.
pub struct Engine {
    config: EngineConfig,
    sandbox: PathSandbox,
    limiter: Arc<TokenBucket>,
    errors: Arc<ErrorSink>,
    cancel: Arc<AtomicBool>,
}

impl Engine {
    pub fn new(
        config: EngineConfig,
        sandbox: PathSandbox,
        limiter: Arc<TokenBucket>,
        errors: Arc<ErrorSink>,
    ) -> Self {
        Self {
            config,
            sandbox,
            limiter,
            errors,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Install the one-shot SIGINT/SIGTERM handler: it only sets the sticky
    /// cancel flag; the engine loop observes it at the next polling point,
    /// pauses the session, checkpoints, and exits.
    pub fn install_signal_handler(&self) -> Result<()> {
        let cancel = Arc::clone(&self.cancel);
        let mut result = Ok(());
        SIGNAL_HANDLER.call_once(|| {
            result = ctrlc::set_handler(move || {
                cancel.store(true, Ordering::SeqCst);
            })
            .context("install signal handler");
        });
        result
    }

    /// Fully automated mode: analyze, create a session, plan, execute.
    pub fn run_auto(&self, hash_file: &Path) -> Result<RunReport> {
        let hash_file = self.sandbox.validate_path(hash_file, true)?;

        let analysis = analyze_file(&hash_file, None)?;
        info!(
            "analyzed {}: {} hashes, {} detected types, {} unknown",
            hash_file.display(),
            analysis.total_count,
            analysis.detected.len(),
            analysis.unknown.len()
        );

        let store = SessionStore::create(
            &self.config.sessions_root,
            &hash_file,
            self.config.session_name.as_deref(),
            self.config.hot_reload,
        )?;
        let index = Arc::new(HashIndex::open(
            &hash_file,
            &store.potfile(),
            self.config.force_streaming,
        )?);
        store.record_index_stats(&index.statistics());

        let queue = AttackQueue::new();
        for attack in generate_plan(&analysis, &detect_resources(), self.config.policy.as_ref()) {
            queue.push(attack);
        }
        store.set_pending(queue.snapshot())?;
        info!("planned {} attacks", queue.len());

        self.run_attacks(store, index, queue, Some(analysis))
    }

    /// Resume a checkpointed session: rebuild the queue from the pending
    /// snapshot and honor previously cracked hashes from the potfile.
    pub fn resume(&self, session_id: &str) -> Result<RunReport> {
        let store = SessionStore::resume(&self.config.sessions_root, session_id)?;
        let state = store.state();
        let hash_file = self.sandbox.validate_path(&state.hash_file, true)?;
        let index = Arc::new(HashIndex::open(
            &hash_file,
            &state.potfile,
            self.config.force_streaming,
        )?);
        info!(
            "resuming {}: {}/{} cracked, {} pending attacks",
            session_id,
            index.cracked_count(),
            index.total_count(),
            state.pending_attacks.len()
        );

        let queue = AttackQueue::new();
        for attack in state.pending_attacks {
            queue.push(attack);
        }
        self.run_attacks(store, index, queue, None)
    }

    /// Feed a hash file into a session's ingestion directory, validating
    /// every line first. The running engine's watcher picks it up.
    pub fn add_hashes(&self, session_id: &str, file: &Path) -> Result<usize> {
        if !self.limiter.try_acquire() {
            bail!(Error::new(
                ErrorKind::Resource,
                Severity::Degraded,
                "add_hashes",
                "rate_limited",
                "too many ingestion requests, retry later",
            ));
        }
        validate_session_name(session_id)?;
        // Existence check doubles as the distinct not-found error.
        SessionStore::load(&self.config.sessions_root, session_id)?;
        let file = self.sandbox.validate_path(file, true)?;

        let mut valid = Vec::new();
        let mut dropped = 0usize;
        for line in crate::io::hash_lines(&file, u64::MAX)?.flatten() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }
            match validate_hash_format(trimmed) {
                Ok(hash) => valid.push(hash),
                Err(_) => dropped += 1,
            }
        }
        if dropped > 0 {
            warn!("dropped {dropped} invalid lines from {}", file.display());
        }

        let ingest_dir = self.ingest_dir();
        std::fs::create_dir_all(&ingest_dir)
            .map_err(|e| Error::from_io(e, "add_hashes", &ingest_dir))?;
        let dest = ingest_dir.join(format!(
            "added_{}_{}",
            Utc::now().format("%Y%m%d_%H%M%S"),
            file.file_name().and_then(|n| n.to_str()).unwrap_or("hashes")
        ));
        std::fs::write(&dest, valid.join("\n") + "\n")
            .map_err(|e| Error::from_io(e, "add_hashes", &dest))?;
        info!("queued {} hashes for session {session_id}", valid.len());
        Ok(valid.len())
    }

    /// Session summaries for the `status` command.
    pub fn list_sessions(&self) -> Result<Vec<crate::session::SessionSummary>> {
        if !self.limiter.try_acquire() {
            bail!("too many status queries, retry later");
        }
        Ok(list_sessions(&self.config.sessions_root)?)
    }

    fn ingest_dir(&self) -> PathBuf {
        self.config.sessions_root.join("incoming_hashes")
    }

    fn run_attacks(
        &self,
        store: SessionStore,
        index: Arc<HashIndex>,
        queue: AttackQueue,
        analysis: Option<FileAnalysis>,
    ) -> Result<RunReport> {
        let session_id = store.session_id();
        // Held until this run finishes; a second engine on the same session
        // directory fails fast instead of fighting over the child process.
        let _instance_lock = store.lock_instance()?;
        let supervisor = Supervisor::new(&session_id)?;
        let builder = CommandBuilder::new(self.sandbox.clone());
        let dominant_mode = analysis.as_ref().and_then(|a| a.dominant_mode());
        let mut tracker = SuccessTracker::new();

        let watcher = if store.state().hot_reload_enabled {
            let watcher = HashWatcher::new(
                Arc::clone(&index),
                &self.sandbox,
                Arc::clone(&self.limiter),
                &self.ingest_dir(),
            )?;
            watcher.add_watch_file(index.hash_file())?;
            watcher.start();
            info!("hot-reload enabled, drop files in {}", watcher.ingest_dir().display());
            Some(watcher)
        } else {
            None
        };

        let signal_rx = index.take_signal_receiver();
        let printer = self.spawn_status_printer(&supervisor);

        let outcome = self.attack_loop(
            &store,
            &index,
            &queue,
            &supervisor,
            &builder,
            dominant_mode,
            &mut tracker,
            signal_rx.as_ref(),
        );

        // Teardown happens on every exit path: watcher first (no further
        // ingestion), then temp files, then the final checkpoint.
        if let Some(watcher) = &watcher {
            watcher.stop();
        }
        let summary_path = store.session_dir().join("status_summary.json");
        if let Err(e) = supervisor.export_summary(&summary_path) {
            warn!("status summary export failed: {e}");
        }
        index.shutdown();

        let final_status = match &outcome {
            Ok(paused) if *paused => SessionStatus::Paused,
            Ok(_) => SessionStatus::Completed,
            Err(_) => SessionStatus::Error,
        };
        store.record_index_stats(&index.statistics());
        store.set_status(final_status)?;
        drop(supervisor);
        if let Some(handle) = printer {
            let _ = handle.join();
        }

        if let Err(e) = outcome {
            let crash_dir = self.config.sessions_root.join("crash_reports");
            if let Ok(report) = self.errors.write_crash_report(&crash_dir, &e) {
                warn!("crash report written to {}", report.display());
            }
            return Err(e.into());
        }

        let stats = index.statistics();
        let password_analysis = analyze_passwords(&index.cracked_plaintexts());
        if let Some(followup) = crate::stats::suggest_followup(&password_analysis) {
            info!("cracked-password patterns suggest a follow-up: {}", followup.name);
        }
        Ok(RunReport {
            session_id,
            status: final_status,
            stats,
            completed: store.state().completed_attacks,
            most_effective: tracker.most_effective(5),
            password_analysis,
            watcher: watcher.map(|w| w.stats()),
        })
    }

    /// The core loop. `Ok(true)` means the run stopped early (pause), and
    /// `Ok(false)` a natural finish. `Err` is fatal.
    #[allow(clippy::too_many_arguments)]
    fn attack_loop(
        &self,
        store: &SessionStore,
        index: &Arc<HashIndex>,
        queue: &AttackQueue,
        supervisor: &Supervisor,
        builder: &CommandBuilder,
        dominant_mode: Option<u32>,
        tracker: &mut SuccessTracker,
        signal_rx: Option<&Receiver<usize>>,
    ) -> std::result::Result<bool, Error> {
        let session_name = store.state().session_name;
        let mut attack_num = 0u32;
        let mut last_hot_reload_log = Instant::now();

        while index.should_continue() {
            if self.cancel.load(Ordering::SeqCst) {
                info!("interrupted, saving session state");
                store.pause()?;
                return Ok(true);
            }

            // Hot-reload: drain the signal channel; any value means at least
            // one batch arrived.
            if let Some(rx) = signal_rx {
                let mut new_hashes = 0usize;
                while let Ok(n) = rx.try_recv() {
                    new_hashes += n;
                }
                if new_hashes > 0 {
                    let stats = index.statistics();
                    info!(
                        "hot-reload: {} new hashes, total now {}",
                        new_hashes, stats.total_hashes
                    );
                    store.record_index_stats(&stats);
                    store.checkpoint(true)?;
                    for attack in hot_reload_plan(dominant_mode) {
                        queue.push(attack);
                    }
                    store.set_pending(queue.snapshot())?;
                }
            }
            if last_hot_reload_log.elapsed() >= HOT_RELOAD_LOG_INTERVAL {
                last_hot_reload_log = Instant::now();
                let stats = index.statistics();
                info!(
                    "progress: {}/{} cracked ({:.1}%)",
                    stats.cracked, stats.total_hashes, stats.success_rate
                );
            }

            let Some(attack) = queue.pop() else {
                info!("no more attacks in queue");
                break;
            };
            attack_num += 1;
            info!("attack #{}: {}", attack_num, attack.name);

            if let Err(e) = crate::sandbox::validate_attack_name(&attack.name) {
                self.errors.record(&e);
                store.record_skipped_attack();
                continue;
            }
            store.start_attack(&attack)?;
            let remaining_file = index.materialize_remaining().map_err(|e| {
                Error::new(
                    ErrorKind::FileAccess,
                    Severity::Critical,
                    "materialize_remaining",
                    "materialize_failed",
                    e.to_string(),
                )
            })?;

            let params = CommandParams {
                cracker_binary: self.config.cracker_binary.clone(),
                potfile: store.potfile(),
                session: session_name.clone(),
                restore: store.take_restore(),
                workload_profile: self.config.workload_profile,
                status_timer: self.config.status_timer,
                status_json: self.config.status_json,
            };

            let argv = match builder.build(&attack, &remaining_file, &params) {
                Ok(argv) => argv,
                Err(e) => {
                    self.errors.record(&e);
                    index.secure_delete(&remaining_file);
                    if e.severity == Severity::Fatal {
                        store.set_status(SessionStatus::Error)?;
                        return Err(e);
                    }
                    // Critical: this attack only; the engine advances.
                    warn!("skipping attack '{}': {e}", attack.name);
                    store.record_skipped_attack();
                    store.complete_attack(
                        &attack,
                        AttackResult {
                            attack_name: attack.name.clone(),
                            disposition: ExitDisposition::Failed,
                            cracked_count: 0,
                            duration_secs: 0,
                            exit_code: None,
                            completed_at: Utc::now(),
                        },
                    )?;
                    continue;
                }
            };

            let before_cracked = index.cracked_count();
            let before_remaining = index.remaining_count();
            let opts = RunOptions {
                timeout: Some(self.config.attack_timeout),
                cancel: Arc::clone(&self.cancel),
                status_json: self.config.status_json,
            };
            let run = supervisor.run(&argv, &attack, index, opts);

            let reload = index.reload_potfile(Some(&attack.name)).map_err(|e| {
                Error::new(
                    ErrorKind::FileAccess,
                    Severity::Critical,
                    "reload_potfile",
                    "reload_potfile_failed",
                    e.to_string(),
                )
            })?;
            index.secure_delete(&remaining_file);

            let outcome = match run {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.errors.record(&e);
                    warn!("attack '{}' failed to run: {e}", attack.name);
                    store.record_skipped_attack();
                    store.complete_attack(
                        &attack,
                        AttackResult {
                            attack_name: attack.name.clone(),
                            disposition: ExitDisposition::Failed,
                            cracked_count: 0,
                            duration_secs: 0,
                            exit_code: None,
                            completed_at: Utc::now(),
                        },
                    )?;
                    continue;
                }
            };

            let cracked_count = index.cracked_count().saturating_sub(before_cracked);
            if cracked_count > 0 {
                info!("cracked {cracked_count} new hashes");
            }
            tracker.update(&attack, cracked_count, before_remaining);
            store.record_index_stats(&index.statistics());

            match outcome.disposition {
                ExitDisposition::Timeout | ExitDisposition::Cancelled => {
                    // The keyspace was not finished, so the attack does not
                    // count as completed: requeue it for a later resume and
                    // leave the session paused.
                    queue.push(attack);
                    store.set_pending(queue.snapshot())?;
                    store.pause()?;
                    return Ok(true);
                }
                ExitDisposition::Failed => {
                    let e = Error::process(
                        "run_attack",
                        "cracker_failed",
                        format!("cracker exited abnormally ({:?})", outcome.exit_code),
                    );
                    self.errors.record(&e);
                    store.complete_attack(
                        &attack,
                        AttackResult {
                            attack_name: attack.name.clone(),
                            disposition: outcome.disposition,
                            cracked_count,
                            duration_secs: outcome.duration.as_secs(),
                            exit_code: outcome.exit_code,
                            completed_at: Utc::now(),
                        },
                    )?;
                }
                ExitDisposition::Completed | ExitDisposition::Exhausted => {
                    store.complete_attack(
                        &attack,
                        AttackResult {
                            attack_name: attack.name.clone(),
                            disposition: outcome.disposition,
                            cracked_count,
                            duration_secs: outcome.duration.as_secs(),
                            exit_code: outcome.exit_code,
                            completed_at: Utc::now(),
                        },
                    )?;
                }
            }

            if reload.all_cracked || !index.should_continue() {
                info!("all hashes cracked");
                break;
            }
        }
        Ok(false)
    }

    /// Drain status events to the log, and to the status file when set.
    /// Returns `None` when nothing consumes the events.
    fn spawn_status_printer(
        &self,
        supervisor: &Supervisor,
    ) -> Option<std::thread::JoinHandle<()>> {
        let status_file = self.config.status_file.clone();
        let json = self.config.status_json;
        let rx = supervisor.subscribe();
        let handle = std::thread::Builder::new()
            .name("status-printer".to_string())
            .spawn(move || {
                // Ends when the supervisor (and with it every sender) drops.
                while let Ok(event) = rx.recv() {
                    let line = if json {
                        serde_json::to_string(&event).unwrap_or_default()
                    } else {
                        crate::report::format_status_event(&event)
                    };
                    info!("{line}");
                    if let Some(path) = &status_file {
                        if let Err(e) = append_line(path, &line) {
                            warn!("status file write failed: {e}");
                        }
                    }
                }
            })
            .ok()?;
        Some(handle)
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").field("config", &self.config).finish()
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{line}")
}
