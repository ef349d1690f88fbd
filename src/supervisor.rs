//! Cracker process supervision.
//!
//! Runs one external cracker at a time: spawns it in its own process group
//! with a restricted environment, parses its periodic status output (native
//! text or the JSON blob), tails the potfile through the index while the
//! child runs, and turns cancellation, timeouts, and pause/resume requests
//! into process-group signals. Status events fan out to subscribers over
//! bounded channels and accumulate in a history buffer for summary export.
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, sync_channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::attack::{Attack, ExitDisposition};
use crate::error::{Error, Result};
use crate::index::HashIndex;
use crate::sandbox::validate_session_name;

/// Default interval between published status events.
pub const STATUS_INTERVAL: Duration = Duration::from_secs(10);
/// Interval between potfile polls while a child runs.
const POTFILE_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Grace period between the polite and the forceful group signal.
const TERMINATION_GRACE: Duration = Duration::from_secs(10);
/// Hard deadline for the child to die after a forceful kill.
const KILL_DEADLINE: Duration = Duration::from_secs(5);
/// Poll cadence of the wait loop.
const WAIT_POLL: Duration = Duration::from_millis(100);
/// Subscriber channel depth; a slow subscriber loses events, never blocks us.
const SUBSCRIBER_BOUND: usize = 32;

struct StatusPatterns {
    status: Regex,
    speed: Regex,
    progress: Regex,
    recovered: Regex,
    time_started: Regex,
    time_estimated: Regex,
    temperature: Regex,
    util: Regex,
    rejected: Regex,
    restore_point: Regex,
}

static PATTERNS: LazyLock<StatusPatterns> = LazyLock::new(|| StatusPatterns {
    status: Regex::new(r"Status\.*: (.+)").expect("status regex"),
    speed: Regex::new(r"Speed\.#\d+\.*: *(\d+(?:\.\d+)?)\s*([kMGT]?H/s)").expect("speed regex"),
    progress: Regex::new(r"Progress\.*: (\d+)/(\d+) \((\d+(?:\.\d+)?)%\)").expect("progress regex"),
    recovered: Regex::new(r"Recovered\.*: (\d+)/(\d+) \((\d+(?:\.\d+)?)%\)")
        .expect("recovered regex"),
    time_started: Regex::new(r"Time\.Started\.*: (.+)").expect("time started regex"),
    time_estimated: Regex::new(r"Time\.Estimated\.*: (.+)").expect("time estimated regex"),
    temperature: Regex::new(r"Temp:\s*(\d+)c").expect("temperature regex"),
    util: Regex::new(r"Util\.#\d+\.*: *(\d+)%").expect("util regex"),
    rejected: Regex::new(r"Rejected\.*: (\d+)").expect("rejected regex"),
    restore_point: Regex::new(r"Restore\.Point\.*: (\d+)").expect("restore point regex"),
});

/// One parsed status block, unit-normalized.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawStatus {
    pub label: String,
    /// Per-device speeds in H/s.
    pub device_speeds: Vec<u64>,
    pub progress: u64,
    pub progress_total: u64,
    pub progress_percent: f64,
    pub recovered: u64,
    pub recovered_total: u64,
    pub recovered_percent: f64,
    pub time_started: String,
    pub time_estimated: String,
    pub temperatures: Vec<u32>,
    pub utilizations: Vec<u32>,
    pub rejected: u64,
    pub restore_point: u64,
}

/// Normalize a speed reading to hashes per second.
pub fn normalize_speed(value: f64, unit: &str) -> u64 {
    let multiplier: f64 = match unit {
        "kH/s" => 1e3,
        "MH/s" => 1e6,
        "GH/s" => 1e9,
        "TH/s" => 1e12,
        _ => 1.0,
    };
    (value * multiplier) as u64
}

/// A buffered chunk of child output is worth parsing once it holds the
/// closing fields of a status block or has clearly overrun one.
pub fn is_status_block_complete(buffer: &str) -> bool {
    buffer.contains("Time.Estimated")
        || buffer.contains("Rejected")
        || buffer.contains("[s]tatus")
        || buffer.lines().count() > 10
}

/// Parse one native status block. Returns `None` for blocks carrying no
/// progress or recovery figures (banner output, prompts).
pub fn parse_status_block(output: &str) -> Option<RawStatus> {
    let mut status = RawStatus::default();
    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if let Some(m) = PATTERNS.status.captures(line) {
            status.label = m[1].trim().to_string();
        }
        if let Some(m) = PATTERNS.speed.captures(line) {
            let value: f64 = m[1].parse().unwrap_or(0.0);
            status.device_speeds.push(normalize_speed(value, &m[2]));
        }
        if let Some(m) = PATTERNS.progress.captures(line) {
            status.progress = m[1].parse().unwrap_or(0);
            status.progress_total = m[2].parse().unwrap_or(0);
            status.progress_percent = m[3].parse().unwrap_or(0.0);
        }
        if let Some(m) = PATTERNS.recovered.captures(line) {
            status.recovered = m[1].parse().unwrap_or(0);
            status.recovered_total = m[2].parse().unwrap_or(0);
            status.recovered_percent = m[3].parse().unwrap_or(0.0);
        }
        if let Some(m) = PATTERNS.time_started.captures(line) {
            status.time_started = m[1].trim().to_string();
        }
        if let Some(m) = PATTERNS.time_estimated.captures(line) {
            status.time_estimated = m[1].trim().to_string();
        }
        if let Some(m) = PATTERNS.temperature.captures(line) {
            status.temperatures.push(m[1].parse().unwrap_or(0));
        }
        if let Some(m) = PATTERNS.util.captures(line) {
            status.utilizations.push(m[1].parse().unwrap_or(0));
        }
        if let Some(m) = PATTERNS.rejected.captures(line) {
            status.rejected = m[1].parse().unwrap_or(0);
        }
        if let Some(m) = PATTERNS.restore_point.captures(line) {
            status.restore_point = m[1].parse().unwrap_or(0);
        }
    }
    if status.progress_total > 0 || status.recovered_total > 0 {
        Some(status)
    } else {
        None
    }
}

/// Parse one line of `--status-json` output into the same shape.
pub fn parse_json_status(line: &str) -> Option<RawStatus> {
    let v: serde_json::Value = serde_json::from_str(line.trim()).ok()?;
    let mut status = RawStatus {
        label: v["status"].as_str().unwrap_or("Running").to_string(),
        ..RawStatus::default()
    };
    if let Some(progress) = v["progress"].as_array() {
        status.progress = progress.first().and_then(|p| p.as_u64()).unwrap_or(0);
        status.progress_total = progress.get(1).and_then(|p| p.as_u64()).unwrap_or(0);
        if status.progress_total > 0 {
            status.progress_percent =
                status.progress as f64 / status.progress_total as f64 * 100.0;
        }
    }
    if let Some(recovered) = v["recovered_hashes"].as_array() {
        status.recovered = recovered.first().and_then(|p| p.as_u64()).unwrap_or(0);
        status.recovered_total = recovered.get(1).and_then(|p| p.as_u64()).unwrap_or(0);
        if status.recovered_total > 0 {
            status.recovered_percent =
                status.recovered as f64 / status.recovered_total as f64 * 100.0;
        }
    }
    if let Some(devices) = v["devices"].as_array() {
        for dev in devices {
            status.device_speeds.push(dev["speed"].as_u64().unwrap_or(0));
            status.temperatures.push(dev["temp"].as_u64().unwrap_or(0) as u32);
            status.utilizations.push(dev["util"].as_u64().unwrap_or(0) as u32);
        }
    }
    status.rejected = v["rejected"].as_u64().unwrap_or(0);
    if let Some(eta) = v["estimated_stop"].as_u64() {
        status.time_estimated = eta.to_string();
    }
    if status.progress_total > 0 || status.recovered_total > 0 {
        Some(status)
    } else {
        None
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct DeviceStatus {
    pub id: usize,
    pub speed: u64,
    pub temperature: u32,
    pub utilization: u32,
}

/// The record delivered to status subscribers.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StatusEvent {
    pub session_id: String,
    pub attack_name: String,
    pub progress_percent: f64,
    pub speed_total: u64,
    pub devices: Vec<DeviceStatus>,
    pub recovered: u64,
    pub recovered_total: u64,
    pub runtime_secs: u64,
    pub eta: String,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    fn from_raw(session_id: &str, attack_name: &str, raw: &RawStatus, runtime: Duration) -> Self {
        let devices = raw
            .device_speeds
            .iter()
            .enumerate()
            .map(|(id, &speed)| DeviceStatus {
                id,
                speed,
                temperature: raw.temperatures.get(id).copied().unwrap_or(0),
                utilization: raw.utilizations.get(id).copied().unwrap_or(0),
            })
            .collect();
        Self {
            session_id: session_id.to_string(),
            attack_name: attack_name.to_string(),
            progress_percent: raw.progress_percent,
            speed_total: raw.device_speeds.iter().sum(),
            devices,
            recovered: raw.recovered,
            recovered_total: raw.recovered_total,
            runtime_secs: runtime.as_secs(),
            eta: raw.time_estimated.clone(),
            timestamp: Utc::now(),
        }
    }
}

/// Options for one supervised run.
pub struct RunOptions {
    pub timeout: Option<Duration>,
    pub cancel: Arc<AtomicBool>,
    /// Parse `--status-json` lines instead of the native text blocks.
    pub status_json: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            cancel: Arc::new(AtomicBool::new(false)),
            status_json: false,
        }
    }
}

/// Outcome of one supervised run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub disposition: ExitDisposition,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub final_status: Option<RawStatus>,
}

/// Owns the child cracker process for the engine. One child at a time.
pub struct Supervisor {
    session_id: String,
    update_interval: Duration,
    subscribers: Mutex<Vec<SyncSender<StatusEvent>>>,
    history: Mutex<Vec<StatusEvent>>,
    child_pgid: Mutex<Option<u32>>,
    paused: AtomicBool,
    paused_since: Mutex<Option<Instant>>,
    paused_total: Mutex<Duration>,
}

impl Supervisor {
    pub fn new(session_id: &str) -> Result<Self> {
        validate_session_name(session_id)?;
        Ok(Self {
            session_id: session_id.to_string(),
            update_interval: STATUS_INTERVAL,
            subscribers: Mutex::new(Vec::new()),
            history: Mutex::new(Vec::new()),
            child_pgid: Mutex::new(None),
            paused: AtomicBool::new(false),
            paused_since: Mutex::new(None),
            paused_total: Mutex::new(Duration::ZERO),
        })
    }

    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// Register a status subscriber. Delivery is strictly ordered and
    /// non-blocking; a full channel drops the event for that subscriber.
    pub fn subscribe(&self) -> Receiver<StatusEvent> {
        let (tx, rx) = sync_channel(SUBSCRIBER_BOUND);
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    pub fn history(&self) -> Vec<StatusEvent> {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Write the accumulated status history as a JSON session summary.
    pub fn export_summary(&self, path: &Path) -> Result<()> {
        #[derive(Serialize)]
        struct Summary<'a> {
            session_id: &'a str,
            total_updates: usize,
            events: &'a [StatusEvent],
        }
        let history = self.history();
        let summary = Summary {
            session_id: &self.session_id,
            total_updates: history.len(),
            events: &history,
        };
        let json = serde_json::to_string_pretty(&summary).map_err(|e| {
            Error::new(
                crate::error::ErrorKind::Unknown,
                crate::error::Severity::Critical,
                "export_summary",
                "serialize_failed",
                e.to_string(),
            )
        })?;
        std::fs::write(path, json).map_err(|e| Error::from_io(e, "export_summary", path))?;
        Ok(())
    }

    /// Suspend the running child (its whole process group). No-op when idle.
    pub fn pause(&self) {
        if self.paused.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.paused_since.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        if let Some(pgid) = self.current_pgid() {
            #[cfg(unix)]
            signal_group(pgid, libc::SIGSTOP);
            info!("paused attack (pgid {pgid})");
        }
    }

    /// Resume a paused child and credit the paused time against the timeout.
    pub fn resume(&self) {
        if !self.paused.swap(false, Ordering::SeqCst) {
            return;
        }
        if let Some(since) = self
            .paused_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            *self.paused_total.lock().unwrap_or_else(|e| e.into_inner()) += since.elapsed();
        }
        if let Some(pgid) = self.current_pgid() {
            #[cfg(unix)]
            signal_group(pgid, libc::SIGCONT);
            info!("resumed attack (pgid {pgid})");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Run one attack to completion. Blocks until the child exits, is
    /// cancelled, or exceeds the (pause-adjusted) timeout.
    pub fn run(
        &self,
        argv: &[String],
        attack: &Attack,
        index: &Arc<HashIndex>,
        opts: RunOptions,
    ) -> Result<RunOutcome> {
        let (program, args) = argv.split_first().ok_or_else(|| {
            Error::validation("run_attack", "empty argv")
        })?;
        {
            let mut pgid = self.child_pgid.lock().unwrap_or_else(|e| e.into_inner());
            if pgid.is_some() {
                return Err(Error::process(
                    "run_attack",
                    "attack_already_running",
                    "a cracker process is already supervised",
                ));
            }
            *pgid = Some(0); // reserved; replaced once the child is spawned
        }
        *self.paused_total.lock().unwrap_or_else(|e| e.into_inner()) = Duration::ZERO;

        let spawn = spawn_in_group(program, args);
        let mut child = match spawn {
            Ok(child) => child,
            Err(e) => {
                *self.child_pgid.lock().unwrap_or_else(|e| e.into_inner()) = None;
                return Err(e);
            }
        };
        let pgid = child.id();
        *self.child_pgid.lock().unwrap_or_else(|e| e.into_inner()) = Some(pgid);
        info!("launched cracker pid {} for attack '{}'", pgid, attack.name);

        let started = Instant::now();
        let stop = Arc::new(AtomicBool::new(false));
        let last_status: Arc<Mutex<Option<RawStatus>>> = Arc::new(Mutex::new(None));

        // Reader 1: child stdout -> status blocks -> subscriber broadcast.
        let stdout = child.stdout.take();
        let reader_handle = stdout.map(|stdout| {
            let last_status = Arc::clone(&last_status);
            let session_id = self.session_id.clone();
            let attack_name = attack.name.clone();
            let interval = self.update_interval;
            let subscribers = self.snapshot_subscribers();
            let history = HistoryHandle {
                events: Arc::new(Mutex::new(Vec::new())),
            };
            let thread_history = history.clone();
            let status_json = opts.status_json;
            let handle = std::thread::Builder::new()
                .name("status-reader".to_string())
                .spawn(move || {
                    read_status_stream(
                        stdout,
                        status_json,
                        &last_status,
                        &session_id,
                        &attack_name,
                        started,
                        interval,
                        &subscribers,
                        &thread_history,
                    );
                })
                .expect("spawn status reader");
            (handle, history)
        });

        // Reader 2: potfile tail, through the index, every ~5 s.
        let potfile_handle = {
            let stop = Arc::clone(&stop);
            let index = Arc::clone(index);
            let attack_name = attack.name.clone();
            std::thread::Builder::new()
                .name("potfile-watcher".to_string())
                .spawn(move || {
                    let mut last_poll = Instant::now();
                    while !stop.load(Ordering::SeqCst) {
                        if last_poll.elapsed() >= POTFILE_POLL_INTERVAL {
                            last_poll = Instant::now();
                            if let Err(e) = index.reload_potfile(Some(&attack_name)) {
                                warn!("potfile poll failed: {e}");
                            }
                        }
                        std::thread::sleep(WAIT_POLL);
                    }
                })
                .expect("spawn potfile watcher")
        };

        // Wait loop: poll for exit, cancellation, and the pause-adjusted
        // deadline.
        let mut disposition = None;
        let mut exit_code = None;
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    exit_code = status.code();
                    disposition = Some(match exit_code {
                        Some(code) => ExitDisposition::from_exit_code(code),
                        None => ExitDisposition::Failed, // killed by signal
                    });
                    break;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("wait on cracker failed: {e}");
                    disposition = Some(ExitDisposition::Failed);
                    break;
                }
            }

            if opts.cancel.load(Ordering::SeqCst) {
                info!("cancellation observed, terminating cracker group");
                exit_code = self.terminate_group(&mut child);
                disposition = Some(ExitDisposition::Cancelled);
                break;
            }

            if let Some(timeout) = opts.timeout {
                if self.effective_elapsed(started) >= timeout {
                    info!("attack '{}' exceeded {:?}, terminating", attack.name, timeout);
                    exit_code = self.terminate_group(&mut child);
                    disposition = Some(ExitDisposition::Timeout);
                    break;
                }
            }

            std::thread::sleep(WAIT_POLL);
        }

        stop.store(true, Ordering::SeqCst);
        let mut final_status = None;
        if let Some((handle, history)) = reader_handle {
            let _ = handle.join();
            let collected = history.take();
            self.history
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .extend(collected);
            final_status = last_status.lock().unwrap_or_else(|e| e.into_inner()).clone();
        }
        let _ = potfile_handle.join();
        *self.child_pgid.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.paused.store(false, Ordering::SeqCst);

        let disposition = disposition.unwrap_or(ExitDisposition::Failed);
        debug!(
            "attack '{}' finished: {:?} (exit {:?})",
            attack.name, disposition, exit_code
        );
        Ok(RunOutcome {
            disposition,
            exit_code,
            duration: started.elapsed(),
            final_status,
        })
    }

    /// Elapsed run time minus time spent paused.
    fn effective_elapsed(&self, started: Instant) -> Duration {
        let mut paused = *self.paused_total.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(since) = *self.paused_since.lock().unwrap_or_else(|e| e.into_inner()) {
            if self.is_paused() {
                paused += since.elapsed();
            }
        }
        started.elapsed().saturating_sub(paused)
    }

    /// Graceful-then-forceful group termination. Returns the exit code when
    /// the child was reaped.
    fn terminate_group(&self, child: &mut Child) -> Option<i32> {
        let pgid = self.current_pgid();
        // A stopped group cannot act on SIGTERM; wake it first.
        if self.is_paused() {
            if let Some(pgid) = pgid {
                #[cfg(unix)]
                signal_group(pgid, libc::SIGCONT);
            }
        }
        #[cfg(unix)]
        if let Some(pgid) = pgid {
            signal_group(pgid, libc::SIGTERM);
            if let Some(code) = wait_with_deadline(child, TERMINATION_GRACE) {
                return code;
            }
            warn!("cracker ignored SIGTERM, killing group {pgid}");
            signal_group(pgid, libc::SIGKILL);
            if let Some(code) = wait_with_deadline(child, KILL_DEADLINE) {
                return code;
            }
        }
        // Non-unix platforms and last-resort cleanup.
        if let Err(e) = child.kill() {
            warn!("kill failed: {e}");
        }
        child.wait().ok().and_then(|s| s.code())
    }

    fn current_pgid(&self) -> Option<u32> {
        self.child_pgid
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .filter(|&pgid| pgid != 0)
    }

    fn snapshot_subscribers(&self) -> Vec<SyncSender<StatusEvent>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("session_id", &self.session_id)
            .field("paused", &self.is_paused())
            .finish()
    }
}

#[derive(Clone)]
struct HistoryHandle {
    events: Arc<Mutex<Vec<StatusEvent>>>,
}

impl HistoryHandle {
    fn push(&self, event: StatusEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }

    fn take(&self) -> Vec<StatusEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(|e| e.into_inner()))
    }
}

/// Spawn the child with piped output, a clean environment, and its own
/// process group so helpers it forks are collected by group signals.
fn spawn_in_group(program: &str, args: &[String]) -> Result<Child> {
    let mut command = Command::new(program);
    command
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .env_clear();
    // Clean copy: only the variables the cracker needs, plus explicit
    // overrides.
    for key in ["PATH", "HOME", "TMPDIR", "LANG", "LC_ALL"] {
        if let Some(value) = std::env::var_os(key) {
            command.env(key, value);
        }
    }
    command.env("HASHCAT_BRAIN_HOST", "disabled");
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        command.process_group(0);
    }
    command.spawn().map_err(|e| {
        Error::from_io(e, "spawn_cracker", Path::new(program)).with_context("program", program)
    })
}

#[cfg(unix)]
fn signal_group(pgid: u32, signal: libc::c_int) {
    // Safety: plain killpg on a pgid we created; failure is reported by errno
    // and harmless here (the group may already be gone).
    let rc = unsafe { libc::killpg(pgid as libc::pid_t, signal) };
    if rc != 0 {
        debug!(
            "killpg({pgid}, {signal}) failed: {}",
            std::io::Error::last_os_error()
        );
    }
}

/// Poll-wait for the child with a deadline. `Some(code)` when reaped.
#[cfg(unix)]
fn wait_with_deadline(child: &mut Child, deadline: Duration) -> Option<Option<i32>> {
    let start = Instant::now();
    while start.elapsed() < deadline {
        match child.try_wait() {
            Ok(Some(status)) => return Some(status.code()),
            Ok(None) => std::thread::sleep(WAIT_POLL),
            Err(_) => return Some(None),
        }
    }
    None
}

#[allow(clippy::too_many_arguments)]
fn read_status_stream(
    stdout: std::process::ChildStdout,
    status_json: bool,
    last_status: &Mutex<Option<RawStatus>>,
    session_id: &str,
    attack_name: &str,
    started: Instant,
    interval: Duration,
    subscribers: &[SyncSender<StatusEvent>],
    history: &HistoryHandle,
) {
    // The loop ends at EOF, which the child's exit (or kill) guarantees;
    // buffered output written before the exit is still drained and parsed.
    let reader = BufReader::new(stdout);
    let mut buffer = String::new();
    let mut last_publish: Option<Instant> = None;
    for line in reader.lines() {
        let Ok(line) = line else { break };
        let parsed = if status_json {
            parse_json_status(&line)
        } else {
            buffer.push_str(&line);
            buffer.push('\n');
            if is_status_block_complete(&buffer) {
                let parsed = parse_status_block(&buffer);
                buffer.clear();
                parsed
            } else {
                None
            }
        };
        let Some(raw) = parsed else { continue };
        *last_status.lock().unwrap_or_else(|e| e.into_inner()) = Some(raw.clone());

        let due = last_publish.is_none_or(|at| at.elapsed() >= interval);
        if due {
            last_publish = Some(Instant::now());
            let event = StatusEvent::from_raw(session_id, attack_name, &raw, started.elapsed());
            history.push(event.clone());
            for tx in subscribers {
                // Non-blocking: slow subscribers miss events.
                let _ = tx.try_send(event.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::priority;
    use tempfile::tempdir;

    const SAMPLE_BLOCK: &str = "\
Session..........: hashwrap
Status...........: Running
Speed.#1.........:  1234.5 MH/s (5.2ms)
Speed.#2.........:   800 kH/s (5.2ms)
Progress.........: 52428800/1000000000 (5.2%)
Recovered........: 2/10 (20.0%)
Time.Started.....: Sat Aug  1 10:00:00 2026
Time.Estimated...: Sat Aug  1 11:00:00 2026
Util.#1..........:  98%
Temp:  61c
Rejected.........: 17
Restore.Point....: 4096
";

    fn args(argv: &[&str]) -> Vec<String> {
        argv.iter().map(|s| s.to_string()).collect()
    }

    fn sample_index(dir: &std::path::Path) -> Arc<HashIndex> {
        let hashes = dir.join("hashes.txt");
        let pot = dir.join("pot");
        std::fs::write(&hashes, "aaaa\nbbbb\n").unwrap();
        std::fs::write(&pot, "").unwrap();
        Arc::new(HashIndex::open(&hashes, &pot, false).unwrap())
    }

    #[test]
    fn speed_units_normalize_to_hashes_per_second() {
        assert_eq!(normalize_speed(1.0, "H/s"), 1);
        assert_eq!(normalize_speed(2.5, "kH/s"), 2_500);
        assert_eq!(normalize_speed(1.5, "MH/s"), 1_500_000);
        assert_eq!(normalize_speed(2.0, "GH/s"), 2_000_000_000);
        assert_eq!(normalize_speed(1.0, "TH/s"), 1_000_000_000_000);
    }

    #[test]
    fn parses_a_native_status_block() {
        let status = parse_status_block(SAMPLE_BLOCK).unwrap();
        assert_eq!(status.label, "Running");
        assert_eq!(status.device_speeds, vec![1_234_500_000, 800_000]);
        assert_eq!(status.progress, 52_428_800);
        assert_eq!(status.progress_total, 1_000_000_000);
        assert!((status.progress_percent - 5.2).abs() < 1e-9);
        assert_eq!(status.recovered, 2);
        assert_eq!(status.recovered_total, 10);
        assert_eq!(status.temperatures, vec![61]);
        assert_eq!(status.utilizations, vec![98]);
        assert_eq!(status.rejected, 17);
        assert_eq!(status.restore_point, 4096);
        assert_eq!(status.time_estimated, "Sat Aug  1 11:00:00 2026");
    }

    #[test]
    fn banner_output_is_not_a_status() {
        assert!(parse_status_block("hashcat (v7.0.0) starting...\n").is_none());
    }

    #[test]
    fn completeness_heuristic() {
        assert!(is_status_block_complete("Time.Estimated...: soon\n"));
        assert!(is_status_block_complete("Rejected.........: 0\n"));
        assert!(!is_status_block_complete("Status...........: Running\n"));
        let many_lines = "x\n".repeat(11);
        assert!(is_status_block_complete(&many_lines));
    }

    #[test]
    fn json_status_parses_to_the_same_shape() {
        let line = r#"{"status":"Running","progress":[500,1000],"recovered_hashes":[1,4],"rejected":2,"devices":[{"device_id":1,"speed":1000000,"temp":70,"util":95}],"estimated_stop":1754040000}"#;
        let status = parse_json_status(line).unwrap();
        assert_eq!(status.progress, 500);
        assert!((status.progress_percent - 50.0).abs() < 1e-9);
        assert_eq!(status.recovered, 1);
        assert_eq!(status.device_speeds, vec![1_000_000]);
        assert_eq!(status.temperatures, vec![70]);
        assert_eq!(status.rejected, 2);
    }

    #[test]
    fn event_sums_device_speeds_and_pairs_metadata() {
        let raw = parse_status_block(SAMPLE_BLOCK).unwrap();
        let event = StatusEvent::from_raw("s1", "quick", &raw, Duration::from_secs(42));
        assert_eq!(event.speed_total, 1_234_500_000 + 800_000);
        assert_eq!(event.devices.len(), 2);
        assert_eq!(event.devices[0].temperature, 61);
        assert_eq!(event.devices[1].temperature, 0);
        assert_eq!(event.runtime_secs, 42);
        assert_eq!(event.session_id, "s1");
    }

    #[test]
    fn session_id_grammar_is_enforced() {
        assert!(Supervisor::new("good-session_1").is_ok());
        assert!(Supervisor::new("bad session").is_err());
    }

    #[test]
    fn paused_time_is_credited_against_the_deadline() {
        let supervisor = Supervisor::new("pause-credit").unwrap();
        let started = Instant::now();
        supervisor.pause();
        assert!(supervisor.is_paused());
        std::thread::sleep(Duration::from_millis(120));
        supervisor.resume();
        assert!(!supervisor.is_paused());

        let wall = started.elapsed();
        let effective = supervisor.effective_elapsed(started);
        assert!(wall >= effective);
        assert!(wall - effective >= Duration::from_millis(100));
    }

    #[cfg(unix)]
    #[test]
    fn normal_exit_classifies_by_exit_code() {
        let tmp = tempdir().unwrap();
        let index = sample_index(tmp.path());
        let supervisor = Supervisor::new("exit-test").unwrap();
        let attack = Attack::dictionary("quick", priority::QUICK_WIN, "w.txt");

        let outcome = supervisor
            .run(&args(&["sh", "-c", "exit 0"]), &attack, &index, RunOptions::default())
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Completed);
        assert_eq!(outcome.exit_code, Some(0));

        let outcome = supervisor
            .run(&args(&["sh", "-c", "exit 1"]), &attack, &index, RunOptions::default())
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Exhausted);

        let outcome = supervisor
            .run(&args(&["sh", "-c", "exit 7"]), &attack, &index, RunOptions::default())
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Failed);
    }

    #[cfg(unix)]
    #[test]
    fn timeout_terminates_the_group() {
        let tmp = tempdir().unwrap();
        let index = sample_index(tmp.path());
        let supervisor = Supervisor::new("timeout-test").unwrap();
        let attack = Attack::mask("slow", priority::MASK, "?a?a?a?a");

        let opts = RunOptions {
            timeout: Some(Duration::from_millis(300)),
            ..RunOptions::default()
        };
        let started = Instant::now();
        let outcome = supervisor
            .run(&args(&["sh", "-c", "sleep 30"]), &attack, &index, opts)
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Timeout);
        assert!(started.elapsed() < Duration::from_secs(15));
    }

    #[cfg(unix)]
    #[test]
    fn cancellation_is_sticky_and_observed() {
        let tmp = tempdir().unwrap();
        let index = sample_index(tmp.path());
        let supervisor = Supervisor::new("cancel-test").unwrap();
        let attack = Attack::mask("slow", priority::MASK, "?a?a?a?a");

        let cancel = Arc::new(AtomicBool::new(false));
        let opts = RunOptions {
            cancel: Arc::clone(&cancel),
            ..RunOptions::default()
        };
        let flag = Arc::clone(&cancel);
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            flag.store(true, Ordering::SeqCst);
        });
        let outcome = supervisor
            .run(&args(&["sh", "-c", "sleep 30"]), &attack, &index, opts)
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Cancelled);
    }

    #[cfg(unix)]
    #[test]
    fn status_events_reach_subscribers() {
        let tmp = tempdir().unwrap();
        let index = sample_index(tmp.path());
        let supervisor = Supervisor::new("status-test")
            .unwrap()
            .with_update_interval(Duration::ZERO);
        let rx = supervisor.subscribe();
        let attack = Attack::dictionary("quick", priority::QUICK_WIN, "w.txt");

        let script = r#"
printf 'Status...........: Running\n'
printf 'Speed.#1.........:  100 kH/s\n'
printf 'Progress.........: 10/100 (10.0%%)\n'
printf 'Recovered........: 1/2 (50.0%%)\n'
printf 'Time.Estimated...: soon\n'
"#;
        let outcome = supervisor
            .run(&args(&["sh", "-c", script]), &attack, &index, RunOptions::default())
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Completed);

        let event = rx.try_recv().expect("one status event");
        assert_eq!(event.attack_name, "quick");
        assert_eq!(event.speed_total, 100_000);
        assert_eq!(event.recovered, 1);
        assert_eq!(supervisor.history().len(), 1);

        let final_status = outcome.final_status.expect("final status retained");
        assert_eq!(final_status.progress, 10);
    }

    #[cfg(unix)]
    #[test]
    fn potfile_growth_is_absorbed_mid_run() {
        let tmp = tempdir().unwrap();
        let hashes = tmp.path().join("hashes.txt");
        let pot = tmp.path().join("pot");
        std::fs::write(&hashes, "aaaa\nbbbb\n").unwrap();
        std::fs::write(&pot, "").unwrap();
        let index = Arc::new(HashIndex::open(&hashes, &pot, false).unwrap());

        let supervisor = Supervisor::new("pot-test").unwrap();
        let attack = Attack::dictionary("quick", priority::QUICK_WIN, "w.txt");
        // Child writes a crack, then outlives one poll interval.
        let script = format!("echo 'aaaa:password' >> {}; sleep 6", pot.display());
        let outcome = supervisor
            .run(&args(&["sh", "-c", &script]), &attack, &index, RunOptions::default())
            .unwrap();
        assert_eq!(outcome.disposition, ExitDisposition::Completed);
        assert_eq!(index.cracked_count(), 1);
        let stats = index.statistics();
        assert_eq!(stats.attack_effectiveness.get("quick"), Some(&1));
    }
}
