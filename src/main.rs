//! CLI entrypoint for `hashwrap`.
//!
//! Parses the subcommand surface (auto / analyze / resume / add-hashes /
//! status), builds the engine with its default collaborators, installs the
//! signal handler, and maps typed failures to exit codes: 0 on a clean exit,
//! 1 on a fatal error, 2 when a session cannot be found.
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::{LevelFilter, error};

use hashwrap::engine::{Engine, EngineConfig};
use hashwrap::error::ErrorSink;
use hashwrap::export::save_attack_results_csv;
use hashwrap::identify::analyze_file;
use hashwrap::ratelimit::TokenBucket;
use hashwrap::report::{render_analysis, render_sessions, render_summary};
use hashwrap::sandbox::PathSandbox;
use hashwrap::session::DEFAULT_SESSIONS_ROOT;

#[derive(Parser, Debug)]
#[command(name = "hashwrap", version, about = "Hash-cracking orchestrator")]
struct Args {
    #[command(subcommand)]
    command: CommandLine,

    /// Sessions root directory
    #[arg(long = "sessions-root", default_value = DEFAULT_SESSIONS_ROOT, global = true)]
    sessions_root: PathBuf,

    /// Additional directories allowed for file access
    #[arg(long = "allow-dir", global = true)]
    allow_dirs: Vec<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum CommandLine {
    /// Fully automated cracking: analyze, plan, execute
    Auto {
        /// File containing hashes
        hash_file: PathBuf,
        /// Named session (enables the cracker's native --session/--restore)
        #[arg(long)]
        session: Option<String>,
        /// Pass the cracker's restore flag to the next attack (requires --session)
        #[arg(long)]
        restore: bool,
        /// Workload profile 1-4
        #[arg(long)]
        workload: Option<u32>,
        /// Seconds between cracker status updates
        #[arg(long = "status-timer")]
        status_timer: Option<u32>,
        /// Emit and parse machine-readable status
        #[arg(long = "status-json")]
        status_json: bool,
        /// Append status lines to this file
        #[arg(long = "status-file")]
        status_file: Option<PathBuf>,
        /// Cracker binary to drive
        #[arg(long, default_value = "hashcat")]
        cracker: PathBuf,
        /// Per-attack wall clock budget in seconds
        #[arg(long = "attack-timeout", default_value_t = 3600)]
        attack_timeout: u64,
        /// Disable hash-file watching and the ingestion directory
        #[arg(long = "no-hot-reload")]
        no_hot_reload: bool,
        /// Force the streaming index even for small files
        #[arg(long)]
        streaming: bool,
    },
    /// Analyze a hash file and print detected types and recommendations
    Analyze {
        /// File containing hashes
        hash_file: PathBuf,
    },
    /// Resume a previous session from its checkpoint
    Resume {
        /// Session id or name to resume
        session_id: String,
        /// Cracker binary to drive
        #[arg(long, default_value = "hashcat")]
        cracker: PathBuf,
        /// Per-attack wall clock budget in seconds
        #[arg(long = "attack-timeout", default_value_t = 3600)]
        attack_timeout: u64,
    },
    /// Add hashes to a running session via the ingestion directory
    AddHashes {
        /// Session id
        session_id: String,
        /// File containing new hashes
        hash_file: PathBuf,
    },
    /// Show the status of all sessions
    Status,
}

fn init_logger(verbosity: u8) {
    let level = match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}

/// Exit code for failures naming a missing session.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<hashwrap::error::Error>() {
        Some(e) if e.code == "session_not_found" => 2,
        _ => 1,
    }
}

fn run(args: Args) -> Result<()> {
    let sandbox = PathSandbox::new(&args.allow_dirs);
    let limiter = Arc::new(TokenBucket::default());
    let errors = Arc::new(ErrorSink::new());
    let sessions_root = args.sessions_root;

    match args.command {
        CommandLine::Auto {
            hash_file,
            session,
            restore,
            workload,
            status_timer,
            status_json,
            status_file,
            cracker,
            attack_timeout,
            no_hot_reload,
            streaming,
        } => {
            if restore && session.is_none() {
                anyhow::bail!("--restore requires --session");
            }
            let config = EngineConfig {
                sessions_root,
                cracker_binary: cracker,
                session_name: session,
                workload_profile: workload,
                status_timer,
                status_json,
                status_file,
                hot_reload: !no_hot_reload,
                attack_timeout: std::time::Duration::from_secs(attack_timeout),
                force_streaming: streaming,
                policy: None,
            };
            let engine = Engine::new(config, sandbox, limiter, errors);
            engine.install_signal_handler()?;
            let report = engine.run_auto(&hash_file)?;
            println!("{}", render_summary(&report));
            let csv = report_csv_path(&report.session_id);
            if let Err(e) = save_attack_results_csv(&report, &csv) {
                error!("failed to write {}: {}", csv.display(), e);
            }
            Ok(())
        }
        CommandLine::Analyze { hash_file } => {
            let safe = sandbox.validate_path(&hash_file, true)?;
            let analysis = analyze_file(&safe, None)?;
            println!("{}", render_analysis(&analysis));
            Ok(())
        }
        CommandLine::Resume {
            session_id,
            cracker,
            attack_timeout,
        } => {
            let config = EngineConfig {
                sessions_root,
                cracker_binary: cracker,
                attack_timeout: std::time::Duration::from_secs(attack_timeout),
                ..EngineConfig::default()
            };
            let engine = Engine::new(config, sandbox, limiter, errors);
            engine.install_signal_handler()?;
            let report = engine.resume(&session_id)?;
            println!("{}", render_summary(&report));
            Ok(())
        }
        CommandLine::AddHashes {
            session_id,
            hash_file,
        } => {
            let config = EngineConfig {
                sessions_root,
                ..EngineConfig::default()
            };
            let engine = Engine::new(config, sandbox, limiter, errors);
            let accepted = engine.add_hashes(&session_id, &hash_file)?;
            println!("Accepted {accepted} hashes for session {session_id}");
            Ok(())
        }
        CommandLine::Status => {
            let config = EngineConfig {
                sessions_root,
                ..EngineConfig::default()
            };
            let engine = Engine::new(config, sandbox, limiter, errors);
            let sessions = engine.list_sessions()?;
            println!("{}", render_sessions(&sessions));
            Ok(())
        }
    }
}

fn report_csv_path(session_id: &str) -> PathBuf {
    PathBuf::from(format!("hashwrap_report_{session_id}.csv"))
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose);
    if let Err(e) = run(args) {
        error!("{e:#}");
        std::process::exit(exit_code_for(&e));
    }
}
