//! Hashwrap
//!
//! This crate provides the core library for orchestrating an external
//! hash-cracking binary (hashcat) through a sequence of prioritized attack
//! strategies: analyzing hash files, maintaining the cracked/remaining index,
//! supervising the cracker process, persisting resumable session state, and
//! ingesting new hashes while the engine runs. The companion binary
//! `hashwrap` wires these pieces together for CLI usage.
//!
//! High-level components:
//! - `identify` classifies hash lines and analyzes hash files
//! - `index` tracks target vs cracked hashes and materializes what remains
//! - `pot` parses potfile content and tails it incrementally
//! - `watcher` hot-reloads hashes from watched files and a drop directory
//! - `attack`, `queue`, and `planner` model and schedule attack strategies
//! - `supervisor` owns the cracker child process and its status stream
//! - `session` checkpoints engine state for crash-safe resume
//! - `sandbox` and `command` validate paths and build the cracker argv
//! - `engine` coordinates all of the above for one session
//! - `error` defines the error taxonomy and crash reporting
//! - `report` and `export` render and persist results
//!
//! Most applications should construct an [`engine::Engine`] with a
//! [`sandbox::PathSandbox`] and run `auto` mode, then render a summary via
//! `report::render_summary`.
//!
//! A minimal example (error handling elided):
//!
//! ```no_run
//! use std::sync::Arc;
//! use hashwrap::engine::{Engine, EngineConfig};
//! # fn main() -> anyhow::Result<()> {
//! let engine = Engine::new(
//!     EngineConfig::default(),
//!     hashwrap::sandbox::PathSandbox::new(&[]),
//!     Arc::new(hashwrap::ratelimit::TokenBucket::default()),
//!     Arc::new(hashwrap::error::ErrorSink::new()),
//! );
//! let report = engine.run_auto(std::path::Path::new("hashes.txt"))?;
//! println!("{}", hashwrap::report::render_summary(&report));
//! # Ok(())
//! # }
//! ```
pub mod attack;
pub mod command;
pub mod engine;
pub mod error;
pub mod export;
pub mod identify;
pub mod index;
pub mod io;
pub mod planner;
pub mod pot;
pub mod queue;
pub mod ratelimit;
pub mod report;
pub mod sandbox;
pub mod session;
pub mod stats;
pub mod supervisor;
pub mod watcher;

pub mod prelude {
    pub use crate::attack::Attack;
    pub use crate::engine::{Engine, EngineConfig};
    pub use crate::error::{Error, ErrorKind, Severity};
}
