//! Hashcat argv construction.
//!
//! The builder produces an argv array (never a shell string) in a fixed
//! order, validating every filesystem path through the sandbox and every
//! free-form token through its grammar before it is admitted.
use std::path::{Path, PathBuf};

use crate::attack::{Attack, AttackKind};
use crate::error::{Error, Result};
use crate::sandbox::{PathSandbox, validate_mask, validate_session_name};

/// Workload profile used when none (or an out-of-range one) is supplied.
const DEFAULT_WORKLOAD_PROFILE: u32 = 3;

/// Non-attack parameters for one cracker invocation.
#[derive(Debug, Clone)]
pub struct CommandParams {
    pub cracker_binary: PathBuf,
    pub potfile: PathBuf,
    pub session: Option<String>,
    pub restore: bool,
    /// 1-4; anything else is silently dropped in favor of the default.
    pub workload_profile: Option<u32>,
    pub status_timer: Option<u32>,
    pub status_json: bool,
}

impl CommandParams {
    pub fn new(cracker_binary: impl Into<PathBuf>, potfile: impl Into<PathBuf>) -> Self {
        Self {
            cracker_binary: cracker_binary.into(),
            potfile: potfile.into(),
            session: None,
            restore: false,
            workload_profile: None,
            status_timer: None,
            status_json: false,
        }
    }
}

/// Builds validated argv arrays for the supervisor.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    sandbox: PathSandbox,
}

impl CommandBuilder {
    pub fn new(sandbox: PathSandbox) -> Self {
        Self { sandbox }
    }

    /// Build the argv for one attack against `hash_file`. Token order is
    /// fixed: binary, hash file, mode, attack type, wordlist, rules, mask,
    /// potfile, quiet, workload, session, restore, status timer.
    pub fn build(
        &self,
        attack: &Attack,
        hash_file: &Path,
        params: &CommandParams,
    ) -> Result<Vec<String>> {
        let mut argv = Vec::new();
        argv.push(path_token(&params.cracker_binary)?);

        let safe_hash_file = self.sandbox.validate_path(hash_file, true)?;
        argv.push(path_token(&safe_hash_file)?);

        if let Some(mode) = attack.mode {
            argv.push("-m".to_string());
            argv.push(mode.to_string());
        }

        let kind_token = match attack.kind {
            AttackKind::Dictionary => "0",
            AttackKind::Mask => "3",
            AttackKind::Hybrid => "6",
            AttackKind::RuleBased => {
                return Err(Error::validation(
                    "build_command",
                    "rule-based attacks must be expressed as dictionary attacks with a rules file",
                ));
            }
        };
        argv.push("-a".to_string());
        argv.push(kind_token.to_string());

        match attack.kind {
            AttackKind::Dictionary => {
                let wordlist = attack.wordlist.as_deref().ok_or_else(|| {
                    Error::validation("build_command", "dictionary attack without a wordlist")
                })?;
                argv.push(path_token(&self.sandbox.validate_path(wordlist, true)?)?);
            }
            AttackKind::Mask => {
                if attack.mask.is_none() {
                    return Err(Error::validation("build_command", "mask attack without a mask"));
                }
            }
            AttackKind::Hybrid => {
                let wordlist = attack.wordlist.as_deref().ok_or_else(|| {
                    Error::validation("build_command", "hybrid attack without a wordlist")
                })?;
                if attack.mask.is_none() {
                    return Err(Error::validation("build_command", "hybrid attack without a mask"));
                }
                argv.push(path_token(&self.sandbox.validate_path(wordlist, true)?)?);
            }
            AttackKind::RuleBased => unreachable!("rejected above"),
        }

        if let Some(rules) = attack.rules.as_deref() {
            argv.push("-r".to_string());
            argv.push(path_token(&self.sandbox.validate_path(rules, true)?)?);
        }

        if let Some(mask) = attack.mask.as_deref() {
            validate_mask(mask)?;
            argv.push(mask.to_string());
        }

        argv.push("--potfile-path".to_string());
        argv.push(path_token(&self.sandbox.validate_path(&params.potfile, false)?)?);

        argv.push("--quiet".to_string());

        let workload = match params.workload_profile {
            Some(p) if (1..=4).contains(&p) => p,
            Some(p) => {
                log::debug!("dropping out-of-range workload profile {p}");
                DEFAULT_WORKLOAD_PROFILE
            }
            None => DEFAULT_WORKLOAD_PROFILE,
        };
        argv.push("-w".to_string());
        argv.push(workload.to_string());

        if let Some(session) = params.session.as_deref() {
            validate_session_name(session)?;
            argv.push("--session".to_string());
            argv.push(session.to_string());
        }

        if params.restore {
            argv.push("--restore".to_string());
        }

        if let Some(timer) = params.status_timer {
            argv.push("--status".to_string());
            argv.push("--status-timer".to_string());
            argv.push(timer.to_string());
        }
        if params.status_json {
            argv.push("--status-json".to_string());
        }

        Ok(argv)
    }
}

fn path_token(path: &Path) -> Result<String> {
    path.to_str().map(str::to_string).ok_or_else(|| {
        Error::validation(
            "build_command",
            format!("path is not valid UTF-8: {}", path.display()),
        )
    })
}
