//! Attack data model: descriptors queued by the planner, per-attack results
//! recorded by the engine, and the adaptive success tracker.
use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Priority bands, lower runs earlier. Bands are spaced so hot-reload
/// injection can slot ahead of the standing plan.
pub mod priority {
    pub const HOT_RELOAD: u32 = 5;
    pub const QUICK_WIN: u32 = 10;
    pub const TARGETED: u32 = 20;
    pub const RULE_BASED: u32 = 30;
    pub const HYBRID: u32 = 40;
    pub const MASK: u32 = 50;
    pub const EXHAUSTIVE: u32 = 60;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttackKind {
    Dictionary,
    Mask,
    Hybrid,
    /// Planner-level classification; concrete rule attacks are emitted as
    /// [`AttackKind::Dictionary`] with a rules file attached.
    RuleBased,
}

/// One attack strategy. Ordering in the queue is (priority, insertion
/// sequence); the sequence is assigned at push time, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attack {
    pub name: String,
    pub kind: AttackKind,
    pub priority: u32,
    /// Hashcat mode; `None` until detection supplies one.
    pub mode: Option<u32>,
    pub wordlist: Option<PathBuf>,
    pub rules: Option<PathBuf>,
    pub mask: Option<String>,
    pub estimated_duration_secs: Option<u64>,
    pub success_probability: f64,
}

impl Attack {
    pub fn dictionary(name: &str, priority: u32, wordlist: impl Into<PathBuf>) -> Self {
        Self {
            name: name.to_string(),
            kind: AttackKind::Dictionary,
            priority,
            mode: None,
            wordlist: Some(wordlist.into()),
            rules: None,
            mask: None,
            estimated_duration_secs: None,
            success_probability: 0.5,
        }
    }

    pub fn mask(name: &str, priority: u32, mask: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AttackKind::Mask,
            priority,
            mode: None,
            wordlist: None,
            rules: None,
            mask: Some(mask.to_string()),
            estimated_duration_secs: None,
            success_probability: 0.5,
        }
    }

    pub fn with_mode(mut self, mode: Option<u32>) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_rules(mut self, rules: impl Into<PathBuf>) -> Self {
        self.rules = Some(rules.into());
        self
    }

    pub fn with_estimate(mut self, duration_secs: u64, probability: f64) -> Self {
        self.estimated_duration_secs = Some(duration_secs);
        self.success_probability = probability;
        self
    }

    /// Key used by the success tracker to aggregate similar attacks across
    /// sessions: kind plus the wordlist/rules combination.
    pub fn tracker_key(&self) -> String {
        let kind = match self.kind {
            AttackKind::Dictionary => "dictionary",
            AttackKind::Mask => "mask",
            AttackKind::Hybrid => "hybrid",
            AttackKind::RuleBased => "rule_based",
        };
        format!(
            "{}_{}_{}",
            kind,
            self.wordlist
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.rules
                .as_deref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "none".to_string()),
        )
    }
}

/// How a supervised attack ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitDisposition {
    /// Exit code 0: the cracker finished with all loaded hashes recovered.
    Completed,
    /// Exit code 1: keyspace exhausted with hashes left.
    Exhausted,
    /// Any other exit code.
    Failed,
    Timeout,
    Cancelled,
}

impl ExitDisposition {
    pub fn from_exit_code(code: i32) -> Self {
        match code {
            0 => ExitDisposition::Completed,
            1 => ExitDisposition::Exhausted,
            _ => ExitDisposition::Failed,
        }
    }
}

/// Result record appended to the session for every attack run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub attack_name: String,
    pub disposition: ExitDisposition,
    /// Hashes newly cracked while this attack ran.
    pub cracked_count: usize,
    pub duration_secs: u64,
    pub exit_code: Option<i32>,
    pub completed_at: DateTime<Utc>,
}

/// Adaptive per-strategy success rates. The update is the two-point running
/// average `(old + new) / 2`.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct SuccessTracker {
    rates: HashMap<String, f64>,
}

impl SuccessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one attack outcome into the tracked rate for its strategy key.
    /// `total_attempts` of zero counts as one to keep the rate defined.
    pub fn update(&mut self, attack: &Attack, cracked_count: usize, total_attempts: usize) {
        if cracked_count == 0 {
            return;
        }
        let rate = cracked_count as f64 / total_attempts.max(1) as f64;
        let key = attack.tracker_key();
        let entry = self.rates.entry(key).or_insert(rate);
        *entry = (*entry + rate) / 2.0;
    }

    pub fn rate_for(&self, attack: &Attack) -> Option<f64> {
        self.rates.get(&attack.tracker_key()).copied()
    }

    /// Strategy keys sorted by descending success rate, best `n`.
    pub fn most_effective(&self, n: usize) -> Vec<(String, f64)> {
        let mut items: Vec<(String, f64)> = self
            .rates
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        items.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        items.truncate(n);
        items
    }
}
