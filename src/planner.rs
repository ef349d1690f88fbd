//! Deterministic attack plan generation.
//!
//! Given a file analysis and a resources snapshot, emits an ordered plan of
//! up to four phases: quick wins, context-targeted attacks chosen from the
//! detected type mix, rule-based attacks over medium wordlists, and mask
//! attacks synthesized from an explicit password policy. The planner holds no
//! state; identical inputs produce identical plans.
use crate::attack::{Attack, priority};
use crate::identify::FileAnalysis;

/// Host resources snapshot consulted while planning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resources {
    pub gpu_count: usize,
    pub cpu_threads: usize,
    pub available_memory_mb: u64,
}

impl Default for Resources {
    fn default() -> Self {
        Self {
            gpu_count: 0,
            cpu_threads: 1,
            available_memory_mb: 2048,
        }
    }
}

/// Password policy used to synthesize a targeted mask attack.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub requires_uppercase: bool,
    pub requires_lowercase: bool,
    pub requires_digit: bool,
    pub requires_special: bool,
}

/// Memory floor below which heavy rule attacks are left out of the plan.
const RULE_ATTACK_MEMORY_FLOOR_MB: u64 = 1024;

/// Produce the ordered attack plan for one analysis. The caller pushes the
/// result into the queue; ordering inside a phase is plan order.
pub fn generate_plan(
    analysis: &FileAnalysis,
    resources: &Resources,
    policy: Option<&PasswordPolicy>,
) -> Vec<Attack> {
    let mode = analysis.dominant_mode();
    let mut plan = Vec::new();

    // Phase 1: quick wins
    plan.push(
        Attack::dictionary("Top 100k passwords", priority::QUICK_WIN, "wordlists/top100k.txt")
            .with_mode(mode)
            .with_estimate(60, 0.8),
    );
    plan.push(
        Attack::mask("Common patterns", priority::QUICK_WIN, "?u?l?l?l?l?l?d?d")
            .with_mode(mode)
            .with_estimate(120, 0.6),
    );

    // Phase 2: context-targeted
    if analysis.looks_like_ad_dump() {
        plan.push(
            Attack::dictionary(
                "Season + Year patterns",
                priority::TARGETED,
                "wordlists/seasons_years.txt",
            )
            .with_mode(mode)
            .with_estimate(300, 0.7),
        );
        plan.push(
            Attack::dictionary(
                "Company variations",
                priority::TARGETED,
                "wordlists/company_variations.txt",
            )
            .with_rules("rules/ad_common.rule")
            .with_mode(mode)
            .with_estimate(600, 0.6),
        );
    } else if analysis.looks_like_web_app() {
        plan.push(
            Attack::dictionary("Web app defaults", priority::TARGETED, "wordlists/web_defaults.txt")
                .with_mode(mode)
                .with_estimate(120, 0.5),
        );
    }

    // Phase 3: rule-based. Skipped against slow KDFs (rules multiply an
    // already expensive keyspace) and on memory-starved hosts.
    let slow_kdf = analysis
        .detected
        .keys()
        .any(|name| name.contains("bcrypt") || name.contains("Argon2"));
    if !slow_kdf && resources.available_memory_mb >= RULE_ATTACK_MEMORY_FLOOR_MB {
        plan.push(
            Attack::dictionary("RockYou + Best64", priority::RULE_BASED, "wordlists/rockyou.txt")
                .with_rules("rules/best64.rule")
                .with_mode(mode)
                .with_estimate(3600, 0.7),
        );
        plan.push(
            Attack::dictionary(
                "Leetspeak variations",
                priority::RULE_BASED,
                "wordlists/common_words.txt",
            )
            .with_rules("rules/leetspeak.rule")
            .with_mode(mode)
            .with_estimate(1800, 0.5),
        );
    }

    // Phase 4: policy-derived mask
    if let Some(policy) = policy {
        if policy.min_length > 0 {
            plan.push(
                Attack::mask(
                    &format!("Policy-based mask ({} chars)", policy.min_length),
                    priority::MASK,
                    &policy_mask(policy),
                )
                .with_mode(mode)
                .with_estimate(7200, 0.4),
            );
        }
    }

    plan
}

/// Synthesize a mask from a policy: one token per required character class,
/// padded with `?a` up to the minimum length.
fn policy_mask(policy: &PasswordPolicy) -> String {
    let mut tokens: Vec<&str> = Vec::new();
    if policy.requires_uppercase {
        tokens.push("?u");
    }
    if policy.requires_lowercase {
        tokens.push("?l");
    }
    if policy.requires_digit {
        tokens.push("?d");
    }
    if policy.requires_special {
        tokens.push("?s");
    }
    while tokens.len() < policy.min_length {
        tokens.push("?a");
    }
    tokens.concat()
}

/// High-priority attacks injected when hashes arrive mid-session. These run
/// before everything still pending from the standing plan.
pub fn hot_reload_plan(mode: Option<u32>) -> Vec<Attack> {
    vec![
        Attack::dictionary(
            "Quick attack for new hashes",
            priority::HOT_RELOAD,
            "wordlists/top100.txt",
        )
        .with_mode(mode)
        .with_estimate(30, 0.9),
        Attack::mask(
            "Common patterns for new hashes",
            priority::HOT_RELOAD + 1,
            "?u?l?l?l?l?l?d?d",
        )
        .with_mode(mode)
        .with_estimate(60, 0.7),
    ]
}
