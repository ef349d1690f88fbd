//! Statistical analysis over cracked passwords.
//!
//! Buckets plaintexts by length and character-class composition to inform
//! follow-up attacks and the final report.
use std::collections::BTreeMap;

use crate::attack::{Attack, priority};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CharsetBuckets {
    pub lowercase_only: usize,
    pub uppercase_only: usize,
    pub mixed_case: usize,
    pub with_numbers: usize,
    pub with_special: usize,
    pub alphanumeric_only: usize,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct PasswordAnalysis {
    pub total_cracked: usize,
    pub average_length: f64,
    pub length_distribution: BTreeMap<usize, usize>,
    pub charsets: CharsetBuckets,
}

/// Bucket a set of cracked plaintexts. Empty input yields the default
/// (all-zero) analysis.
pub fn analyze_passwords(passwords: &[String]) -> PasswordAnalysis {
    if passwords.is_empty() {
        return PasswordAnalysis::default();
    }
    let mut analysis = PasswordAnalysis {
        total_cracked: passwords.len(),
        ..PasswordAnalysis::default()
    };
    let mut total_len = 0usize;
    for pw in passwords {
        total_len += pw.chars().count();
        *analysis
            .length_distribution
            .entry(pw.chars().count())
            .or_insert(0) += 1;

        let has_lower = pw.chars().any(|c| c.is_lowercase());
        let has_upper = pw.chars().any(|c| c.is_uppercase());
        let has_digit = pw.chars().any(|c| c.is_ascii_digit());
        let has_special = pw.chars().any(|c| !c.is_alphanumeric());

        if has_lower && !has_upper && !has_digit && !has_special {
            analysis.charsets.lowercase_only += 1;
        } else if has_upper && !has_lower && !has_digit && !has_special {
            analysis.charsets.uppercase_only += 1;
        } else if has_lower && has_upper {
            analysis.charsets.mixed_case += 1;
        }
        if has_digit {
            analysis.charsets.with_numbers += 1;
        }
        if has_special {
            analysis.charsets.with_special += 1;
        }
        if !has_special {
            analysis.charsets.alphanumeric_only += 1;
        }
    }
    analysis.average_length = total_len as f64 / passwords.len() as f64;
    analysis
}

/// The most common plaintext length, ties broken toward the shorter length.
pub fn most_common_length(analysis: &PasswordAnalysis) -> Option<usize> {
    analysis
        .length_distribution
        .iter()
        .max_by(|a, b| a.1.cmp(b.1).then(b.0.cmp(a.0)))
        .map(|(len, _)| *len)
}

/// Suggest one follow-up attack from observed password patterns: a mask over
/// the dominant length, or a number-append rule run when digits dominate.
pub fn suggest_followup(analysis: &PasswordAnalysis) -> Option<Attack> {
    if analysis.total_cracked == 0 {
        return None;
    }
    if analysis.charsets.with_numbers * 2 > analysis.total_cracked {
        return Some(
            Attack::dictionary(
                "Append numbers to common words",
                priority::RULE_BASED,
                "wordlists/common_words.txt",
            )
            .with_rules("rules/append_numbers.rule")
            .with_estimate(900, 0.5),
        );
    }
    let len = most_common_length(analysis)?;
    Some(
        Attack::mask(
            &format!("Dominant length mask ({len} chars)"),
            priority::MASK,
            &"?a".repeat(len),
        )
        .with_estimate(3600, 0.4),
    )
}
