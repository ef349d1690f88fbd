//! Hash type identification and file analysis.
//!
//! A precompiled pattern table maps regexes to (name, hashcat mode,
//! confidence). [`classify`] returns the highest-confidence match for a line,
//! with ties broken by table order; a second pass recognizes bare `hash:salt`
//! shapes by hex prefix length. [`analyze_file`] streams a hash file into
//! per-type counts, samples, and ordered attack recommendations.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use crate::io::hash_lines;

/// A single classification outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub name: &'static str,
    pub mode: u32,
    pub confidence: f64,
}

struct HashPattern {
    regex: Regex,
    name: &'static str,
    mode: u32,
    confidence: f64,
}

macro_rules! patterns {
    ($(($re:literal, $name:expr, $mode:expr, $conf:expr)),+ $(,)?) => {
        vec![$(HashPattern {
            regex: Regex::new(concat!("(?i)", $re)).expect("hash pattern"),
            name: $name,
            mode: $mode,
            confidence: $conf,
        }),+]
    };
}

/// Pattern table in precedence order. When confidences tie, the earlier entry
/// wins, so broader shapes (bare MD5 before NTLM) sit first.
static HASH_PATTERNS: LazyLock<Vec<HashPattern>> = LazyLock::new(|| {
    patterns![
        // MD5 variants
        (r"^[a-f0-9]{32}$", "MD5", 0, 0.9),
        (r"^[a-f0-9]{32}:[a-f0-9]+$", "MD5 with salt", 10, 0.9),
        (r"^\$1\$[a-zA-Z0-9./]{8}\$[a-zA-Z0-9./]{22}$", "MD5 Crypt", 500, 1.0),
        // SHA variants
        (r"^[a-f0-9]{40}$", "SHA1", 100, 0.9),
        (r"^[a-f0-9]{64}$", "SHA256", 1400, 0.9),
        (r"^[a-f0-9]{96}$", "SHA384", 10800, 0.9),
        (r"^[a-f0-9]{128}$", "SHA512", 1700, 0.9),
        (r"^\$6\$[a-zA-Z0-9./]{8,16}\$[a-zA-Z0-9./]{86}$", "SHA512 Crypt", 1800, 1.0),
        // NTLM / Windows
        (r"^[a-f0-9]{32}$", "NTLM", 1000, 0.7),
        (r"^[a-f0-9]{32}:[a-f0-9]{32}$", "NetNTLMv1", 5500, 0.95),
        (r"^[a-zA-Z0-9+/]{27,}=$", "NetNTLMv2", 5600, 0.9),
        // bcrypt
        (r"^\$2[ayb]\$[0-9]{2}\$[a-zA-Z0-9./]{53}$", "bcrypt", 3200, 1.0),
        // Databases
        (r"^\*[A-F0-9]{40}$", "MySQL 4.1+", 300, 1.0),
        (r"^[a-f0-9]{16}$", "MySQL 3.x", 200, 0.8),
        (r"^md5[a-f0-9]{32}$", "PostgreSQL MD5", 12, 1.0),
        // Kerberos
        (r"^\$krb5tgs\$", "Kerberos 5 TGS-REP", 13100, 1.0),
        (r"^\$krb5pa\$", "Kerberos 5 AS-REP", 7500, 1.0),
        // Documents
        (r"^\$office\$", "MS Office", 9400, 1.0),
        (r"^\$pdf\$", "PDF", 10500, 1.0),
        // Web applications
        (r"^\$P\$[a-zA-Z0-9./]{31}$", "phpBB3/WordPress", 400, 1.0),
        (r"^\$H\$[a-zA-Z0-9./]{31}$", "phpBB3/WordPress (alt)", 400, 1.0),
        (r"^sha1\$[a-f0-9]{8}\$[a-f0-9]{40}$", "Django SHA1", 800, 1.0),
        // Argon2
        (r"^\$argon2i\$", "Argon2i", 10900, 1.0),
        (r"^\$argon2d\$", "Argon2d", 11300, 1.0),
        (r"^\$argon2id\$", "Argon2id", 11900, 1.0),
        // Wallets
        (r"^\$ethereum\$", "Ethereum Wallet", 15700, 1.0),
        (r"^\$bitcoin\$", "Bitcoin Wallet", 11300, 1.0),
        (r"^metamask:", "MetaMask Wallet", 26600, 1.0),
        // Containers and vaults
        (r"^\$luks\$", "LUKS2", 29543, 1.0),
        (r"^\$ansible\$", "Ansible Vault", 16900, 1.0),
        (r"^\$zip3\$", "ZIP3 AES-256", 24700, 1.0),
        // Protocols and keys
        (r"^\$snmpv3\$", "SNMPv3 HMAC", 25000, 1.0),
        (r"^\$ssh\$", "OpenSSH Private Key", 22921, 1.0),
        (r"^\$gpg\$", "GPG Secret Key", 17010, 1.0),
        // JWT
        (
            r"^ey[A-Za-z0-9\-_]+\.ey[A-Za-z0-9\-_]+\.[A-Za-z0-9\-_]+$",
            "JWT Token",
            16500,
            1.0
        ),
    ]
});

/// Classify one hash line. Returns the highest-confidence pattern match; ties
/// keep the earlier table entry. Falls back to a `hash:salt` hex-prefix
/// heuristic at reduced confidence, then `None`.
pub fn classify(line: &str) -> Option<Detection> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let mut best: Option<Detection> = None;
    for p in HASH_PATTERNS.iter() {
        if p.regex.is_match(line) {
            let better = match &best {
                Some(b) => p.confidence > b.confidence,
                None => true,
            };
            if better {
                best = Some(Detection {
                    name: p.name,
                    mode: p.mode,
                    confidence: p.confidence,
                });
            }
        }
    }
    if best.is_some() {
        return best;
    }
    salted_heuristic(line)
}

/// Second pass for `hash:salt` shapes no full pattern claimed: a hex-only
/// prefix of a well-known digest length is reported at ~0.7 confidence.
fn salted_heuristic(line: &str) -> Option<Detection> {
    let (prefix, salt) = line.split_once(':')?;
    if salt.is_empty() || !prefix.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    let (name, mode) = match prefix.len() {
        32 => ("MD5 with salt", 10),
        40 => ("SHA1 with salt", 110),
        64 => ("SHA256 with salt", 1410),
        128 => ("SHA512 with salt", 1710),
        _ => return None,
    };
    Some(Detection {
        name,
        mode,
        confidence: 0.7,
    })
}

/// Quick mode suggestion for a single hash.
pub fn suggest_mode(line: &str) -> Option<u32> {
    classify(line).map(|d| d.mode)
}

/// Per-type tally collected by [`analyze_file`].
#[derive(Debug, Clone, PartialEq)]
pub struct TypeStat {
    pub count: usize,
    pub mode: u32,
    pub confidence: f64,
    /// Up to three literal samples, truncated for display.
    pub samples: Vec<String>,
}

/// A line no pattern claimed, with its 1-based line number.
#[derive(Debug, Clone, PartialEq)]
pub struct UnknownHash {
    pub line: usize,
    pub sample: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// An attack recommendation derived from the detected type mix.
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub priority: Priority,
    pub action: &'static str,
    pub description: String,
    pub details: Vec<String>,
}

/// Result of streaming a hash file through the classifier.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileAnalysis {
    pub total_count: usize,
    pub detected: BTreeMap<&'static str, TypeStat>,
    pub unknown: Vec<UnknownHash>,
    pub recommendations: Vec<Recommendation>,
}

impl FileAnalysis {
    /// Mode of the most-numerous detected type; count ties broken by name
    /// order so plans built from the analysis are deterministic.
    pub fn dominant_mode(&self) -> Option<u32> {
        self.detected
            .iter()
            .max_by(|a, b| a.1.count.cmp(&b.1.count).then(b.0.cmp(a.0)))
            .map(|(_, stat)| stat.mode)
    }

    /// True when the type mix looks like a Windows/AD dump.
    pub fn looks_like_ad_dump(&self) -> bool {
        self.detected.keys().any(|name| name.contains("NTLM"))
    }

    /// True when the type mix looks like a web-application database.
    pub fn looks_like_web_app(&self) -> bool {
        const WEB_INDICATORS: [&str; 5] = ["phpBB", "WordPress", "Django", "bcrypt", "MD5"];
        self.detected
            .keys()
            .any(|name| WEB_INDICATORS.iter().any(|w| name.contains(w)))
    }
}

const MAX_SAMPLES_PER_TYPE: usize = 3;
const MAX_UNKNOWN_SAMPLES: usize = 10;

fn display_sample(line: &str) -> String {
    if line.len() > 50 {
        format!("{}...", &line[..50])
    } else {
        line.to_string()
    }
}

/// Stream a hash file, classifying each non-comment line. `sample_cap` bounds
/// the number of lines examined (`None` = all).
pub fn analyze_file(path: &Path, sample_cap: Option<usize>) -> Result<FileAnalysis> {
    let mut analysis = FileAnalysis::default();
    let mut examined = 0usize;
    for (idx, line) in hash_lines(path, crate::io::STREAMING_THRESHOLD_BYTES)?
        .flatten()
        .enumerate()
    {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(cap) = sample_cap {
            if examined >= cap {
                break;
            }
        }
        examined += 1;
        analysis.total_count += 1;
        match classify(line) {
            Some(det) => {
                let stat = analysis.detected.entry(det.name).or_insert(TypeStat {
                    count: 0,
                    mode: det.mode,
                    confidence: det.confidence,
                    samples: Vec::new(),
                });
                stat.count += 1;
                if stat.samples.len() < MAX_SAMPLES_PER_TYPE {
                    stat.samples.push(display_sample(line));
                }
            }
            None => {
                if analysis.unknown.len() < MAX_UNKNOWN_SAMPLES {
                    analysis.unknown.push(UnknownHash {
                        line: idx + 1,
                        sample: display_sample(line),
                    });
                }
            }
        }
    }
    analysis.recommendations = generate_recommendations(&analysis);
    Ok(analysis)
}

fn generate_recommendations(analysis: &FileAnalysis) -> Vec<Recommendation> {
    let mut recs = Vec::new();

    if analysis.detected.len() == 1 {
        if let Some((name, stat)) = analysis.detected.iter().next() {
            recs.push(Recommendation {
                priority: Priority::High,
                action: "single_mode_attack",
                description: format!("Use mode {} for {} hashes", stat.mode, name),
                details: vec![format!("-m {}", stat.mode)],
            });
        }
    } else if analysis.detected.len() > 1 {
        recs.push(Recommendation {
            priority: Priority::High,
            action: "split_by_type",
            description: "Split hashes by type for optimal performance".to_string(),
            details: analysis
                .detected
                .iter()
                .map(|(name, stat)| format!("{}: mode {}", name, stat.mode))
                .collect(),
        });
    }

    for name in analysis.detected.keys() {
        if name.contains("NTLM") {
            recs.push(Recommendation {
                priority: Priority::Medium,
                action: "use_ad_wordlists",
                description: "Detected Windows hashes - use Active Directory focused wordlists"
                    .to_string(),
                details: vec![
                    "rockyou.txt".to_string(),
                    "ad_common.txt".to_string(),
                    "corporate_passwords.txt".to_string(),
                ],
            });
        } else if name.contains("MySQL") || name.contains("PostgreSQL") {
            recs.push(Recommendation {
                priority: Priority::Medium,
                action: "use_db_defaults",
                description: "Detected database hashes - try default credentials".to_string(),
                details: vec!["db_defaults.txt".to_string(), "common_passwords.txt".to_string()],
            });
        } else if name.contains("bcrypt") {
            recs.push(Recommendation {
                priority: Priority::High,
                action: "optimize_slow_kdf",
                description: "bcrypt is slow - use targeted wordlists and limit rules".to_string(),
                details: vec!["workload_profile=3".to_string(), "limit_rules".to_string()],
            });
        }
    }

    if !analysis.unknown.is_empty() {
        recs.push(Recommendation {
            priority: Priority::Low,
            action: "investigate_unknown",
            description: format!(
                "Found {} unknown hash formats - manual review needed",
                analysis.unknown.len()
            ),
            details: analysis
                .unknown
                .iter()
                .take(3)
                .map(|u| format!("line {}: {}", u.line, u.sample))
                .collect(),
        });
    }

    recs.sort_by_key(|r| r.priority);
    recs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn md5_beats_ntlm_on_confidence() {
        let det = classify("5f4dcc3b5aa765d61d8327deb882cf99").unwrap();
        assert_eq!(det.name, "MD5");
        assert_eq!(det.mode, 0);
    }

    #[test]
    fn netntlmv1_beats_salted_md5() {
        let line = "5f4dcc3b5aa765d61d8327deb882cf99:0123456789abcdef0123456789abcdef";
        let det = classify(line).unwrap();
        assert_eq!(det.name, "NetNTLMv1");
        assert_eq!(det.mode, 5500);
    }

    #[test]
    fn framed_formats_are_exact() {
        assert_eq!(classify("$krb5tgs$23$*user$realm$spn*$abc").unwrap().mode, 13100);
        let bcrypt = format!("$2b$12${}", "aB1./x".repeat(9).chars().take(53).collect::<String>());
        assert_eq!(classify(&bcrypt).map(|d| d.name), Some("bcrypt"));
    }

    #[test]
    fn salt_heuristic_covers_known_digest_lengths() {
        let sha1 = format!("{}:somesalt", "a".repeat(40));
        let det = classify(&sha1).unwrap();
        assert_eq!(det.name, "SHA1 with salt");
        assert_eq!(det.mode, 110);
        assert!((det.confidence - 0.7).abs() < f64::EPSILON);

        let sha512 = format!("{}:pepper", "b".repeat(128));
        assert_eq!(classify(&sha512).unwrap().mode, 1710);
    }

    #[test]
    fn garbage_is_unclassified() {
        assert!(classify("not a hash at all!").is_none());
        assert!(classify("").is_none());
        assert_eq!(suggest_mode("not a hash at all!"), None);
        assert_eq!(suggest_mode("5f4dcc3b5aa765d61d8327deb882cf99"), Some(0));
    }

    #[test]
    fn analyze_counts_types_and_unknowns() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("mixed.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "# dump from appserver").unwrap();
        for i in 0..100 {
            writeln!(f, "{:032x}", 0x1000 + i).unwrap();
        }
        for i in 0..50 {
            writeln!(f, "{:040x}", 0x2000 + i).unwrap();
        }
        for i in 0..10 {
            writeln!(f, "garbage line {}!", i).unwrap();
        }
        drop(f);

        let analysis = analyze_file(&path, None).unwrap();
        assert_eq!(analysis.total_count, 160);
        assert_eq!(analysis.detected["MD5"].count, 100);
        assert_eq!(analysis.detected["SHA1"].count, 50);
        assert!(analysis.unknown.len() <= 10);
        assert_eq!(analysis.detected["MD5"].samples.len(), 3);

        let first = &analysis.recommendations[0];
        assert_eq!(first.priority, Priority::High);
        assert_eq!(first.action, "split_by_type");
    }

    #[test]
    fn dominant_mode_prefers_most_numerous_type() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("h.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{:040x}", 7u32).unwrap();
        writeln!(f, "{:032x}", 8u32).unwrap();
        writeln!(f, "{:032x}", 9u32).unwrap();
        drop(f);
        let analysis = analyze_file(&path, None).unwrap();
        assert_eq!(analysis.dominant_mode(), Some(0)); // MD5 dominates
    }

    #[test]
    fn sample_cap_bounds_examined_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("h.txt");
        let mut f = std::fs::File::create(&path).unwrap();
        for i in 0..100 {
            writeln!(f, "{:032x}", i).unwrap();
        }
        drop(f);
        let analysis = analyze_file(&path, Some(25)).unwrap();
        assert_eq!(analysis.total_count, 25);
    }

    #[test]
    fn single_type_recommendation_names_mode() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("h.txt");
        std::fs::write(&path, format!("{:032x}\n{:032x}\n", 1, 2)).unwrap();
        let analysis = analyze_file(&path, None).unwrap();
        let rec = &analysis.recommendations[0];
        assert_eq!(rec.action, "single_mode_attack");
        assert!(rec.description.contains("mode 0"));
    }
}
