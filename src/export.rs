//! Export helpers for writing results to CSV and plain text files.
//!
//! - `save_attack_results_csv` writes one row per completed attack with its
//!   disposition, crack count, and duration.
//! - `save_cracked_txt` writes `hash:plaintext` for every cracked entry.
use std::fs::File;
use std::io::Write;
use std::path::Path;

use anyhow::Result;
use csv::Writer;

use crate::engine::RunReport;
use crate::index::HashIndex;

pub fn save_attack_results_csv<P: AsRef<Path>>(report: &RunReport, path: P) -> Result<()> {
    let mut wtr = Writer::from_path(path)?;
    wtr.write_record(["Attack", "Disposition", "Cracked", "DurationSecs", "ExitCode"])?;
    for completed in &report.completed {
        let result = &completed.result;
        wtr.write_record([
            result.attack_name.clone(),
            format!("{:?}", result.disposition),
            result.cracked_count.to_string(),
            result.duration_secs.to_string(),
            result
                .exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
        ])?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn save_cracked_txt<P: AsRef<Path>>(index: &HashIndex, path: P) -> Result<()> {
    let mut f = File::create(path)?;
    let mut pairs = index.cracked_pairs();
    pairs.sort();
    for (hash, plaintext) in pairs {
        writeln!(f, "{hash}:{plaintext}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attack::{Attack, AttackResult, ExitDisposition, priority};
    use crate::index::IndexStats;
    use crate::session::{CompletedAttack, SessionStatus};
    use crate::stats::PasswordAnalysis;
    use tempfile::tempdir;

    #[test]
    fn writes_csv_and_txt() {
        let tmp = tempdir().unwrap();
        let attack = Attack::dictionary("quick", priority::QUICK_WIN, "w/top.txt");
        let report = RunReport {
            session_id: "s".to_string(),
            status: SessionStatus::Completed,
            stats: IndexStats::default(),
            completed: vec![CompletedAttack {
                attack: attack.clone(),
                result: AttackResult {
                    attack_name: "quick".to_string(),
                    disposition: ExitDisposition::Exhausted,
                    cracked_count: 2,
                    duration_secs: 11,
                    exit_code: Some(1),
                    completed_at: chrono::Utc::now(),
                },
            }],
            most_effective: Vec::new(),
            password_analysis: PasswordAnalysis::default(),
            watcher: None,
        };

        let csv_path = tmp.path().join("attacks.csv");
        save_attack_results_csv(&report, &csv_path).unwrap();
        let csv_content = std::fs::read_to_string(&csv_path).unwrap();
        assert!(csv_content.contains("Attack,Disposition,Cracked,DurationSecs,ExitCode"));
        assert!(csv_content.contains("quick,Exhausted,2,11,1"));

        let hashes = tmp.path().join("hashes.txt");
        let pot = tmp.path().join("pot");
        std::fs::write(&hashes, "aaaa\nbbbb\n").unwrap();
        std::fs::write(&pot, "aaaa:pw1\nbbbb:pw:2\n").unwrap();
        let index = HashIndex::open(&hashes, &pot, false).unwrap();

        let txt_path = tmp.path().join("cracked.txt");
        save_cracked_txt(&index, &txt_path).unwrap();
        let txt_content = std::fs::read_to_string(&txt_path).unwrap();
        assert_eq!(txt_content, "aaaa:pw1\nbbbb:pw:2\n");
    }
}
