//! Human-readable report rendering for terminal output.
//!
//! Produces colored summaries for finished runs, hash-file analyses, and the
//! session listing, plus the one-line status format used for live updates.
use colored::*;

use crate::engine::RunReport;
use crate::identify::{FileAnalysis, Priority};
use crate::session::SessionSummary;
use crate::supervisor::StatusEvent;

fn visible_len(s: &str) -> usize {
    // Strip ANSI escape sequences (\x1b[ ... m) to compute printable width
    let mut len = 0;
    let mut iter = s.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\u{1b}' {
            if let Some('[') = iter.peek().cloned() {
                let _ = iter.next();
            }
            for c in iter.by_ref() {
                if c == 'm' {
                    break;
                }
            }
        } else {
            len += 1;
        }
    }
    len
}

fn section_header(title: &str) -> String {
    let len = visible_len(title);
    let mut s = String::new();
    s.push('\n');
    s.push_str(title);
    s.push('\n');
    s.push_str(&"─".repeat(len));
    s.push_str("\n\n");
    s
}

/// Format a hash rate with the conventional unit prefix.
pub fn format_speed(speed_hs: u64) -> String {
    match speed_hs {
        s if s >= 1_000_000_000_000 => format!("{:.2} TH/s", s as f64 / 1e12),
        s if s >= 1_000_000_000 => format!("{:.2} GH/s", s as f64 / 1e9),
        s if s >= 1_000_000 => format!("{:.2} MH/s", s as f64 / 1e6),
        s if s >= 1_000 => format!("{:.2} kH/s", s as f64 / 1e3),
        s => format!("{s} H/s"),
    }
}

/// One-line live status for the terminal and the status file.
pub fn format_status_event(event: &StatusEvent) -> String {
    let mut parts = vec![
        format!("session={}", event.session_id),
        format!("attack={}", event.attack_name),
        format!("progress={:.1}%", event.progress_percent),
        format!("speed={}", format_speed(event.speed_total)),
        format!("recovered={}/{}", event.recovered, event.recovered_total),
        format!("runtime={}s", event.runtime_secs),
    ];
    if !event.eta.is_empty() {
        parts.push(format!("eta={}", event.eta));
    }
    parts.join(" ")
}

/// Render the end-of-run summary.
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{}\n",
        "Hashwrap: Cracking Session Results".bold().cyan()
    ));

    out.push_str(&section_header(
        &"Session Summary".bold().yellow().to_string(),
    ));
    out.push_str(&format!("Session: {}\n", report.session_id));
    out.push_str(&format!("Status: {:?}\n", report.status));
    out.push_str(&format!("Total hashes: {}\n", report.stats.total_hashes));
    out.push_str(&format!(
        "{}\n",
        format!(
            "Cracked: {} ({:.1}%)",
            report.stats.cracked, report.stats.success_rate
        )
        .green()
    ));
    out.push_str(&format!("Remaining: {}\n", report.stats.remaining));
    out.push_str(&format!("Attacks executed: {}\n", report.completed.len()));

    if !report.most_effective.is_empty() {
        out.push_str(&section_header(
            &"Most Effective Attacks".bold().yellow().to_string(),
        ));
        for (key, rate) in &report.most_effective {
            out.push_str(&format!("  {}: {:.1}% success rate\n", key, rate * 100.0));
        }
    }

    if report.password_analysis.total_cracked > 0 {
        let analysis = &report.password_analysis;
        out.push_str(&section_header(
            &"Password Analysis".bold().yellow().to_string(),
        ));
        out.push_str(&format!(
            "Average length: {:.1} characters\n",
            analysis.average_length
        ));
        for (label, count) in [
            ("lowercase only", analysis.charsets.lowercase_only),
            ("mixed case", analysis.charsets.mixed_case),
            ("with numbers", analysis.charsets.with_numbers),
            ("with special", analysis.charsets.with_special),
        ] {
            if count > 0 {
                out.push_str(&format!("  {label}: {count} passwords\n"));
            }
        }
    }

    if let Some(watcher) = &report.watcher {
        if watcher.hashes_added > 0 {
            out.push_str(&section_header(
                &"Hot-Reload Summary".bold().yellow().to_string(),
            ));
            out.push_str(&format!("Files processed: {}\n", watcher.files_processed));
            out.push_str(&format!("Hashes added: {}\n", watcher.hashes_added));
        }
    }

    if !report.stats.recent_cracks.is_empty() {
        out.push_str(&section_header(
            &"Recent Cracks".bold().yellow().to_string(),
        ));
        for (hash, plaintext, _) in &report.stats.recent_cracks {
            out.push_str(&format!("  {}: {}\n", hash, plaintext.green()));
        }
    }
    out
}

/// Render the `analyze` command output.
pub fn render_analysis(analysis: &FileAnalysis) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Hash Analysis".bold().cyan()));
    out.push_str(&format!("Total hashes: {}\n", analysis.total_count));

    out.push_str(&section_header(
        &"Detected Hash Types".bold().yellow().to_string(),
    ));
    if analysis.detected.is_empty() {
        out.push_str("(none detected)\n");
    }
    for (name, stat) in &analysis.detected {
        out.push_str(&format!("{}\n", name.green()));
        out.push_str(&format!("  Count: {}\n", stat.count));
        out.push_str(&format!("  Hashcat mode: {}\n", stat.mode));
        out.push_str(&format!("  Confidence: {:.0}%\n", stat.confidence * 100.0));
        if let Some(sample) = stat.samples.first() {
            out.push_str(&format!("  Sample: {sample}\n"));
        }
    }

    if !analysis.unknown.is_empty() {
        out.push_str(&format!(
            "\n{}\n",
            format!("Unknown hashes: {}", analysis.unknown.len()).yellow()
        ));
        for unknown in analysis.unknown.iter().take(3) {
            out.push_str(&format!("  Line {}: {}\n", unknown.line, unknown.sample));
        }
    }

    out.push_str(&section_header(
        &"Recommendations".bold().yellow().to_string(),
    ));
    for rec in &analysis.recommendations {
        let tag = match rec.priority {
            Priority::High => "[HIGH]".red().bold(),
            Priority::Medium => "[MEDIUM]".yellow(),
            Priority::Low => "[LOW]".blue(),
        };
        out.push_str(&format!("{} {}\n", tag, rec.description));
        for detail in &rec.details {
            out.push_str(&format!("    {detail}\n"));
        }
    }
    out
}

/// Render the `status` command listing.
pub fn render_sessions(sessions: &[SessionSummary]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", "Hashwrap Sessions".bold().cyan()));
    if sessions.is_empty() {
        out.push_str("No sessions found\n");
        return out;
    }
    for session in sessions {
        out.push_str(&format!("\n{}\n", format!("Session: {}", session.id).bold()));
        out.push_str(&format!("  Started: {}\n", session.start_time.to_rfc3339()));
        out.push_str(&format!("  Status: {:?}\n", session.status));
        out.push_str(&format!(
            "  Progress: {}/{} cracked\n",
            session.cracked_hashes, session.total_hashes
        ));
        out.push_str(&format!("  Hash file: {}\n", session.hash_file.display()));
    }
    out
}
