//! Shared CLI helpers — path expansion, banner, check marks, sync report printing.

use std::path::PathBuf;

use colored::Colorize;

use mailgram_mail::PassReport;

/// Expand `~` at the start of a path to the user's home directory.
pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs_next::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs_next::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

/// Print the banner shown when the bridge starts.
pub fn print_banner() {
    let version = env!("CARGO_PKG_VERSION");
    println!();
    println!("{}  v{}", "📬 Mailgram".cyan().bold(), version.dimmed());
    println!();
}

/// Green check or red cross with a note.
pub fn mark(ok: bool, note: &str) -> String {
    if ok {
        format!("{} {}", "✓".green(), note)
    } else {
        format!("{} {}", "✗".red(), note)
    }
}

/// Human summary of one sync pass.
pub fn describe_report(report: &PassReport) -> String {
    if let Some(uid) = report.seeded {
        return format!("first run: cursor set to UID {uid}, existing mail skipped");
    }
    let mut out = format!("{} message(s) bridged", report.dispatched.len());
    if !report.failed.is_empty() {
        let failed: Vec<String> = report.failed.iter().map(u32::to_string).collect();
        out.push_str(&format!(", failed: {}", failed.join(", ")));
    }
    out.push_str(&format!("; cursor at UID {}", report.cursor));
    if report.held > 0 {
        out.push_str(&format!(" ({} delivered past it)", report.held));
    }
    out
}

pub fn print_report(report: &PassReport) {
    let ok = report.failed.is_empty();
    println!("  {}", mark(ok, &describe_report(report)));
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────
