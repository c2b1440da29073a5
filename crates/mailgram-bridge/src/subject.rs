//! Subject normalisation: one chat thread per conversation.

use std::sync::OnceLock;

use regex::Regex;

/// Title used when a message has no subject.
pub const NO_SUBJECT: &str = "(no subject)";

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Re:, Fwd:, Fw:, AW:, WG:, SV:, VS:, TR:, Antw:, with optional counters ("Re[2]:")
        Regex::new(r"(?i)^\s*(re|fwd?|aw|wg|sv|vs|tr|antw)\s*(\[\d+\]|\(\d+\))?\s*[:：]\s*")
            .unwrap_or_else(|e| panic!("invalid subject regex: {e}"))
    })
}

/// Subject with leading reply/forward markers stripped and whitespace
/// collapsed. Casing is kept for display.
pub fn normalize_subject(subject: &str) -> String {
    let mut rest = subject.trim();
    while let Some(m) = marker_re().find(rest) {
        rest = &rest[m.end()..];
    }
    let collapsed = rest.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        NO_SUBJECT.to_string()
    } else {
        collapsed
    }
}

/// Lookup key: the normalised subject, case-folded.
pub fn subject_key(subject: &str) -> String {
    normalize_subject(subject).to_lowercase()
}
