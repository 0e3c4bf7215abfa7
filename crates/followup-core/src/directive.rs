//! Reminder directive parsing.
//!
//! A directive is a `[remind:<spec>]` tag placed anywhere in a subject line,
//! for example `Q1 budget [remind:1d,3w]`. The tag body is a comma-separated list
//! of `<n><unit>` tokens:
//!
//! - `d` (or no/unknown unit): `n` days
//! - `w`: `n` weeks (7 days each)
//! - `m`: `n` months (approximated as 30 days each)
//!
//! A missing or non-numeric magnitude counts as 1. Empty tokens are skipped,
//! and a spec without any usable token falls back to [`DEFAULT_OFFSETS_DAYS`].

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Offsets (in days) used when a directive yields no usable tokens.
pub const DEFAULT_OFFSETS_DAYS: [u32; 3] = [1, 3, 7];

const DAYS_PER_WEEK: u32 = 7;
const DAYS_PER_MONTH: u32 = 30;

#[allow(clippy::expect_used)] // constant pattern, checked by tests
static DIRECTIVE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[remind:([^\]]*)\]").expect("directive pattern is a valid regex")
});

/// Parsed result of a `[remind:...]` subject tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderDirective {
    /// The captured spec text, trimmed (e.g. `1d,3w`).
    pub raw_text: String,
    /// Offsets from the original send time, in whole days, ascending.
    /// Never empty.
    pub offsets_days: Vec<u32>,
}

impl ReminderDirective {
    /// Builds a directive from the text between `[remind:` and `]`.
    #[must_use]
    pub fn from_spec(spec: &str) -> Self {
        let mut offsets_days: Vec<u32> = spec.split(',').filter_map(parse_token).collect();

        if offsets_days.is_empty() {
            offsets_days = DEFAULT_OFFSETS_DAYS.to_vec();
        }
        offsets_days.sort_unstable();

        Self {
            raw_text: spec.trim().to_string(),
            offsets_days,
        }
    }

    /// The directive used when an email qualifies without an explicit tag.
    #[must_use]
    pub fn default_schedule() -> Self {
        Self {
            raw_text: String::new(),
            offsets_days: DEFAULT_OFFSETS_DAYS.to_vec(),
        }
    }
}

/// Extracts and parses the reminder directive from a subject line.
///
/// Returns `None` if the subject carries no `[remind:...]` tag; such an
/// email is not a follow-up candidate.
#[must_use]
pub fn parse(subject: &str) -> Option<ReminderDirective> {
    let captures = DIRECTIVE_PATTERN.captures(subject)?;
    let spec = captures.get(1).map_or("", |m| m.as_str());
    Some(ReminderDirective::from_spec(spec))
}

/// Returns true if the subject carries a `[remind:...]` tag.
///
/// This is the whole candidate qualification rule: recipients (including
/// cc/bcc) are not examined.
#[must_use]
pub fn is_candidate(subject: &str) -> bool {
    DIRECTIVE_PATTERN.is_match(subject)
}

/// Converts one spec token to a day offset. Empty tokens yield `None`.
fn parse_token(token: &str) -> Option<u32> {
    let token = token.trim().to_lowercase();
    if token.is_empty() {
        return None;
    }

    let digits_end = token
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(token.len());
    let magnitude = token[..digits_end].parse::<u32>().unwrap_or(1);

    let days = match token.chars().last() {
        Some('w') => magnitude.saturating_mul(DAYS_PER_WEEK),
        Some('m') => magnitude.saturating_mul(DAYS_PER_MONTH),
        _ => magnitude,
    };
    Some(days)
}
