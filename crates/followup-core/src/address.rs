//! Mailbox address extraction from raw `From`/`To` header values.

use std::sync::LazyLock;

use regex::Regex;

#[allow(clippy::expect_used)] // constant pattern, checked by tests
static ANGLE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<\s*([^<>\s@]+@[^<>\s]+)\s*>").expect("angle address pattern is a valid regex")
});

#[allow(clippy::expect_used)] // constant pattern, checked by tests
static BARE_ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([^\s<>,;]+@[^\s<>,;]+)").expect("bare address pattern is a valid regex")
});

/// Extracts the mailbox address from a header value.
///
/// Accepts both `Display Name <addr@example.com>` and bare
/// `addr@example.com` forms. The angle-bracket form is tried first; for
/// address lists the first address wins.
#[must_use]
pub fn extract_address(header: &str) -> Option<String> {
    ANGLE_ADDRESS
        .captures(header)
        .or_else(|| BARE_ADDRESS.captures(header))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
