//! Mail collaborator interface.
//!
//! The engine never talks to a mail provider directly. It consumes the
//! [`MailClient`] trait, which a provider crate implements (listing recent
//! messages, fetching one message, sending a plain-text message).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Subject used when a message carries no `Subject` header.
pub const NO_SUBJECT: &str = "No Subject";

/// Sender used when a message carries no `From` header.
pub const UNKNOWN_SENDER: &str = "Unknown Sender";

/// Recipient used when a message carries no `To` header.
pub const UNKNOWN_RECIPIENT: &str = "Unknown Recipient";

/// Errors that can occur during mail collaborator calls.
///
/// The engine treats every variant the same way during a sweep: log, skip,
/// continue.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    /// Network or provider-side failure.
    #[error("Transport failed: {0}")]
    Transport(String),

    /// Credentials were rejected or could not be refreshed.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The provider answered with something we could not interpret.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// A single raw header as delivered by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Header name (case preserved).
    pub name: String,
    /// Unparsed header value.
    pub value: String,
}

impl MessageHeader {
    /// Creates a new header.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A message as returned by the mail collaborator.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Provider message ID.
    pub id: String,
    /// Provider thread ID.
    pub thread_id: String,
    /// Raw headers.
    pub headers: Vec<MessageHeader>,
    /// Provider-side receive/send timestamp, if known.
    pub internal_date: Option<DateTime<Utc>>,
}

impl RawMessage {
    /// Creates a message without headers.
    #[must_use]
    pub fn new(id: impl Into<String>, thread_id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            thread_id: thread_id.into(),
            ..Self::default()
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push(MessageHeader::new(name, value));
        self
    }

    /// Sets the provider timestamp.
    #[must_use]
    pub const fn with_internal_date(mut self, date: DateTime<Utc>) -> Self {
        self.internal_date = Some(date);
        self
    }

    /// Gets the first value of a header, matching the name case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .map(|h| h.value.as_str())
    }
}

/// One page of a message listing.
#[derive(Debug, Clone, Default)]
pub struct MessagePage {
    /// Messages on this page, most recent first.
    pub messages: Vec<RawMessage>,
    /// Token for the next page, if any.
    pub next_page_token: Option<String>,
    /// Provider estimate of the total result count.
    pub estimated_count: Option<u32>,
}

/// The headers the engine cares about.
///
/// `from` and `to` are raw header strings, not extracted addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedHeaders {
    /// Subject line.
    pub subject: String,
    /// Raw `From` header.
    pub from: String,
    /// Raw `To` header.
    pub to: String,
    /// When the message was sent, if it could be determined.
    pub date_sent: Option<DateTime<Utc>>,
}

impl ParsedHeaders {
    /// Reads the engine-relevant headers of a message.
    ///
    /// The send time comes from the RFC 2822 `Date` header and falls back to
    /// the provider timestamp.
    #[must_use]
    pub fn from_message(message: &RawMessage) -> Self {
        let date_sent = message
            .header("date")
            .and_then(parse_date_header)
            .or(message.internal_date);

        Self {
            subject: message.header("subject").unwrap_or(NO_SUBJECT).to_string(),
            from: message.header("from").unwrap_or(UNKNOWN_SENDER).to_string(),
            to: message.header("to").unwrap_or(UNKNOWN_RECIPIENT).to_string(),
            date_sent,
        }
    }
}

/// Parses an RFC 2822 `Date` header, tolerating a trailing `(zone)` comment.
fn parse_date_header(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    let value = value
        .rfind(" (")
        .filter(|_| value.ends_with(')'))
        .map_or(value, |idx| &value[..idx]);

    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Mail provider operations consumed by the engine.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Lists the most recent messages, up to `max_results` per page.
    async fn list_recent_messages(
        &self,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<MessagePage, MailError>;

    /// Fetches a single message by ID.
    async fn get_message(&self, id: &str) -> Result<RawMessage, MailError>;

    /// Extracts subject, from, to and send date from a message.
    fn parse_headers(&self, message: &RawMessage) -> ParsedHeaders {
        ParsedHeaders::from_message(message)
    }

    /// Sends a plain-text message from the account owner and returns the
    /// provider message ID.
    async fn send_plain_text_message(
        &self,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<String, MailError>;
}
