//! Core services.
//!
//! This module holds the mail collaborator contract the engine consumes
//! and the engine itself, which the scheduler and the presentation layer
//! drive.

pub mod engine;
pub mod mail;
pub mod notice;

pub use engine::{DEFAULT_INGEST_MAX, FollowUpEngine};
pub use mail::{
    MailClient, MailError, MessageHeader, MessagePage, NO_SUBJECT, ParsedHeaders, RawMessage,
    UNKNOWN_RECIPIENT, UNKNOWN_SENDER,
};
pub use notice::ReminderNotice;
