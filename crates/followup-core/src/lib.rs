//! # followup-core
//!
//! Core logic of the follow-up reminder service.
//!
//! This crate provides:
//! - **Directive parsing** - `[remind:1d,3w]` tags in subject lines
//! - **Address extraction** - mailbox addresses from raw `From`/`To` headers
//! - **Reminders** - the reminder entity, its lifecycle and partial updates
//! - **Storage** - in-memory and `SQLite` reminder stores
//! - **Engine** - ingest and dispatch sweeps over a mail collaborator
//! - **Scheduler** - cron-driven triggers for both sweeps

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod address;
pub mod directive;
mod error;
pub mod reminder;
pub mod scheduler;
pub mod service;

pub use address::extract_address;
pub use directive::{DEFAULT_OFFSETS_DAYS, ReminderDirective};
pub use error::{Error, Result};
pub use reminder::{
    CandidateError, MemoryReminderStore, Reminder, ReminderId, ReminderState, ReminderStore,
    ReminderUpdate, SqliteReminderRepository,
};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use service::{
    DEFAULT_INGEST_MAX, FollowUpEngine, MailClient, MailError, MessagePage, ParsedHeaders,
    RawMessage, ReminderNotice,
};
