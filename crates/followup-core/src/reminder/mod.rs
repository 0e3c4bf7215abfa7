//! Follow-up reminders.
//!
//! A reminder tracks one sent email with a `[remind:...]` directive and the
//! schedule of notices derived from it. Reminders live in a
//! [`ReminderStore`]; the durable backend is [`SqliteReminderRepository`].

mod model;
mod repository;
mod store;
mod update;

pub use model::{CandidateError, Reminder, ReminderId, ReminderState, SUBJECT_PREFIX};
pub use repository::SqliteReminderRepository;
pub use store::{MemoryReminderStore, ReminderStore};
pub use update::{ReminderUpdate, parse_timestamp};

#[cfg(test)]
pub(crate) use store::tests::sample as sample_reminder;
