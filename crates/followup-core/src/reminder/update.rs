//! Partial updates applied to stored reminders.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use super::model::{Reminder, ReminderState};

/// Fields an external caller may change on a reminder.
///
/// Identity fields (`id`, `source_message_id`, `source_thread_id`) are not
/// part of this type, so payloads naming them are silently stripped during
/// deserialization.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReminderUpdate {
    /// New sender address.
    #[serde(default, alias = "senderEmail", skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    /// New recipient address.
    #[serde(default, alias = "recipientEmail", skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    /// New notice subject.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// New original subject.
    #[serde(default, alias = "originalSubject", skip_serializing_if = "Option::is_none")]
    pub original_subject: Option<String>,
    /// New original send time.
    #[serde(
        default,
        alias = "sendDate",
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub original_send_time: Option<DateTime<Utc>>,
    /// Replacement schedule; re-sorted ascending when applied.
    #[serde(
        default,
        alias = "reminder_dates",
        alias = "reminderDates",
        deserialize_with = "deserialize_schedule",
        skip_serializing_if = "Option::is_none"
    )]
    pub schedule: Option<Vec<DateTime<Utc>>>,
    /// Replacement progress marker. `Some(None)` resets to "nothing fired";
    /// in JSON that is `-1`.
    #[serde(
        default,
        alias = "lastSentReminderIndex",
        deserialize_with = "deserialize_fired_index",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_fired_index: Option<Option<usize>>,
    /// Replacement state.
    #[serde(default, alias = "status", skip_serializing_if = "Option::is_none")]
    pub state: Option<ReminderState>,
}

impl ReminderUpdate {
    /// Returns true if the update changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Progress-only update, as recorded by a dispatch.
    #[must_use]
    pub fn progress(last_fired_index: Option<usize>, state: ReminderState) -> Self {
        Self {
            last_fired_index: Some(last_fired_index),
            state: Some(state),
            ..Self::default()
        }
    }

    /// Applies the update in place.
    ///
    /// A new schedule never changes progress on its own, so a completed
    /// reminder stays completed. Setting `last_fired_index` without `state`
    /// re-derives the state from the new index.
    pub fn apply_to(self, reminder: &mut Reminder) {
        if let Some(sender) = self.sender {
            reminder.sender = sender;
        }
        if let Some(recipient) = self.recipient {
            reminder.recipient = recipient;
        }
        if let Some(subject) = self.subject {
            reminder.subject = subject;
        }
        if let Some(original_subject) = self.original_subject {
            reminder.original_subject = original_subject;
        }
        if let Some(sent_at) = self.original_send_time {
            reminder.original_send_time = sent_at;
        }
        if let Some(mut schedule) = self.schedule {
            schedule.sort();
            reminder.schedule = schedule;
        }

        match (self.last_fired_index, self.state) {
            (Some(index), Some(state)) => {
                reminder.last_fired_index = index;
                reminder.state = state;
            }
            (Some(index), None) => {
                reminder.last_fired_index = index;
                reminder.state = ReminderState::from_progress(index, reminder.schedule.len());
            }
            (None, Some(state)) => reminder.state = state,
            (None, None) => {}
        }
    }
}

/// Parses an RFC 3339 timestamp, a naive `YYYY-MM-DDTHH:MM:SS` (read as UTC)
/// or a bare `YYYY-MM-DD` date (midnight UTC).
#[must_use]
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_timestamp_or_err<E: serde::de::Error>(value: &str) -> Result<DateTime<Utc>, E> {
    parse_timestamp(value).ok_or_else(|| E::custom(format!("invalid timestamp: {value}")))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|value| parse_timestamp_or_err(&value))
        .transpose()
}

fn deserialize_schedule<'de, D>(deserializer: D) -> Result<Option<Vec<DateTime<Utc>>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Vec<String>>::deserialize(deserializer)?
        .map(|values| {
            values
                .iter()
                .map(|value| parse_timestamp_or_err(value))
                .collect()
        })
        .transpose()
}

#[allow(clippy::option_option)] // absent vs. explicit reset are different updates
fn deserialize_fired_index<'de, D>(deserializer: D) -> Result<Option<Option<usize>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<i64>::deserialize(deserializer)? else {
        return Ok(Some(None));
    };
    match raw {
        -1 => Ok(Some(None)),
        index => usize::try_from(index)
            .map(|index| Some(Some(index)))
            .map_err(|_| serde::de::Error::custom(format!("invalid fired index: {index}"))),
    }
}
