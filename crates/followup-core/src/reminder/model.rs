//! Reminder data models and lifecycle.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::address::extract_address;
use crate::directive::ReminderDirective;
use crate::service::{ParsedHeaders, RawMessage};

/// Prefix prepended to the original subject of every reminder notice.
pub const SUBJECT_PREFIX: &str = "Follow Up: ";

/// Unique identifier for a reminder. Generated once, never reused.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ReminderId(String);

impl ReminderId {
    /// Generates a fresh random ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ReminderId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ReminderId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for ReminderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a reminder is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReminderState {
    /// No offset has fired yet.
    #[default]
    Pending,
    /// Some, but not all, offsets have fired.
    Sent,
    /// Every offset has fired, or completion was forced.
    Completed,
}

impl ReminderState {
    /// Derives the state implied by the last fired index and schedule length.
    #[must_use]
    pub const fn from_progress(last_fired_index: Option<usize>, schedule_len: usize) -> Self {
        match last_fired_index {
            None => Self::Pending,
            Some(index) if index + 1 >= schedule_len => Self::Completed,
            Some(_) => Self::Sent,
        }
    }

    /// Returns the lowercase name used for storage and display.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for ReminderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ReminderState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "sent" => Ok(Self::Sent),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown reminder state: {other}")),
        }
    }
}

/// Why a candidate email did not become a reminder.
///
/// These are recovered locally: the candidate is skipped and not counted.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CandidateError {
    /// Neither the angle-bracket nor the bare address pattern matched.
    #[error("Could not extract {field} address from {value:?}")]
    MalformedAddress {
        /// Which header failed (`from` or `to`).
        field: &'static str,
        /// The raw header value.
        value: String,
    },

    /// The message has neither a parseable `Date` header nor a provider timestamp.
    #[error("Message {0} has no usable send date")]
    MissingSendTime(String),

    /// An offset pushes the scheduled time beyond the representable range.
    #[error("Offset of {0} days is out of range")]
    ScheduleOverflow(u32),
}

/// A follow-up reminder for one sent email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reminder {
    /// Unique identifier.
    pub id: ReminderId,
    /// Provider ID of the originating message.
    pub source_message_id: String,
    /// Provider thread ID of the originating message.
    pub source_thread_id: String,
    /// Sender mailbox address; reminder notices go here.
    pub sender: String,
    /// Recipient mailbox address of the original email.
    pub recipient: String,
    /// Subject of the reminder notice.
    pub subject: String,
    /// Subject of the original email, directive included.
    pub original_subject: String,
    /// When the original email was sent.
    pub original_send_time: DateTime<Utc>,
    /// When each reminder is due, ascending.
    pub schedule: Vec<DateTime<Utc>>,
    /// Index into `schedule` of the most recently fired reminder.
    pub last_fired_index: Option<usize>,
    /// Lifecycle state.
    pub state: ReminderState,
}

impl Reminder {
    /// Builds a reminder from a candidate message and its parsed directive.
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be extracted, the send time
    /// is unknown, or an offset overflows the calendar.
    pub fn from_candidate(
        message: &RawMessage,
        headers: &ParsedHeaders,
        directive: &ReminderDirective,
    ) -> Result<Self, CandidateError> {
        let sender =
            extract_address(&headers.from).ok_or_else(|| CandidateError::MalformedAddress {
                field: "from",
                value: headers.from.clone(),
            })?;
        let recipient =
            extract_address(&headers.to).ok_or_else(|| CandidateError::MalformedAddress {
                field: "to",
                value: headers.to.clone(),
            })?;
        let sent_at = headers
            .date_sent
            .ok_or_else(|| CandidateError::MissingSendTime(message.id.clone()))?;

        let schedule = schedule_from_offsets(sent_at, &directive.offsets_days)?;

        Ok(Self {
            id: ReminderId::generate(),
            source_message_id: message.id.clone(),
            source_thread_id: message.thread_id.clone(),
            sender,
            recipient,
            subject: format!("{SUBJECT_PREFIX}{}", headers.subject),
            original_subject: headers.subject.clone(),
            original_send_time: sent_at,
            schedule,
            last_fired_index: None,
            state: ReminderState::Pending,
        })
    }

    /// Index of the next offset that has not fired yet.
    #[must_use]
    pub fn next_index(&self) -> usize {
        self.last_fired_index.map_or(0, |index| index + 1)
    }

    /// When the next unfired reminder is due, if any remain.
    #[must_use]
    pub fn next_due_at(&self) -> Option<DateTime<Utc>> {
        if self.state == ReminderState::Completed {
            return None;
        }
        self.schedule.get(self.next_index()).copied()
    }

    /// Checks whether a reminder is due at `now`.
    ///
    /// Returns the index of the due offset. Calling this repeatedly with the
    /// same `now` returns the same answer and never touches
    /// `last_fired_index`. If no offsets remain the reminder is completed
    /// here, lazily, and `None` is returned.
    pub fn due_index(&mut self, now: DateTime<Utc>) -> Option<usize> {
        if self.state == ReminderState::Completed {
            return None;
        }

        let next = self.next_index();
        let Some(due_at) = self.schedule.get(next) else {
            self.state = ReminderState::Completed;
            return None;
        };

        (*due_at <= now).then_some(next)
    }

    /// Records that the reminder at `index` was sent.
    pub fn mark_fired(&mut self, index: usize) {
        self.last_fired_index = Some(index);
        self.state = ReminderState::from_progress(Some(index), self.schedule.len());
    }

    /// Whole days elapsed between the original send and `now`.
    #[must_use]
    pub fn days_since_sent(&self, now: DateTime<Utc>) -> i64 {
        (now - self.original_send_time).num_days()
    }
}

/// Computes `sent_at + offset` for each offset, keeping ascending order.
fn schedule_from_offsets(
    sent_at: DateTime<Utc>,
    offsets_days: &[u32],
) -> Result<Vec<DateTime<Utc>>, CandidateError> {
    let mut schedule = offsets_days
        .iter()
        .map(|&days| {
            Duration::try_days(i64::from(days))
                .and_then(|offset| sent_at.checked_add_signed(offset))
                .ok_or(CandidateError::ScheduleOverflow(days))
        })
        .collect::<Result<Vec<_>, _>>()?;
    schedule.sort();
    Ok(schedule)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::directive;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn candidate(from: &str, to: &str, subject: &str) -> (RawMessage, ParsedHeaders) {
        let message = RawMessage::new("msg-1", "thread-1");
        let headers = ParsedHeaders {
            subject: subject.to_string(),
            from: from.to_string(),
            to: to.to_string(),
            date_sent: Some(at(2024, 1, 1, 0)),
        };
        (message, headers)
    }

    fn build(subject: &str) -> Reminder {
        let (message, headers) = candidate("Jane Doe <jane@example.com>", "bob@example.com", subject);
        let directive = directive::parse(subject).unwrap();
        Reminder::from_candidate(&message, &headers, &directive).unwrap()
    }

    #[test]
    fn test_build_reminder() {
        let reminder = build("Q1 budget [remind:1d,3d]");
        assert_eq!(reminder.source_message_id, "msg-1");
        assert_eq!(reminder.source_thread_id, "thread-1");
        assert_eq!(reminder.sender, "jane@example.com");
        assert_eq!(reminder.recipient, "bob@example.com");
        assert_eq!(reminder.subject, "Follow Up: Q1 budget [remind:1d,3d]");
        assert_eq!(reminder.schedule, vec![at(2024, 1, 2, 0), at(2024, 1, 4, 0)]);
        assert_eq!(reminder.last_fired_index, None);
        assert_eq!(reminder.state, ReminderState::Pending);
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(build("a [remind:1d]").id, build("a [remind:1d]").id);
    }

    #[test]
    fn test_malformed_sender_is_rejected() {
        let (message, headers) = candidate("Unknown Sender", "bob@example.com", "x [remind:1d]");
        let err = Reminder::from_candidate(&message, &headers, &ReminderDirective::default_schedule())
            .unwrap_err();
        assert!(matches!(err, CandidateError::MalformedAddress { field: "from", .. }));
    }

    #[test]
    fn test_malformed_recipient_is_rejected() {
        let (message, headers) = candidate("jane@example.com", "Unknown Recipient", "x [remind:1d]");
        let err = Reminder::from_candidate(&message, &headers, &ReminderDirective::default_schedule())
            .unwrap_err();
        assert!(matches!(err, CandidateError::MalformedAddress { field: "to", .. }));
    }

    #[test]
    fn test_missing_send_time_is_rejected() {
        let (message, mut headers) = candidate("jane@example.com", "bob@example.com", "x");
        headers.date_sent = None;
        let err = Reminder::from_candidate(&message, &headers, &ReminderDirective::default_schedule())
            .unwrap_err();
        assert_eq!(err, CandidateError::MissingSendTime("msg-1".to_string()));
    }

    #[test]
    fn test_overflowing_offset_is_rejected() {
        let (message, headers) = candidate("jane@example.com", "bob@example.com", "x");
        let directive = ReminderDirective::from_spec("4000000000m");
        let err = Reminder::from_candidate(&message, &headers, &directive).unwrap_err();
        assert_eq!(err, CandidateError::ScheduleOverflow(u32::MAX));
    }

    #[test]
    fn test_due_index_not_yet_due() {
        let mut reminder = build("x [remind:1d,3d]");
        assert_eq!(reminder.due_index(at(2024, 1, 1, 12)), None);
        assert_eq!(reminder.state, ReminderState::Pending);
    }

    #[test]
    fn test_due_index_at_exact_time() {
        let mut reminder = build("x [remind:1d,3d]");
        assert_eq!(reminder.due_index(at(2024, 1, 2, 0)), Some(0));
    }

    #[test]
    fn test_fire_sequence() {
        let mut reminder = build("x [remind:1d,3d]");

        assert_eq!(reminder.due_index(at(2024, 1, 2, 12)), Some(0));
        reminder.mark_fired(0);
        assert_eq!(reminder.last_fired_index, Some(0));
        assert_eq!(reminder.state, ReminderState::Sent);
        assert_eq!(reminder.due_index(at(2024, 1, 2, 12)), None);

        assert_eq!(reminder.due_index(at(2024, 1, 4, 12)), Some(1));
        reminder.mark_fired(1);
        assert_eq!(reminder.state, ReminderState::Completed);
        assert_eq!(reminder.due_index(at(2030, 1, 1, 0)), None);
        assert_eq!(reminder.next_due_at(), None);
    }

    #[test]
    fn test_late_sweep_fires_one_offset_at_a_time() {
        let mut reminder = build("x [remind:1d,3d,7d]");
        let late = at(2024, 2, 1, 0);
        assert_eq!(reminder.due_index(late), Some(0));
        reminder.mark_fired(0);
        assert_eq!(reminder.due_index(late), Some(1));
    }

    #[test]
    fn test_lazy_completion_on_exhausted_schedule() {
        let mut reminder = build("x [remind:1d]");
        reminder.schedule.clear();
        assert_eq!(reminder.state, ReminderState::Pending);
        assert_eq!(reminder.due_index(at(2024, 1, 1, 0)), None);
        assert_eq!(reminder.state, ReminderState::Completed);
        assert_eq!(reminder.last_fired_index, None);
    }

    #[test]
    fn test_forced_completion_is_terminal() {
        let mut reminder = build("x [remind:1d,3d]");
        reminder.state = ReminderState::Completed;
        assert_eq!(reminder.due_index(at(2025, 1, 1, 0)), None);
    }

    #[test]
    fn test_state_from_progress() {
        assert_eq!(ReminderState::from_progress(None, 3), ReminderState::Pending);
        assert_eq!(ReminderState::from_progress(Some(0), 3), ReminderState::Sent);
        assert_eq!(ReminderState::from_progress(Some(2), 3), ReminderState::Completed);
        assert_eq!(ReminderState::from_progress(Some(5), 3), ReminderState::Completed);
    }

    #[test]
    fn test_state_round_trips_through_str() {
        for state in [ReminderState::Pending, ReminderState::Sent, ReminderState::Completed] {
            assert_eq!(state.as_str().parse::<ReminderState>().unwrap(), state);
        }
        assert!("archived".parse::<ReminderState>().is_err());
    }

    #[test]
    fn test_days_since_sent() {
        let reminder = build("x [remind:1d]");
        assert_eq!(reminder.days_since_sent(at(2024, 1, 4, 12)), 3);
    }

    proptest! {
        #[test]
        fn prop_due_index_is_idempotent(
            offsets in proptest::collection::vec(0u32..400, 1..6),
            hours in 0i64..(24 * 500),
        ) {
            let spec = offsets.iter().map(|d| format!("{d}d")).collect::<Vec<_>>().join(",");
            let mut reminder = build(&format!("x [remind:{spec}]"));
            let now = at(2024, 1, 1, 0) + Duration::hours(hours);

            let first = reminder.due_index(now);
            for _ in 0..3 {
                prop_assert_eq!(reminder.due_index(now), first);
                prop_assert_eq!(reminder.last_fired_index, None);
            }
        }

        #[test]
        fn prop_fired_indexes_never_reported_again(
            offsets in proptest::collection::vec(0u32..400, 1..6),
            hours in 0i64..(24 * 500),
        ) {
            let spec = offsets.iter().map(|d| format!("{d}d")).collect::<Vec<_>>().join(",");
            let mut reminder = build(&format!("x [remind:{spec}]"));
            let now = at(2024, 1, 1, 0) + Duration::hours(hours);

            while let Some(index) = reminder.due_index(now) {
                let previous = reminder.last_fired_index;
                prop_assert!(previous.is_none_or(|p| index > p));
                reminder.mark_fired(index);
            }

            if reminder.last_fired_index == Some(reminder.schedule.len() - 1) {
                prop_assert_eq!(reminder.state, ReminderState::Completed);
                prop_assert_eq!(reminder.due_index(now + Duration::days(10_000)), None);
            }
        }
    }
}
