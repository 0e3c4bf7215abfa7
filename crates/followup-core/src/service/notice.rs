//! Reminder notice composition.

use chrono::{DateTime, Utc};

use crate::reminder::{Reminder, SUBJECT_PREFIX};

/// A plain-text notice ready to hand to the mail collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderNotice {
    /// Recipient of the notice: the sender of the original email.
    pub to: String,
    /// Notice subject.
    pub subject: String,
    /// Plain-text body.
    pub body: String,
}

impl ReminderNotice {
    /// Composes the notice for `reminder` as of `now`.
    #[must_use]
    pub fn compose(reminder: &Reminder, now: DateTime<Utc>) -> Self {
        let days = reminder.days_since_sent(now).max(0);
        let unit = if days == 1 { "day" } else { "days" };

        let body = format!(
            "Hi,\n\n\
             This is a follow-up reminder about an email you sent {days} {unit} ago:\n\n\
             To: {recipient}\n\
             Subject: {subject}\n\n\
             Did you receive a response? If not, you might want to send a follow-up.\n\n\
             Thank you,\n\
             Follow Up Service\n",
            recipient = reminder.recipient,
            subject = reminder.original_subject,
        );

        Self {
            to: reminder.sender.clone(),
            subject: format!("{SUBJECT_PREFIX}{}", reminder.original_subject),
            body,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::reminder::{ReminderId, ReminderState};
    use chrono::TimeZone;

    fn reminder() -> Reminder {
        let sent = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Reminder {
            id: ReminderId::from("r1"),
            source_message_id: "m1".to_string(),
            source_thread_id: "t1".to_string(),
            sender: "jane@example.com".to_string(),
            recipient: "bob@example.com".to_string(),
            subject: "Follow Up: Q1 budget [remind:1d]".to_string(),
            original_subject: "Q1 budget [remind:1d]".to_string(),
            original_send_time: sent,
            schedule: vec![sent + chrono::Duration::days(1)],
            last_fired_index: None,
            state: ReminderState::Pending,
        }
    }

    #[test]
    fn test_notice_goes_back_to_sender() {
        let now = Utc.with_ymd_and_hms(2024, 1, 4, 12, 0, 0).unwrap();
        let notice = ReminderNotice::compose(&reminder(), now);

        assert_eq!(notice.to, "jane@example.com");
        assert_eq!(notice.subject, "Follow Up: Q1 budget [remind:1d]");
        assert!(notice.body.contains("an email you sent 3 days ago"));
        assert!(notice.body.contains("To: bob@example.com\n"));
        assert!(notice.body.contains("Subject: Q1 budget [remind:1d]\n"));
    }

    #[test]
    fn test_single_day_is_singular() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 6, 0, 0).unwrap();
        let notice = ReminderNotice::compose(&reminder(), now);
        assert!(notice.body.contains("sent 1 day ago"));
    }

    #[test]
    fn test_clock_skew_never_reports_negative_days() {
        let now = Utc.with_ymd_and_hms(2023, 12, 30, 0, 0, 0).unwrap();
        let notice = ReminderNotice::compose(&reminder(), now);
        assert!(notice.body.contains("sent 0 days ago"));
    }
}
