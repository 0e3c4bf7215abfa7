//! The follow-up engine.
//!
//! [`FollowUpEngine`] owns the two sweeps (ingest and dispatch) and the
//! operations the presentation layer calls. Timed triggers and manual
//! invocations both go through the same methods here.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::mail::{MailClient, RawMessage};
use super::notice::ReminderNotice;
use crate::directive;
use crate::reminder::{Reminder, ReminderId, ReminderStore, ReminderUpdate};
use crate::{Error, Result};

/// Messages inspected by an ingest sweep when the caller gives no limit.
pub const DEFAULT_INGEST_MAX: u32 = 20;

/// Ingest and dispatch logic over a mail collaborator and a reminder store.
///
/// Sweeps of the same kind never overlap: each kind holds its own guard
/// for the whole sweep, so a manual dispatch issued during a timed one
/// waits instead of double-firing. Force sends share the dispatch guard.
pub struct FollowUpEngine {
    mail: Arc<dyn MailClient>,
    store: Arc<dyn ReminderStore>,
    ingest_guard: Mutex<()>,
    dispatch_guard: Mutex<()>,
}

impl FollowUpEngine {
    /// Creates an engine.
    #[must_use]
    pub fn new(mail: Arc<dyn MailClient>, store: Arc<dyn ReminderStore>) -> Self {
        Self {
            mail,
            store,
            ingest_guard: Mutex::new(()),
            dispatch_guard: Mutex::new(()),
        }
    }

    /// Runs an ingest sweep over at most `max_messages` recent messages.
    ///
    /// Returns the number of reminders created. Candidates that cannot be
    /// converted, or whose source message already has a reminder, are
    /// skipped and not counted.
    ///
    /// # Errors
    ///
    /// Returns an error if listing messages or writing to the store fails.
    pub async fn ingest(&self, max_messages: u32) -> Result<usize> {
        let _guard = self.ingest_guard.lock().await;

        let listed = self.collect_recent(max_messages).await?;
        debug!(count = listed.len(), "Inspecting recent messages");

        let mut created = 0;
        for listed_message in listed {
            let message = if listed_message.headers.is_empty() {
                match self.mail.get_message(&listed_message.id).await {
                    Ok(message) => message,
                    Err(e) => {
                        warn!(message_id = %listed_message.id, error = %e, "Failed to fetch message");
                        continue;
                    }
                }
            } else {
                listed_message
            };

            if self.ingest_one(&message).await? {
                created += 1;
            }
        }

        info!(created, "Ingest sweep finished");
        Ok(created)
    }

    /// Converts one message. Returns true if a reminder was created.
    async fn ingest_one(&self, message: &RawMessage) -> Result<bool> {
        let headers = self.mail.parse_headers(message);
        let Some(directive) = directive::parse(&headers.subject) else {
            return Ok(false);
        };

        if self.store.find_by_source_message(&message.id).await?.is_some() {
            debug!(message_id = %message.id, "Reminder already exists for message");
            return Ok(false);
        }
        if self.store.is_source_deleted(&message.id).await? {
            debug!(message_id = %message.id, "Reminder for message was deleted");
            return Ok(false);
        }

        match Reminder::from_candidate(message, &headers, &directive) {
            Ok(reminder) => {
                self.store.create(&reminder).await?;
                info!(
                    reminder_id = %reminder.id,
                    message_id = %message.id,
                    offsets = ?directive.offsets_days,
                    "Created reminder"
                );
                Ok(true)
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Skipping candidate");
                Ok(false)
            }
        }
    }

    /// Lists recent messages, following page tokens until `max_messages`
    /// have been collected or the provider runs out.
    async fn collect_recent(&self, max_messages: u32) -> Result<Vec<RawMessage>> {
        let wanted = max_messages as usize;
        let mut collected = Vec::new();
        let mut page_token: Option<String> = None;

        while collected.len() < wanted {
            let remaining = u32::try_from(wanted - collected.len()).unwrap_or(max_messages);
            let page = self
                .mail
                .list_recent_messages(remaining, page_token.as_deref())
                .await?;

            if page.messages.is_empty() {
                break;
            }
            collected.extend(page.messages);

            match page.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        collected.truncate(wanted);
        Ok(collected)
    }

    /// Runs a dispatch sweep at the current time.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn dispatch(&self) -> Result<usize> {
        self.dispatch_at(Utc::now()).await
    }

    /// Runs a dispatch sweep as of `now`.
    ///
    /// Sends at most one notice per reminder. A failed send is logged and
    /// leaves the reminder untouched, so the next sweep retries the same
    /// offset. Returns the number of notices actually sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read or written.
    pub async fn dispatch_at(&self, now: DateTime<Utc>) -> Result<usize> {
        let _guard = self.dispatch_guard.lock().await;

        let mut sent = 0;
        for mut reminder in self.store.list_all().await? {
            let state_before = reminder.state;
            let due = reminder.due_index(now);

            if reminder.state != state_before {
                debug!(reminder_id = %reminder.id, "All offsets fired, completing reminder");
                self.save_progress(&reminder).await?;
            }

            let Some(index) = due else {
                continue;
            };

            if let Err(e) = self.send_notice(&reminder, now).await {
                error!(reminder_id = %reminder.id, index, error = %e, "Failed to send reminder");
                continue;
            }

            reminder.mark_fired(index);
            self.save_progress(&reminder).await?;
            sent += 1;
        }

        info!(sent, "Dispatch sweep finished");
        Ok(sent)
    }

    /// Sends the next unfired notice of a reminder immediately, ignoring
    /// its schedule, and records it exactly as a dispatch would.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs,
    /// [`Error::AlreadyCompleted`] if nothing is left to send, and
    /// [`Error::Transport`] if the send fails.
    pub async fn force_send(&self, id: &ReminderId) -> Result<Reminder> {
        let _guard = self.dispatch_guard.lock().await;

        let mut reminder = self.get_reminder(id).await?;
        if reminder.next_due_at().is_none() {
            return Err(Error::AlreadyCompleted(id.clone()));
        }

        let index = reminder.next_index();
        self.send_notice(&reminder, Utc::now()).await?;
        reminder.mark_fired(index);

        info!(reminder_id = %id, index, "Force-sent reminder");
        self.store
            .update(
                id,
                ReminderUpdate::progress(reminder.last_fired_index, reminder.state),
            )
            .await
    }

    async fn send_notice(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<()> {
        let notice = ReminderNotice::compose(reminder, now);
        let message_id = self
            .mail
            .send_plain_text_message(&notice.to, &notice.subject, &notice.body)
            .await?;

        debug!(reminder_id = %reminder.id, %message_id, "Sent reminder notice");
        Ok(())
    }

    /// Persists progress only, so concurrent edits to other fields survive.
    /// A reminder deleted mid-sweep is skipped.
    async fn save_progress(&self, reminder: &Reminder) -> Result<()> {
        let update = ReminderUpdate::progress(reminder.last_fired_index, reminder.state);
        match self.store.update(&reminder.id, update).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                warn!(reminder_id = %reminder.id, "Reminder deleted during sweep");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Lists every reminder in creation order.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn list_reminders(&self) -> Result<Vec<Reminder>> {
        self.store.list_all().await
    }

    /// Gets one reminder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs.
    pub async fn get_reminder(&self, id: &ReminderId) -> Result<Reminder> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(id.clone()))
    }

    /// Applies an external update and returns the stored reminder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs.
    pub async fn update_reminder(&self, id: &ReminderId, update: ReminderUpdate) -> Result<Reminder> {
        let reminder = self.store.update(id, update).await?;
        info!(reminder_id = %id, "Updated reminder");
        Ok(reminder)
    }

    /// Deletes a reminder.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] for unknown IDs.
    pub async fn delete_reminder(&self, id: &ReminderId) -> Result<()> {
        self.store.delete(id).await?;
        info!(reminder_id = %id, "Deleted reminder");
        Ok(())
    }
}
