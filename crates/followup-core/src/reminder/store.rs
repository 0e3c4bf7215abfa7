//! Reminder store contract and the in-memory implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::model::{Reminder, ReminderId};
use super::update::ReminderUpdate;
use crate::{Error, Result};

/// Keyed collection of reminders.
///
/// The store owns reminder instances; callers get copies. All mutations go
/// through [`ReminderStore::update`], which is atomic per reminder.
/// Concurrent updates to the same ID are last-write-wins.
#[async_trait]
pub trait ReminderStore: Send + Sync {
    /// Adds a new reminder.
    ///
    /// Fails with [`Error::Duplicate`] if its ID is already stored.
    async fn create(&self, reminder: &Reminder) -> Result<()>;

    /// Gets a reminder by ID.
    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>>;

    /// Lists every reminder in insertion order.
    async fn list_all(&self) -> Result<Vec<Reminder>>;

    /// Applies a partial update and returns the stored result.
    ///
    /// Fails with [`Error::NotFound`] for unknown IDs.
    async fn update(&self, id: &ReminderId, update: ReminderUpdate) -> Result<Reminder>;

    /// Removes a reminder and remembers its source message, so the message
    /// is not turned into a reminder again.
    ///
    /// Fails with [`Error::NotFound`] for unknown IDs.
    async fn delete(&self, id: &ReminderId) -> Result<()>;

    /// Finds the reminder created from the given source message, if any.
    async fn find_by_source_message(&self, message_id: &str) -> Result<Option<Reminder>>;

    /// Returns true if a reminder for this source message was deleted.
    async fn is_source_deleted(&self, message_id: &str) -> Result<bool>;
}

#[derive(Debug, Default)]
struct MemoryState {
    reminders: Vec<Reminder>,
    deleted_sources: HashSet<String>,
}

/// Volatile store backed by process memory.
#[derive(Debug, Default)]
pub struct MemoryReminderStore {
    state: RwLock<MemoryState>,
}

impl MemoryReminderStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReminderStore for MemoryReminderStore {
    async fn create(&self, reminder: &Reminder) -> Result<()> {
        let mut state = self.state.write().await;
        if state.reminders.iter().any(|r| r.id == reminder.id) {
            return Err(Error::Duplicate(reminder.id.clone()));
        }

        state.reminders.push(reminder.clone());
        debug!(reminder_id = %reminder.id, "Stored reminder");
        Ok(())
    }

    async fn get(&self, id: &ReminderId) -> Result<Option<Reminder>> {
        Ok(self
            .state
            .read()
            .await
            .reminders
            .iter()
            .find(|r| &r.id == id)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Reminder>> {
        Ok(self.state.read().await.reminders.clone())
    }

    async fn update(&self, id: &ReminderId, update: ReminderUpdate) -> Result<Reminder> {
        let mut state = self.state.write().await;
        let reminder = state
            .reminders
            .iter_mut()
            .find(|r| &r.id == id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        update.apply_to(reminder);
        Ok(reminder.clone())
    }

    async fn delete(&self, id: &ReminderId) -> Result<()> {
        let mut state = self.state.write().await;
        let position = state
            .reminders
            .iter()
            .position(|r| &r.id == id)
            .ok_or_else(|| Error::NotFound(id.clone()))?;

        let removed = state.reminders.remove(position);
        state.deleted_sources.insert(removed.source_message_id);
        Ok(())
    }

    async fn find_by_source_message(&self, message_id: &str) -> Result<Option<Reminder>> {
        Ok(self
            .state
            .read()
            .await
            .reminders
            .iter()
            .find(|r| r.source_message_id == message_id)
            .cloned())
    }

    async fn is_source_deleted(&self, message_id: &str) -> Result<bool> {
        Ok(self.state.read().await.deleted_sources.contains(message_id))
    }
}
