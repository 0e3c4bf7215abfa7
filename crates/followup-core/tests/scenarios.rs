//! End-to-end sweeps over a canned mailbox.

#![allow(clippy::unwrap_used)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use followup_core::{
    FollowUpEngine, MailClient, MailError, MemoryReminderStore, MessagePage, RawMessage,
    ReminderState, ReminderStore, ReminderUpdate, SqliteReminderRepository, extract_address,
};

struct Mailbox {
    messages: Vec<RawMessage>,
    outbox: Mutex<Vec<(String, String)>>,
}

impl Mailbox {
    fn new(messages: Vec<RawMessage>) -> Self {
        Self {
            messages,
            outbox: Mutex::new(Vec::new()),
        }
    }

    fn outbox(&self) -> Vec<(String, String)> {
        self.outbox.lock().unwrap().clone()
    }
}

#[async_trait]
impl MailClient for Mailbox {
    async fn list_recent_messages(
        &self,
        max_results: u32,
        _page_token: Option<&str>,
    ) -> Result<MessagePage, MailError> {
        Ok(MessagePage {
            messages: self
                .messages
                .iter()
                .take(max_results as usize)
                .cloned()
                .collect(),
            next_page_token: None,
            estimated_count: None,
        })
    }

    async fn get_message(&self, id: &str) -> Result<RawMessage, MailError> {
        self.messages
            .iter()
            .find(|m| m.id == id)
            .cloned()
            .ok_or_else(|| MailError::InvalidResponse(id.to_string()))
    }

    async fn send_plain_text_message(
        &self,
        to: &str,
        subject: &str,
        _body: &str,
    ) -> Result<String, MailError> {
        self.outbox
            .lock()
            .unwrap()
            .push((to.to_string(), subject.to_string()));
        Ok("sent".to_string())
    }
}

fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

fn budget_email() -> RawMessage {
    RawMessage::new("msg-1", "thread-1")
        .with_header("From", "Jane Doe <jane@example.com>")
        .with_header("To", "bob@example.com")
        .with_header("Subject", "Q1 budget [remind:1d,3d]")
        .with_header("Date", "Mon, 1 Jan 2024 00:00:00 +0000")
}

async fn run_budget_scenario(store: Arc<dyn ReminderStore>) {
    let mail = Arc::new(Mailbox::new(vec![
        budget_email(),
        RawMessage::new("msg-2", "thread-2")
            .with_header("From", "jane@example.com")
            .with_header("To", "bob@example.com")
            .with_header("Subject", "no directive here")
            .with_header("Date", "Mon, 1 Jan 2024 00:00:00 +0000"),
    ]));
    let engine = FollowUpEngine::new(mail.clone(), store.clone());

    assert_eq!(engine.ingest(20).await.unwrap(), 1);
    let reminder = &engine.list_reminders().await.unwrap()[0];
    assert_eq!(reminder.schedule, vec![at(2024, 1, 2, 0), at(2024, 1, 4, 0)]);
    assert_eq!(reminder.state, ReminderState::Pending);
    assert_eq!(reminder.last_fired_index, None);
    let id = reminder.id.clone();

    assert_eq!(engine.dispatch_at(at(2024, 1, 2, 12)).await.unwrap(), 1);
    let reminder = engine.get_reminder(&id).await.unwrap();
    assert_eq!(reminder.last_fired_index, Some(0));
    assert_eq!(reminder.state, ReminderState::Sent);

    assert_eq!(engine.dispatch_at(at(2024, 1, 4, 12)).await.unwrap(), 1);
    let reminder = engine.get_reminder(&id).await.unwrap();
    assert_eq!(reminder.last_fired_index, Some(1));
    assert_eq!(reminder.state, ReminderState::Completed);

    assert_eq!(engine.dispatch_at(at(2025, 1, 1, 0)).await.unwrap(), 0);
    assert_eq!(
        mail.outbox(),
        vec![
            (
                "jane@example.com".to_string(),
                "Follow Up: Q1 budget [remind:1d,3d]".to_string()
            );
            2
        ]
    );
}

#[tokio::test]
async fn budget_reminder_fires_twice_then_completes() {
    run_budget_scenario(Arc::new(MemoryReminderStore::new())).await;
}

#[tokio::test]
async fn budget_reminder_fires_twice_then_completes_on_sqlite() {
    run_budget_scenario(Arc::new(SqliteReminderRepository::in_memory().await.unwrap())).await;
}

#[tokio::test]
async fn rescheduling_sorts_dates() {
    let mail = Arc::new(Mailbox::new(vec![budget_email()]));
    let engine = FollowUpEngine::new(mail, Arc::new(MemoryReminderStore::new()));
    engine.ingest(20).await.unwrap();
    let id = engine.list_reminders().await.unwrap()[0].id.clone();

    let update: ReminderUpdate =
        serde_json::from_str(r#"{"reminderDates":["2024-03-01","2024-02-01"]}"#).unwrap();
    let updated = engine.update_reminder(&id, update).await.unwrap();

    assert_eq!(updated.schedule, vec![at(2024, 2, 1, 0), at(2024, 3, 1, 0)]);
    assert_eq!(
        engine.get_reminder(&id).await.unwrap().schedule,
        updated.schedule
    );
}

#[test]
fn sender_address_with_and_without_display_name() {
    assert_eq!(
        extract_address("Jane Doe <jane@example.com>").as_deref(),
        Some("jane@example.com")
    );
    assert_eq!(
        extract_address("jane@example.com").as_deref(),
        Some("jane@example.com")
    );
}

async fn run_delete_scenario(store: Arc<dyn ReminderStore>) {
    let mail = Arc::new(Mailbox::new(vec![budget_email()]));
    let engine = FollowUpEngine::new(mail, store);
    engine.ingest(20).await.unwrap();
    let id = engine.list_reminders().await.unwrap()[0].id.clone();

    engine.delete_reminder(&id).await.unwrap();
    assert!(engine.get_reminder(&id).await.unwrap_err().is_not_found());
    assert!(engine.delete_reminder(&id).await.unwrap_err().is_not_found());

    // The tagged email is still in the mailbox; deletion must stick.
    assert_eq!(engine.ingest(20).await.unwrap(), 0);
    assert!(engine.list_reminders().await.unwrap().is_empty());
}

#[tokio::test]
async fn deleted_reminder_stays_deleted_in_memory() {
    run_delete_scenario(Arc::new(MemoryReminderStore::new())).await;
}

#[tokio::test]
async fn deleted_reminder_stays_deleted_in_sqlite() {
    run_delete_scenario(Arc::new(SqliteReminderRepository::in_memory().await.unwrap())).await;
}
