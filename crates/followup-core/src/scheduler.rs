//! Recurring ingest and dispatch triggers.
//!
//! The [`Scheduler`] runs two independent cron-driven loops, one per sweep
//! kind, on top of a shared [`FollowUpEngine`]. Timed sweeps log their
//! outcome and never surface errors; the `run_*_now` methods run the same
//! engine code and hand errors back to the caller.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Local, TimeZone};
use cron::Schedule;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::service::{DEFAULT_INGEST_MAX, FollowUpEngine};
use crate::{Error, Result};

/// Default ingest cadence: every four hours, on the hour.
pub const DEFAULT_INGEST_SCHEDULE: &str = "0 0 */4 * * *";

/// Default dispatch cadence: 07:00 and 19:00 local time.
pub const DEFAULT_DISPATCH_SCHEDULE: &str = "0 0 7,19 * * *";

/// Trigger configuration.
///
/// Schedules are six-field cron expressions (seconds first) evaluated in
/// local time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// When the ingest sweep fires.
    pub ingest_schedule: String,
    /// When the dispatch sweep fires.
    pub dispatch_schedule: String,
    /// Messages inspected by each timed ingest sweep.
    pub ingest_max_messages: u32,
    /// Run one dispatch sweep immediately after starting.
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            ingest_schedule: DEFAULT_INGEST_SCHEDULE.to_string(),
            dispatch_schedule: DEFAULT_DISPATCH_SCHEDULE.to_string(),
            ingest_max_messages: DEFAULT_INGEST_MAX,
            run_on_start: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepKind {
    Ingest,
    Dispatch,
}

impl fmt::Display for SweepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingest => f.write_str("ingest"),
            Self::Dispatch => f.write_str("dispatch"),
        }
    }
}

struct Triggers {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl Triggers {
    /// Cancels the loops and waits for in-flight sweeps to finish.
    async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Trigger task ended abnormally");
            }
        }
    }
}

/// Owns the recurring triggers.
///
/// Constructed once at startup; [`start`](Self::start) and
/// [`stop`](Self::stop) may be called any number of times.
pub struct Scheduler {
    engine: Arc<FollowUpEngine>,
    config: SchedulerConfig,
    triggers: Mutex<Option<Triggers>>,
}

impl Scheduler {
    /// Creates a stopped scheduler.
    #[must_use]
    pub fn new(engine: Arc<FollowUpEngine>, config: SchedulerConfig) -> Self {
        Self {
            engine,
            config,
            triggers: Mutex::new(None),
        }
    }

    /// The engine the triggers drive.
    #[must_use]
    pub const fn engine(&self) -> &Arc<FollowUpEngine> {
        &self.engine
    }

    /// The active configuration.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Starts both triggers, replacing any that are already running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if either cron expression is invalid. The
    /// previously running triggers are left alone in that case.
    pub async fn start(&self) -> Result<()> {
        let ingest = parse_schedule(&self.config.ingest_schedule)?;
        let dispatch = parse_schedule(&self.config.dispatch_schedule)?;

        let mut triggers = self.triggers.lock().await;
        if let Some(existing) = triggers.take() {
            info!("Restarting scheduler");
            existing.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let mut handles = vec![
            tokio::spawn(run_trigger(
                SweepKind::Ingest,
                ingest,
                self.engine.clone(),
                self.config.ingest_max_messages,
                cancel.child_token(),
            )),
            tokio::spawn(run_trigger(
                SweepKind::Dispatch,
                dispatch,
                self.engine.clone(),
                self.config.ingest_max_messages,
                cancel.child_token(),
            )),
        ];

        if self.config.run_on_start {
            let engine = self.engine.clone();
            let max = self.config.ingest_max_messages;
            handles.push(tokio::spawn(async move {
                run_sweep(SweepKind::Dispatch, &engine, max).await;
            }));
        }

        *triggers = Some(Triggers { cancel, handles });
        info!(
            ingest = %self.config.ingest_schedule,
            dispatch = %self.config.dispatch_schedule,
            "Scheduler started"
        );
        Ok(())
    }

    /// Stops both triggers. Sweeps already running are allowed to finish;
    /// this returns once they have.
    pub async fn stop(&self) {
        let Some(existing) = self.triggers.lock().await.take() else {
            return;
        };
        existing.shutdown().await;
        info!("Scheduler stopped");
    }

    /// Returns true while triggers are registered.
    pub async fn is_running(&self) -> bool {
        self.triggers.lock().await.is_some()
    }

    /// Runs an ingest sweep now. `None` uses the configured message limit.
    ///
    /// # Errors
    ///
    /// Propagates any error from the sweep.
    pub async fn run_ingest_now(&self, max_messages: Option<u32>) -> Result<usize> {
        self.engine
            .ingest(max_messages.unwrap_or(self.config.ingest_max_messages))
            .await
    }

    /// Runs a dispatch sweep now.
    ///
    /// # Errors
    ///
    /// Propagates any error from the sweep.
    pub async fn run_dispatch_now(&self) -> Result<usize> {
        self.engine.dispatch().await
    }
}

fn parse_schedule(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression)
        .map_err(|e| Error::Config(format!("invalid cron expression {expression:?}: {e}")))
}

/// Next firing strictly after `after`.
fn next_fire<Tz: TimeZone>(schedule: &Schedule, after: &DateTime<Tz>) -> Option<DateTime<Tz>> {
    schedule.after(after).next()
}

async fn run_trigger(
    kind: SweepKind,
    schedule: Schedule,
    engine: Arc<FollowUpEngine>,
    max_messages: u32,
    cancel: CancellationToken,
) {
    loop {
        let now = Local::now();
        let Some(next) = next_fire(&schedule, &now) else {
            warn!(sweep = %kind, "Schedule has no upcoming firings");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        debug!(sweep = %kind, next = %next, "Waiting for next sweep");

        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(sweep = %kind, "Trigger cancelled");
                return;
            }
            () = tokio::time::sleep(wait) => {}
        }

        // Outside the select: a running sweep is never interrupted.
        run_sweep(kind, &engine, max_messages).await;
    }
}

async fn run_sweep(kind: SweepKind, engine: &FollowUpEngine, max_messages: u32) {
    let result = match kind {
        SweepKind::Ingest => engine.ingest(max_messages).await,
        SweepKind::Dispatch => engine.dispatch().await,
    };

    match result {
        Ok(count) => info!(sweep = %kind, count, "Timed sweep finished"),
        Err(e) => error!(sweep = %kind, error = %e, "Timed sweep failed"),
    }
}
