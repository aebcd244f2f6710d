// src/scheduler/mod.rs - Durable expiring moderation actions and the periodic reversal worker

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::error::{PlatformError, ScheduleError};
use crate::platforms::ModerationPlatform;
use crate::store::{Collection, Store};
use crate::types::CommunityId;

pub mod action;

pub use action::{TemporalAction, TemporalActionKind, TemporalActionSpec};

const COLLECTION: &str = "temporal_actions";

/// Scheduler tuning, read from the `scheduler` section of the bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSettings {
    pub tick_interval_seconds: u64,
    pub platform_timeout_seconds: u64,
    /// Give up on a record after this many failed reversals; `None` retries forever
    pub max_unapply_attempts: Option<u32>,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_seconds: 30,
            platform_timeout_seconds: 10,
            max_unapply_attempts: None,
        }
    }
}

impl SchedulerSettings {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.tick_interval_seconds.max(1))
    }

    pub fn platform_timeout(&self) -> Duration {
        Duration::from_secs(self.platform_timeout_seconds.max(1))
    }
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Actions reversed and removed, most overdue first
    pub reversed: Vec<Uuid>,
    /// Actions left in place for the next tick
    pub failed: usize,
    /// Actions dropped after exhausting `max_unapply_attempts`
    pub abandoned: usize,
    /// The tick did not run because another was in progress
    pub skipped: bool,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.reversed.is_empty() && self.failed == 0 && self.abandoned == 0
    }
}

/// Applies temporary moderation effects and reverses them once they expire.
///
/// The store is the only source of truth for pending actions; every tick
/// re-reads it, so nothing is lost across restarts.
pub struct TemporalActionScheduler {
    actions: Collection<TemporalAction>,
    platform: Arc<dyn ModerationPlatform>,
    settings: SchedulerSettings,
    tick_lock: Mutex<()>,
    /// Held around record rewrites and removals that race with a tick
    record_lock: Mutex<()>,
    shutdown_signal: watch::Sender<bool>,
}

impl TemporalActionScheduler {
    pub fn new(store: Arc<dyn Store>, platform: Arc<dyn ModerationPlatform>, settings: SchedulerSettings) -> Self {
        Self {
            actions: Collection::new(store, COLLECTION),
            platform,
            settings,
            tick_lock: Mutex::new(()),
            record_lock: Mutex::new(()),
            shutdown_signal: watch::channel(false).0,
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    async fn platform_call<F>(&self, call: F) -> Result<(), PlatformError>
    where
        F: Future<Output = Result<(), PlatformError>>,
    {
        tokio::time::timeout(self.settings.platform_timeout(), call)
            .await
            .unwrap_or(Err(PlatformError::Timeout))
    }

    /// Apply an effect now and record it for reversal after `duration`
    pub async fn schedule(&self, spec: TemporalActionSpec, duration: chrono::Duration) -> Result<TemporalAction, ScheduleError> {
        self.schedule_at(spec, duration, Utc::now()).await
    }

    pub async fn schedule_at(
        &self,
        spec: TemporalActionSpec,
        duration: chrono::Duration,
        now: DateTime<Utc>,
    ) -> Result<TemporalAction, ScheduleError> {
        if duration <= chrono::Duration::zero() {
            return Err(ScheduleError::InvalidDuration);
        }

        let end = now.checked_add_signed(duration).ok_or(ScheduleError::InvalidDuration)?;
        let mut action = TemporalAction::new(&spec, now, end);

        self.platform_call(action.kind.apply(self.platform.as_ref(), action.community, action.target, spec.reason.as_deref()))
            .await
            .map_err(ScheduleError::Apply)?;
        action.applied = true;

        if let Err(e) = self.actions.put(&action.record_id(), &action).await {
            error!("Failed to persist temporal {} for {}: {}; reversing", action.kind, action.target, e);
            // Without a record nothing would ever reverse it
            if let Err(undo) = self
                .platform_call(action.kind.unapply(self.platform.as_ref(), action.community, action.target))
                .await
            {
                error!("Failed to reverse unrecorded {} for {}: {}", action.kind, action.target, undo);
            }
            return Err(ScheduleError::Persist(e));
        }

        info!(
            "Scheduled temporal {} for {} in {} until {} ({})",
            action.kind, action.target, action.community, action.end, action.id
        );

        if let Some(notice) = spec.notice.as_deref() {
            if let Err(e) = self.platform_call(self.platform.send_direct_message(action.target, notice)).await {
                warn!("Could not notify {} about temporal {}: {}", action.target, action.kind, e);
            }
        }

        Ok(action)
    }

    /// Reverse and remove every due action
    pub async fn tick(&self) -> TickReport {
        self.tick_at(Utc::now()).await
    }

    pub async fn tick_at(&self, now: DateTime<Utc>) -> TickReport {
        let Ok(_guard) = self.tick_lock.try_lock() else {
            debug!("Previous scheduler tick still running, skipping");
            return TickReport { skipped: true, ..TickReport::default() };
        };

        let mut report = TickReport::default();
        let mut due = match self.actions.query(|action| action.is_due(now)).await {
            Ok(due) => due,
            Err(e) => {
                warn!("Failed to load due temporal actions: {}", e);
                return report;
            }
        };
        due.sort_by_key(|action| action.end);

        for mut action in due {
            let reversal = self
                .platform_call(action.kind.unapply(self.platform.as_ref(), action.community, action.target))
                .await;

            match reversal {
                Ok(()) => match self.actions.delete(&action.record_id()).await {
                    Ok(_) => {
                        info!("Reversed temporal {} for {} in {} ({})", action.kind, action.target, action.community, action.id);
                        report.reversed.push(action.id);
                    }
                    Err(e) => {
                        // Reversal is idempotent, the next tick retries the removal
                        warn!("Reversed {} but could not remove its record: {}", action.id, e);
                        report.failed += 1;
                    }
                },
                Err(e) => {
                    action.failed_attempts += 1;
                    let exhausted = self
                        .settings
                        .max_unapply_attempts
                        .map(|max| action.failed_attempts >= max)
                        .unwrap_or(false);

                    if exhausted {
                        error!(
                            "Abandoning temporal {} for {} in {} after {} failed attempts: {}",
                            action.kind, action.target, action.community, action.failed_attempts, e
                        );
                        if let Err(e) = self.actions.delete(&action.record_id()).await {
                            warn!("Could not remove abandoned action {}: {}", action.id, e);
                        }
                        report.abandoned += 1;
                    } else {
                        warn!(
                            "Failed to reverse temporal {} for {} (attempt {}): {}",
                            action.kind, action.target, action.failed_attempts, e
                        );
                        self.record_failed_attempt(&action).await;
                        report.failed += 1;
                    }
                }
            }
        }

        report
    }

    /// Bump the attempt count on the stored record, unless it was removed while
    /// the reversal was in flight
    async fn record_failed_attempt(&self, action: &TemporalAction) {
        let record_id = action.record_id();
        let _guard = self.record_lock.lock().await;

        match self.actions.get(&record_id).await {
            Ok(Some(mut current)) => {
                current.failed_attempts = current.failed_attempts.max(action.failed_attempts);
                if let Err(e) = self.actions.put(&record_id, &current).await {
                    warn!("Could not record failed attempt for {}: {}", action.id, e);
                }
            }
            Ok(None) => debug!("Temporal action {} was removed during its reversal", action.id),
            Err(e) => warn!("Could not reload {} to record a failed attempt: {}", action.id, e),
        }
    }

    /// Reverse an action before it expires
    pub async fn cancel(&self, id: Uuid) -> Result<TemporalAction, ScheduleError> {
        let record_id = id.to_string();
        let action = self.actions.get(&record_id).await?.ok_or(ScheduleError::NotFound(id))?;

        self.platform_call(action.kind.unapply(self.platform.as_ref(), action.community, action.target))
            .await
            .map_err(ScheduleError::Reverse)?;
        {
            let _guard = self.record_lock.lock().await;
            self.actions.delete(&record_id).await?;
        }

        info!("Cancelled temporal {} for {} ({})", action.kind, action.target, action.id);
        Ok(action)
    }

    pub async fn get(&self, id: Uuid) -> Result<Option<TemporalAction>, ScheduleError> {
        Ok(self.actions.get(&id.to_string()).await?)
    }

    /// All pending actions, soonest expiry first
    pub async fn pending(&self) -> Result<Vec<TemporalAction>, ScheduleError> {
        let mut actions = self.actions.all().await?;
        actions.sort_by_key(|action| action.end);
        Ok(actions)
    }

    pub async fn pending_for(&self, community: CommunityId) -> Result<Vec<TemporalAction>, ScheduleError> {
        let mut actions = self.actions.query(|action| action.community == community).await?;
        actions.sort_by_key(|action| action.end);
        Ok(actions)
    }

    /// Run ticks on a fixed period until [`shutdown`](Self::shutdown).
    /// Ticks run inline in one task, so they never overlap; late ticks are skipped, not queued.
    pub fn start(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        let mut shutdown_signal = self.shutdown_signal.subscribe();

        tokio::spawn(async move {
            let period = scheduler.settings.tick_interval();
            info!("Temporal action scheduler started (tick every {:?})", period);
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *shutdown_signal.borrow() {
                            break;
                        }

                        let report = scheduler.tick().await;
                        if !report.is_empty() {
                            info!(
                                "Scheduler tick: {} reversed, {} failed, {} abandoned",
                                report.reversed.len(),
                                report.failed,
                                report.abandoned
                            );
                        }
                    }
                    _ = shutdown_signal.changed() => break,
                }
            }
            info!("Temporal action scheduler stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_signal.send_replace(true);
    }
}
