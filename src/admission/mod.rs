// src/admission/mod.rs - Per-scope rate limiting consulted before any command runs

use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::error::ConfigError;
use crate::types::{ChannelId, CommunityId, MemberId};

pub mod bucket;

pub use bucket::{TokenBucket, TokenBucketRegistry};

/// What a rate limit is counted against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScopeKind {
    Community,
    Channel,
    Member,
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScopeKind::Community => f.write_str("community"),
            ScopeKind::Channel => f.write_str("channel"),
            ScopeKind::Member => f.write_str("member"),
        }
    }
}

/// Identifies one admission bucket
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ScopeKey {
    pub kind: ScopeKind,
    pub entity: u64,
    pub command: String,
}

impl ScopeKey {
    pub fn new(kind: ScopeKind, entity: u64, command: impl Into<String>) -> Self {
        Self { kind, entity, command: command.into() }
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.kind, self.entity, self.command)
    }
}

/// Longest refill window a rate limit may declare, one year
pub const MAX_WINDOW_SECONDS: f64 = 365.0 * 24.0 * 3600.0;

/// Rate limit declared by a command at registration time, e.g. "5 calls per 30 seconds per channel"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimit {
    pub scope: ScopeKind,
    pub capacity: u32,
    pub window_seconds: f64,
}

impl RateLimit {
    pub fn new(scope: ScopeKind, capacity: u32, window_seconds: f64) -> Result<Self, ConfigError> {
        let limit = Self { scope, capacity, window_seconds };
        limit.validate()?;
        Ok(limit)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.capacity == 0 {
            return Err(ConfigError::Invalid(format!("{} rate limit capacity must be at least 1", self.scope)));
        }
        if !self.window_seconds.is_finite() || self.window_seconds <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{} rate limit window must be positive, got {}",
                self.scope, self.window_seconds
            )));
        }
        if self.window_seconds > MAX_WINDOW_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "{} rate limit window of {}s is longer than a year",
                self.scope, self.window_seconds
            )));
        }
        Ok(())
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdmissionDecision {
    pub allowed: bool,
    pub retry_after: Duration,
}

impl AdmissionDecision {
    pub fn allow() -> Self {
        Self { allowed: true, retry_after: Duration::ZERO }
    }

    pub fn deny(retry_after: Duration) -> Self {
        Self { allowed: false, retry_after }
    }
}

/// Entities an invocation can be rate limited against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvocationScope {
    pub community: CommunityId,
    pub channel: Option<ChannelId>,
    /// `None` for automation invocations, which have no member to count against
    pub member: Option<MemberId>,
}

impl InvocationScope {
    fn entity(&self, kind: ScopeKind) -> Option<u64> {
        match kind {
            ScopeKind::Community => Some(self.community.0),
            ScopeKind::Channel => self.channel.map(|c| c.0),
            ScopeKind::Member => self.member.map(|m| m.0),
        }
    }
}

/// Gates command invocations on the rate limits each command declared.
pub struct AdmissionController {
    registry: TokenBucketRegistry,
    limits: RwLock<HashMap<String, Vec<RateLimit>>>,
    shutdown_signal: watch::Sender<bool>,
}

impl Default for AdmissionController {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionController {
    pub fn new() -> Self {
        Self {
            registry: TokenBucketRegistry::new(),
            limits: RwLock::new(HashMap::new()),
            shutdown_signal: watch::channel(false).0,
        }
    }

    pub fn registry(&self) -> &TokenBucketRegistry {
        &self.registry
    }

    /// Declare the rate limits of a command, replacing any earlier declaration
    pub async fn register(&self, command: &str, limits: Vec<RateLimit>) -> Result<(), ConfigError> {
        for limit in &limits {
            limit.validate()?;
        }
        let command = command.to_lowercase();
        info!("Registered {} rate limit(s) for command '{}'", limits.len(), command);
        self.limits.write().await.insert(command, limits);
        Ok(())
    }

    pub async fn limits_for(&self, command: &str) -> Vec<RateLimit> {
        self.limits.read().await.get(&command.to_lowercase()).cloned().unwrap_or_default()
    }

    /// Acquire from a single bucket. Keys for commands without a matching declaration always pass.
    pub async fn try_acquire(&self, key: &ScopeKey) -> AdmissionDecision {
        self.try_acquire_at(key, Utc::now()).await
    }

    pub async fn try_acquire_at(&self, key: &ScopeKey, now: DateTime<Utc>) -> AdmissionDecision {
        let limit = self
            .limits_for(&key.command)
            .await
            .into_iter()
            .find(|limit| limit.scope == key.kind);

        match limit {
            Some(limit) => match self.registry.try_acquire(key, &limit, now).await {
                Ok(()) => AdmissionDecision::allow(),
                Err(retry_after) => AdmissionDecision::deny(retry_after),
            },
            None => AdmissionDecision::allow(),
        }
    }

    /// Check every limit declared by `command`; all of them must allow.
    pub async fn check(&self, command: &str, scope: &InvocationScope) -> AdmissionDecision {
        self.check_at(command, scope, Utc::now()).await
    }

    pub async fn check_at(&self, command: &str, scope: &InvocationScope, now: DateTime<Utc>) -> AdmissionDecision {
        let command = command.to_lowercase();
        let limits = self.limits_for(&command).await;
        let mut taken: Vec<ScopeKey> = Vec::with_capacity(limits.len());

        for limit in &limits {
            let Some(entity) = scope.entity(limit.scope) else {
                debug!("Skipping {} limit for '{}': invocation has no {}", limit.scope, command, limit.scope);
                continue;
            };

            let key = ScopeKey::new(limit.scope, entity, command.clone());
            match self.registry.try_acquire(&key, limit, now).await {
                Ok(()) => taken.push(key),
                Err(retry_after) => {
                    // A denied invocation does not spend tokens in its other scopes
                    for key in &taken {
                        self.registry.refund(key).await;
                    }
                    debug!("Denied '{}' on {}; retry in {:.1}s", command, key, retry_after.as_secs_f64());
                    return AdmissionDecision::deny(retry_after);
                }
            }
        }

        AdmissionDecision::allow()
    }

    /// Periodically evict buckets idle for longer than `ttl`
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration, ttl: Duration) -> JoinHandle<()> {
        let controller = Arc::clone(self);
        let mut shutdown_signal = self.shutdown_signal.subscribe();

        tokio::spawn(async move {
            info!("Token bucket sweeper started (interval {:?}, ttl {:?})", interval, ttl);
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if *shutdown_signal.borrow() {
                            break;
                        }

                        let evicted = controller.registry.sweep(Utc::now(), ttl).await;
                        if evicted > 0 {
                            debug!("Evicted {} idle token buckets", evicted);
                        }
                    }
                    _ = shutdown_signal.changed() => break,
                }
            }
            info!("Token bucket sweeper stopped");
        })
    }

    pub fn shutdown(&self) {
        self.shutdown_signal.send_replace(true);
    }
}
