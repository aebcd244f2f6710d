//! # Moderation Bot Core
//!
//! The subsystems of a chat moderation bot that every command passes through
//! or depends on, written to run alongside live platform-event ingestion.
//!
//! ## Features
//!
//! - **Admission Control**: Continuous token buckets per community, channel and member
//! - **Temporal Actions**: Temporary bans and roles that survive restarts and reverse themselves
//! - **Automation Rules**: Per-community and per-channel rule trees fired by platform events
//! - **Durable Storage**: JSON record store with atomic per-record writes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbot::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = BotConfiguration::load("config/modbot.yaml").await?;
//!     let store = Arc::new(JsonFileStore::open(&config.storage.data_dir).await?);
//!     let platform = Arc::new(DryRunPlatform::new());
//!
//!     let bot = Arc::new(ModBot::new(config, store, platform).await?);
//!     bot.start().await;
//!
//!     // Feed platform events from your transport
//!     let (events, receiver) = tokio::sync::broadcast::channel::<PlatformEvent>(1024);
//!     let runner = Arc::clone(&bot);
//!     tokio::spawn(async move { runner.run(receiver).await });
//!
//!     drop(events);
//!     bot.shutdown().await;
//!     Ok(())
//! }
//! ```

pub mod admission;
pub mod automation;
pub mod bot;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod platforms;
pub mod scheduler;
pub mod store;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::admission::{AdmissionController, AdmissionDecision, RateLimit, ScopeKey, ScopeKind};
    pub use crate::automation::{AutomationConfig, AutomationConfigStore, AutomationEngine, AutomationNode};
    pub use crate::bot::{ModBot, ModerationCommands};
    pub use crate::config::BotConfiguration;
    pub use crate::dispatch::{AdmissionGate, CommandDispatcher, CommandOutcome, Invocation};
    pub use crate::error::{ConfigError, DispatchError, PlatformError, ScheduleError, StoreError};
    pub use crate::platforms::{DryRunPlatform, ModerationPlatform};
    pub use crate::scheduler::{TemporalAction, TemporalActionKind, TemporalActionScheduler, TemporalActionSpec};
    pub use crate::store::{Collection, JsonFileStore, MemoryStore, Store};
    pub use crate::types::{
        Actor, ChannelId, ChatMessage, CommunityId, EventSlot, MemberId, MemberPermissions, MemberRef,
        PlatformEvent, RoleId,
    };
    pub use anyhow::Result;
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
