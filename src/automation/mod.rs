// src/automation/mod.rs - Event-triggered rule trees per community and channel

pub mod config;
pub mod engine;
pub mod store;

pub use config::{AutomationConfig, AutomationNode, ConfigIssue, ContentFilter, ExecuteCommands};
pub use engine::{AutomationEngine, AutomationSettings, EvaluationReport};
pub use store::{AutomationConfigStore, CommunityAutomation, RuleScope};
