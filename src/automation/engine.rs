// src/automation/engine.rs - Evaluates automation rule trees against platform events

use futures_util::future::{join_all, BoxFuture, FutureExt};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use super::config::AutomationNode;
use super::store::AutomationConfigStore;
use crate::dispatch::{CommandDispatcher, CommandOutcome, Invocation};
use crate::types::{Actor, ChannelId, CommunityId, MemberRef, PlatformEvent};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutomationSettings {
    /// Upper bound for one synthesized command, including admission
    pub command_timeout_seconds: f64,
}

impl Default for AutomationSettings {
    fn default() -> Self {
        Self { command_timeout_seconds: 10.0 }
    }
}

impl AutomationSettings {
    pub fn command_timeout(&self) -> Duration {
        Duration::try_from_secs_f64(self.command_timeout_seconds.max(0.001)).unwrap_or(Duration::MAX)
    }
}

/// Counters for one event's walk over its selected rule trees
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvaluationReport {
    pub nodes_visited: usize,
    pub nodes_matched: usize,
    pub nodes_filtered: usize,
    pub filter_errors: usize,
    pub commands_succeeded: usize,
    pub commands_failed: usize,
    pub commands_throttled: usize,
}

impl EvaluationReport {
    pub fn merge(&mut self, other: EvaluationReport) {
        self.nodes_visited += other.nodes_visited;
        self.nodes_matched += other.nodes_matched;
        self.nodes_filtered += other.nodes_filtered;
        self.filter_errors += other.filter_errors;
        self.commands_succeeded += other.commands_succeeded;
        self.commands_failed += other.commands_failed;
        self.commands_throttled += other.commands_throttled;
    }

    pub fn commands_attempted(&self) -> usize {
        self.commands_succeeded + self.commands_failed + self.commands_throttled
    }
}

/// The parts of an event a rule can see
#[derive(Debug, Clone)]
struct EventContext {
    community: CommunityId,
    channel: Option<ChannelId>,
    subject: Option<MemberRef>,
    text: String,
}

impl EventContext {
    fn from_event(event: &PlatformEvent) -> Self {
        Self {
            community: event.community(),
            channel: event.channel(),
            subject: event.subject().cloned(),
            text: event.text().to_string(),
        }
    }

    fn variable(&self, name: &str) -> Option<String> {
        match name {
            "user" => Some(self.subject.as_ref().map(|m| m.name.clone()).unwrap_or_default()),
            "user_id" => Some(self.subject.as_ref().map(|m| m.id.to_string()).unwrap_or_default()),
            "channel" => Some(self.channel.map(|c| c.to_string()).unwrap_or_default()),
            "community" => Some(self.community.to_string()),
            _ => None,
        }
    }

    /// Expand `$(user)`, `$(user_id)`, `$(channel)` and `$(community)` in one
    /// pass; substituted values are never expanded again
    fn substitute(&self, command: &str) -> String {
        let mut expanded = String::with_capacity(command.len());
        let mut rest = command;

        while let Some(start) = rest.find("$(") {
            expanded.push_str(&rest[..start]);
            let after = &rest[start + 2..];
            match after.find(')').and_then(|end| self.variable(&after[..end]).map(|value| (end, value))) {
                Some((end, value)) => {
                    expanded.push_str(&value);
                    rest = &after[end + 1..];
                }
                None => {
                    expanded.push_str("$(");
                    rest = after;
                }
            }
        }
        expanded.push_str(rest);
        expanded
    }
}

enum CommandResult {
    Succeeded,
    Throttled,
    Failed,
}

/// Walks rule trees and re-enters the command dispatcher as a system actor.
///
/// A rule whose command re-emits an event matching its own filter will fire
/// again; nothing here breaks such loops.
pub struct AutomationEngine {
    configs: Arc<AutomationConfigStore>,
    dispatcher: Arc<dyn CommandDispatcher>,
    settings: AutomationSettings,
}

impl AutomationEngine {
    pub fn new(
        configs: Arc<AutomationConfigStore>,
        dispatcher: Arc<dyn CommandDispatcher>,
        settings: AutomationSettings,
    ) -> Self {
        Self {
            configs,
            dispatcher,
            settings,
        }
    }

    pub fn configs(&self) -> &Arc<AutomationConfigStore> {
        &self.configs
    }

    /// Selected root nodes for an event, each paired with its rule id prefix
    async fn roots(&self, event: &PlatformEvent) -> Vec<(String, AutomationNode)> {
        let Some(slot) = event.slot() else {
            return Vec::new();
        };

        let automation = match self.configs.get(event.community()).await {
            Ok(automation) => automation,
            Err(e) => {
                warn!("Skipping automation for community {}: {}", event.community(), e);
                return Vec::new();
            }
        };

        automation
            .selected(event.community(), slot, event.channel())
            .into_iter()
            .map(|(scope, node)| (format!("{}/{}/0", scope, slot), node))
            .collect()
    }

    /// Evaluate every selected rule tree for the event and wait for all of them
    pub async fn evaluate(&self, event: &PlatformEvent) -> EvaluationReport {
        let context = EventContext::from_event(event);
        let roots = self.roots(event).await;

        let reports = join_all(
            roots
                .iter()
                .map(|(rule_id, node)| self.evaluate_node(&context, node, rule_id.clone())),
        )
        .await;

        let mut report = EvaluationReport::default();
        for partial in reports {
            report.merge(partial);
        }
        report
    }

    /// Hand the event off without blocking ingestion. Each selected root runs in
    /// its own task; the returned handle resolves to the combined report.
    pub fn handle_event(self: &Arc<Self>, event: PlatformEvent) -> JoinHandle<EvaluationReport> {
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            let context = Arc::new(EventContext::from_event(&event));
            let tasks: Vec<_> = engine
                .roots(&event)
                .await
                .into_iter()
                .map(|(rule_id, node)| {
                    let engine = Arc::clone(&engine);
                    let context = Arc::clone(&context);
                    tokio::spawn(async move { engine.evaluate_node(&context, &node, rule_id).await })
                })
                .collect();

            let mut report = EvaluationReport::default();
            for task in tasks {
                match task.await {
                    Ok(partial) => report.merge(partial),
                    Err(e) => warn!("Automation task for community {} failed: {}", context.community, e),
                }
            }
            report
        })
    }

    fn evaluate_node<'a>(
        &'a self,
        context: &'a EventContext,
        node: &'a AutomationNode,
        rule_id: String,
    ) -> BoxFuture<'a, EvaluationReport> {
        async move {
            let mut report = EvaluationReport { nodes_visited: 1, ..Default::default() };

            if let Some(filter) = node.filter() {
                match self.configs.pattern(context.community, filter).await {
                    Some(regex) if regex.is_match(&context.text) => {}
                    Some(_) => {
                        report.nodes_filtered += 1;
                        return report;
                    }
                    None => {
                        debug!("Rule {} has an unusable pattern, treating as no match", rule_id);
                        report.filter_errors += 1;
                        report.nodes_filtered += 1;
                        return report;
                    }
                }
            }
            report.nodes_matched += 1;

            if let Some(commands) = node.effect() {
                for command in commands {
                    match self.run_command(context, node, &rule_id, command).await {
                        CommandResult::Succeeded => report.commands_succeeded += 1,
                        CommandResult::Throttled => report.commands_throttled += 1,
                        CommandResult::Failed => report.commands_failed += 1,
                    }
                }
            }

            let children = join_all(
                node.children
                    .iter()
                    .enumerate()
                    .map(|(index, child)| self.evaluate_node(context, child, format!("{}.{}", rule_id, index))),
            )
            .await;
            for child in children {
                report.merge(child);
            }

            report
        }
        .boxed()
    }

    async fn run_command(
        &self,
        context: &EventContext,
        node: &AutomationNode,
        rule_id: &str,
        command: &str,
    ) -> CommandResult {
        let invocation = Invocation {
            community: context.community,
            channel: context.channel,
            actor: Actor::System {
                rule_id: rule_id.to_string(),
                bypass_permissions: node.bypass_permissions,
            },
            text: context.substitute(command),
        };

        let timeout = self.settings.command_timeout();
        match tokio::time::timeout(timeout, self.dispatcher.dispatch(&invocation)).await {
            Ok(Ok(CommandOutcome::Completed(_))) => {
                debug!("Rule {} ran '{}'", rule_id, invocation.text);
                CommandResult::Succeeded
            }
            Ok(Ok(CommandOutcome::Cooldown { retry_after })) => {
                info!(
                    "Rule {} skipped '{}', on cooldown for {:.1}s",
                    rule_id,
                    invocation.text,
                    retry_after.as_secs_f64()
                );
                CommandResult::Throttled
            }
            Ok(Err(e)) => {
                warn!("Rule {} command '{}' failed: {}", rule_id, invocation.text, e);
                CommandResult::Failed
            }
            Err(_) => {
                warn!("Rule {} command '{}' timed out after {:?}", rule_id, invocation.text, timeout);
                CommandResult::Failed
            }
        }
    }
}
