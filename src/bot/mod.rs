// src/bot/mod.rs - Wires admission, scheduling and automation onto the platform event stream

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::admission::{AdmissionController, RateLimit};
use crate::automation::{AutomationConfigStore, AutomationEngine, EvaluationReport};
use crate::config::BotConfiguration;
use crate::dispatch::{AdmissionGate, CommandDispatcher, CommandOutcome, Invocation};
use crate::error::{ConfigError, DispatchError};
use crate::platforms::ModerationPlatform;
use crate::scheduler::TemporalActionScheduler;
use crate::store::Store;
use crate::types::{Actor, ChatMessage, PlatformEvent};

pub mod commands;

pub use commands::{format_duration, parse_duration, ModerationCommands};

/// How long shutdown waits for a background task before aborting it
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Posts command replies to the invoking channel, and cooldown notices for
/// human invocations. Automation cooldowns stay silent.
pub struct ReplyingDispatcher<D> {
    platform: Arc<dyn ModerationPlatform>,
    inner: D,
}

impl<D: CommandDispatcher> ReplyingDispatcher<D> {
    pub fn new(platform: Arc<dyn ModerationPlatform>, inner: D) -> Self {
        Self { platform, inner }
    }

    async fn post(&self, invocation: &Invocation, text: &str) {
        let Some(channel) = invocation.channel else {
            debug!("No channel to post reply for {}: {}", invocation.actor, text);
            return;
        };
        if let Err(e) = self.platform.send_message(invocation.community, channel, text).await {
            error!("Failed to send reply to {} in {}: {}", channel, invocation.community, e);
        }
    }
}

#[async_trait]
impl<D: CommandDispatcher> CommandDispatcher for ReplyingDispatcher<D> {
    async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
        let outcome = self.inner.dispatch(invocation).await?;
        match &outcome {
            CommandOutcome::Completed(Some(reply)) => self.post(invocation, reply).await,
            CommandOutcome::Cooldown { retry_after } if !invocation.actor.is_system() => {
                let command = invocation.command_name().unwrap_or_default();
                let notice = format!(
                    "'{}' is on cooldown, try again in {}s",
                    command,
                    retry_after.as_secs_f64().ceil() as u64
                );
                self.post(invocation, &notice).await;
            }
            _ => {}
        }
        Ok(outcome)
    }
}

/// Tasks spawned for one platform event
#[derive(Default)]
pub struct EventHandles {
    pub command: Option<JoinHandle<Option<CommandOutcome>>>,
    pub automation: Option<JoinHandle<EvaluationReport>>,
}

/// The moderation bot: owns every subsystem, constructed once at startup
pub struct ModBot {
    config: BotConfiguration,
    platform: Arc<dyn ModerationPlatform>,
    admission: Arc<AdmissionController>,
    scheduler: Arc<TemporalActionScheduler>,
    automation: Arc<AutomationEngine>,
    dispatcher: Arc<dyn CommandDispatcher>,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl ModBot {
    pub async fn new(config: BotConfiguration, store: Arc<dyn Store>, platform: Arc<dyn ModerationPlatform>) -> Result<Self> {
        let admission = Arc::new(AdmissionController::new());
        for (command, limits) in &config.rate_limits {
            admission
                .register(command, limits.clone())
                .await
                .with_context(|| format!("Invalid rate limits for '{}'", command))?;
        }

        let scheduler = Arc::new(TemporalActionScheduler::new(
            Arc::clone(&store),
            Arc::clone(&platform),
            config.scheduler.clone(),
        ));

        let commands = ModerationCommands::new(Arc::clone(&scheduler));
        let gate = AdmissionGate::new(Arc::clone(&admission), commands);
        let dispatcher: Arc<dyn CommandDispatcher> = Arc::new(ReplyingDispatcher::new(Arc::clone(&platform), gate));

        let configs = Arc::new(AutomationConfigStore::new(store));
        let automation = Arc::new(AutomationEngine::new(
            configs,
            Arc::clone(&dispatcher),
            config.automation.clone(),
        ));

        info!(
            "Moderation bot ready on {} with prefix '{}' ({} rate-limited commands)",
            platform.platform_name(),
            config.command_prefix,
            config.rate_limits.len()
        );

        Ok(Self {
            config,
            platform,
            admission,
            scheduler,
            automation,
            dispatcher,
            background: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &BotConfiguration {
        &self.config
    }

    pub fn platform(&self) -> &Arc<dyn ModerationPlatform> {
        &self.platform
    }

    pub fn admission(&self) -> &Arc<AdmissionController> {
        &self.admission
    }

    pub fn scheduler(&self) -> &Arc<TemporalActionScheduler> {
        &self.scheduler
    }

    pub fn automation(&self) -> &Arc<AutomationEngine> {
        &self.automation
    }

    pub fn configs(&self) -> &Arc<AutomationConfigStore> {
        self.automation.configs()
    }

    /// Declare (or replace) the rate limits of a command
    pub async fn register_command(&self, command: &str, limits: Vec<RateLimit>) -> Result<(), ConfigError> {
        self.admission.register(command, limits).await
    }

    /// Spawn the scheduler loop and the bucket sweeper
    pub async fn start(&self) {
        let mut background = self.background.lock().await;
        background.push(self.scheduler.start());
        background.push(
            self.admission
                .start_sweeper(self.config.admission.sweep_interval(), self.config.admission.bucket_ttl()),
        );
        info!("Background tasks started");
    }

    /// Consume platform events until the stream closes
    pub async fn run(self: &Arc<Self>, mut events: broadcast::Receiver<PlatformEvent>) {
        info!("Listening for platform events");
        loop {
            match events.recv().await {
                Ok(event) => {
                    self.handle_event(event).await;
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Event receiver lagged by {} events", n);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    info!("Event stream closed");
                    break;
                }
            }
        }
    }

    /// Hand one event to the command path and the automation engine without waiting on either
    pub async fn handle_event(self: &Arc<Self>, event: PlatformEvent) -> EventHandles {
        let mut handles = EventHandles::default();

        if let PlatformEvent::CommunityLeft { community } = &event {
            self.automation.configs().evict(*community).await;
            return handles;
        }

        if let PlatformEvent::MessageReceived(message) = &event {
            if let Some(invocation) = self.command_invocation(message) {
                let dispatcher = Arc::clone(&self.dispatcher);
                handles.command = Some(tokio::spawn(async move { Self::run_command(dispatcher, invocation).await }));
            }
        }

        handles.automation = Some(self.automation.handle_event(event));
        handles
    }

    fn command_invocation(&self, message: &ChatMessage) -> Option<Invocation> {
        let text = message.content.strip_prefix(&self.config.command_prefix)?;
        if text.trim().is_empty() {
            return None;
        }

        Some(Invocation {
            community: message.community,
            channel: Some(message.channel),
            actor: Actor::Human {
                member: message.author.clone(),
                permissions: message.author_permissions,
            },
            text: text.trim().to_string(),
        })
    }

    async fn run_command(dispatcher: Arc<dyn CommandDispatcher>, invocation: Invocation) -> Option<CommandOutcome> {
        match dispatcher.dispatch(&invocation).await {
            Ok(outcome) => Some(outcome),
            Err(DispatchError::UnknownCommand(name)) => {
                debug!("Ignoring unknown command '{}' from {}", name, invocation.actor);
                None
            }
            Err(e) => {
                warn!("Command '{}' from {} failed: {}", invocation.text, invocation.actor, e);
                None
            }
        }
    }

    /// Stop background tasks, giving each a short grace period
    pub async fn shutdown(&self) {
        info!("Shutting down moderation bot...");
        self.scheduler.shutdown();
        self.admission.shutdown();

        let handles: Vec<_> = self.background.lock().await.drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle).await.is_err() {
                warn!("Background task did not stop in {:?}, aborting", SHUTDOWN_GRACE);
                handle.abort();
            }
        }
        info!("Moderation bot shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::ScopeKind;
    use crate::automation::{AutomationConfig, AutomationNode};
    use crate::platforms::DryRunPlatform;
    use crate::store::MemoryStore;
    use crate::types::{ChannelId, CommunityId, EventSlot, MemberId, MemberPermissions, MemberRef};
    use chrono::Utc;

    async fn bot() -> (Arc<DryRunPlatform>, Arc<ModBot>) {
        let platform = Arc::new(DryRunPlatform::new());
        let bot = ModBot::new(BotConfiguration::default(), Arc::new(MemoryStore::new()), platform.clone())
            .await
            .unwrap();
        (platform, Arc::new(bot))
    }

    fn chat(author: u64, permissions: MemberPermissions, content: &str) -> PlatformEvent {
        PlatformEvent::MessageReceived(ChatMessage {
            community: CommunityId(7),
            channel: ChannelId(70),
            message_id: 1,
            author: MemberRef::new(MemberId(author), "someone"),
            author_permissions: permissions,
            content: content.to_string(),
            timestamp: Utc::now(),
        })
    }

    async fn settle(handles: EventHandles) -> (Option<CommandOutcome>, Option<EvaluationReport>) {
        let command = match handles.command {
            Some(handle) => handle.await.unwrap(),
            None => None,
        };
        let automation = match handles.automation {
            Some(handle) => Some(handle.await.unwrap()),
            None => None,
        };
        (command, automation)
    }

    #[tokio::test]
    async fn test_prefixed_message_runs_command() {
        let (platform, bot) = bot().await;

        let handles = bot.handle_event(chat(1, MemberPermissions::moderator(), "!tempban 42 24h spam")).await;
        let (outcome, _) = settle(handles).await;

        assert!(matches!(outcome, Some(CommandOutcome::Completed(Some(_)))));
        assert!(platform.is_banned(CommunityId(7), MemberId(42)).await);
        let sent = platform.sent_messages().await;
        assert!(sent.iter().any(|(channel, text)| *channel == Some(ChannelId(70)) && text.starts_with("Banned 42")));
        // Direct notice to the banned member
        assert!(sent.iter().any(|(channel, _)| channel.is_none()));
    }

    #[tokio::test]
    async fn test_cooldown_notice_for_humans() {
        let (platform, bot) = bot().await;
        bot.register_command("say", vec![RateLimit::new(ScopeKind::Community, 1, 60.0).unwrap()])
            .await
            .unwrap();

        settle(bot.handle_event(chat(1, MemberPermissions::moderator(), "!say first")).await).await;
        let (outcome, _) = settle(bot.handle_event(chat(1, MemberPermissions::moderator(), "!say second")).await).await;
        assert!(matches!(outcome, Some(CommandOutcome::Cooldown { .. })));

        let texts: Vec<String> = platform.sent_messages().await.into_iter().map(|(_, text)| text).collect();
        assert_eq!(texts[0], "first");
        assert!(texts[1].starts_with("'say' is on cooldown, try again in"));
        assert_eq!(texts.len(), 2);
    }

    #[tokio::test]
    async fn test_plain_messages_and_failures_do_not_dispatch() {
        let (platform, bot) = bot().await;

        let handles = bot.handle_event(chat(2, MemberPermissions::default(), "hello everyone")).await;
        assert!(handles.command.is_none());
        assert!(handles.automation.is_some());

        let (outcome, _) = settle(bot.handle_event(chat(2, MemberPermissions::default(), "!tempban 42 1h")).await).await;
        assert!(outcome.is_none());
        assert!(!platform.is_banned(CommunityId(7), MemberId(42)).await);

        assert!(bot.handle_event(chat(2, MemberPermissions::default(), "!   ")).await.command.is_none());
    }

    #[tokio::test]
    async fn test_automation_runs_through_dispatcher() {
        let (platform, bot) = bot().await;
        bot.configs()
            .save_community(
                CommunityId(7),
                AutomationConfig::default().with_slot(
                    EventSlot::OnJoin,
                    AutomationNode::new().with_execute(["say welcome $(user)", "temprole $(user_id) 5 1h"]),
                ),
            )
            .await
            .unwrap();

        let join = PlatformEvent::MemberJoined {
            community: CommunityId(7),
            channel: Some(ChannelId(70)),
            member: MemberRef::new(MemberId(42), "alice"),
        };
        let (_, report) = settle(bot.handle_event(join).await).await;
        let report = report.unwrap();

        // temprole needs the bypass flag on the rule
        assert_eq!(report.commands_succeeded, 1);
        assert_eq!(report.commands_failed, 1);
        assert_eq!(platform.sent_messages().await, vec![(Some(ChannelId(70)), "welcome alice".to_string())]);
    }

    #[tokio::test]
    async fn test_run_consumes_stream_and_evicts_on_leave() {
        let (_platform, bot) = bot().await;
        bot.configs().get(CommunityId(7)).await.unwrap();
        assert_eq!(bot.configs().cached_communities().await, 1);

        let (sender, receiver) = broadcast::channel(16);
        sender.send(PlatformEvent::CommunityLeft { community: CommunityId(7) }).unwrap();
        drop(sender);

        bot.run(receiver).await;
        assert_eq!(bot.configs().cached_communities().await, 0);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (_platform, bot) = bot().await;
        bot.start().await;
        assert_eq!(bot.background.lock().await.len(), 2);

        tokio::time::timeout(Duration::from_secs(30), bot.shutdown()).await.unwrap();
        assert!(bot.background.lock().await.is_empty());
    }
}
