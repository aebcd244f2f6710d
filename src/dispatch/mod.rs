// src/dispatch/mod.rs - Command dispatcher contract and the admission gate in front of it

use async_trait::async_trait;
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

use crate::admission::{AdmissionController, InvocationScope};
use crate::error::DispatchError;
use crate::types::{Actor, ChannelId, CommunityId};

/// A command text bound to the actor running it and where it runs
#[derive(Debug, Clone)]
pub struct Invocation {
    pub community: CommunityId,
    pub channel: Option<ChannelId>,
    pub actor: Actor,
    /// Command text without the chat prefix, e.g. `tempban 42 24h spam`
    pub text: String,
}

impl Invocation {
    /// Lowercased first word of the command text
    pub fn command_name(&self) -> Option<String> {
        self.text.split_whitespace().next().map(|name| name.to_lowercase())
    }

    /// Everything after the command name, split on whitespace
    pub fn args(&self) -> Vec<&str> {
        self.text.split_whitespace().skip(1).collect()
    }

    pub fn scope(&self) -> InvocationScope {
        InvocationScope {
            community: self.community,
            channel: self.channel,
            member: self.actor.member_id(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    /// The command ran; an optional reply for the invoking channel
    Completed(Option<String>),
    /// Admission denied the invocation; nothing was dispatched
    Cooldown { retry_after: Duration },
}

/// Resolves command text + actor into a command and runs it
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError>;
}

#[async_trait]
impl<T: CommandDispatcher + ?Sized> CommandDispatcher for Arc<T> {
    async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
        (**self).dispatch(invocation).await
    }
}

/// Dispatcher that consults the admission controller before forwarding.
pub struct AdmissionGate<D> {
    admission: Arc<AdmissionController>,
    inner: D,
}

impl<D: CommandDispatcher> AdmissionGate<D> {
    pub fn new(admission: Arc<AdmissionController>, inner: D) -> Self {
        Self { admission, inner }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }
}

#[async_trait]
impl<D: CommandDispatcher> CommandDispatcher for AdmissionGate<D> {
    async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
        let Some(command) = invocation.command_name() else {
            return Err(DispatchError::InvalidArguments("empty command".to_string()));
        };

        let decision = self.admission.check(&command, &invocation.scope()).await;
        if !decision.allowed {
            info!(
                "Command '{}' from {} is on cooldown for {:.1}s",
                command,
                invocation.actor,
                decision.retry_after.as_secs_f64()
            );
            return Ok(CommandOutcome::Cooldown { retry_after: decision.retry_after });
        }

        debug!("Admitted '{}' for {}", command, invocation.actor);
        self.inner.dispatch(invocation).await
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// Records every invocation once it finishes; commands whose name is in
    /// `failing` return an error, those in `delays` sleep first
    #[derive(Default)]
    pub struct RecordingDispatcher {
        pub calls: Mutex<Vec<Invocation>>,
        pub failing: Vec<String>,
        pub delays: HashMap<String, Duration>,
    }

    impl RecordingDispatcher {
        pub fn failing(names: &[&str]) -> Self {
            Self {
                failing: names.iter().map(|n| n.to_string()).collect(),
                ..Self::default()
            }
        }

        pub fn delaying(names: &[&str], delay: Duration) -> Self {
            Self {
                delays: names.iter().map(|n| (n.to_string(), delay)).collect(),
                ..Self::default()
            }
        }

        pub async fn texts(&self) -> Vec<String> {
            self.calls.lock().await.iter().map(|i| i.text.clone()).collect()
        }
    }

    #[async_trait]
    impl CommandDispatcher for RecordingDispatcher {
        async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
            let name = invocation.command_name().unwrap_or_default();
            if let Some(delay) = self.delays.get(&name) {
                tokio::time::sleep(*delay).await;
            }
            self.calls.lock().await.push(invocation.clone());
            if self.failing.contains(&name) {
                return Err(DispatchError::Failed(format!("{} exploded", name)));
            }
            Ok(CommandOutcome::Completed(None))
        }
    }
}
