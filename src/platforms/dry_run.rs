// src/platforms/dry_run.rs - Platform that only logs and tracks state in memory

use async_trait::async_trait;
use log::info;
use std::collections::HashSet;
use tokio::sync::RwLock;

use super::ModerationPlatform;
use crate::error::PlatformError;
use crate::types::{ChannelId, CommunityId, MemberId, RoleId};

/// Stand-in platform for running without a transport. Keeps bans, roles and
/// outgoing messages in memory so behavior can be observed.
#[derive(Default)]
pub struct DryRunPlatform {
    bans: RwLock<HashSet<(CommunityId, MemberId)>>,
    roles: RwLock<HashSet<(CommunityId, MemberId, RoleId)>>,
    sent: RwLock<Vec<(Option<ChannelId>, String)>>,
    unban_calls: RwLock<u64>,
    revoke_calls: RwLock<u64>,
}

impl DryRunPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_banned(&self, community: CommunityId, member: MemberId) -> bool {
        self.bans.read().await.contains(&(community, member))
    }

    pub async fn has_role(&self, community: CommunityId, member: MemberId, role: RoleId) -> bool {
        self.roles.read().await.contains(&(community, member, role))
    }

    /// Channel messages (`Some(channel)`) and direct messages (`None`) in send order
    pub async fn sent_messages(&self) -> Vec<(Option<ChannelId>, String)> {
        self.sent.read().await.clone()
    }

    /// Number of unban and revoke calls made, including no-ops
    pub async fn reversal_calls(&self) -> u64 {
        *self.unban_calls.read().await + *self.revoke_calls.read().await
    }
}

#[async_trait]
impl ModerationPlatform for DryRunPlatform {
    fn platform_name(&self) -> &str {
        "dry-run"
    }

    async fn ban_member(&self, community: CommunityId, member: MemberId, reason: Option<&str>) -> Result<(), PlatformError> {
        info!("[dry-run] ban {} in {} ({})", member, community, reason.unwrap_or("no reason"));
        self.bans.write().await.insert((community, member));
        Ok(())
    }

    async fn unban_member(&self, community: CommunityId, member: MemberId) -> Result<(), PlatformError> {
        *self.unban_calls.write().await += 1;
        if self.bans.write().await.remove(&(community, member)) {
            info!("[dry-run] unban {} in {}", member, community);
            Ok(())
        } else {
            Err(PlatformError::NotFound)
        }
    }

    async fn grant_role(&self, community: CommunityId, member: MemberId, role: RoleId) -> Result<(), PlatformError> {
        info!("[dry-run] grant role {} to {} in {}", role, member, community);
        self.roles.write().await.insert((community, member, role));
        Ok(())
    }

    async fn revoke_role(&self, community: CommunityId, member: MemberId, role: RoleId) -> Result<(), PlatformError> {
        *self.revoke_calls.write().await += 1;
        if self.roles.write().await.remove(&(community, member, role)) {
            info!("[dry-run] revoke role {} from {} in {}", role, member, community);
            Ok(())
        } else {
            Err(PlatformError::NotFound)
        }
    }

    async fn send_message(&self, community: CommunityId, channel: ChannelId, message: &str) -> Result<(), PlatformError> {
        info!("[dry-run] {}#{}: {}", community, channel, message);
        self.sent.write().await.push((Some(channel), message.to_string()));
        Ok(())
    }

    async fn send_direct_message(&self, member: MemberId, message: &str) -> Result<(), PlatformError> {
        info!("[dry-run] DM to {}: {}", member, message);
        self.sent.write().await.push((None, message.to_string()));
        Ok(())
    }
}
