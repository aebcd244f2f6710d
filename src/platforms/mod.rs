use async_trait::async_trait;

use crate::error::PlatformError;
use crate::types::{ChannelId, CommunityId, MemberId, RoleId};

pub mod dry_run;

pub use dry_run::DryRunPlatform;

/// Moderation calls the bot makes against the chat platform API.
///
/// Reversal calls (`unban_member`, `revoke_role`) report `PlatformError::NotFound`
/// when there is nothing left to reverse; callers treat that as success.
#[async_trait]
pub trait ModerationPlatform: Send + Sync {
    /// Platform identifier for logging (e.g. "discord")
    fn platform_name(&self) -> &str;

    async fn ban_member(&self, community: CommunityId, member: MemberId, reason: Option<&str>) -> Result<(), PlatformError>;

    async fn unban_member(&self, community: CommunityId, member: MemberId) -> Result<(), PlatformError>;

    async fn grant_role(&self, community: CommunityId, member: MemberId, role: RoleId) -> Result<(), PlatformError>;

    async fn revoke_role(&self, community: CommunityId, member: MemberId, role: RoleId) -> Result<(), PlatformError>;

    /// Post a message to a channel
    async fn send_message(&self, community: CommunityId, channel: ChannelId, message: &str) -> Result<(), PlatformError>;

    async fn send_direct_message(&self, member: MemberId, message: &str) -> Result<(), PlatformError>;
}
