// src/scheduler/action.rs - Temporal action records and their platform effects

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::PlatformError;
use crate::platforms::ModerationPlatform;
use crate::types::{CommunityId, MemberId, RoleId};

/// Moderation effect with a built-in expiry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TemporalActionKind {
    Ban,
    RoleGrant { role: RoleId },
}

impl TemporalActionKind {
    pub(crate) async fn apply(
        &self,
        platform: &dyn ModerationPlatform,
        community: CommunityId,
        target: MemberId,
        reason: Option<&str>,
    ) -> Result<(), PlatformError> {
        match self {
            TemporalActionKind::Ban => platform.ban_member(community, target, reason).await,
            TemporalActionKind::RoleGrant { role } => platform.grant_role(community, target, *role).await,
        }
    }

    /// Reverse the effect. Nothing left to reverse counts as success.
    pub(crate) async fn unapply(
        &self,
        platform: &dyn ModerationPlatform,
        community: CommunityId,
        target: MemberId,
    ) -> Result<(), PlatformError> {
        let result = match self {
            TemporalActionKind::Ban => platform.unban_member(community, target).await,
            TemporalActionKind::RoleGrant { role } => platform.revoke_role(community, target, *role).await,
        };

        match result {
            Err(PlatformError::NotFound) => Ok(()),
            other => other,
        }
    }
}

impl fmt::Display for TemporalActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TemporalActionKind::Ban => f.write_str("ban"),
            TemporalActionKind::RoleGrant { role } => write!(f, "role {}", role),
        }
    }
}

/// What a command handler asks the scheduler to apply
#[derive(Debug, Clone)]
pub struct TemporalActionSpec {
    pub kind: TemporalActionKind,
    pub target: MemberId,
    pub community: CommunityId,
    pub reason: Option<String>,
    /// Direct message sent to the target once the action is recorded
    pub notice: Option<String>,
}

impl TemporalActionSpec {
    pub fn new(kind: TemporalActionKind, target: impl Into<MemberId>, community: impl Into<CommunityId>) -> Self {
        Self {
            kind,
            target: target.into(),
            community: community.into(),
            reason: None,
            notice: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_notice(mut self, notice: impl Into<String>) -> Self {
        self.notice = Some(notice.into());
        self
    }
}

/// A pending expiring action, owned by the store until reversed.
///
/// Invariant: `start < end`, and a persisted record is always `applied`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemporalAction {
    pub id: Uuid,
    pub target: MemberId,
    pub community: CommunityId,
    pub kind: TemporalActionKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub applied: bool,
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl TemporalAction {
    pub(crate) fn new(spec: &TemporalActionSpec, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            target: spec.target,
            community: spec.community,
            kind: spec.kind.clone(),
            start,
            end,
            applied: false,
            failed_attempts: 0,
            reason: spec.reason.clone(),
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.end <= now
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> chrono::Duration {
        (self.end - now).max(chrono::Duration::zero())
    }

    pub(crate) fn record_id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization_shape() {
        let start = Utc::now();
        let spec = TemporalActionSpec::new(TemporalActionKind::RoleGrant { role: RoleId(5) }, MemberId(42), CommunityId(7));
        let action = TemporalAction::new(&spec, start, start + chrono::Duration::hours(1));

        let value = serde_json::to_value(&action).unwrap();
        assert_eq!(value["kind"]["type"], "role_grant");
        assert_eq!(value["kind"]["role"], 5);
        assert_eq!(value["target"], 42);
        assert!(value.get("reason").is_none());

        let back: TemporalAction = serde_json::from_value(value).unwrap();
        assert_eq!(back, action);
    }

    #[test]
    fn test_due_and_remaining() {
        let start = Utc::now();
        let spec = TemporalActionSpec::new(TemporalActionKind::Ban, MemberId(42), CommunityId(7));
        let action = TemporalAction::new(&spec, start, start + chrono::Duration::minutes(10));

        assert!(!action.is_due(start));
        assert!(action.is_due(action.end));
        assert_eq!(action.remaining(start), chrono::Duration::minutes(10));
        assert_eq!(action.remaining(action.end + chrono::Duration::minutes(1)), chrono::Duration::zero());
    }
}
