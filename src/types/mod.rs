// src/types/mod.rs - Core identifiers, actors and platform events shared by every subsystem

use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self(value)
            }
        }
    };
}

id_type!(
    /// A top-level chat space (guild)
    CommunityId
);
id_type!(
    /// A channel inside a community
    ChannelId
);
id_type!(
    /// A user's identity within a community
    MemberId
);
id_type!(RoleId);

/// Member identity as carried on platform events
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberRef {
    pub id: MemberId,
    pub name: String,
}

impl MemberRef {
    pub fn new(id: impl Into<MemberId>, name: impl Into<String>) -> Self {
        Self { id: id.into(), name: name.into() }
    }
}

/// Permissions of a human author, as reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermissions {
    pub moderator: bool,
    pub administrator: bool,
}

impl MemberPermissions {
    pub fn moderator() -> Self {
        Self { moderator: true, administrator: false }
    }
}

/// Who is invoking a command.
///
/// Automation rules never fabricate a platform author; they invoke commands as
/// `System`, carrying the id of the rule that fired so permission checks can
/// branch on actor kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Actor {
    Human {
        member: MemberRef,
        permissions: MemberPermissions,
    },
    System {
        rule_id: String,
        bypass_permissions: bool,
    },
}

impl Actor {
    /// Whether this actor may run moderator-only commands
    pub fn is_privileged(&self) -> bool {
        match self {
            Actor::Human { permissions, .. } => permissions.moderator || permissions.administrator,
            Actor::System { bypass_permissions, .. } => *bypass_permissions,
        }
    }

    pub fn member_id(&self) -> Option<MemberId> {
        match self {
            Actor::Human { member, .. } => Some(member.id),
            Actor::System { .. } => None,
        }
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Actor::System { .. })
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::Human { member, .. } => write!(f, "{} ({})", member.name, member.id),
            Actor::System { rule_id, .. } => write!(f, "automation[{}]", rule_id),
        }
    }
}

/// A chat message as delivered by the platform transport
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub community: CommunityId,
    pub channel: ChannelId,
    pub message_id: u64,
    pub author: MemberRef,
    pub author_permissions: MemberPermissions,
    pub content: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// Typed events delivered by the platform transport
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    MessageReceived(ChatMessage),
    MessageEdited(ChatMessage),
    MemberJoined {
        community: CommunityId,
        channel: Option<ChannelId>,
        member: MemberRef,
    },
    MemberLeft {
        community: CommunityId,
        channel: Option<ChannelId>,
        member: MemberRef,
    },
    MemberBanned {
        community: CommunityId,
        channel: Option<ChannelId>,
        member: MemberRef,
    },
    /// The bot was removed from a community
    CommunityLeft { community: CommunityId },
}

impl PlatformEvent {
    /// Automation slot this event triggers, if any
    pub fn slot(&self) -> Option<EventSlot> {
        match self {
            PlatformEvent::MessageReceived(_) => Some(EventSlot::OnMessage),
            PlatformEvent::MessageEdited(_) => Some(EventSlot::OnEdit),
            PlatformEvent::MemberJoined { .. } => Some(EventSlot::OnJoin),
            PlatformEvent::MemberLeft { .. } => Some(EventSlot::OnLeave),
            PlatformEvent::MemberBanned { .. } => Some(EventSlot::OnBan),
            PlatformEvent::CommunityLeft { .. } => None,
        }
    }

    pub fn community(&self) -> CommunityId {
        match self {
            PlatformEvent::MessageReceived(m) | PlatformEvent::MessageEdited(m) => m.community,
            PlatformEvent::MemberJoined { community, .. }
            | PlatformEvent::MemberLeft { community, .. }
            | PlatformEvent::MemberBanned { community, .. }
            | PlatformEvent::CommunityLeft { community } => *community,
        }
    }

    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            PlatformEvent::MessageReceived(m) | PlatformEvent::MessageEdited(m) => Some(m.channel),
            PlatformEvent::MemberJoined { channel, .. }
            | PlatformEvent::MemberLeft { channel, .. }
            | PlatformEvent::MemberBanned { channel, .. } => *channel,
            PlatformEvent::CommunityLeft { .. } => None,
        }
    }

    /// The member the event is about (message author or joining/leaving member)
    pub fn subject(&self) -> Option<&MemberRef> {
        match self {
            PlatformEvent::MessageReceived(m) | PlatformEvent::MessageEdited(m) => Some(&m.author),
            PlatformEvent::MemberJoined { member, .. }
            | PlatformEvent::MemberLeft { member, .. }
            | PlatformEvent::MemberBanned { member, .. } => Some(member),
            PlatformEvent::CommunityLeft { .. } => None,
        }
    }

    /// Text content filters are evaluated against
    pub fn text(&self) -> &str {
        match self {
            PlatformEvent::MessageReceived(m) | PlatformEvent::MessageEdited(m) => &m.content,
            _ => self.subject().map(|m| m.name.as_str()).unwrap_or(""),
        }
    }
}

/// Event slots an automation config can hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventSlot {
    OnMessage,
    OnEdit,
    OnJoin,
    OnLeave,
    OnBan,
}

impl EventSlot {
    pub const ALL: [EventSlot; 5] = [
        EventSlot::OnMessage,
        EventSlot::OnEdit,
        EventSlot::OnJoin,
        EventSlot::OnLeave,
        EventSlot::OnBan,
    ];

    /// Name used in rule documents
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSlot::OnMessage => "on_message",
            EventSlot::OnEdit => "on_edit",
            EventSlot::OnJoin => "on_join",
            EventSlot::OnLeave => "on_leave",
            EventSlot::OnBan => "on_ban",
        }
    }
}

impl fmt::Display for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
