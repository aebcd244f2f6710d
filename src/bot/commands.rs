// src/bot/commands.rs - Built-in moderation commands backed by the temporal action scheduler

use async_trait::async_trait;
use chrono::Duration;
use log::{debug, info};
use std::sync::Arc;
use uuid::Uuid;

use crate::dispatch::{CommandDispatcher, CommandOutcome, Invocation};
use crate::error::{DispatchError, ScheduleError};
use crate::scheduler::{TemporalActionKind, TemporalActionScheduler, TemporalActionSpec};
use crate::types::{MemberId, RoleId};

/// How many pending actions `pending` lists before summarising
const PENDING_LISTED: usize = 5;

/// Longest duration a temporary action may be given, ten years
const MAX_DURATION_DAYS: i64 = 3_650;

/// Parse durations like `90s`, `30m`, `24h`, `7d`, `2w` or combinations such as `1h30m`
pub fn parse_duration(text: &str) -> Result<Duration, DispatchError> {
    let invalid = || DispatchError::InvalidArguments(format!("invalid duration '{}', try 30m, 24h or 1h30m", text));

    let mut total = Duration::zero();
    let mut digits = String::new();
    for c in text.trim().to_lowercase().chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }

        let amount: i64 = digits.parse().map_err(|_| invalid())?;
        digits.clear();
        let part = match c {
            's' => Duration::try_seconds(amount),
            'm' => Duration::try_minutes(amount),
            'h' => Duration::try_hours(amount),
            'd' => Duration::try_days(amount),
            'w' => Duration::try_weeks(amount),
            _ => None,
        }
        .ok_or_else(invalid)?;
        total = total.checked_add(&part).ok_or_else(invalid)?;
    }

    // Trailing digits without a unit
    if !digits.is_empty() || total <= Duration::zero() {
        return Err(invalid());
    }
    if total > Duration::days(MAX_DURATION_DAYS) {
        return Err(DispatchError::InvalidArguments(format!(
            "duration '{}' is longer than {} days",
            text, MAX_DURATION_DAYS
        )));
    }
    Ok(total)
}

/// Compact human form, e.g. `1d 2h 30m`
pub fn format_duration(duration: Duration) -> String {
    let mut seconds = duration.num_seconds().max(0);
    if seconds == 0 {
        return "0s".to_string();
    }

    let mut parts = Vec::new();
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60), ("s", 1)] {
        if seconds >= size {
            parts.push(format!("{}{}", seconds / size, unit));
            seconds %= size;
        }
    }
    parts.join(" ")
}

/// Accepts a plain id or a mention such as `<@42>` / `<@!42>`
fn parse_member(text: &str) -> Result<MemberId, DispatchError> {
    let id = text.trim_start_matches("<@").trim_start_matches('!').trim_end_matches('>');
    id.parse::<u64>()
        .map(MemberId)
        .map_err(|_| DispatchError::InvalidArguments(format!("'{}' is not a member id", text)))
}

fn parse_role(text: &str) -> Result<RoleId, DispatchError> {
    let id = text.trim_start_matches("<@&").trim_end_matches('>');
    id.parse::<u64>()
        .map(RoleId)
        .map_err(|_| DispatchError::InvalidArguments(format!("'{}' is not a role id", text)))
}

/// Handles `tempban`, `temprole`, `untemp`, `pending` and `say`
pub struct ModerationCommands {
    scheduler: Arc<TemporalActionScheduler>,
}

impl ModerationCommands {
    pub const NAMES: [&'static str; 5] = ["tempban", "temprole", "untemp", "pending", "say"];

    pub fn new(scheduler: Arc<TemporalActionScheduler>) -> Self {
        Self { scheduler }
    }

    fn require_privileged(invocation: &Invocation, command: &str) -> Result<(), DispatchError> {
        if invocation.actor.is_privileged() {
            Ok(())
        } else {
            Err(DispatchError::PermissionDenied {
                actor: invocation.actor.to_string(),
                command: command.to_string(),
            })
        }
    }

    async fn tempban(&self, invocation: &Invocation, args: &[&str]) -> Result<CommandOutcome, DispatchError> {
        Self::require_privileged(invocation, "tempban")?;
        let [member, duration, reason @ ..] = args else {
            return Err(DispatchError::InvalidArguments("usage: tempban <member> <duration> [reason]".to_string()));
        };

        let target = parse_member(member)?;
        let duration = parse_duration(duration)?;
        let mut spec = TemporalActionSpec::new(TemporalActionKind::Ban, target, invocation.community).with_notice(format!(
            "You have been banned from community {} for {}",
            invocation.community,
            format_duration(duration)
        ));
        if !reason.is_empty() {
            spec = spec.with_reason(reason.join(" "));
        }

        let action = self.scheduler.schedule(spec, duration).await?;
        info!("{} temp-banned {} for {}", invocation.actor, target, format_duration(duration));
        Ok(CommandOutcome::Completed(Some(format!(
            "Banned {} for {} (id {})",
            target,
            format_duration(duration),
            action.id
        ))))
    }

    async fn temprole(&self, invocation: &Invocation, args: &[&str]) -> Result<CommandOutcome, DispatchError> {
        Self::require_privileged(invocation, "temprole")?;
        let [member, role, duration] = args else {
            return Err(DispatchError::InvalidArguments("usage: temprole <member> <role> <duration>".to_string()));
        };

        let target = parse_member(member)?;
        let role = parse_role(role)?;
        let duration = parse_duration(duration)?;
        let spec = TemporalActionSpec::new(TemporalActionKind::RoleGrant { role }, target, invocation.community);

        let action = self.scheduler.schedule(spec, duration).await?;
        Ok(CommandOutcome::Completed(Some(format!(
            "Granted role {} to {} for {} (id {})",
            role,
            target,
            format_duration(duration),
            action.id
        ))))
    }

    async fn untemp(&self, invocation: &Invocation, args: &[&str]) -> Result<CommandOutcome, DispatchError> {
        Self::require_privileged(invocation, "untemp")?;
        let [id] = args else {
            return Err(DispatchError::InvalidArguments("usage: untemp <action-id>".to_string()));
        };
        let id = Uuid::parse_str(id).map_err(|_| DispatchError::InvalidArguments(format!("'{}' is not an action id", id)))?;

        // Only actions of the invoking community can be cancelled from it
        match self.scheduler.get(id).await? {
            Some(action) if action.community == invocation.community => {}
            _ => return Err(ScheduleError::NotFound(id).into()),
        }

        let action = self.scheduler.cancel(id).await?;
        Ok(CommandOutcome::Completed(Some(format!(
            "Lifted temporary {} for {}",
            action.kind, action.target
        ))))
    }

    async fn pending(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
        Self::require_privileged(invocation, "pending")?;
        let actions = self.scheduler.pending_for(invocation.community).await?;
        if actions.is_empty() {
            return Ok(CommandOutcome::Completed(Some("No temporary actions pending".to_string())));
        }

        let now = chrono::Utc::now();
        let mut lines: Vec<String> = actions
            .iter()
            .take(PENDING_LISTED)
            .map(|action| {
                format!(
                    "{} {} ends in {} ({})",
                    action.kind,
                    action.target,
                    format_duration(action.remaining(now)),
                    action.id
                )
            })
            .collect();
        if actions.len() > PENDING_LISTED {
            lines.push(format!("...and {} more", actions.len() - PENDING_LISTED));
        }
        Ok(CommandOutcome::Completed(Some(lines.join("\n"))))
    }

    /// Automation rules may always speak; humans need moderator rights
    fn say(invocation: &Invocation, args: &[&str]) -> Result<CommandOutcome, DispatchError> {
        if !invocation.actor.is_system() {
            Self::require_privileged(invocation, "say")?;
        }
        if args.is_empty() {
            return Err(DispatchError::InvalidArguments("usage: say <text>".to_string()));
        }
        Ok(CommandOutcome::Completed(Some(args.join(" "))))
    }
}

#[async_trait]
impl CommandDispatcher for ModerationCommands {
    async fn dispatch(&self, invocation: &Invocation) -> Result<CommandOutcome, DispatchError> {
        let name = invocation.command_name().unwrap_or_default();
        let args = invocation.args();
        debug!("Running '{}' for {} in {}", name, invocation.actor, invocation.community);

        match name.as_str() {
            "tempban" => self.tempban(invocation, &args).await,
            "temprole" => self.temprole(invocation, &args).await,
            "untemp" => self.untemp(invocation, &args).await,
            "pending" => self.pending(invocation).await,
            "say" => Self::say(invocation, &args),
            _ => Err(DispatchError::UnknownCommand(name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platforms::DryRunPlatform;
    use crate::scheduler::SchedulerSettings;
    use crate::store::MemoryStore;
    use crate::types::{Actor, ChannelId, CommunityId, MemberPermissions, MemberRef};

    fn setup() -> (Arc<DryRunPlatform>, Arc<TemporalActionScheduler>, ModerationCommands) {
        let platform = Arc::new(DryRunPlatform::new());
        let scheduler = Arc::new(TemporalActionScheduler::new(
            Arc::new(MemoryStore::new()),
            platform.clone(),
            SchedulerSettings::default(),
        ));
        let commands = ModerationCommands::new(Arc::clone(&scheduler));
        (platform, scheduler, commands)
    }

    fn as_actor(actor: Actor, text: &str) -> Invocation {
        Invocation {
            community: CommunityId(7),
            channel: Some(ChannelId(70)),
            actor,
            text: text.to_string(),
        }
    }

    fn moderator(text: &str) -> Invocation {
        as_actor(
            Actor::Human { member: MemberRef::new(MemberId(1), "mod"), permissions: MemberPermissions::moderator() },
            text,
        )
    }

    fn reply(outcome: CommandOutcome) -> String {
        match outcome {
            CommandOutcome::Completed(Some(reply)) => reply,
            other => panic!("expected a reply, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::seconds(90));
        assert_eq!(parse_duration("30m").unwrap(), Duration::minutes(30));
        assert_eq!(parse_duration("24H").unwrap(), Duration::hours(24));
        assert_eq!(parse_duration("7d").unwrap(), Duration::days(7));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::minutes(90));
        assert_eq!(parse_duration("2w").unwrap(), Duration::days(14));

        for bad in ["", "10", "h", "0m", "5x", "1h30", "-5m", "99999999999999999999d"] {
            assert!(parse_duration(bad).is_err(), "{} should be rejected", bad);
        }
    }

    #[test]
    fn test_parse_duration_upper_bound() {
        assert_eq!(parse_duration("3650d").unwrap(), Duration::days(3_650));
        assert!(parse_duration("3651d").is_err());
        assert!(parse_duration("15000000w").is_err());
    }

    #[tokio::test]
    async fn test_tempban_with_huge_duration_is_refused() {
        let (platform, scheduler, commands) = setup();

        let result = commands.dispatch(&moderator("tempban 42 15000000w")).await;
        assert!(matches!(result, Err(DispatchError::InvalidArguments(_))));
        assert!(!platform.is_banned(CommunityId(7), MemberId(42)).await);
        assert!(scheduler.pending().await.unwrap().is_empty());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::minutes(90)), "1h 30m");
        assert_eq!(format_duration(Duration::days(1) + Duration::seconds(5)), "1d 5s");
        assert_eq!(format_duration(Duration::seconds(-3)), "0s");
    }

    #[test]
    fn test_parse_member_mentions() {
        assert_eq!(parse_member("42").unwrap(), MemberId(42));
        assert_eq!(parse_member("<@42>").unwrap(), MemberId(42));
        assert_eq!(parse_member("<@!42>").unwrap(), MemberId(42));
        assert!(parse_member("alice").is_err());
        assert_eq!(parse_role("<@&5>").unwrap(), RoleId(5));
    }

    #[tokio::test]
    async fn test_tempban_and_untemp() {
        let (platform, scheduler, commands) = setup();

        let text = reply(commands.dispatch(&moderator("tempban <@42> 24h being rude")).await.unwrap());
        assert!(text.starts_with("Banned 42 for 1d"));
        assert!(platform.is_banned(CommunityId(7), MemberId(42)).await);

        let pending = scheduler.pending_for(CommunityId(7)).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].reason.as_deref(), Some("being rude"));

        let listing = reply(commands.dispatch(&moderator("pending")).await.unwrap());
        assert!(listing.contains(&pending[0].id.to_string()));

        commands
            .dispatch(&moderator(&format!("untemp {}", pending[0].id)))
            .await
            .unwrap();
        assert!(!platform.is_banned(CommunityId(7), MemberId(42)).await);
        assert!(scheduler.pending().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_untemp_other_community_not_found() {
        let (_platform, scheduler, commands) = setup();
        let action = scheduler
            .schedule(TemporalActionSpec::new(TemporalActionKind::Ban, MemberId(42), CommunityId(8)), Duration::hours(1))
            .await
            .unwrap();

        let result = commands.dispatch(&moderator(&format!("untemp {}", action.id))).await;
        assert!(matches!(result, Err(DispatchError::Schedule(ScheduleError::NotFound(_)))));
        assert!(scheduler.get(action.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_temprole() {
        let (platform, _scheduler, commands) = setup();
        commands.dispatch(&moderator("temprole 42 5 1h")).await.unwrap();
        assert!(platform.has_role(CommunityId(7), MemberId(42), RoleId(5)).await);

        assert!(matches!(
            commands.dispatch(&moderator("temprole 42 5")).await,
            Err(DispatchError::InvalidArguments(_))
        ));
    }

    #[tokio::test]
    async fn test_permissions_branch_on_actor() {
        let (platform, _scheduler, commands) = setup();

        let member = as_actor(
            Actor::Human { member: MemberRef::new(MemberId(2), "bob"), permissions: MemberPermissions::default() },
            "tempban 42 1h",
        );
        assert!(matches!(
            commands.dispatch(&member).await,
            Err(DispatchError::PermissionDenied { .. })
        ));

        let rule = |bypass| Actor::System { rule_id: "community:7/on_message/0".to_string(), bypass_permissions: bypass };
        assert!(commands.dispatch(&as_actor(rule(false), "tempban 42 1h")).await.is_err());
        assert!(!platform.is_banned(CommunityId(7), MemberId(42)).await);

        commands.dispatch(&as_actor(rule(true), "tempban 42 1h")).await.unwrap();
        assert!(platform.is_banned(CommunityId(7), MemberId(42)).await);

        // Rules may always speak, humans need rights
        assert_eq!(reply(commands.dispatch(&as_actor(rule(false), "say hi there")).await.unwrap()), "hi there");
        let chatter = as_actor(
            Actor::Human { member: MemberRef::new(MemberId(2), "bob"), permissions: MemberPermissions::default() },
            "say hi",
        );
        assert!(commands.dispatch(&chatter).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_command() {
        let (_platform, _scheduler, commands) = setup();
        assert!(matches!(
            commands.dispatch(&moderator("dance")).await,
            Err(DispatchError::UnknownCommand(name)) if name == "dance"
        ));
    }
}
