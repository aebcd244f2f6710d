// src/automation/config.rs - Declarative rule trees for community and channel automation

use regex::{Regex, RegexBuilder};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::EventSlot;

fn is_false(value: &bool) -> bool {
    !*value
}

/// Ordered command texts fired when a node validates.
///
/// Reads a single scalar or a list. Writes an empty scalar for none, a scalar
/// for exactly one and a list otherwise.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecuteCommands(Vec<String>);

impl ExecuteCommands {
    pub fn new<I, S>(commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(
            commands
                .into_iter()
                .map(|command| {
                    let command: String = command.into();
                    command.trim().to_string()
                })
                .filter(|c| !c.is_empty())
                .collect(),
        )
    }

    pub fn commands(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ExecuteRepr {
    One(String),
    Many(Vec<String>),
}

impl<'de> Deserialize<'de> for ExecuteCommands {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Ok(match Option::<ExecuteRepr>::deserialize(deserializer)? {
            Some(ExecuteRepr::One(command)) => ExecuteCommands::new([command]),
            Some(ExecuteRepr::Many(commands)) => ExecuteCommands::new(commands),
            None => ExecuteCommands::default(),
        })
    }
}

impl Serialize for ExecuteCommands {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.0.as_slice() {
            [] => serializer.serialize_str(""),
            [only] => serializer.serialize_str(only),
            many => many.serialize(serializer),
        }
    }
}

/// Regex predicate over event text. Unanchored; case sensitivity as configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentFilter<'a> {
    pub pattern: &'a str,
    pub ignore_case: bool,
}

impl ContentFilter<'_> {
    pub fn compile(&self) -> Result<Regex, ConfigError> {
        RegexBuilder::new(self.pattern)
            .case_insensitive(self.ignore_case)
            .build()
            .map_err(|source| ConfigError::InvalidPattern {
                pattern: self.pattern.to_string(),
                source,
            })
    }

    pub fn matches(&self, text: &str) -> Result<bool, ConfigError> {
        Ok(self.compile()?.is_match(text))
    }
}

/// One conditional rule. A node without `match` is unconditionally valid; a
/// failing filter suppresses both the node's commands and its whole subtree.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomationNode {
    #[serde(rename = "match", default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ignore_case: bool,

    #[serde(default)]
    pub execute: ExecuteCommands,

    /// Run commands as a privileged system actor
    #[serde(default, skip_serializing_if = "is_false")]
    pub bypass_permissions: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AutomationNode>,
}

impl AutomationNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_match(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn ignoring_case(mut self) -> Self {
        self.ignore_case = true;
        self
    }

    pub fn with_execute<I, S>(mut self, commands: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.execute = ExecuteCommands::new(commands);
        self
    }

    pub fn with_bypass_permissions(mut self) -> Self {
        self.bypass_permissions = true;
        self
    }

    pub fn with_child(mut self, child: AutomationNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn filter(&self) -> Option<ContentFilter<'_>> {
        self.pattern.as_deref().map(|pattern| ContentFilter {
            pattern,
            ignore_case: self.ignore_case,
        })
    }

    /// Commands of the node's effect, if it has one
    pub fn effect(&self) -> Option<&[String]> {
        if self.execute.is_empty() {
            None
        } else {
            Some(self.execute.commands())
        }
    }

    fn collect_issues(&self, path: String, issues: &mut Vec<ConfigIssue>) {
        if let Some(filter) = self.filter() {
            if let Err(e) = filter.compile() {
                issues.push(ConfigIssue { path: path.clone(), message: e.to_string() });
            }
        }
        for (index, child) in self.children.iter().enumerate() {
            child.collect_issues(format!("{}/{}", path, index), issues);
        }
    }
}

/// A problem found in an otherwise loadable document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub path: String,
    pub message: String,
}

/// Rule tree per event slot, for a community or as a channel override
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AutomationConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_message: Option<AutomationNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_edit: Option<AutomationNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_join: Option<AutomationNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_leave: Option<AutomationNode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_ban: Option<AutomationNode>,
}

impl AutomationConfig {
    pub fn slot(&self, slot: EventSlot) -> Option<&AutomationNode> {
        match slot {
            EventSlot::OnMessage => self.on_message.as_ref(),
            EventSlot::OnEdit => self.on_edit.as_ref(),
            EventSlot::OnJoin => self.on_join.as_ref(),
            EventSlot::OnLeave => self.on_leave.as_ref(),
            EventSlot::OnBan => self.on_ban.as_ref(),
        }
    }

    pub fn set_slot(&mut self, slot: EventSlot, node: Option<AutomationNode>) {
        let target = match slot {
            EventSlot::OnMessage => &mut self.on_message,
            EventSlot::OnEdit => &mut self.on_edit,
            EventSlot::OnJoin => &mut self.on_join,
            EventSlot::OnLeave => &mut self.on_leave,
            EventSlot::OnBan => &mut self.on_ban,
        };
        *target = node;
    }

    pub fn with_slot(mut self, slot: EventSlot, node: AutomationNode) -> Self {
        self.set_slot(slot, Some(node));
        self
    }

    pub fn is_empty(&self) -> bool {
        EventSlot::ALL.iter().all(|slot| self.slot(*slot).is_none())
    }

    /// Parse a rule document; an empty document is an empty config
    pub fn from_yaml(document: &str) -> Result<Self, ConfigError> {
        if document.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(document)?)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Patterns that will never match. The document still loads; these nodes just never fire.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();
        for slot in EventSlot::ALL {
            if let Some(node) = self.slot(slot) {
                node.collect_issues(slot.as_str().to_string(), &mut issues);
            }
        }
        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_accepts_scalar_and_list() {
        let config = AutomationConfig::from_yaml(
            r#"
on_message:
  match: "hello"
  execute: "say hi"
on_join:
  execute:
    - "temprole $(user_id) 5 1h"
    - "say welcome $(user)"
on_leave:
  execute:
"#,
        )
        .unwrap();

        let message = config.slot(EventSlot::OnMessage).unwrap();
        assert_eq!(message.filter().unwrap().pattern, "hello");
        assert_eq!(message.effect().unwrap(), ["say hi".to_string()]);
        assert_eq!(config.slot(EventSlot::OnJoin).unwrap().execute.len(), 2);
        assert!(config.slot(EventSlot::OnLeave).unwrap().effect().is_none());
        assert!(config.slot(EventSlot::OnBan).is_none());
    }

    #[test]
    fn test_execute_write_back_forms() {
        let none = serde_yaml::to_string(&AutomationNode::new()).unwrap();
        assert_eq!(none.trim(), "execute: ''");

        let one = serde_yaml::to_string(&AutomationNode::new().with_execute(["say hi"])).unwrap();
        assert_eq!(one.trim(), "execute: say hi");

        let many = serde_yaml::to_string(&AutomationNode::new().with_execute(["a", "b"])).unwrap();
        assert_eq!(many.trim(), "execute:\n- a\n- b");
    }

    #[test]
    fn test_document_survives_write_and_read() {
        let config = AutomationConfig::default().with_slot(
            EventSlot::OnMessage,
            AutomationNode::new()
                .with_match("(?:buy|sell) followers")
                .ignoring_case()
                .with_execute(["tempban $(user_id) 1d follower spam"])
                .with_bypass_permissions()
                .with_child(AutomationNode::new().with_match("discord\\.gg").with_execute(["say no invites", "warn $(user_id)"])),
        );

        let yaml = config.to_yaml().unwrap();
        assert!(yaml.contains("match:"));
        assert_eq!(AutomationConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_malformed_documents_rejected() {
        assert!(AutomationConfig::from_yaml("on_mesage:\n  execute: x").is_err());
        assert!(AutomationConfig::from_yaml("on_join:\n  macth: x").is_err());
        assert!(AutomationConfig::from_yaml("on_join: [1, 2").is_err());
        assert!(AutomationConfig::from_yaml("   \n").unwrap().is_empty());
    }

    #[test]
    fn test_validate_reports_bad_patterns_with_path() {
        let config = AutomationConfig::default().with_slot(
            EventSlot::OnEdit,
            AutomationNode::new()
                .with_match("fine")
                .with_child(AutomationNode::new())
                .with_child(AutomationNode::new().with_match("(unclosed")),
        );

        let issues = config.validate();
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path, "on_edit/1");
    }

    #[test]
    fn test_content_filter_matching() {
        let filter = ContentFilter { pattern: "hello", ignore_case: false };
        assert!(filter.matches("well hello world").unwrap());
        assert!(!filter.matches("HELLO").unwrap());

        let insensitive = ContentFilter { pattern: "hello", ignore_case: true };
        assert!(insensitive.matches("HELLO").unwrap());

        let broken = ContentFilter { pattern: "[a-", ignore_case: false };
        assert!(matches!(broken.matches("x"), Err(ConfigError::InvalidPattern { .. })));
    }
}
