// src/automation/store.rs - Cached access to per-community and per-channel automation configs

use log::{debug, info, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::config::{AutomationConfig, AutomationNode, ContentFilter};
use crate::error::{ConfigError, StoreError};
use crate::store::{Collection, Store};
use crate::types::{ChannelId, CommunityId, EventSlot};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CommunityRecord {
    community: CommunityId,
    config: AutomationConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelRecord {
    community: CommunityId,
    channel: ChannelId,
    config: AutomationConfig,
}

/// Where a selected rule tree came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleScope {
    Community(CommunityId),
    Channel(ChannelId),
}

impl std::fmt::Display for RuleScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuleScope::Community(id) => write!(f, "community:{}", id),
            RuleScope::Channel(id) => write!(f, "channel:{}", id),
        }
    }
}

/// Everything configured for one community: its own rules plus channel overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommunityAutomation {
    pub community: AutomationConfig,
    pub channels: HashMap<ChannelId, AutomationConfig>,
}

impl CommunityAutomation {
    /// Rule trees to evaluate for an event: the community node, then the channel
    /// override node. An override supplements the community rule, it never hides it.
    pub fn nodes_for(
        &self,
        community: CommunityId,
        slot: EventSlot,
        channel: Option<ChannelId>,
    ) -> Vec<(RuleScope, &AutomationNode)> {
        let mut nodes = Vec::with_capacity(2);
        if let Some(node) = self.community.slot(slot) {
            nodes.push((RuleScope::Community(community), node));
        }
        if let Some(channel) = channel {
            if let Some(node) = self.channels.get(&channel).and_then(|config| config.slot(slot)) {
                nodes.push((RuleScope::Channel(channel), node));
            }
        }
        nodes
    }

    /// Owned copies of the selected rule trees, labelled with their scope
    pub fn selected(
        &self,
        community: CommunityId,
        slot: EventSlot,
        channel: Option<ChannelId>,
    ) -> Vec<(RuleScope, AutomationNode)> {
        self.nodes_for(community, slot, channel)
            .into_iter()
            .map(|(scope, node)| (scope, node.clone()))
            .collect()
    }
}

type CompiledPatterns = HashMap<(String, bool), Result<Regex, String>>;

/// Owns the automation config cache. Configs are loaded on first reference to a
/// community, updated by explicit saves and dropped when the bot leaves.
///
/// Compiled content filters are cached per community and discarded with the
/// config they came from.
pub struct AutomationConfigStore {
    communities: Collection<CommunityRecord>,
    channels: Collection<ChannelRecord>,
    cache: RwLock<HashMap<CommunityId, Arc<CommunityAutomation>>>,
    patterns: RwLock<HashMap<CommunityId, CompiledPatterns>>,
    /// Bumped under the cache write lock by every save; a fill that loaded
    /// before a save must not be cached
    generation: AtomicU64,
}

impl AutomationConfigStore {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            communities: Collection::new(Arc::clone(&store), "automation_community"),
            channels: Collection::new(store, "automation_channel"),
            cache: RwLock::new(HashMap::new()),
            patterns: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    fn channel_record_id(community: CommunityId, channel: ChannelId) -> String {
        format!("{}-{}", community, channel)
    }

    /// Configs for a community, filling the cache from the store on first use
    pub async fn get(&self, community: CommunityId) -> Result<Arc<CommunityAutomation>, StoreError> {
        loop {
            if let Some(cached) = self.cache.read().await.get(&community) {
                return Ok(Arc::clone(cached));
            }

            let generation = self.generation.load(Ordering::SeqCst);
            let loaded = self.load(community).await?;

            let mut cache = self.cache.write().await;
            // Another task may have filled it while we were loading
            if let Some(cached) = cache.get(&community) {
                return Ok(Arc::clone(cached));
            }
            if self.generation.load(Ordering::SeqCst) == generation {
                let entry = Arc::new(loaded);
                cache.insert(community, Arc::clone(&entry));
                return Ok(entry);
            }
            debug!("Automation for community {} changed while loading, reloading", community);
        }
    }

    async fn load(&self, community: CommunityId) -> Result<CommunityAutomation, StoreError> {
        let config = self
            .communities
            .get(&community.to_string())
            .await?
            .map(|record| record.config)
            .unwrap_or_default();

        let channels = self
            .channels
            .query(|record| record.community == community)
            .await?
            .into_iter()
            .map(|record| (record.channel, record.config))
            .collect::<HashMap<_, _>>();

        for issue in config.validate() {
            warn!("Automation rule {} in community {} will never match: {}", issue.path, community, issue.message);
        }
        debug!("Loaded automation for community {} ({} channel overrides)", community, channels.len());

        Ok(CommunityAutomation { community: config, channels })
    }

    async fn update_cached<F>(&self, community: CommunityId, update: F)
    where
        F: FnOnce(&mut CommunityAutomation),
    {
        let mut cache = self.cache.write().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(cached) = cache.get_mut(&community) {
            update(Arc::make_mut(cached));
        }
        drop(cache);
        self.patterns.write().await.remove(&community);
    }

    /// Compiled form of a content filter; `None` when the pattern never matches
    pub async fn pattern(&self, community: CommunityId, filter: ContentFilter<'_>) -> Option<Regex> {
        let key = (filter.pattern.to_string(), filter.ignore_case);
        if let Some(cached) = self.patterns.read().await.get(&community).and_then(|p| p.get(&key)) {
            return cached.as_ref().ok().cloned();
        }

        let compiled = filter.compile().map_err(|e| {
            warn!("Automation pattern in community {} will never match: {}", community, e);
            e.to_string()
        });
        let regex = compiled.as_ref().ok().cloned();
        if self.cache.read().await.contains_key(&community) {
            self.patterns.write().await.entry(community).or_default().insert(key, compiled);
        }
        regex
    }

    pub async fn save_community(&self, community: CommunityId, config: AutomationConfig) -> Result<(), StoreError> {
        let record = CommunityRecord { community, config: config.clone() };
        self.communities.put(&community.to_string(), &record).await?;
        self.update_cached(community, |cached| cached.community = config).await;
        info!("Saved automation config for community {}", community);
        Ok(())
    }

    pub async fn save_channel(
        &self,
        community: CommunityId,
        channel: ChannelId,
        config: AutomationConfig,
    ) -> Result<(), StoreError> {
        let record = ChannelRecord { community, channel, config: config.clone() };
        self.channels
            .put(&Self::channel_record_id(community, channel), &record)
            .await?;
        self.update_cached(community, |cached| {
            cached.channels.insert(channel, config);
        })
        .await;
        info!("Saved automation override for channel {} in community {}", channel, community);
        Ok(())
    }

    /// Parse a rule document and save it for the community or one of its channels
    pub async fn save_document(
        &self,
        community: CommunityId,
        channel: Option<ChannelId>,
        document: &str,
    ) -> Result<Vec<super::config::ConfigIssue>, ConfigError> {
        let config = AutomationConfig::from_yaml(document)?;
        let issues = config.validate();
        let saved = match channel {
            Some(channel) => self.save_channel(community, channel, config).await,
            None => self.save_community(community, config).await,
        };
        saved.map_err(|e| ConfigError::Invalid(format!("failed to save automation config: {}", e)))?;
        Ok(issues)
    }

    /// Remove a channel override; the community rules keep applying
    pub async fn clear_channel(&self, community: CommunityId, channel: ChannelId) -> Result<bool, StoreError> {
        let removed = self
            .channels
            .delete(&Self::channel_record_id(community, channel))
            .await?;
        self.update_cached(community, |cached| {
            cached.channels.remove(&channel);
        })
        .await;
        Ok(removed)
    }

    /// Drop a community from the cache (bot left). Persisted configs are kept.
    pub async fn evict(&self, community: CommunityId) -> bool {
        let evicted = self.cache.write().await.remove(&community).is_some();
        self.patterns.write().await.remove(&community);
        if evicted {
            info!("Evicted automation cache for community {}", community);
        }
        evicted
    }

    pub async fn cached_communities(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Number of compiled filters held for a community
    pub async fn cached_patterns(&self, community: CommunityId) -> usize {
        self.patterns.read().await.get(&community).map(HashMap::len).unwrap_or(0)
    }
}
