//! # Topology Service
//!
//! Computes each node's level from its parent chain. A root is level 0; a
//! chain that revisits a node is corrupt and flagged with level -1. Results
//! are cacheable because topology changes are comparatively rare.

use cortex_common::cache::{cache_key, TtlCache};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use crate::error::MonitorError;
use crate::store::{AgentRecord, Store};

const TOPOLOGY_CACHE_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub status: String,
    pub health_status: String,
    /// -1 marks a corrupt parent chain
    pub level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopologyView {
    pub nodes: Vec<TopologyNode>,
    /// "L0", "L1", ... plus "unknown" for corrupt chains
    pub levels: BTreeMap<String, Vec<String>>,
}

pub struct TopologyService {
    store: Store,
    cache: Arc<TtlCache>,
}

impl TopologyService {
    pub fn new(store: Store, cache: Arc<TtlCache>) -> Self {
        Self { store, cache }
    }

    /// Current topology, from cache when fresh.
    pub async fn snapshot(&self) -> Result<TopologyView, MonitorError> {
        let key = cache_key("cluster:topology", &serde_json::json!({}));

        if let Some(cached) = self.cache.get(&key).await {
            if let Ok(view) = serde_json::from_value(cached) {
                debug!("topology served from cache");
                return Ok(view);
            }
        }

        let agents = self.store.all_agents().await?;
        let view = compute_topology(&agents);

        self.cache
            .set(key, serde_json::to_value(&view)?, Some(TOPOLOGY_CACHE_TTL))
            .await;
        Ok(view)
    }

    /// Drop the cached snapshot; called by registration and deletion.
    pub async fn invalidate(&self) {
        self.cache.clear_pattern("cluster:topology").await;
    }
}

/// Walk every node's parent chain with a visited set; cycles and dangling
/// parents yield level -1.
pub fn compute_topology(agents: &[AgentRecord]) -> TopologyView {
    let by_id: HashMap<&str, &AgentRecord> = agents
        .iter()
        .map(|agent| (agent.id.as_str(), agent))
        .collect();

    let mut nodes = Vec::with_capacity(agents.len());
    let mut levels: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for agent in agents {
        let level = walk_level(agent, &by_id);
        if level < 0 {
            error!("corrupt parent chain detected at agent {}", agent.id);
        }

        let bucket = if level < 0 {
            "unknown".to_string()
        } else {
            format!("L{level}")
        };
        levels.entry(bucket).or_default().push(agent.id.clone());

        nodes.push(TopologyNode {
            id: agent.id.clone(),
            name: agent.name.clone(),
            parent_id: agent.parent_id.clone(),
            status: agent.status.as_str().to_string(),
            health_status: agent.health_status.as_str().to_string(),
            level,
        });
    }

    for ids in levels.values_mut() {
        ids.sort();
    }

    TopologyView { nodes, levels }
}

fn walk_level(agent: &AgentRecord, by_id: &HashMap<&str, &AgentRecord>) -> i32 {
    let mut visited = HashSet::new();
    visited.insert(agent.id.as_str());

    let mut level = 0;
    let mut current = agent;

    while let Some(parent_id) = current.parent_id.as_deref() {
        if !visited.insert(parent_id) {
            return -1;
        }
        let Some(parent) = by_id.get(parent_id) else {
            // Dangling reference: the chain cannot terminate at a root
            return -1;
        };
        level += 1;
        current = parent;
    }

    level
}
