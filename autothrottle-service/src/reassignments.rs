use crate::limits::ReplicaRole;
use crate::utils::join_path;

use anyhow::{anyhow, Result};
use autothrottle_metadata_store::{MetadataStorage, MetadataStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Broker sets participating in one topic's reassignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicReassignment {
    pub sources: Vec<u64>,
    pub destinations: Vec<u64>,
}

/// The set of topics under active reassignment for the current tick.
/// Derived fresh every tick, never cached.
#[derive(Debug, Default)]
pub struct ReassignmentState {
    pub topics: BTreeMap<String, TopicReassignment>,
}

impl ReassignmentState {
    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.keys().cloned().collect()
    }

    /// Classify every participating broker by the roles it holds across
    /// all active reassignments. A broker sourcing one partition while
    /// receiving another carries both roles.
    pub fn broker_roles(&self) -> BTreeMap<u64, BTreeSet<ReplicaRole>> {
        let mut roles: BTreeMap<u64, BTreeSet<ReplicaRole>> = BTreeMap::new();
        for reassignment in self.topics.values() {
            for &id in &reassignment.sources {
                roles.entry(id).or_default().insert(ReplicaRole::Source);
            }
            for &id in &reassignment.destinations {
                roles.entry(id).or_default().insert(ReplicaRole::Destination);
            }
        }
        roles
    }

    /// Topics in which the given broker participates with the given role.
    pub fn topics_for(&self, broker_id: u64, role: ReplicaRole) -> Vec<String> {
        self.topics
            .iter()
            .filter(|(_, r)| match role {
                ReplicaRole::Source => r.sources.contains(&broker_id),
                ReplicaRole::Destination => r.destinations.contains(&broker_id),
            })
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Reads active reassignments from the coordination store, one record per
/// topic under `<prefix>/reassignments/<topic>`.
#[derive(Debug, Clone)]
pub struct ReassignmentDiscovery {
    store: MetadataStorage,
    base_path: String,
}

impl ReassignmentDiscovery {
    pub fn new(store: MetadataStorage, prefix: &str) -> Self {
        ReassignmentDiscovery {
            store,
            base_path: join_path(&[prefix, "reassignments"]),
        }
    }

    pub async fn fetch(&self) -> Result<ReassignmentState> {
        let mut state = ReassignmentState::default();

        let children = self.store.get_childrens(&self.base_path).await?;
        for path in children {
            let topic = path
                .rsplit('/')
                .next()
                .ok_or_else(|| anyhow!("malformed reassignment path: {}", path))?
                .to_string();

            let value = match self.store.get(&path).await? {
                Some(v) => v,
                // Raced with a completing reassignment; skip.
                None => continue,
            };

            let reassignment: TopicReassignment = serde_json::from_value(value)
                .map_err(|e| anyhow!("invalid reassignment record for {}: {}", topic, e))?;

            state.topics.insert(topic, reassignment);
        }

        Ok(state)
    }
}
