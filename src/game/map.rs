//! Maps and their world partitions
//!
//! Every map is bound to one world processor partition when it is
//! registered, so all work for characters on the same map runs in order.

use std::sync::Arc;

use dashmap::{DashMap, DashSet};
use tracing::{debug, info};

use super::processor::PartitionedProcessor;

/// A loaded map
#[derive(Debug)]
pub struct GameMap {
    /// Map identity
    pub id: u32,
    /// Client map document shown on entry
    pub doc: u32,
    /// World processor partition owning this map
    pub partition: u32,
    players: DashSet<u32>,
}

impl GameMap {
    pub fn new(id: u32, doc: u32, partition: u32) -> Self {
        Self {
            id,
            doc,
            partition,
            players: DashSet::new(),
        }
    }

    /// Add a character to the map
    pub fn enter(&self, identity: u32) {
        if self.players.insert(identity) {
            debug!(map_id = self.id, identity, "Character entered map");
        }
    }

    /// Remove a character from the map
    pub fn leave(&self, identity: u32) -> bool {
        let removed = self.players.remove(&identity).is_some();
        if removed {
            debug!(map_id = self.id, identity, "Character left map");
        }
        removed
    }

    pub fn contains(&self, identity: u32) -> bool {
        self.players.contains(&identity)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Identities of every character on the map
    pub fn players(&self) -> Vec<u32> {
        self.players.iter().map(|id| *id).collect()
    }
}

/// Registry of loaded maps
#[derive(Debug, Default)]
pub struct MapManager {
    maps: DashMap<u32, Arc<GameMap>>,
}

impl MapManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a map on the lightest world partition
    pub fn register(&self, id: u32, doc: u32, world: &PartitionedProcessor) -> Arc<GameMap> {
        if let Some(existing) = self.maps.get(&id) {
            return existing.clone();
        }
        let map = Arc::new(GameMap::new(id, doc, world.select_partition()));
        info!(map_id = id, doc, partition = map.partition, "Map loaded");
        self.maps.insert(id, map.clone());
        map
    }

    pub fn get(&self, id: u32) -> Option<Arc<GameMap>> {
        self.maps.get(&id).map(|m| m.clone())
    }

    /// World partition for a map, falling back to partition 0
    pub fn partition_of(&self, id: Option<u32>) -> u32 {
        id.and_then(|id| self.get(id)).map(|m| m.partition).unwrap_or(0)
    }

    pub fn count(&self) -> usize {
        self.maps.len()
    }
}
