//! Application state module
//!
//! Contains the shared state used across all server connections. Every
//! registry lives here as an explicit value handed to handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::{DashMap, DashSet};
use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::crypto::{Randomness, RandomnessService};
use crate::error::Result;
use crate::game::{CharacterRepository, InMemoryRepository, MapManager, PacketRegistry, PartitionedProcessor, RoleManager};
use crate::logging::{AsyncLogSink, LogSink};

/// Login ticket issued by the account server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginTicket {
    pub account_id: u32,
    pub code: u32,
    pub issued_at: Instant,
}

/// Application state shared across all connections
pub struct ServerState {
    /// Server configuration
    pub config: ServerConfig,
    /// Partitions bound to connections
    pub packet_processor: PartitionedProcessor,
    /// Partitions bound to maps
    pub world_processor: PartitionedProcessor,
    /// Tag to handler table
    pub registry: PacketRegistry,
    /// Online characters
    pub roles: RoleManager,
    /// Loaded maps
    pub maps: MapManager,
    /// Character storage
    pub repository: Arc<dyn CharacterRepository>,
    /// Random number source
    pub randomness: Arc<dyn Randomness>,
    /// Fire-and-forget log writer
    pub log_sink: Arc<dyn LogSink>,
    async_log: Arc<AsyncLogSink>,
    /// Login tickets by token
    pub logins: DashMap<u32, LoginTicket>,
    /// Tokens of pending character creations
    pub registrations: DashSet<u32>,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl ServerState {
    /// Create the state with in-memory storage and OS randomness
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_services(
            config,
            shutdown_tx,
            Arc::new(InMemoryRepository::new()),
            Arc::new(RandomnessService::new()),
        )
    }

    /// Create the state around the given services
    pub fn with_services(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        repository: Arc<dyn CharacterRepository>,
        randomness: Arc<dyn Randomness>,
    ) -> Self {
        let packet_processor = PartitionedProcessor::new("packet", config.packet_partitions);
        let world_processor = PartitionedProcessor::new("world", config.world_partitions);

        let maps = MapManager::new();
        for map in &config.maps {
            maps.register(map.id, map.doc, &world_processor);
        }

        let async_log = Arc::new(AsyncLogSink::new(config.log_queue_capacity));

        Self {
            packet_processor,
            world_processor,
            registry: PacketRegistry::with_defaults(),
            roles: RoleManager::new(),
            maps,
            repository,
            randomness,
            log_sink: async_log.clone(),
            async_log,
            logins: DashMap::new(),
            registrations: DashSet::new(),
            shutdown_tx,
            config,
        }
    }

    /// Start processor workers and the log consumer
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) {
        self.packet_processor.start();
        self.world_processor.start();
        self.async_log.start();
        info!(
            packet_partitions = self.packet_processor.len(),
            world_partitions = self.world_processor.len(),
            maps = self.maps.count(),
            "Server state started"
        );
    }

    /// Drain and stop processors and the log consumer
    pub async fn shutdown(&self) {
        self.packet_processor.shutdown().await;
        self.world_processor.shutdown().await;
        self.async_log.close().await;
    }

    /// Issue a login ticket for an account, returning `(token, code)`
    ///
    /// Called by the account server handoff once a player has authenticated.
    /// Expired tickets that were never redeemed are dropped here.
    pub async fn issue_login_ticket(&self, account_id: u32) -> Result<(u32, u32)> {
        let ttl = self.ticket_ttl();
        self.logins.retain(|_, ticket| ticket.issued_at.elapsed() <= ttl);

        let code = self.randomness.next_int(1, i32::MAX).await? as u32;
        loop {
            let token = self.randomness.next_int(1, i32::MAX).await? as u32;
            if let dashmap::mapref::entry::Entry::Vacant(slot) = self.logins.entry(token) {
                slot.insert(LoginTicket {
                    account_id,
                    code,
                    issued_at: Instant::now(),
                });
                return Ok((token, code));
            }
        }
    }

    /// Consume a login ticket if the code matches and it has not expired
    pub fn redeem_login_ticket(&self, token: u32, code: u32) -> Option<LoginTicket> {
        let (_, ticket) = self.logins.remove(&token)?;
        (ticket.code == code && ticket.issued_at.elapsed() <= self.ticket_ttl()).then_some(ticket)
    }

    fn ticket_ttl(&self) -> Duration {
        Duration::from_secs(self.config.login_ticket_ttl_secs)
    }
}
