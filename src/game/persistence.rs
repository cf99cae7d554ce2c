//! Character persistence module
//!
//! The server loads and saves characters through the [`CharacterRepository`]
//! interface. Storage schema is owned by the repository implementation; the
//! network core only needs:
//! - Lookup of an account's character at login
//! - Name availability checks during character creation
//! - Creation of new characters (the repository assigns the identity)
//! - Saving a character on logout
//!
//! [`InMemoryRepository`] keeps everything in concurrent maps and is used by
//! the binary when no external store is configured, and by tests.

use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, ServerError};

/// First identity handed out to player characters
pub const FIRST_CHARACTER_IDENTITY: u32 = 1_000_000;

/// Stored character data
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterRecord {
    /// Character identity (assigned on create)
    pub identity: u32,
    /// Owning account
    pub account_id: u32,
    pub name: String,
    pub mesh: u16,
    pub profession: u16,
    pub level: u8,
    pub silver: u32,
    /// Map the character is saved on
    pub map_id: u32,
    pub x: u16,
    pub y: u16,
    pub registered: DateTime<Utc>,
}

impl CharacterRecord {
    /// New level 1 character at the starting position
    pub fn new(account_id: u32, name: impl Into<String>, mesh: u16, profession: u16) -> Self {
        Self {
            identity: 0,
            account_id,
            name: name.into(),
            mesh,
            profession,
            level: 1,
            silver: 1000,
            map_id: 1010,
            x: 61,
            y: 109,
            registered: Utc::now(),
        }
    }
}

/// Character storage used by the game server
#[async_trait]
pub trait CharacterRepository: Send + Sync {
    /// Character owned by an account, if any
    async fn find_by_account(&self, account_id: u32) -> Result<Option<CharacterRecord>>;

    /// Whether a character name is taken (case-insensitive)
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Store a new character and return it with its assigned identity
    async fn create(&self, record: CharacterRecord) -> Result<CharacterRecord>;

    /// Save an existing character
    async fn save(&self, record: &CharacterRecord) -> Result<()>;
}

/// Repository backed by in-process concurrent maps
#[derive(Debug)]
pub struct InMemoryRepository {
    characters: DashMap<u32, CharacterRecord>,
    names: DashMap<String, u32>,
    next_identity: AtomicU32,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            characters: DashMap::new(),
            names: DashMap::new(),
            next_identity: AtomicU32::new(FIRST_CHARACTER_IDENTITY),
        }
    }

    /// Number of stored characters
    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    /// Stored copy of a character
    pub fn get(&self, identity: u32) -> Option<CharacterRecord> {
        self.characters.get(&identity).map(|r| r.clone())
    }
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CharacterRepository for InMemoryRepository {
    async fn find_by_account(&self, account_id: u32) -> Result<Option<CharacterRecord>> {
        Ok(self
            .characters
            .iter()
            .find(|entry| entry.account_id == account_id)
            .map(|entry| entry.value().clone()))
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.names.contains_key(&name.to_lowercase()))
    }

    async fn create(&self, mut record: CharacterRecord) -> Result<CharacterRecord> {
        match self.names.entry(record.name.to_lowercase()) {
            Entry::Occupied(_) => Err(ServerError::Handler(format!(
                "character name {} is taken",
                record.name
            ))),
            Entry::Vacant(slot) => {
                record.identity = self.next_identity.fetch_add(1, Ordering::Relaxed);
                slot.insert(record.identity);
                self.characters.insert(record.identity, record.clone());
                debug!(identity = record.identity, name = %record.name, "Character created");
                Ok(record)
            }
        }
    }

    async fn save(&self, record: &CharacterRecord) -> Result<()> {
        if !self.characters.contains_key(&record.identity) {
            return Err(ServerError::Handler(format!(
                "character {} does not exist",
                record.identity
            )));
        }
        self.characters.insert(record.identity, record.clone());
        Ok(())
    }
}
