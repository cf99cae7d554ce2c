//! Registry of logged-in characters keyed by identity.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{info, warn};

use super::entity::Character;
use crate::net::ConnectionId;

/// Online characters
#[derive(Debug, Default)]
pub struct RoleManager {
    users: DashMap<u32, Arc<Character>>,
}

impl RoleManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a character; returns the already registered one on conflict
    pub fn login(&self, character: Arc<Character>) -> Result<(), Arc<Character>> {
        match self.users.entry(character.identity()) {
            Entry::Occupied(existing) => Err(existing.get().clone()),
            Entry::Vacant(slot) => {
                slot.insert(character);
                Ok(())
            }
        }
    }

    pub fn get_user(&self, identity: u32) -> Option<Arc<Character>> {
        self.users.get(&identity).map(|c| c.clone())
    }

    /// Find an online character by name (case-insensitive)
    pub fn find_by_name(&self, name: &str) -> Option<Arc<Character>> {
        self.users
            .iter()
            .find(|entry| entry.name().eq_ignore_ascii_case(name))
            .map(|entry| entry.value().clone())
    }

    /// Remove a character and close its connection
    ///
    /// Only the caller that actually removes the entry closes the connection,
    /// so a character is kicked at most once.
    pub fn kick_out(&self, identity: u32, reason: &str) -> bool {
        match self.users.remove(&identity) {
            Some((_, character)) => {
                warn!(identity, name = %character.name(), reason, "Character kicked");
                character.disconnect();
                true
            }
            None => false,
        }
    }

    /// Remove a character if it is still registered for this connection
    pub fn force_logout(&self, identity: u32, connection_id: ConnectionId) -> Option<Arc<Character>> {
        let removed = self
            .users
            .remove_if(&identity, |_, c| c.connection_id() == connection_id)
            .map(|(_, c)| c);
        if let Some(character) = &removed {
            info!(identity, name = %character.name(), "Character logged out");
        }
        removed
    }

    /// Number of online characters
    pub fn count(&self) -> usize {
        self.users.len()
    }

    /// Snapshot of every online character
    pub fn online(&self) -> Vec<Arc<Character>> {
        self.users.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::persistence::CharacterRecord;
    use crate::net::{Connection, PendingConnection};
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn character(connection_id: ConnectionId, identity: u32) -> (Arc<Connection>, Arc<Character>) {
        let (tx, _rx) = mpsc::channel(1);
        let connection = Arc::new(
            PendingConnection {
                id: connection_id,
                address: "127.0.0.1:5816".parse().unwrap(),
                outbound: tx,
                close: CancellationToken::new(),
            }
            .into_connection(0),
        );
        let mut record = CharacterRecord::new(1, format!("Hero{identity}"), 1003, 10);
        record.identity = identity;
        let character = Arc::new(Character::from_record(record, &connection));
        (connection, character)
    }

    #[test]
    fn test_login_rejects_duplicate_identity() {
        let roles = RoleManager::new();
        let (_c1, first) = character(1, 1_000_000);
        let (_c2, second) = character(2, 1_000_000);

        assert!(roles.login(first).is_ok());
        let existing = roles.login(second).unwrap_err();
        assert_eq!(existing.connection_id(), 1);
        assert_eq!(roles.count(), 1);
    }

    #[test]
    fn test_kick_out_closes_once() {
        let roles = RoleManager::new();
        let (conn, hero) = character(1, 1_000_000);
        roles.login(hero).unwrap();

        assert!(roles.kick_out(1_000_000, "test"));
        assert!(!roles.kick_out(1_000_000, "test"));
        assert!(conn.is_disconnected());
        assert!(roles.get_user(1_000_000).is_none());
    }

    #[test]
    fn test_force_logout_checks_connection() {
        let roles = RoleManager::new();
        let (_conn, hero) = character(1, 1_000_000);
        roles.login(hero).unwrap();

        assert!(roles.force_logout(1_000_000, 2).is_none());
        assert!(roles.force_logout(1_000_000, 1).is_some());
        assert_eq!(roles.count(), 0);
    }

    #[test]
    fn test_find_by_name() {
        let roles = RoleManager::new();
        let (_conn, hero) = character(1, 1_000_007);
        roles.login(hero).unwrap();
        assert!(roles.find_by_name("hero1000007").is_some());
        assert!(roles.find_by_name("nobody").is_none());
    }
}
