//! Thread-safe map of live client sessions.
//!
//! The registry is the only cross-connection shared mutable state in the
//! system. Every mutation and every snapshot happens under one mutex; the
//! lock is never held across a socket await.

use crate::connection::Connection;
use crate::error::SessionError;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use trading_protocol::Message;

/// One registered session.
#[derive(Clone)]
pub struct SessionEntry {
    connection: Arc<Connection>,
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    messages_received: u64,
    messages_sent: u64,
}

impl SessionEntry {
    fn new(connection: Arc<Connection>) -> Self {
        let now = Utc::now();
        Self {
            connection,
            connected_at: now,
            last_heartbeat: now,
            messages_received: 0,
            messages_sent: 0,
        }
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn last_heartbeat(&self) -> DateTime<Utc> {
        self.last_heartbeat
    }

    pub fn messages_received(&self) -> u64 {
        self.messages_received
    }

    pub fn messages_sent(&self) -> u64 {
        self.messages_sent
    }
}

/// Registry of active sessions keyed by client id, bounded by capacity.
pub struct SessionRegistry {
    sessions: Mutex<HashMap<String, SessionEntry>>,
    capacity: usize,
}

impl SessionRegistry {
    pub fn new(capacity: usize) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
        self.sessions.lock().unwrap()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.sessions().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions().is_empty()
    }

    pub fn contains(&self, client_id: &str) -> bool {
        self.sessions().contains_key(client_id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions().keys().cloned().collect()
    }

    /// Adds a session. Fails on a duplicate id or when at capacity; either
    /// way the map is left untouched.
    pub fn register(
        &self,
        client_id: &str,
        connection: Arc<Connection>,
    ) -> Result<(), SessionError> {
        let mut sessions = self.sessions();
        if sessions.contains_key(client_id) {
            return Err(SessionError::DuplicateId(client_id.to_string()));
        }
        if sessions.len() >= self.capacity {
            return Err(SessionError::RegistryFull {
                capacity: self.capacity,
            });
        }
        sessions.insert(client_id.to_string(), SessionEntry::new(connection));
        Ok(())
    }

    /// Removes a session, returning its connection. Removing an absent id is
    /// a no-op.
    pub fn unregister(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.sessions()
            .remove(client_id)
            .map(|entry| entry.connection)
    }

    pub fn lookup(&self, client_id: &str) -> Option<Arc<Connection>> {
        self.sessions()
            .get(client_id)
            .map(|entry| entry.connection.clone())
    }

    pub fn entry(&self, client_id: &str) -> Option<SessionEntry> {
        self.sessions().get(client_id).cloned()
    }

    pub fn touch_heartbeat(&self, client_id: &str) {
        if let Some(entry) = self.sessions().get_mut(client_id) {
            entry.last_heartbeat = Utc::now();
        }
    }

    pub fn record_received(&self, client_id: &str) {
        if let Some(entry) = self.sessions().get_mut(client_id) {
            entry.messages_received += 1;
        }
    }

    pub fn record_sent(&self, client_id: &str) {
        if let Some(entry) = self.sessions().get_mut(client_id) {
            entry.messages_sent += 1;
        }
    }

    /// Removes and returns every session, for shutdown.
    pub fn drain(&self) -> Vec<(String, Arc<Connection>)> {
        self.sessions()
            .drain()
            .map(|(id, entry)| (id, entry.connection))
            .collect()
    }

    /// Sends `message` to every session except `exclude`, returning how many
    /// sends succeeded.
    ///
    /// The entry list is snapshotted under the lock, then the sends happen
    /// with the lock released so one slow client cannot stall the registry.
    /// A failed send is logged and skipped; delivery to the rest continues.
    pub async fn broadcast(&self, message: &Message, exclude: Option<&str>) -> usize {
        let targets: Vec<(String, Arc<Connection>)> = {
            self.sessions()
                .iter()
                .filter(|(id, _)| exclude != Some(id.as_str()))
                .map(|(id, entry)| (id.clone(), entry.connection.clone()))
                .collect()
        };

        let mut delivered = 0;
        for (client_id, connection) in targets {
            match connection.send(message).await {
                Ok(_) => {
                    self.record_sent(&client_id);
                    delivered += 1;
                }
                Err(error) => {
                    log::warn!("broadcast to {client_id} failed: {error}");
                }
            }
        }
        delivered
    }
}
