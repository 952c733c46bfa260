//! Identity → connection registry.
//!
//! Each `source` maps to at most one entry. An entry holds the connection
//! the identity last spoke on and a liveness flag that the heartbeat
//! monitor clears on every tick and a Pong sets again.
//!
//! The lock is a short `parking_lot` lock and is never held across an
//! `.await`; sends go through each connection's non-blocking channel.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tether_core::{Envelope, GatewayError};
use tracing::{debug, warn};

use super::connection::ClientConnection;

/// Outcome of [`ConnectionRegistry::register`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Registration {
    /// First envelope from this identity.
    Registered,
    /// The identity moved to a new connection.
    Rebound,
    /// Same identity, same connection.
    Unchanged,
}

struct RegistryEntry {
    connection: Arc<ClientConnection>,
    alive: bool,
}

/// Result of one heartbeat sweep.
#[derive(Debug, Default)]
pub struct Sweep {
    /// Identities removed because they missed the previous ping.
    pub evicted: Vec<(String, Arc<ClientConnection>)>,
    /// Open connections to ping, one per connection.
    pub ping: Vec<Arc<ClientConnection>>,
}

/// Registry of identities and their current connection.
#[derive(Default)]
pub struct ConnectionRegistry {
    entries: RwLock<HashMap<String, RegistryEntry>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `source` to `connection`.
    ///
    /// Rebinding replaces the handle in place and resets the liveness flag.
    pub fn register(&self, source: &str, connection: &Arc<ClientConnection>) -> Registration {
        let mut entries = self.entries.write();
        match entries.get_mut(source) {
            Some(entry) if entry.connection.id == connection.id => Registration::Unchanged,
            Some(entry) => {
                entry.connection = Arc::clone(connection);
                entry.alive = true;
                Registration::Rebound
            }
            None => {
                let _ = entries.insert(
                    source.to_owned(),
                    RegistryEntry {
                        connection: Arc::clone(connection),
                        alive: true,
                    },
                );
                Registration::Registered
            }
        }
    }

    /// Current open connection for `source`.
    pub fn resolve(&self, source: &str) -> Result<Arc<ClientConnection>, GatewayError> {
        self.entries
            .read()
            .get(source)
            .filter(|entry| entry.connection.is_open())
            .map(|entry| Arc::clone(&entry.connection))
            .ok_or_else(|| GatewayError::UnknownTarget(source.to_owned()))
    }

    /// Deliver `envelope` to `target`. Absent or closed targets are a no-op.
    pub fn send_to(&self, target: &str, envelope: &Envelope) -> bool {
        let connection = match self.resolve(target) {
            Ok(connection) => connection,
            Err(err) => {
                debug!(target, kind = %envelope.kind, error_kind = err.error_kind(), "send skipped");
                return false;
            }
        };
        let Some(text) = encode(envelope) else {
            return false;
        };
        connection.send(text)
    }

    /// Deliver `envelope` to every open connection except the one bound to
    /// `exclude`. Each connection receives it at most once.
    ///
    /// Returns the number of connections the envelope was queued on.
    pub fn broadcast(&self, envelope: &Envelope, exclude: Option<&str>) -> usize {
        let Some(text) = encode(envelope) else {
            return 0;
        };
        let targets: Vec<Arc<ClientConnection>> = {
            let entries = self.entries.read();
            let mut seen = HashSet::new();
            entries
                .iter()
                .filter(|(source, _)| Some(source.as_str()) != exclude)
                .filter(|(_, entry)| entry.connection.is_open())
                .filter(|(_, entry)| seen.insert(entry.connection.id.clone()))
                .map(|(_, entry)| Arc::clone(&entry.connection))
                .collect()
        };
        let delivered = targets
            .iter()
            .filter(|connection| connection.send(Arc::clone(&text)))
            .count();
        debug!(kind = %envelope.kind, recipients = delivered, "broadcast envelope");
        delivered
    }

    /// Set the liveness flag on every entry bound to `connection_id`.
    pub fn mark_alive(&self, connection_id: &str) {
        for entry in self.entries.write().values_mut() {
            if entry.connection.id == connection_id {
                entry.alive = true;
            }
        }
    }

    /// One heartbeat tick.
    ///
    /// Entries whose flag is still clear from the previous tick are removed.
    /// Every surviving entry has its flag cleared; open connections are
    /// returned for probing.
    pub fn sweep(&self) -> Sweep {
        let mut sweep = Sweep::default();
        let mut pinged = HashSet::new();
        self.entries.write().retain(|source, entry| {
            if !entry.alive {
                sweep
                    .evicted
                    .push((source.clone(), Arc::clone(&entry.connection)));
                return false;
            }
            entry.alive = false;
            if entry.connection.is_open() && pinged.insert(entry.connection.id.clone()) {
                sweep.ping.push(Arc::clone(&entry.connection));
            }
            true
        });
        sweep
    }

    /// Liveness flag for `source`, if registered.
    pub fn is_alive(&self, source: &str) -> Option<bool> {
        self.entries.read().get(source).map(|entry| entry.alive)
    }

    /// Whether `source` has an entry (open or not).
    pub fn contains(&self, source: &str) -> bool {
        self.entries.read().contains_key(source)
    }

    /// Remove `source`. Returns `true` if it was registered.
    pub fn remove(&self, source: &str) -> bool {
        self.entries.write().remove(source).is_some()
    }

    /// Registered identities, sorted.
    pub fn sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.entries.read().keys().cloned().collect();
        sources.sort_unstable();
        sources
    }

    /// Number of registered identities.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no identity is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("sources", &self.sources())
            .finish()
    }
}

fn encode(envelope: &Envelope) -> Option<Arc<str>> {
    match envelope.encode() {
        Ok(text) => Some(text.into()),
        Err(e) => {
            let err = GatewayError::from(e);
            warn!(kind = %envelope.kind, error_kind = err.error_kind(), error = %err, "failed to encode envelope");
            None
        }
    }
}
