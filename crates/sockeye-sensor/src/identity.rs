//! Stable logical identities for raw socket keys.
//!
//! Kernel socket handles are ephemeral and (address, port) tuples get
//! reused, so neither can track a connection across refresh cycles. The
//! resolver assigns each continuously-observed key a [`ConnectionId`] from
//! a strictly increasing counter; once a key's identity is retired it is
//! never handed out again.
//!
//! Known accuracy limit: if the OS reuses the exact 5-tuple for a new
//! connection within a single poll interval, the resolver cannot tell it
//! apart from the old connection continuing. This is inherent to sampling.

use std::collections::HashMap;

use sockeye_core::{ConnectionId, ConnectionKey};

/// Owns the key-to-identity mapping and the identity counter.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    next: u64,
    map: HashMap<ConnectionKey, ConnectionId>,
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Carry forward the key's identity, or mint a fresh one.
    ///
    /// Returns the identity and whether it was newly minted this call.
    pub fn resolve(&mut self, key: &ConnectionKey) -> (ConnectionId, bool) {
        if let Some(id) = self.map.get(key) {
            return (*id, false);
        }
        self.next += 1;
        let id = ConnectionId(self.next);
        self.map.insert(*key, id);
        (id, true)
    }

    /// Drop a key from the mapping. Its identity is retired, not recycled:
    /// if the same key shows up again it gets a new identity.
    pub fn retire(&mut self, key: &ConnectionKey) {
        self.map.remove(key);
    }

    /// Identity currently bound to the key, if any.
    pub fn get(&self, key: &ConnectionKey) -> Option<ConnectionId> {
        self.map.get(key).copied()
    }

    /// Number of keys currently mapped.
    pub fn tracked(&self) -> usize {
        self.map.len()
    }
}
