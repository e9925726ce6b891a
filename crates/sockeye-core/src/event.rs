//! Lifecycle events and the published table snapshot.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::connection::{ConnState, ConnectionId, ConnectionRecord};

/// A change in the tracked connection set, emitted once per cycle per
/// affected connection.
///
/// Within one cycle events are ordered deterministically: all `Appeared`,
/// then all `Updated`, then all `Vanished`, each group in ascending
/// identity order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LifecycleEvent {
    /// A key was observed for the first time.
    Appeared(ConnectionRecord),
    /// State, owning PID, or process attribution changed.
    Updated {
        id: ConnectionId,
        old: Box<ConnectionRecord>,
        new: Box<ConnectionRecord>,
    },
    /// The key stayed absent past the grace period and the record was evicted.
    Vanished { id: ConnectionId, last_state: ConnState },
}

impl LifecycleEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            LifecycleEvent::Appeared(record) => record.id,
            LifecycleEvent::Updated { id, .. } => *id,
            LifecycleEvent::Vanished { id, .. } => *id,
        }
    }

    /// Ordering rank of the event kind within a cycle.
    pub fn phase(&self) -> u8 {
        match self {
            LifecycleEvent::Appeared(_) => 0,
            LifecycleEvent::Updated { .. } => 1,
            LifecycleEvent::Vanished { .. } => 2,
        }
    }
}

/// Freshness of the published table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SourceHealth {
    /// The last cycle sampled successfully.
    Fresh { last_success: DateTime<Utc> },
    /// One or more consecutive cycles failed; the table is the last good one.
    Stale {
        /// When the table was last refreshed successfully, if ever.
        last_success: Option<DateTime<Utc>>,
        failed_cycles: u32,
        error: String,
    },
}

impl SourceHealth {
    pub fn is_stale(&self) -> bool {
        matches!(self, SourceHealth::Stale { .. })
    }
}

/// One immutable publication of the connection table.
///
/// Snapshots are shared as `Arc<TableSnapshot>` through a latest-value slot;
/// readers either see the whole previous publication or the whole new one,
/// never a partially updated table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSnapshot {
    /// Monotonic cycle counter, starting at 1 for the first sample.
    pub cycle: u64,
    /// All live records, ascending by identity.
    pub records: Vec<ConnectionRecord>,
    /// Lifecycle events emitted by this cycle, in the documented order.
    pub events: Vec<LifecycleEvent>,
    pub health: SourceHealth,
}

impl TableSnapshot {
    /// An empty snapshot published before the first cycle completes.
    pub fn empty() -> Self {
        Self {
            cycle: 0,
            records: Vec::new(),
            events: Vec::new(),
            health: SourceHealth::Stale {
                last_success: None,
                failed_cycles: 0,
                error: "no sample taken yet".to_string(),
            },
        }
    }

    pub fn get(&self, id: ConnectionId) -> Option<&ConnectionRecord> {
        self.records.iter().find(|r| r.id == id)
    }
}
