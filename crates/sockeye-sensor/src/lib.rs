//! # sockeye-sensor
//!
//! The sampling pipeline: one-shot snapshot sources, the identity resolver
//! that keeps connections stable across refreshes, the diff engine with its
//! grace-period eviction, process correlation, and the polling scheduler
//! that owns the shared connection table and publishes it to consumers.

pub mod correlate;
pub mod diff;
pub mod identity;
pub mod scheduler;
pub mod snapshot;

pub use correlate::ProcessTable;
pub use diff::ConnectionTracker;
pub use identity::IdentityResolver;
pub use scheduler::{MonitorHandle, Poller};
pub use snapshot::{RawSocketEntry, SnapshotError, SnapshotSource, SystemSource};
