//! # sockeye-core
//!
//! Core type system for Sockeye -- a live observer for the operating
//! system's network connections.
//!
//! This crate defines the shared data model (connections, processes,
//! lifecycle events), the TOML configuration surface, and the deterministic
//! heuristic engine with its pluggable explainer capability. The sampling
//! pipeline that produces this data lives in `sockeye-sensor`.

pub mod config;
pub mod connection;
pub mod event;
pub mod heuristics;
pub mod process;

pub use connection::{AddressClass, ConnState, ConnectionId, ConnectionKey, ConnectionRecord, Protocol};
pub use event::{LifecycleEvent, SourceHealth, TableSnapshot};
pub use process::{CorrelationGap, ProcessInfo, ProcessLink};
