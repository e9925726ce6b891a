//! Process correlation: attaching process metadata to socket entries.
//!
//! Correlation runs against a process table sampled in the same cycle as
//! the socket table, so the two can race: a process can exit between the
//! reads, or the table can be unreadable under reduced privileges. Every
//! outcome is a [`ProcessLink`] value; correlation never fails a cycle.

use std::collections::HashMap;

use sockeye_core::{CorrelationGap, ProcessInfo, ProcessLink};

/// One cycle's process table, keyed by PID.
#[derive(Debug, Default)]
pub struct ProcessTable {
    map: HashMap<u32, ProcessInfo>,
    /// True when the table could not be read at all this cycle; lookups
    /// then report a permission gap instead of a process exit.
    degraded: bool,
}

impl ProcessTable {
    pub fn new(processes: Vec<ProcessInfo>) -> Self {
        Self {
            map: processes.into_iter().map(|p| (p.pid, p)).collect(),
            degraded: false,
        }
    }

    /// An empty table standing in for one that could not be read.
    pub fn degraded() -> Self {
        Self {
            map: HashMap::new(),
            degraded: true,
        }
    }

    pub fn get(&self, pid: u32) -> Option<&ProcessInfo> {
        self.map.get(&pid)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Resolve a socket's owning PID against this cycle's process table.
pub fn correlate(pid: Option<u32>, table: &ProcessTable) -> ProcessLink {
    match pid {
        None => ProcessLink::Gap(CorrelationGap::PidUnavailable),
        Some(pid) => match table.get(pid) {
            Some(info) => ProcessLink::Resolved(info.clone()),
            None if table.is_degraded() => ProcessLink::Gap(CorrelationGap::PermissionDenied),
            None => ProcessLink::Gap(CorrelationGap::ProcessExited),
        },
    }
}
