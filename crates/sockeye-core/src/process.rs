//! Process attribution types.
//!
//! Correlation failures are data, not errors: a connection whose owning
//! process cannot be determined is still a first-class record, carrying a
//! [`CorrelationGap`] that says why the attribution is missing.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Metadata about a process that owns one or more sockets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessInfo {
    pub pid: u32,
    /// Executable name (e.g. `"sshd"`).
    pub name: String,
    /// Absolute path of the executable, when readable.
    pub path: Option<PathBuf>,
    /// Owner identity as reported by the OS (uid on unix).
    pub user: Option<String>,
}

/// Why process attribution is missing for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CorrelationGap {
    /// The PID was reported but the process was gone by the time the
    /// process table was read.
    ProcessExited,
    /// The process table could not be read with the current privileges.
    PermissionDenied,
    /// The platform does not report an owning PID for this socket.
    PidUnavailable,
}

impl fmt::Display for CorrelationGap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CorrelationGap::ProcessExited => write!(f, "process exited"),
            CorrelationGap::PermissionDenied => write!(f, "permission denied"),
            CorrelationGap::PidUnavailable => write!(f, "pid unavailable"),
        }
    }
}

/// Process attribution for a connection: resolved metadata or a typed gap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProcessLink {
    Resolved(ProcessInfo),
    Gap(CorrelationGap),
}

impl ProcessLink {
    pub fn is_resolved(&self) -> bool {
        matches!(self, ProcessLink::Resolved(_))
    }

    /// Executable name, when attribution succeeded.
    pub fn name(&self) -> Option<&str> {
        match self {
            ProcessLink::Resolved(info) => Some(&info.name),
            ProcessLink::Gap(_) => None,
        }
    }

    /// Whether two links describe the same attribution outcome.
    ///
    /// Used by the diff engine to decide if a process change warrants an
    /// `Updated` event: a gap-to-resolved transition counts as a change,
    /// as does a different executable behind the same PID.
    pub fn same_attribution(&self, other: &ProcessLink) -> bool {
        match (self, other) {
            (ProcessLink::Resolved(a), ProcessLink::Resolved(b)) => {
                a.pid == b.pid && a.name == b.name
            }
            (ProcessLink::Gap(a), ProcessLink::Gap(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for ProcessLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessLink::Resolved(info) => write!(f, "{} (pid {})", info.name, info.pid),
            ProcessLink::Gap(gap) => write!(f, "<unknown: {gap}>"),
        }
    }
}
