//! Connection data model: keys, identities, protocol states, and records.
//!
//! A [`ConnectionKey`] is the raw 5-tuple the OS reports; it is *not* stable
//! over time because ports get reused. A [`ConnectionId`] is the logical,
//! monotonically-assigned handle that tracks one connection across refresh
//! cycles. The [`ConnectionRecord`] binds the two together with protocol
//! state, process attribution, and the heuristic verdict.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::heuristics::Verdict;
use crate::process::ProcessLink;

/// Transport protocol of a socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Protocol state of a connection.
///
/// The TCP variants mirror the state set the OS socket table reports.
/// UDP sockets carry no protocol state and are tracked as [`ConnState::Unbound`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConnState {
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
    Closed,
    /// Stateless (UDP) socket.
    Unbound,
}

impl ConnState {
    /// Whether this state means the socket is waiting for inbound peers.
    pub fn is_listening(&self) -> bool {
        matches!(self, ConnState::Listen | ConnState::Unbound)
    }
}

impl fmt::Display for ConnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnState::Listen => "LISTEN",
            ConnState::SynSent => "SYN_SENT",
            ConnState::SynReceived => "SYN_RCVD",
            ConnState::Established => "ESTABLISHED",
            ConnState::FinWait1 => "FIN_WAIT_1",
            ConnState::FinWait2 => "FIN_WAIT_2",
            ConnState::CloseWait => "CLOSE_WAIT",
            ConnState::Closing => "CLOSING",
            ConnState::LastAck => "LAST_ACK",
            ConnState::TimeWait => "TIME_WAIT",
            ConnState::Closed => "CLOSED",
            ConnState::Unbound => "UNBOUND",
        };
        write!(f, "{s}")
    }
}

/// The raw socket 5-tuple: protocol plus local and remote endpoints.
///
/// Keys are orderable so that snapshot processing and event emission can be
/// made deterministic. A key is NOT a stable identity -- see [`ConnectionId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub protocol: Protocol,
    pub local: SocketAddr,
    pub remote: SocketAddr,
}

impl ConnectionKey {
    pub fn new(protocol: Protocol, local: SocketAddr, remote: SocketAddr) -> Self {
        Self { protocol, local, remote }
    }

    /// True when the remote side is the unspecified address/port, i.e. the
    /// socket has no peer (listeners, unconnected UDP).
    pub fn remote_is_unspecified(&self) -> bool {
        self.remote.ip().is_unspecified() && self.remote.port() == 0
    }
}

impl fmt::Display for ConnectionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} -> {}", self.protocol, self.local, self.remote)
    }
}

/// Logical identity of a tracked connection.
///
/// Assigned from a process-wide strictly increasing counter and never
/// reused, even when the underlying key is recycled by the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Coarse classification of an IP address, used by the heuristic rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressClass {
    Loopback,
    /// RFC 1918 / link-local / unique-local ranges.
    Private,
    Public,
    /// 0.0.0.0 / :: -- wildcard binds and absent peers.
    Unspecified,
}

impl AddressClass {
    pub fn of(ip: &IpAddr) -> Self {
        if ip.is_unspecified() {
            return AddressClass::Unspecified;
        }
        if ip.is_loopback() {
            return AddressClass::Loopback;
        }
        match ip {
            IpAddr::V4(v4) => {
                if v4.is_private() || v4.is_link_local() {
                    AddressClass::Private
                } else {
                    AddressClass::Public
                }
            }
            IpAddr::V6(v6) => {
                // fc00::/7 unique-local and fe80::/10 link-local.
                let segments = v6.segments();
                if (segments[0] & 0xfe00) == 0xfc00 || (segments[0] & 0xffc0) == 0xfe80 {
                    AddressClass::Private
                } else {
                    AddressClass::Public
                }
            }
        }
    }
}

/// One tracked connection, as held in the shared connection table.
///
/// Records are owned exclusively by the table; consumers and the heuristic
/// engine only read them or request re-evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub key: ConnectionKey,
    pub state: ConnState,
    /// Owning PID as the socket table reported it, if the platform exposes one.
    pub pid: Option<u32>,
    /// Process attribution, resolved or a typed correlation gap.
    pub process: ProcessLink,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Lazily computed heuristic verdict; `None` when stale or not yet evaluated.
    pub verdict: Option<Verdict>,
}

impl ConnectionRecord {
    /// The port that characterizes this connection's service: the local port
    /// for listeners and unbound sockets, the remote port otherwise.
    pub fn service_port(&self) -> u16 {
        if self.state.is_listening() || self.key.remote_is_unspecified() {
            self.key.local.port()
        } else {
            self.key.remote.port()
        }
    }

    /// The address that determines this connection's exposure: the local
    /// bind address for listeners, the remote peer otherwise.
    pub fn exposure_address(&self) -> IpAddr {
        if self.state.is_listening() || self.key.remote_is_unspecified() {
            self.key.local.ip()
        } else {
            self.key.remote.ip()
        }
    }

    /// Classification of [`Self::exposure_address`].
    pub fn exposure_class(&self) -> AddressClass {
        AddressClass::of(&self.exposure_address())
    }
}
