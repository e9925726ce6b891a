//! One-shot snapshot sources for the socket and process tables.
//!
//! [`SnapshotSource`] abstracts the platform read so the rest of the
//! pipeline can be driven by scripted fixtures in tests. The production
//! implementation, [`SystemSource`], reads the socket table through
//! `netstat2` and the process table through `sysinfo`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use netstat2::{AddressFamilyFlags, ProtocolFlags, ProtocolSocketInfo, TcpState};
use sysinfo::{ProcessesToUpdate, System};
use thiserror::Error;

use sockeye_core::{ConnState, ConnectionKey, ProcessInfo, Protocol};

/// One socket-table row, as the OS reported it this cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSocketEntry {
    pub key: ConnectionKey,
    pub state: ConnState,
    /// Owning PID, when the platform reports one for this socket.
    pub pid: Option<u32>,
}

/// A snapshot read failed.
#[derive(Debug, Clone, Error)]
pub enum SnapshotError {
    #[error("permission denied reading the socket or process table")]
    PermissionDenied,
    #[error("socket enumeration is not supported on this platform")]
    PlatformUnsupported,
    #[error("transient I/O failure: {0}")]
    Io(String),
}

/// Abstracts one-shot retrieval of the socket and process tables.
///
/// Both methods are called from the polling task, once per cycle, sockets
/// first. Implementations may keep internal caches between calls.
pub trait SnapshotSource: Send {
    fn list_sockets(&mut self) -> Result<Vec<RawSocketEntry>, SnapshotError>;
    fn list_processes(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError>;
}

/// Production source reading the live OS tables.
pub struct SystemSource {
    sys: System,
}

impl SystemSource {
    pub fn new() -> Self {
        Self { sys: System::new() }
    }
}

impl Default for SystemSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotSource for SystemSource {
    fn list_sockets(&mut self) -> Result<Vec<RawSocketEntry>, SnapshotError> {
        let af_flags = AddressFamilyFlags::IPV4 | AddressFamilyFlags::IPV6;
        let proto_flags = ProtocolFlags::TCP | ProtocolFlags::UDP;
        let sockets = netstat2::get_sockets_info(af_flags, proto_flags).map_err(map_netstat_error)?;

        let mut entries = Vec::with_capacity(sockets.len());
        for info in sockets {
            // Multiple PIDs can share a socket (fork + inherit); attribute
            // to the first one reported.
            let pid = info.associated_pids.first().copied();
            match info.protocol_socket_info {
                ProtocolSocketInfo::Tcp(tcp) => {
                    entries.push(RawSocketEntry {
                        key: ConnectionKey::new(
                            Protocol::Tcp,
                            SocketAddr::new(tcp.local_addr, tcp.local_port),
                            SocketAddr::new(tcp.remote_addr, tcp.remote_port),
                        ),
                        state: map_tcp_state(tcp.state),
                        pid,
                    });
                }
                ProtocolSocketInfo::Udp(udp) => {
                    entries.push(RawSocketEntry {
                        key: ConnectionKey::new(
                            Protocol::Udp,
                            SocketAddr::new(udp.local_addr, udp.local_port),
                            unspecified_peer(&udp.local_addr),
                        ),
                        state: ConnState::Unbound,
                        pid,
                    });
                }
            }
        }
        Ok(entries)
    }

    fn list_processes(&mut self) -> Result<Vec<ProcessInfo>, SnapshotError> {
        self.sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut processes = Vec::with_capacity(self.sys.processes().len());
        for (raw_pid, process) in self.sys.processes() {
            processes.push(ProcessInfo {
                pid: raw_pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                path: process.exe().map(|p| p.to_path_buf()),
                user: process.user_id().map(|uid| uid.to_string()),
            });
        }
        Ok(processes)
    }
}

/// Map the socket-table TCP state onto [`ConnState`].
fn map_tcp_state(state: TcpState) -> ConnState {
    match state {
        TcpState::Listen => ConnState::Listen,
        TcpState::SynSent => ConnState::SynSent,
        TcpState::SynReceived => ConnState::SynReceived,
        TcpState::Established => ConnState::Established,
        TcpState::FinWait1 => ConnState::FinWait1,
        TcpState::FinWait2 => ConnState::FinWait2,
        TcpState::CloseWait => ConnState::CloseWait,
        TcpState::Closing => ConnState::Closing,
        TcpState::LastAck => ConnState::LastAck,
        TcpState::TimeWait => ConnState::TimeWait,
        // DeleteTcb and anything the platform invents collapse to Closed.
        _ => ConnState::Closed,
    }
}

/// The unspecified peer endpoint in the same address family as `local`.
fn unspecified_peer(local: &IpAddr) -> SocketAddr {
    match local {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// netstat2 flattens OS errors into one opaque type; recover the permission
/// case from the message text so callers can distinguish it.
fn map_netstat_error(err: netstat2::error::Error) -> SnapshotError {
    let detail = err.to_string();
    let lower = detail.to_ascii_lowercase();
    if lower.contains("permission") || lower.contains("access") {
        SnapshotError::PermissionDenied
    } else {
        SnapshotError::Io(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tcp_states_map_onto_conn_states() {
        assert_eq!(map_tcp_state(TcpState::Listen), ConnState::Listen);
        assert_eq!(map_tcp_state(TcpState::Established), ConnState::Established);
        assert_eq!(map_tcp_state(TcpState::TimeWait), ConnState::TimeWait);
        assert_eq!(map_tcp_state(TcpState::DeleteTcb), ConnState::Closed);
    }

    #[test]
    fn unspecified_peer_matches_family() {
        let v4 = unspecified_peer(&"10.0.0.1".parse().unwrap());
        assert_eq!(v4.to_string(), "0.0.0.0:0");
        let v6 = unspecified_peer(&"fe80::1".parse().unwrap());
        assert_eq!(v6.to_string(), "[::]:0");
    }
}
