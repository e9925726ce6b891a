//! Static table of well-known service ports.

/// One entry in the well-known port table.
#[derive(Debug, Clone, Copy)]
pub struct ServiceEntry {
    pub port: u16,
    /// Short service label used in rationale strings.
    pub service: &'static str,
    /// Baseline risk score before exposure adjustment.
    pub base_score: i32,
    /// Services that are frequent lateral-movement or exfiltration targets.
    pub sensitive: bool,
}

/// Well-known ports the heuristic engine recognizes.
///
/// Base scores reflect how much attention the service deserves before the
/// address class is taken into account; sensitive entries are additionally
/// used by the address-class rule for ports outside this table's coverage.
pub const WELL_KNOWN: &[ServiceEntry] = &[
    ServiceEntry { port: 20, service: "FTP data", base_score: 35, sensitive: true },
    ServiceEntry { port: 21, service: "FTP", base_score: 35, sensitive: true },
    ServiceEntry { port: 22, service: "SSH", base_score: 30, sensitive: true },
    ServiceEntry { port: 23, service: "Telnet", base_score: 55, sensitive: true },
    ServiceEntry { port: 25, service: "SMTP", base_score: 30, sensitive: true },
    ServiceEntry { port: 53, service: "DNS", base_score: 15, sensitive: false },
    ServiceEntry { port: 80, service: "HTTP", base_score: 20, sensitive: false },
    ServiceEntry { port: 110, service: "POP3", base_score: 30, sensitive: false },
    ServiceEntry { port: 123, service: "NTP", base_score: 10, sensitive: false },
    ServiceEntry { port: 143, service: "IMAP", base_score: 30, sensitive: false },
    ServiceEntry { port: 443, service: "HTTPS", base_score: 15, sensitive: false },
    ServiceEntry { port: 445, service: "SMB", base_score: 45, sensitive: true },
    ServiceEntry { port: 993, service: "IMAPS", base_score: 20, sensitive: false },
    ServiceEntry { port: 995, service: "POP3S", base_score: 20, sensitive: false },
    ServiceEntry { port: 1433, service: "MSSQL", base_score: 40, sensitive: true },
    ServiceEntry { port: 3306, service: "MySQL", base_score: 40, sensitive: true },
    ServiceEntry { port: 3389, service: "RDP", base_score: 45, sensitive: true },
    ServiceEntry { port: 5432, service: "PostgreSQL", base_score: 40, sensitive: true },
    ServiceEntry { port: 5900, service: "VNC", base_score: 45, sensitive: true },
    ServiceEntry { port: 6379, service: "Redis", base_score: 45, sensitive: true },
    ServiceEntry { port: 8080, service: "HTTP alt", base_score: 25, sensitive: false },
    ServiceEntry { port: 9200, service: "Elasticsearch", base_score: 40, sensitive: true },
    ServiceEntry { port: 27017, service: "MongoDB", base_score: 40, sensitive: true },
];

/// Look up a port in the well-known table.
pub fn lookup(port: u16) -> Option<&'static ServiceEntry> {
    WELL_KNOWN.iter().find(|e| e.port == port)
}

/// Whether a port is on the sensitive subset (in or out of the table).
pub fn is_sensitive(port: u16) -> bool {
    lookup(port).map(|e| e.sensitive).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_finds_known_ports() {
        assert_eq!(lookup(22).unwrap().service, "SSH");
        assert_eq!(lookup(445).unwrap().service, "SMB");
        assert!(lookup(47611).is_none());
    }

    #[test]
    fn sensitive_subset() {
        assert!(is_sensitive(445));
        assert!(is_sensitive(3389));
        assert!(!is_sensitive(443));
        assert!(!is_sensitive(47611));
    }

    #[test]
    fn table_ports_are_unique() {
        for (i, a) in WELL_KNOWN.iter().enumerate() {
            for b in &WELL_KNOWN[i + 1..] {
                assert_ne!(a.port, b.port, "duplicate entry for port {}", a.port);
            }
        }
    }
}
