//! Built-in heuristic rules.
//!
//! Each rule is an independently testable unit implementing [`Rule`]. The
//! engine evaluates them in a fixed order and stops at the first match; new
//! rules are added by extending [`build_rules`] and [`BUILTIN_RULE_NAMES`].

use crate::config::ConfigError;
use crate::connection::{AddressClass, ConnectionRecord};

use super::{ports, Verdict, VerdictCategory};

/// Names accepted in `rules.enabled`, in evaluation order.
pub const BUILTIN_RULE_NAMES: &[&str] = &["loopback", "well-known-port", "address-class"];

/// Score adjustment when a recognized service faces a public address.
const PUBLIC_EXPOSURE_RAISE: i32 = 25;
/// Score adjustment when a recognized service only faces private space.
const PRIVATE_EXPOSURE_LOWER: i32 = 10;
/// Score for purely loopback traffic.
const LOOPBACK_SCORE: i32 = 5;
/// Score for unrecognized traffic confined to private ranges.
const PRIVATE_UNKNOWN_SCORE: i32 = 15;
/// Score for sensitive ports reached from or exposed to public space.
const PUBLIC_SENSITIVE_SCORE: i32 = 80;

/// One heuristic rule. `matches` returns `Some` to claim the record.
pub trait Rule: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;
    fn matches(&self, record: &ConnectionRecord) -> Option<Verdict>;
}

/// Build the rule list for the given enabled names.
///
/// Order is canonical (the order of [`BUILTIN_RULE_NAMES`]), not the order
/// the names were configured in, so evaluation stays deterministic.
pub fn build_rules(enabled: &[String]) -> Result<Vec<Box<dyn Rule>>, ConfigError> {
    for name in enabled {
        if !BUILTIN_RULE_NAMES.contains(&name.as_str()) {
            return Err(ConfigError::UnknownRule(name.clone()));
        }
    }

    let mut rules: Vec<Box<dyn Rule>> = Vec::new();
    let on = |name: &str| enabled.iter().any(|e| e == name);
    if on("loopback") {
        rules.push(Box::new(LoopbackRule));
    }
    if on("well-known-port") {
        rules.push(Box::new(WellKnownPortRule));
    }
    if on("address-class") {
        rules.push(Box::new(AddressClassRule));
    }
    Ok(rules)
}

/// Traffic that never leaves the host.
#[derive(Debug)]
pub struct LoopbackRule;

impl Rule for LoopbackRule {
    fn name(&self) -> &'static str {
        "loopback"
    }

    fn matches(&self, record: &ConnectionRecord) -> Option<Verdict> {
        if record.exposure_class() != AddressClass::Loopback {
            return None;
        }
        let who = record
            .process
            .name()
            .map(|n| format!(" by {n}"))
            .unwrap_or_default();
        Some(Verdict::new(
            VerdictCategory::BenignLocal,
            LOOPBACK_SCORE,
            format!("loopback-only {} traffic{who}; not reachable off-host", record.key.protocol),
        ))
    }
}

/// Recognized service ports, with exposure-adjusted scores.
#[derive(Debug)]
pub struct WellKnownPortRule;

impl Rule for WellKnownPortRule {
    fn name(&self) -> &'static str {
        "well-known-port"
    }

    fn matches(&self, record: &ConnectionRecord) -> Option<Verdict> {
        let entry = ports::lookup(record.service_port())?;
        let class = record.exposure_class();
        let (score, exposure) = match class {
            AddressClass::Public => (entry.base_score + PUBLIC_EXPOSURE_RAISE, "publicly exposed"),
            AddressClass::Private => (entry.base_score - PRIVATE_EXPOSURE_LOWER, "confined to private address space"),
            AddressClass::Loopback => (LOOPBACK_SCORE, "loopback only"),
            // Wildcard binds are reachable on every interface; treat them
            // like public exposure.
            AddressClass::Unspecified => (entry.base_score + PUBLIC_EXPOSURE_RAISE, "bound to all interfaces"),
        };
        let role = if record.state.is_listening() { "serving" } else { "using" };
        Some(Verdict::new(
            VerdictCategory::WellKnownService,
            score,
            format!(
                "{role} {service} on port {port}, {exposure}",
                service = entry.service,
                port = entry.port,
            ),
        ))
    }
}

/// Address-class fallback: private space lowers risk regardless of port,
/// public peers on sensitive ports raise it.
#[derive(Debug)]
pub struct AddressClassRule;

impl Rule for AddressClassRule {
    fn name(&self) -> &'static str {
        "address-class"
    }

    fn matches(&self, record: &ConnectionRecord) -> Option<Verdict> {
        let port = record.service_port();
        match record.exposure_class() {
            AddressClass::Loopback => Some(Verdict::new(
                VerdictCategory::BenignLocal,
                LOOPBACK_SCORE,
                format!("loopback-only {} traffic on port {port}", record.key.protocol),
            )),
            AddressClass::Private => Some(Verdict::new(
                VerdictCategory::BenignLocal,
                PRIVATE_UNKNOWN_SCORE,
                format!("port {port} traffic confined to private address space"),
            )),
            AddressClass::Public if ports::is_sensitive(port) => Some(Verdict::new(
                VerdictCategory::Suspicious,
                PUBLIC_SENSITIVE_SCORE,
                format!("sensitive port {port} facing a public address"),
            )),
            AddressClass::Public | AddressClass::Unspecified => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnState, ConnectionId, ConnectionKey, Protocol};
    use crate::process::{CorrelationGap, ProcessLink};
    use chrono::Utc;

    fn record(local: &str, remote: &str, state: ConnState) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            id: ConnectionId(7),
            key: ConnectionKey::new(Protocol::Tcp, local.parse().unwrap(), remote.parse().unwrap()),
            state,
            pid: None,
            process: ProcessLink::Gap(CorrelationGap::PidUnavailable),
            first_seen: now,
            last_seen: now,
            verdict: None,
        }
    }

    #[test]
    fn loopback_rule_claims_only_loopback() {
        let rule = LoopbackRule;
        assert!(rule.matches(&record("127.0.0.1:9000", "127.0.0.1:50000", ConnState::Established)).is_some());
        assert!(rule.matches(&record("10.0.0.1:9000", "8.8.8.8:53", ConnState::Established)).is_none());
    }

    #[test]
    fn well_known_rule_uses_local_port_for_listeners() {
        let rule = WellKnownPortRule;
        let listener = record("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen);
        let verdict = rule.matches(&listener).unwrap();
        assert!(verdict.rationale.contains("SSH"));
        assert!(verdict.rationale.contains("serving"));
        // Wildcard bind counts as exposed.
        assert_eq!(verdict.score as i32, 30 + PUBLIC_EXPOSURE_RAISE);
    }

    #[test]
    fn well_known_rule_uses_remote_port_for_connected() {
        let rule = WellKnownPortRule;
        let conn = record("10.0.0.5:52000", "203.0.113.9:445", ConnState::Established);
        let verdict = rule.matches(&conn).unwrap();
        assert!(verdict.rationale.contains("SMB"));
        assert!(verdict.rationale.contains("using"));
        assert_eq!(verdict.score as i32, 45 + PUBLIC_EXPOSURE_RAISE);
    }

    #[test]
    fn address_class_rule_lowers_private_and_raises_public_sensitive() {
        let rule = AddressClassRule;

        let private = rule.matches(&record("10.0.0.5:52000", "192.168.0.9:47000", ConnState::Established)).unwrap();
        assert_eq!(private.category, VerdictCategory::BenignLocal);
        assert_eq!(private.score as i32, PRIVATE_UNKNOWN_SCORE);

        let public_sensitive = rule.matches(&record("10.0.0.5:52000", "198.51.100.9:3389", ConnState::Established)).unwrap();
        assert_eq!(public_sensitive.category, VerdictCategory::Suspicious);
        assert_eq!(public_sensitive.score as i32, PUBLIC_SENSITIVE_SCORE);

        // Public, non-sensitive port: leaves the record for the fallback.
        assert!(rule.matches(&record("10.0.0.5:52000", "198.51.100.9:47000", ConnState::Established)).is_none());
    }

    #[test]
    fn build_rules_rejects_unknown_names() {
        let err = build_rules(&["loopback".into(), "bogus".into()]).unwrap_err();
        assert_eq!(err, ConfigError::UnknownRule("bogus".into()));
    }

    #[test]
    fn build_rules_orders_canonically() {
        // Config lists address-class first; evaluation order stays canonical.
        let rules = build_rules(&["address-class".into(), "loopback".into()]).unwrap();
        let names: Vec<_> = rules.iter().map(|r| r.name()).collect();
        assert_eq!(names, vec!["loopback", "address-class"]);
    }
}
