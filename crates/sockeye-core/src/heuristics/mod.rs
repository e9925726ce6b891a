//! Heuristic risk engine: an ordered list of rules, first match wins.
//!
//! Evaluation is a pure function of the record's key, state, and process
//! attribution -- no network or disk I/O -- so verdicts are deterministic
//! and unit-testable. The optional [`explainer`] capability may enrich a
//! verdict's rationale afterwards, but never participates in scoring.

pub mod explainer;
pub mod ports;
pub mod rules;

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{ConfigError, RulesConfig};
use crate::connection::ConnectionRecord;
use rules::{build_rules, AddressClassRule, LoopbackRule, Rule, WellKnownPortRule};

/// Risk classification of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VerdictCategory {
    /// Traffic on a recognized service port.
    WellKnownService,
    /// Signals that warrant attention, e.g. sensitive ports exposed publicly.
    Suspicious,
    /// No rule recognized the traffic.
    Unknown,
    /// Loopback or private-range traffic with no elevated signals.
    BenignLocal,
}

impl fmt::Display for VerdictCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerdictCategory::WellKnownService => write!(f, "well-known service"),
            VerdictCategory::Suspicious => write!(f, "suspicious"),
            VerdictCategory::Unknown => write!(f, "unknown"),
            VerdictCategory::BenignLocal => write!(f, "benign local"),
        }
    }
}

/// The heuristic engine's assessment of one connection record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub category: VerdictCategory,
    /// Risk score, 0 (inert) to 100 (act now).
    pub score: u8,
    pub rationale: String,
}

impl Verdict {
    /// Build a verdict, clamping the score into the 0-100 scale.
    pub fn new(category: VerdictCategory, score: i32, rationale: String) -> Self {
        Self {
            category,
            score: score.clamp(0, 100) as u8,
            rationale,
        }
    }
}

/// Risk score given to traffic no rule recognized.
const UNKNOWN_FALLBACK_SCORE: i32 = 50;

/// Ordered rule list with first-match-wins evaluation.
pub struct HeuristicEngine {
    rules: Vec<Box<dyn Rule>>,
}

impl HeuristicEngine {
    /// Build an engine from the configured rule selection.
    ///
    /// The evaluation order is fixed (loopback, well-known-port,
    /// address-class) regardless of the order names appear in the config.
    pub fn from_config(config: &RulesConfig) -> Result<Self, ConfigError> {
        let rules = build_rules(&config.enabled)?;
        tracing::debug!(rules = ?rules.iter().map(|r| r.name()).collect::<Vec<_>>(), "heuristic engine built");
        Ok(Self { rules })
    }

    /// Engine with every built-in rule enabled.
    pub fn with_defaults() -> Self {
        Self {
            rules: vec![
                Box::new(LoopbackRule),
                Box::new(WellKnownPortRule),
                Box::new(AddressClassRule),
            ],
        }
    }

    /// Evaluate a record against the rule list.
    ///
    /// Stops at the first matching rule; falls back to an `Unknown` verdict
    /// whose rationale states that no rule matched.
    pub fn evaluate(&self, record: &ConnectionRecord) -> Verdict {
        for rule in &self.rules {
            if let Some(verdict) = rule.matches(record) {
                return verdict;
            }
        }
        Verdict::new(
            VerdictCategory::Unknown,
            UNKNOWN_FALLBACK_SCORE,
            format!(
                "no rule matched: unrecognized {} traffic on port {}",
                record.key.protocol,
                record.service_port()
            ),
        )
    }

    /// Names of the active rules, in evaluation order.
    pub fn rule_names(&self) -> Vec<&'static str> {
        self.rules.iter().map(|r| r.name()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnState, ConnectionId, ConnectionKey, Protocol};
    use crate::process::{CorrelationGap, ProcessInfo, ProcessLink};
    use chrono::Utc;

    fn make_record(proto: Protocol, local: &str, remote: &str, state: ConnState) -> ConnectionRecord {
        let now = Utc::now();
        ConnectionRecord {
            id: ConnectionId(1),
            key: ConnectionKey::new(proto, local.parse().unwrap(), remote.parse().unwrap()),
            state,
            pid: Some(100),
            process: ProcessLink::Resolved(ProcessInfo {
                pid: 100,
                name: "testd".into(),
                path: None,
                user: None,
            }),
            first_seen: now,
            last_seen: now,
            verdict: None,
        }
    }

    #[test]
    fn evaluation_is_pure() {
        let engine = HeuristicEngine::with_defaults();
        let record = make_record(Protocol::Tcp, "10.0.0.5:51000", "93.184.216.34:443", ConnState::Established);
        let first = engine.evaluate(&record);
        let second = engine.evaluate(&record);
        assert_eq!(first, second);
    }

    #[test]
    fn loopback_traffic_is_benign_local() {
        let engine = HeuristicEngine::with_defaults();
        let record = make_record(Protocol::Tcp, "127.0.0.1:8080", "127.0.0.1:51234", ConnState::Established);
        let verdict = engine.evaluate(&record);
        assert_eq!(verdict.category, VerdictCategory::BenignLocal);
        assert!(verdict.score < 20, "loopback score should be low, got {}", verdict.score);
    }

    #[test]
    fn smb_from_public_address_scores_above_private() {
        let engine = HeuristicEngine::with_defaults();
        let public = make_record(Protocol::Tcp, "10.0.0.5:49800", "203.0.113.7:445", ConnState::Established);
        let private = make_record(Protocol::Tcp, "10.0.0.5:49801", "192.168.1.20:445", ConnState::Established);

        let public_verdict = engine.evaluate(&public);
        let private_verdict = engine.evaluate(&private);

        assert_eq!(public_verdict.category, VerdictCategory::WellKnownService);
        assert_eq!(private_verdict.category, VerdictCategory::WellKnownService);
        assert!(public_verdict.rationale.contains("SMB"));
        assert!(
            public_verdict.score > private_verdict.score,
            "public SMB {} should outrank private SMB {}",
            public_verdict.score,
            private_verdict.score
        );
    }

    #[test]
    fn unknown_port_falls_back_with_explicit_rationale() {
        let engine = HeuristicEngine::with_defaults();
        let record = make_record(Protocol::Tcp, "10.0.0.5:50123", "198.51.100.4:47611", ConnState::Established);
        let verdict = engine.evaluate(&record);
        assert_eq!(verdict.category, VerdictCategory::Unknown);
        assert_eq!(verdict.score, 50);
        assert!(verdict.rationale.contains("no rule matched"));
    }

    #[test]
    fn unresolved_process_is_a_valid_input() {
        let engine = HeuristicEngine::with_defaults();
        let mut record = make_record(Protocol::Tcp, "0.0.0.0:22", "0.0.0.0:0", ConnState::Listen);
        record.pid = None;
        record.process = ProcessLink::Gap(CorrelationGap::PidUnavailable);
        let verdict = engine.evaluate(&record);
        assert_eq!(verdict.category, VerdictCategory::WellKnownService);
        assert!(verdict.rationale.contains("SSH"));
    }

    #[test]
    fn disabled_rules_are_skipped() {
        let config = RulesConfig {
            enabled: vec!["address-class".to_string()],
        };
        let engine = HeuristicEngine::from_config(&config).unwrap();
        assert_eq!(engine.rule_names(), vec!["address-class"]);

        // Without the well-known-port rule, SSH to a private peer falls to
        // the address-class rule instead.
        let record = make_record(Protocol::Tcp, "10.0.0.5:49800", "192.168.1.20:22", ConnState::Established);
        let verdict = engine.evaluate(&record);
        assert_eq!(verdict.category, VerdictCategory::BenignLocal);
    }

    #[test]
    fn unknown_rule_name_is_config_error() {
        let config = RulesConfig {
            enabled: vec!["no-such-rule".to_string()],
        };
        assert!(HeuristicEngine::from_config(&config).is_err());
    }
}
