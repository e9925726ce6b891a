//! The diff engine: turns repeated raw snapshots into a stable connection
//! table plus an ordered stream of lifecycle events.
//!
//! Each tracked key walks a small state machine: absent -> tracked ->
//! grace (counting missed sightings) -> evicted. The grace period is the
//! main defense against flicker from partial or racy OS reads: a key that
//! skips one scrape keeps its record and identity; only after the grace
//! period elapses is `Vanished` emitted and the identity retired.

use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;

use sockeye_core::heuristics::HeuristicEngine;
use sockeye_core::{ConnectionId, ConnectionKey, ConnectionRecord, LifecycleEvent};

use crate::correlate::{correlate, ProcessTable};
use crate::identity::IdentityResolver;
use crate::snapshot::RawSocketEntry;

struct Tracked {
    record: ConnectionRecord,
    /// Consecutive cycles the key has been absent from the snapshot.
    misses: u32,
    /// Cycle at which the current verdict was computed; guards late
    /// explainer enrichment against applying to a superseded verdict.
    verdict_cycle: u64,
}

/// Owns all live connection records and applies one snapshot per cycle.
pub struct ConnectionTracker {
    entries: HashMap<ConnectionKey, Tracked>,
    grace_cycles: u32,
}

impl ConnectionTracker {
    pub fn new(grace_cycles: u32) -> Self {
        Self {
            entries: HashMap::new(),
            grace_cycles,
        }
    }

    /// Apply one raw snapshot, producing this cycle's lifecycle events.
    ///
    /// Events are returned in deterministic order: `Appeared`, then
    /// `Updated`, then `Vanished`, each ascending by identity. Re-running
    /// the same inputs against fresh state yields identical output.
    pub fn apply(
        &mut self,
        cycle: u64,
        now: DateTime<Utc>,
        sockets: Vec<RawSocketEntry>,
        processes: &ProcessTable,
        resolver: &mut IdentityResolver,
        engine: &HeuristicEngine,
    ) -> Vec<LifecycleEvent> {
        // Deduplicate on the key (first row wins) and order the walk so
        // identity minting is deterministic.
        let mut current: BTreeMap<ConnectionKey, RawSocketEntry> = BTreeMap::new();
        for entry in sockets {
            current.entry(entry.key).or_insert(entry);
        }

        let mut events = Vec::new();

        for (key, raw) in &current {
            let link = correlate(raw.pid, processes);
            match self.entries.get_mut(key) {
                Some(tracked) => {
                    tracked.misses = 0;
                    let changed = tracked.record.state != raw.state
                        || tracked.record.pid != raw.pid
                        || !tracked.record.process.same_attribution(&link);
                    if changed {
                        let old = Box::new(tracked.record.clone());
                        tracked.record.state = raw.state;
                        tracked.record.pid = raw.pid;
                        tracked.record.process = link;
                        tracked.record.last_seen = now;
                        tracked.record.verdict = Some(engine.evaluate(&tracked.record));
                        tracked.verdict_cycle = cycle;
                        events.push(LifecycleEvent::Updated {
                            id: tracked.record.id,
                            old,
                            new: Box::new(tracked.record.clone()),
                        });
                    } else {
                        tracked.record.last_seen = now;
                    }
                }
                None => {
                    let (id, _) = resolver.resolve(key);
                    let mut record = ConnectionRecord {
                        id,
                        key: *key,
                        state: raw.state,
                        pid: raw.pid,
                        process: link,
                        first_seen: now,
                        last_seen: now,
                        verdict: None,
                    };
                    record.verdict = Some(engine.evaluate(&record));
                    self.entries.insert(
                        *key,
                        Tracked {
                            record: record.clone(),
                            misses: 0,
                            verdict_cycle: cycle,
                        },
                    );
                    events.push(LifecycleEvent::Appeared(record));
                }
            }
        }

        // Count missed sightings; evict past the grace period.
        let mut evict = Vec::new();
        for (key, tracked) in self.entries.iter_mut() {
            if current.contains_key(key) {
                continue;
            }
            tracked.misses += 1;
            if tracked.misses > self.grace_cycles {
                evict.push(*key);
            }
        }
        for key in evict {
            if let Some(tracked) = self.entries.remove(&key) {
                debug!(id = %tracked.record.id, key = %key, "evicting after grace period");
                resolver.retire(&key);
                events.push(LifecycleEvent::Vanished {
                    id: tracked.record.id,
                    last_state: tracked.record.state,
                });
            }
        }

        events.sort_by_key(|e| (e.phase(), e.id()));
        events
    }

    /// All live records, ascending by identity.
    pub fn records(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<_> = self.entries.values().map(|t| t.record.clone()).collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Append explainer output to a record's rationale.
    ///
    /// Applied only if the record is still tracked and its verdict has not
    /// been recomputed since `verdict_cycle`; otherwise the enrichment is
    /// silently dropped.
    pub fn append_rationale(&mut self, id: ConnectionId, verdict_cycle: u64, text: &str) -> bool {
        for tracked in self.entries.values_mut() {
            if tracked.record.id != id {
                continue;
            }
            if tracked.verdict_cycle != verdict_cycle {
                return false;
            }
            if let Some(verdict) = tracked.record.verdict.as_mut() {
                verdict.rationale.push_str("; ");
                verdict.rationale.push_str(text);
                return true;
            }
            return false;
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use sockeye_core::{ConnState, ProcessInfo, Protocol};

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    fn raw(local: &str, remote: &str, state: ConnState, pid: Option<u32>) -> RawSocketEntry {
        RawSocketEntry {
            key: ConnectionKey::new(Protocol::Tcp, local.parse().unwrap(), remote.parse().unwrap()),
            state,
            pid,
        }
    }

    fn table_with(pid: u32, name: &str) -> ProcessTable {
        ProcessTable::new(vec![ProcessInfo {
            pid,
            name: name.into(),
            path: None,
            user: None,
        }])
    }

    struct Harness {
        tracker: ConnectionTracker,
        resolver: IdentityResolver,
        engine: HeuristicEngine,
        cycle: u64,
    }

    impl Harness {
        fn new(grace: u32) -> Self {
            Self {
                tracker: ConnectionTracker::new(grace),
                resolver: IdentityResolver::new(),
                engine: HeuristicEngine::with_defaults(),
                cycle: 0,
            }
        }

        fn step(&mut self, sockets: Vec<RawSocketEntry>, processes: &ProcessTable) -> Vec<LifecycleEvent> {
            self.cycle += 1;
            let now = at(self.cycle as u32);
            self.tracker
                .apply(self.cycle, now, sockets, processes, &mut self.resolver, &self.engine)
        }
    }

    #[test]
    fn unchanged_key_emits_no_event_but_bumps_last_seen() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "sshd");
        let entry = raw("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen, Some(10));

        let first = h.step(vec![entry.clone()], &processes);
        assert_eq!(first.len(), 1);
        assert!(matches!(first[0], LifecycleEvent::Appeared(_)));

        let second = h.step(vec![entry], &processes);
        assert!(second.is_empty());
        let record = &h.tracker.records()[0];
        assert_eq!(record.last_seen, at(2));
        assert_eq!(record.first_seen, at(1));
    }

    #[test]
    fn state_change_emits_updated_with_fresh_verdict() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "pythond");

        h.step(vec![raw("127.0.0.1:5000", "0.0.0.0:0", ConnState::Listen, Some(10))], &processes);
        let events = h.step(
            vec![raw("127.0.0.1:5000", "0.0.0.0:0", ConnState::Established, Some(10))],
            &processes,
        );

        assert_eq!(events.len(), 1);
        match &events[0] {
            LifecycleEvent::Updated { id, old, new } => {
                assert_eq!(*id, old.id);
                assert_eq!(old.state, ConnState::Listen);
                assert_eq!(new.state, ConnState::Established);
                assert!(new.verdict.is_some(), "verdict recomputed on update");
            }
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn pid_change_emits_updated() {
        let mut h = Harness::new(1);
        let entry = |pid| raw("0.0.0.0:8080", "0.0.0.0:0", ConnState::Listen, Some(pid));

        h.step(vec![entry(10)], &table_with(10, "serverd"));
        let events = h.step(vec![entry(44)], &table_with(44, "other"));
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LifecycleEvent::Updated { .. }));
    }

    #[test]
    fn recorrelation_from_gap_emits_updated() {
        let mut h = Harness::new(1);
        let entry = raw("0.0.0.0:8080", "0.0.0.0:0", ConnState::Listen, Some(10));

        // Process table misses pid 10 on the first cycle.
        let first = h.step(vec![entry.clone()], &ProcessTable::new(Vec::new()));
        match &first[0] {
            LifecycleEvent::Appeared(record) => assert!(!record.process.is_resolved()),
            other => panic!("expected Appeared, got {other:?}"),
        }

        // Same socket, process discovered later: re-correlation is a change.
        let second = h.step(vec![entry], &table_with(10, "serverd"));
        assert_eq!(second.len(), 1);
        match &second[0] {
            LifecycleEvent::Updated { new, .. } => assert!(new.process.is_resolved()),
            other => panic!("expected Updated, got {other:?}"),
        }
    }

    #[test]
    fn grace_period_absorbs_one_missed_scrape() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "sshd");
        let entry = raw("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen, Some(10));

        let c1 = h.step(vec![entry.clone()], &processes);
        let id = c1[0].id();

        // First miss: no event, record retained.
        let c2 = h.step(vec![], &processes);
        assert!(c2.is_empty());
        assert_eq!(h.tracker.len(), 1);

        // Second miss: grace elapsed, Vanished.
        let c3 = h.step(vec![], &processes);
        assert_eq!(c3, vec![LifecycleEvent::Vanished { id, last_state: ConnState::Listen }]);
        assert!(h.tracker.is_empty());
    }

    #[test]
    fn zero_grace_evicts_immediately() {
        let mut h = Harness::new(0);
        let processes = table_with(10, "sshd");
        h.step(vec![raw("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen, Some(10))], &processes);
        let events = h.step(vec![], &processes);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], LifecycleEvent::Vanished { .. }));
    }

    #[test]
    fn reappearance_within_grace_continues_identity() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "sshd");
        let entry = raw("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen, Some(10));

        let c1 = h.step(vec![entry.clone()], &processes);
        let id = c1[0].id();

        let c2 = h.step(vec![], &processes);
        assert!(c2.is_empty());

        // Back before the grace period elapsed: same identity, no events.
        let c3 = h.step(vec![entry], &processes);
        assert!(c3.is_empty());
        assert_eq!(h.tracker.records()[0].id, id);
    }

    #[test]
    fn key_reuse_after_eviction_gets_new_identity() {
        let mut h = Harness::new(0);
        let processes = table_with(10, "sshd");
        let entry = raw("0.0.0.0:22", "0.0.0.0:0", ConnState::Listen, Some(10));

        let c1 = h.step(vec![entry.clone()], &processes);
        let old_id = c1[0].id();

        h.step(vec![], &processes); // evicted

        let c3 = h.step(vec![entry], &processes);
        let new_id = c3[0].id();
        assert_ne!(old_id, new_id);
        assert!(new_id > old_id);
    }

    #[test]
    fn events_order_appeared_updated_vanished_ascending() {
        let mut h = Harness::new(0);
        let processes = table_with(10, "serverd");

        let stays = raw("0.0.0.0:80", "0.0.0.0:0", ConnState::Listen, Some(10));
        let goes = raw("0.0.0.0:443", "0.0.0.0:0", ConnState::Listen, Some(10));
        h.step(vec![stays.clone(), goes.clone()], &processes);

        // One cycle that changes `stays`, drops `goes`, and adds two new keys.
        let changed = raw("0.0.0.0:80", "0.0.0.0:0", ConnState::Established, Some(10));
        let new_a = raw("0.0.0.0:8080", "0.0.0.0:0", ConnState::Listen, Some(10));
        let new_b = raw("0.0.0.0:9200", "0.0.0.0:0", ConnState::Listen, Some(10));
        let events = h.step(vec![new_b, changed, new_a], &processes);

        let phases: Vec<u8> = events.iter().map(|e| e.phase()).collect();
        assert_eq!(phases, vec![0, 0, 1, 2], "Appeared before Updated before Vanished");
        // Within the Appeared group, ascending identity.
        assert!(events[0].id() < events[1].id());
    }

    #[test]
    fn diff_is_deterministic_across_reruns() {
        let run = || {
            let mut h = Harness::new(1);
            let processes = table_with(10, "serverd");
            let a = raw("0.0.0.0:80", "0.0.0.0:0", ConnState::Listen, Some(10));
            let b = raw("10.0.0.5:51000", "203.0.113.9:445", ConnState::Established, Some(10));
            let mut all = Vec::new();
            all.extend(h.step(vec![a.clone(), b.clone()], &processes));
            all.extend(h.step(vec![b], &processes));
            all.extend(h.step(vec![], &processes));
            all.extend(h.step(vec![], &processes));
            all
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn duplicate_keys_in_one_snapshot_keep_first_row() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "serverd");
        let first = raw("0.0.0.0:80", "0.0.0.0:0", ConnState::Listen, Some(10));
        let dup = raw("0.0.0.0:80", "0.0.0.0:0", ConnState::Established, Some(10));

        let events = h.step(vec![first, dup], &processes);
        assert_eq!(events.len(), 1);
        assert_eq!(h.tracker.records()[0].state, ConnState::Listen);
    }

    #[test]
    fn enrichment_guard_rejects_stale_verdicts() {
        let mut h = Harness::new(1);
        let processes = table_with(10, "pythond");
        let c1 = h.step(vec![raw("127.0.0.1:5000", "0.0.0.0:0", ConnState::Listen, Some(10))], &processes);
        let id = c1[0].id();

        // Verdict recomputed at cycle 2; enrichment for cycle 1 must drop.
        h.step(vec![raw("127.0.0.1:5000", "0.0.0.0:0", ConnState::Established, Some(10))], &processes);
        assert!(!h.tracker.append_rationale(id, 1, "late elaboration"));
        assert!(h.tracker.append_rationale(id, 2, "fresh elaboration"));
        let record = &h.tracker.records()[0];
        let rationale = &record.verdict.as_ref().unwrap().rationale;
        assert!(rationale.contains("fresh elaboration"));
        assert!(!rationale.contains("late elaboration"));
    }
}
