//! The polling scheduler: owns the connection table, drives the
//! sample -> resolve -> diff -> correlate -> evaluate pipeline on a fixed
//! cadence, and publishes immutable snapshots to consumers.
//!
//! Publication is a latest-value slot (`tokio::sync::watch` carrying an
//! `Arc<TableSnapshot>`): slow readers never block the cycle, they just see
//! the newest publication when they catch up. Cycles are strictly
//! sequential; the explainer is the only operation allowed to outlive a
//! cycle, and it runs in detached tasks bounded by a hard timeout.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use sockeye_core::config::{Config, ConfigError};
use sockeye_core::heuristics::explainer::{ExplainError, Explainer};
use sockeye_core::heuristics::{HeuristicEngine, Verdict};
use sockeye_core::{ConnectionId, ConnectionRecord, LifecycleEvent, SourceHealth, TableSnapshot};

use crate::correlate::ProcessTable;
use crate::diff::ConnectionTracker;
use crate::identity::IdentityResolver;
use crate::snapshot::{SnapshotError, SnapshotSource};

/// Bounded ring of recent lifecycle events, oldest dropped first.
#[derive(Debug)]
pub struct EventLog {
    ring: VecDeque<LifecycleEvent>,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub fn push_all(&mut self, events: &[LifecycleEvent]) {
        for event in events {
            self.ring.push_back(event.clone());
        }
        while self.ring.len() > self.capacity {
            self.ring.pop_front();
        }
    }

    /// Up to `n` most recent events, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LifecycleEvent> {
        let skip = self.ring.len().saturating_sub(n);
        self.ring.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

/// Explainer output routed back to the polling task.
struct Enrichment {
    id: ConnectionId,
    verdict_cycle: u64,
    text: String,
}

/// Read-side surface handed to consumers.
///
/// Cheap to clone; every method is non-blocking with respect to the
/// polling cycle.
#[derive(Clone)]
pub struct MonitorHandle {
    snapshot_rx: watch::Receiver<Arc<TableSnapshot>>,
    events: Arc<Mutex<EventLog>>,
    engine: Arc<HeuristicEngine>,
}

impl MonitorHandle {
    /// Subscribe to table publications.
    pub fn subscribe(&self) -> watch::Receiver<Arc<TableSnapshot>> {
        self.snapshot_rx.clone()
    }

    /// The most recent publication.
    pub fn latest(&self) -> Arc<TableSnapshot> {
        self.snapshot_rx.borrow().clone()
    }

    /// Up to `n` most recent lifecycle events across cycles, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<LifecycleEvent> {
        self.events.lock().expect("event log lock poisoned").recent(n)
    }

    /// Re-evaluate one record on demand, outside the eager path.
    ///
    /// Pure: runs the rule list against the record as last published and
    /// returns the verdict without touching the table.
    pub fn evaluate(&self, id: ConnectionId) -> Option<Verdict> {
        let snapshot = self.latest();
        snapshot.get(id).map(|record| self.engine.evaluate(record))
    }
}

/// The polling scheduler. Construct with [`Poller::new`], then [`Poller::spawn`].
pub struct Poller {
    config: Config,
    source: Box<dyn SnapshotSource>,
    explainer: Option<Arc<dyn Explainer>>,
    engine: Arc<HeuristicEngine>,
    tracker: ConnectionTracker,
    resolver: IdentityResolver,
    events: Arc<Mutex<EventLog>>,
    snapshot_tx: watch::Sender<Arc<TableSnapshot>>,
    enrich_tx: mpsc::Sender<Enrichment>,
    enrich_rx: mpsc::Receiver<Enrichment>,
    explain_slots: Arc<Semaphore>,
    cycle: u64,
    last_success: Option<DateTime<Utc>>,
    failed_cycles: u32,
}

impl Poller {
    /// Build a poller and its consumer handle.
    ///
    /// Validates the configuration first; an invalid config is fatal here,
    /// before any cycle runs.
    pub fn new(
        config: Config,
        source: Box<dyn SnapshotSource>,
        explainer: Option<Arc<dyn Explainer>>,
    ) -> Result<(Self, MonitorHandle), ConfigError> {
        config.validate()?;
        let engine = Arc::new(HeuristicEngine::from_config(&config.rules)?);
        let events = Arc::new(Mutex::new(EventLog::new(config.event_log_capacity)));
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(TableSnapshot::empty()));
        let (enrich_tx, enrich_rx) = mpsc::channel(64);
        let explain_slots = Arc::new(Semaphore::new(config.explainer.max_in_flight));

        let handle = MonitorHandle {
            snapshot_rx,
            events: events.clone(),
            engine: engine.clone(),
        };
        let poller = Self {
            tracker: ConnectionTracker::new(config.grace_cycles),
            resolver: IdentityResolver::new(),
            config,
            source,
            explainer,
            engine,
            events,
            snapshot_tx,
            enrich_tx,
            enrich_rx,
            explain_slots,
            cycle: 0,
            last_success: None,
            failed_cycles: 0,
        };
        Ok((poller, handle))
    }

    /// Spawn the polling task. Returns its join handle and a shutdown flag;
    /// send `true` to stop the loop.
    pub fn spawn(self) -> (JoinHandle<()>, watch::Sender<bool>) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(self.run(shutdown_rx));
        (handle, shutdown_tx)
    }

    async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.poll_interval_ms,
            grace_cycles = self.config.grace_cycles,
            rules = ?self.engine.rule_names(),
            explainer = self.explainer.is_some(),
            "poller started"
        );
        let mut interval = tokio::time::interval(self.config.poll_interval());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.run_cycle();
                }
                Some(enrichment) = self.enrich_rx.recv() => {
                    self.apply_enrichment(enrichment);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        trace!("poller shut down");
    }

    /// One sampling cycle. Never panics the loop: a failed snapshot keeps
    /// the previous table and surfaces a stale-health publication.
    fn run_cycle(&mut self) {
        self.cycle += 1;
        let now = Utc::now();

        let sockets = match self.source.list_sockets() {
            Ok(sockets) => sockets,
            Err(err) => {
                self.record_failure(err);
                return;
            }
        };
        let processes = match self.source.list_processes() {
            Ok(list) => ProcessTable::new(list),
            Err(SnapshotError::PermissionDenied) => {
                // Sockets are readable but processes are not: degrade
                // correlation rather than the whole cycle.
                debug!(cycle = self.cycle, "process table unreadable, correlation degraded");
                ProcessTable::degraded()
            }
            Err(err) => {
                self.record_failure(err);
                return;
            }
        };

        let socket_count = sockets.len();
        let events = self.tracker.apply(
            self.cycle,
            now,
            sockets,
            &processes,
            &mut self.resolver,
            &self.engine,
        );
        self.last_success = Some(now);
        self.failed_cycles = 0;

        debug!(
            cycle = self.cycle,
            sockets = socket_count,
            tracked = self.tracker.len(),
            events = events.len(),
            "cycle complete"
        );

        self.request_explanations(&events);
        self.publish(events, SourceHealth::Fresh { last_success: now });
    }

    fn record_failure(&mut self, err: SnapshotError) {
        self.failed_cycles += 1;
        warn!(
            cycle = self.cycle,
            failed_cycles = self.failed_cycles,
            error = %err,
            "snapshot failed, retaining previous table"
        );
        let health = SourceHealth::Stale {
            last_success: self.last_success,
            failed_cycles: self.failed_cycles,
            error: err.to_string(),
        };
        self.publish(Vec::new(), health);
    }

    fn publish(&mut self, events: Vec<LifecycleEvent>, health: SourceHealth) {
        self.events
            .lock()
            .expect("event log lock poisoned")
            .push_all(&events);
        let snapshot = TableSnapshot {
            cycle: self.cycle,
            records: self.tracker.records(),
            events,
            health,
        };
        // Send only fails when every receiver is gone; the poller keeps
        // running so late subscribers can attach through the handle.
        let _ = self.snapshot_tx.send(Arc::new(snapshot));
    }

    /// Kick off best-effort explanations for this cycle's new verdicts.
    fn request_explanations(&self, events: &[LifecycleEvent]) {
        let Some(explainer) = self.explainer.as_ref().filter(|_| self.config.explainer.enabled) else {
            return;
        };

        for event in events {
            let record = match event {
                LifecycleEvent::Appeared(record) => record,
                LifecycleEvent::Updated { new, .. } => new.as_ref(),
                LifecycleEvent::Vanished { .. } => continue,
            };
            let Some(base) = record.verdict.clone() else {
                continue;
            };
            let permit = match self.explain_slots.clone().try_acquire_owned() {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(id = %record.id, "explainer saturated, skipping");
                    continue;
                }
            };

            let explainer = explainer.clone();
            let record = record.clone();
            let timeout = self.config.explainer_timeout();
            let verdict_cycle = self.cycle;
            let tx = self.enrich_tx.clone();
            tokio::spawn(async move {
                let _permit = permit;
                let outcome = match tokio::time::timeout(timeout, explainer.explain(&record, &base)).await {
                    Err(_) => Err(ExplainError::Timeout),
                    Ok(result) => result,
                };
                match outcome {
                    Ok(text) if !text.trim().is_empty() => {
                        let _ = tx
                            .send(Enrichment {
                                id: record.id,
                                verdict_cycle,
                                text,
                            })
                            .await;
                    }
                    Ok(_) => debug!(id = %record.id, "explainer returned empty text, keeping rule rationale"),
                    Err(err) => debug!(id = %record.id, error = %err, "explanation skipped"),
                }
            });
        }
    }

    fn apply_enrichment(&mut self, enrichment: Enrichment) {
        let applied = self.tracker.append_rationale(
            enrichment.id,
            enrichment.verdict_cycle,
            &enrichment.text,
        );
        if applied {
            trace!(id = %enrichment.id, "rationale enriched");
        } else {
            trace!(id = %enrichment.id, "enrichment arrived late, dropped");
        }
    }
}

/// Ask an explainer for elaboration under the caller's deadline.
///
/// Standalone variant of the enrichment path for callers that hold a
/// record and want an explanation inline.
pub async fn explain_with_timeout(
    explainer: &dyn Explainer,
    timeout: std::time::Duration,
    record: &ConnectionRecord,
    base: &Verdict,
) -> Result<String, ExplainError> {
    match tokio::time::timeout(timeout, explainer.explain(record, base)).await {
        Err(_) => Err(ExplainError::Timeout),
        Ok(result) => result,
    }
}
