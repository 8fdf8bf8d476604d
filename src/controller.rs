use std::sync::LazyLock;
use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::Client;
use prometheus::{IntCounter, IntCounterVec, IntGauge};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::aggregate::{ReportAggregator, ReportDelta};
use crate::crd::{Exemption, Phase};
use crate::exemptions::{ExemptionIndex, ExemptionRef};
use crate::ingest::{self, PolicyEvaluation};
use crate::server::REGISTRY;
use crate::sync::{self, FIELD_MANAGER};

/* ============================= CONFIG ============================= */

/// Default per-attempt budget for one sync pass against the cluster API,
/// overridable via `--sync-timeout-secs`. A slow or failing API must not
/// starve the event queue; on expiry the loop moves on and the next event
/// retries from scratch.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/* ============================= PROMETHEUS ============================= */

static EVENTS_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("pepr_report_events_total", "Reconcile events processed by kind"),
        &["kind"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static SYNC_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "pepr_report_sync_errors_total",
        "Report sync attempts that failed or timed out",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

static POLICIES_TRACKED: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "pepr_report_policies_tracked",
        "Distinct policies currently aggregated into the report",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

static EXEMPTIONS_ACTIVE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "pepr_report_exemptions_active",
        "Exemption resources currently indexed",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/// Force-init so all metrics appear on /metrics before the first event.
pub fn init_metrics() {
    LazyLock::force(&EVENTS_TOTAL);
    LazyLock::force(&SYNC_ERRORS);
    LazyLock::force(&POLICIES_TRACKED);
    LazyLock::force(&EXEMPTIONS_ACTIVE);
}

/* ============================= EVENTS ============================= */

/// Everything that can mutate controller state, serialized into one queue.
/// Producers (the exemption watcher, the ingest HTTP server) only enqueue.
#[derive(Debug)]
pub enum ReconcileEvent {
    ExemptionApplied(Box<Exemption>),
    ExemptionDeleted(ExemptionRef),
    /// Full re-list after a watch restart; replaces the whole index.
    ExemptionsResynced(Vec<Exemption>),
    Evaluation(PolicyEvaluation),
}

impl ReconcileEvent {
    fn kind_label(&self) -> &'static str {
        match self {
            ReconcileEvent::ExemptionApplied(_) => "exemption_applied",
            ReconcileEvent::ExemptionDeleted(_) => "exemption_deleted",
            ReconcileEvent::ExemptionsResynced(_) => "exemptions_resynced",
            ReconcileEvent::Evaluation(_) => "evaluation",
        }
    }
}

/// Status write-back for an Exemption, produced by the state machine and
/// performed by the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub exemption: ExemptionRef,
    pub phase: Phase,
    pub observed_generation: Option<i64>,
}

/// What processing one event asks the loop to do.
#[derive(Debug, Default)]
pub struct Outcome {
    pub sync_needed: bool,
    pub status_update: Option<StatusUpdate>,
}

/* ============================= STATE ============================= */

/// Exemption index plus report aggregator, mutated only from the single
/// consumer loop. All transitions are synchronous and free of I/O so they
/// can be tested directly.
#[derive(Debug, Default)]
pub struct ControllerState {
    pub index: ExemptionIndex,
    pub aggregator: ReportAggregator,
}

impl ControllerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&mut self, event: ReconcileEvent) -> Outcome {
        let outcome = match event {
            ReconcileEvent::ExemptionApplied(exemption) => self.apply_exemption(&exemption),
            ReconcileEvent::ExemptionDeleted(exemption_ref) => {
                let removed = self.index.remove(&exemption_ref);
                if removed {
                    info!(exemption = %exemption_ref.provenance(), "exemption_removed");
                }
                Outcome {
                    sync_needed: removed,
                    status_update: None,
                }
            }
            ReconcileEvent::ExemptionsResynced(exemptions) => {
                let failures = self.index.rebuild(exemptions.iter());
                for failure in &failures {
                    warn!(error = %failure, "exemption_pattern_rejected");
                }
                info!(active = self.index.len(), "exemption_index_rebuilt");
                Outcome {
                    sync_needed: true,
                    status_update: None,
                }
            }
            ReconcileEvent::Evaluation(evaluation) => match ingest::ingest(evaluation, &self.index)
            {
                Ok(aggregation_event) => {
                    let delta = self.aggregator.apply(aggregation_event);
                    Outcome {
                        sync_needed: delta == ReportDelta::Updated,
                        status_update: None,
                    }
                }
                Err(e) => {
                    // Malformed evaluations are dropped, never retried
                    warn!(error = %e, "evaluation_dropped");
                    Outcome::default()
                }
            },
        };

        // No exemptions → no report; the aggregate is re-derivable from a
        // fresh exemption list plus re-evaluation, so discard it with the
        // report and nothing stale can resurface.
        if self.index.is_empty() && self.aggregator.tracked_policies() > 0 {
            self.aggregator.reset();
        }

        outcome
    }

    fn apply_exemption(&mut self, exemption: &Exemption) -> Outcome {
        let exemption_ref = ExemptionRef::from_resource(exemption);
        let observed_generation = exemption.metadata.generation;

        match self.index.upsert(exemption) {
            Ok(rules) => {
                info!(
                    exemption = %exemption_ref.provenance(),
                    rules,
                    "exemption_applied"
                );
                Outcome {
                    sync_needed: true,
                    status_update: Some(StatusUpdate {
                        exemption: exemption_ref,
                        phase: Phase::Ready,
                        observed_generation,
                    }),
                }
            }
            Err(e) => {
                warn!(error = %e, "exemption_pattern_rejected");
                Outcome {
                    sync_needed: true,
                    status_update: Some(StatusUpdate {
                        exemption: exemption_ref,
                        phase: Phase::Failed,
                        observed_generation,
                    }),
                }
            }
        }
    }
}

/* ============================= EVENT LOOP ============================= */

/// The single consumer: applies events in arrival order, writes Exemption
/// status phases back, and drives report sync under a per-attempt timeout.
/// On shutdown the queue is drained and one final sync runs; events enqueued
/// after drain begins are dropped.
pub async fn run_event_loop(
    client: Client,
    mut events: mpsc::Receiver<ReconcileEvent>,
    mut shutdown: broadcast::Receiver<()>,
    sync_timeout: Duration,
) -> anyhow::Result<()> {
    let mut state = ControllerState::new();
    init_metrics();

    loop {
        tokio::select! {
            maybe_event = events.recv() => {
                match maybe_event {
                    Some(event) => process_event(&client, &mut state, event, sync_timeout).await,
                    None => break,
                }
            }
            _ = shutdown.recv() => {
                let mut drained = 0usize;
                while let Ok(event) = events.try_recv() {
                    process_event(&client, &mut state, event, sync_timeout).await;
                    drained += 1;
                }
                info!(drained, "event_queue_drained");
                sync_now(&client, &state, sync_timeout).await;
                break;
            }
        }
    }

    info!("event_loop_stopped");
    Ok(())
}

async fn process_event(
    client: &Client,
    state: &mut ControllerState,
    event: ReconcileEvent,
    sync_timeout: Duration,
) {
    EVENTS_TOTAL.with_label_values(&[event.kind_label()]).inc();

    let outcome = state.handle(event);

    if let Some(update) = outcome.status_update {
        write_exemption_status(client, &update).await;
    }

    if outcome.sync_needed {
        sync_now(client, state, sync_timeout).await;
    }

    POLICIES_TRACKED.set(state.aggregator.tracked_policies() as i64);
    EXEMPTIONS_ACTIVE.set(state.index.len() as i64);
}

async fn sync_now(client: &Client, state: &ControllerState, sync_timeout: Duration) {
    let snapshot = state.aggregator.snapshot();
    let sources = state.index.active_sources();

    match timeout(
        sync_timeout,
        sync::reconcile(client, &snapshot, state.index.is_empty(), &sources),
    )
    .await
    {
        Ok(Ok(outcome)) => {
            let stamp = chrono::Utc::now().format("%H:%M:%S");
            println!(
                "[{stamp}] report {outcome:?}: {policies} policies, {exemptions} exemptions",
                policies = state.aggregator.tracked_policies(),
                exemptions = state.index.len(),
            );
        }
        Ok(Err(e)) => {
            SYNC_ERRORS.inc();
            warn!(error = %e, "report_sync_failed");
        }
        Err(_) => {
            SYNC_ERRORS.inc();
            warn!(timeout_secs = sync_timeout.as_secs(), "report_sync_timeout");
        }
    }
}

async fn write_exemption_status(client: &Client, update: &StatusUpdate) {
    let api: Api<Exemption> = Api::namespaced(client.clone(), &update.exemption.namespace);

    let status_patch = serde_json::json!({
        "status": {
            "phase": update.phase,
            "observedGeneration": update.observed_generation,
        }
    });

    let result = api
        .patch_status(
            &update.exemption.name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status_patch),
        )
        .await;

    match result {
        Ok(_) => info!(
            exemption = %update.exemption.provenance(),
            phase = ?update.phase,
            "exemption_status_updated"
        ),
        // Status write-back is best effort; the index already reflects the
        // resource's spec
        Err(e) => warn!(
            exemption = %update.exemption.provenance(),
            error = %e,
            "exemption_status_update_failed"
        ),
    }
}

/* ============================= TESTS ============================= */
