use std::collections::BTreeMap;

use kube::api::{Api, DeleteParams, Patch, PatchParams, PostParams};
use kube::Client;
use thiserror::Error;
use tracing::{info, warn};

use crate::aggregate::ReportSnapshot;
use crate::report::{ClusterPolicyReport, REPORT_NAME, SOURCE_ANNOTATION};

/* ============================= CONFIG ============================= */

/// Bounded retry budget for resourceVersion conflicts. Exhaustion surfaces a
/// reconciliation failure; the next event retries from scratch.
pub const MAX_CONFLICT_ATTEMPTS: usize = 3;

pub const FIELD_MANAGER: &str = "pepr-report-controller";

/* ============================= TYPES ============================= */

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("report write conflicted {attempts} times; leaving last-known-good state")]
    Conflict { attempts: usize },

    #[error("cluster API error: {0}")]
    Api(#[from] kube::Error),
}

/// What a reconcile pass did to the persisted resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Created,
    Patched,
    Deleted,
    /// Desired state already persisted; no write issued.
    Unchanged,
    /// Index empty and no report exists; nothing to delete.
    Absent,
}

/* ============================= BUILD ============================= */

/// Materialize the snapshot as the desired persisted resource: fixed name,
/// engine label, and the active exemption sources annotation.
pub fn build_report(snapshot: &ReportSnapshot, sources: &[String]) -> ClusterPolicyReport {
    let mut report = ClusterPolicyReport::empty();
    report.metadata.annotations = Some(BTreeMap::from([(
        SOURCE_ANNOTATION.to_string(),
        sources.join(","),
    )]));
    report.summary = snapshot.summary;
    report.results = snapshot.results.clone();
    report
}

/// Whether the persisted report differs from the desired one in any field we
/// own. Applying the same snapshot twice must produce no further mutation.
pub fn needs_update(current: &ClusterPolicyReport, desired: &ClusterPolicyReport) -> bool {
    if current.summary != desired.summary || current.results != desired.results {
        return true;
    }
    annotation(current) != annotation(desired)
}

fn annotation(report: &ClusterPolicyReport) -> Option<&str> {
    report
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(SOURCE_ANNOTATION))
        .map(String::as_str)
}

/* ============================= RECONCILE ============================= */

/// Reconcile the aggregator snapshot against the persisted report.
///
/// With no exemptions in the cluster the report is deleted unconditionally,
/// even when non-exemption Fail results exist. Otherwise the report is
/// created on first need and merge-patched on change, with a fresh
/// read-merge-write cycle per conflicted attempt.
pub async fn reconcile(
    client: &Client,
    snapshot: &ReportSnapshot,
    index_empty: bool,
    sources: &[String],
) -> Result<SyncOutcome, SyncError> {
    let api: Api<ClusterPolicyReport> = Api::all(client.clone());

    if index_empty {
        let outcome = delete_if_present(&api).await?;
        log_sync_outcome(outcome);
        return Ok(outcome);
    }

    let desired = build_report(snapshot, sources);

    for attempt in 1..=MAX_CONFLICT_ATTEMPTS {
        match try_upsert(&api, &desired).await {
            Ok(outcome) => {
                log_sync_outcome(outcome);
                return Ok(outcome);
            }
            Err(kube::Error::Api(e)) if e.code == 409 => {
                warn!(attempt, "report_write_conflict");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Err(SyncError::Conflict {
        attempts: MAX_CONFLICT_ATTEMPTS,
    })
}

/// Emit the structured signal external tooling polls for. The JSON formatter
/// serializes the event text as `fields.message`, so the polled string is
/// carried in an explicit `msg` field: `"msg":"pepr-report updated"`.
fn log_sync_outcome(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Created | SyncOutcome::Patched => {
            info!(msg = "pepr-report updated", outcome = ?outcome, "report synced");
        }
        SyncOutcome::Deleted => {
            info!(msg = "pepr-report deleted", "report synced");
        }
        SyncOutcome::Unchanged | SyncOutcome::Absent => {}
    }
}

async fn try_upsert(
    api: &Api<ClusterPolicyReport>,
    desired: &ClusterPolicyReport,
) -> Result<SyncOutcome, kube::Error> {
    match api.get(REPORT_NAME).await {
        Ok(current) => {
            if !needs_update(&current, desired) {
                return Ok(SyncOutcome::Unchanged);
            }
            let patch = serde_json::json!({
                "metadata": { "annotations": desired.metadata.annotations },
                "summary": desired.summary,
                "results": desired.results,
            });
            api.patch(
                REPORT_NAME,
                &PatchParams::apply(FIELD_MANAGER),
                &Patch::Merge(&patch),
            )
            .await?;
            Ok(SyncOutcome::Patched)
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            api.create(&PostParams::default(), desired).await?;
            Ok(SyncOutcome::Created)
        }
        Err(e) => Err(e),
    }
}

async fn delete_if_present(api: &Api<ClusterPolicyReport>) -> Result<SyncOutcome, SyncError> {
    match api.delete(REPORT_NAME, &DeleteParams::default()).await {
        Ok(_) => Ok(SyncOutcome::Deleted),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(SyncOutcome::Absent),
        Err(e) => Err(e.into()),
    }
}

/* ============================= TESTS ============================= */
