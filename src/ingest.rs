use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crd::Policy;
use crate::exemptions::{ExemptionIndex, ExemptionRef};
use crate::report::{ResourceRef, ResultStatus};

/* ============================= TYPES ============================= */

/// Raw outcome of one policy check against one resource, prior to exemption
/// adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Verdict {
    Pass,
    Fail,
}

/// One evaluation record from the admission collaborator. Ephemeral, never
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct PolicyEvaluation {
    pub policy: Policy,
    pub resource: ResourceRef,
    pub verdict: Verdict,
}

/// Normalized event consumed by the aggregator. This is the sole mutation
/// entry point into aggregation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationEvent {
    pub policy: Policy,
    pub status: ResultStatus,
    pub resource: Option<ResourceRef>,
    pub exempted_by: Option<ExemptionRef>,
}

/// Rejected evaluations are dropped and logged, never retried.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("malformed evaluation: resource kind is empty")]
    MissingKind,
    #[error("malformed evaluation: resource name is empty")]
    MissingName,
}

/* ============================= CLASSIFICATION ============================= */

/// Validate an evaluation and classify it against the exemption index.
///
/// A failing check covered by an exemption is still recorded as `Fail`:
/// exemptions annotate the report with provenance, they do not silence it.
/// Pass verdicts are recorded with no resource so the policy counts toward
/// `summary.pass` without accumulating a resource list.
pub fn ingest(
    evaluation: PolicyEvaluation,
    index: &ExemptionIndex,
) -> Result<AggregationEvent, IngestError> {
    validate(&evaluation.resource)?;

    let event = match evaluation.verdict {
        Verdict::Pass => AggregationEvent {
            policy: evaluation.policy,
            status: ResultStatus::Pass,
            resource: None,
            exempted_by: None,
        },
        Verdict::Fail => {
            let exempted_by = index.lookup(&evaluation.resource, evaluation.policy);
            AggregationEvent {
                policy: evaluation.policy,
                status: ResultStatus::Fail,
                resource: Some(evaluation.resource),
                exempted_by,
            }
        }
    };
    Ok(event)
}

fn validate(resource: &ResourceRef) -> Result<(), IngestError> {
    if resource.kind.is_empty() {
        return Err(IngestError::MissingKind);
    }
    if resource.name.is_empty() {
        return Err(IngestError::MissingName);
    }
    Ok(())
}

/* ============================= TESTS ============================= */
