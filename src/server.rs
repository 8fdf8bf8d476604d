use std::sync::LazyLock;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use prometheus::{Encoder, IntCounterVec, Registry, TextEncoder};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::info;

use crate::controller::ReconcileEvent;
use crate::ingest::PolicyEvaluation;

/* ============================= PROMETHEUS ============================= */

/// Process-wide registry; the controller loop registers its metrics here and
/// this server exposes them on /metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

static INGEST_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "pepr_report_ingest_requests_total",
            "Evaluation ingest requests by outcome",
        ),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/* ============================= STATE ============================= */

#[derive(Clone)]
pub struct IngestState {
    pub events: mpsc::Sender<ReconcileEvent>,
}

/// Evaluation boundary accepts a single record or a batch: admission checks
/// evaluate several policies per resource in one shot.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EvaluationBody {
    One(PolicyEvaluation),
    Many(Vec<PolicyEvaluation>),
}

impl EvaluationBody {
    fn into_vec(self) -> Vec<PolicyEvaluation> {
        match self {
            EvaluationBody::One(evaluation) => vec![evaluation],
            EvaluationBody::Many(evaluations) => evaluations,
        }
    }
}

/* ============================= ROUTER ============================= */

pub fn build_ingest_router(state: IngestState) -> Router {
    Router::new()
        .route("/evaluations", post(evaluations_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "READY") }))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn evaluations_handler(
    State(state): State<IngestState>,
    body: String,
) -> impl IntoResponse {
    let parsed: EvaluationBody = match serde_json::from_str(&body) {
        Ok(b) => b,
        Err(e) => {
            INGEST_REQUESTS.with_label_values(&["rejected"]).inc();
            info!(error = %e, "invalid_evaluation_body");
            return (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "error": format!("invalid evaluation body: {e}") }).to_string(),
            );
        }
    };

    let evaluations = parsed.into_vec();
    let mut accepted = 0usize;
    for evaluation in evaluations {
        if state
            .events
            .send(ReconcileEvent::Evaluation(evaluation))
            .await
            .is_err()
        {
            // Consumer gone; the process is shutting down
            INGEST_REQUESTS.with_label_values(&["rejected"]).inc();
            return (
                StatusCode::SERVICE_UNAVAILABLE,
                serde_json::json!({ "error": "controller is not accepting events" }).to_string(),
            );
        }
        accepted += 1;
    }

    INGEST_REQUESTS.with_label_values(&["accepted"]).inc();
    (
        StatusCode::ACCEPTED,
        serde_json::json!({ "accepted": accepted }).to_string(),
    )
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::Policy;
    use crate::ingest::Verdict;

    #[test]
    fn test_single_evaluation_body_parses() {
        let json = r#"{
            "policy": "Disallow_Privileged",
            "resource": {"kind":"Pod","namespace":"demo","name":"p"},
            "verdict": "Fail"
        }"#;
        let body: EvaluationBody = serde_json::from_str(json).unwrap();
        let evaluations = body.into_vec();
        assert_eq!(evaluations.len(), 1);
        assert_eq!(evaluations[0].policy, Policy::DisallowPrivileged);
    }

    #[test]
    fn test_batch_evaluation_body_parses() {
        let json = r#"[
            {"policy":"Disallow_Privileged","resource":{"kind":"Pod","name":"p"},"verdict":"Fail"},
            {"policy":"Restrict_Seccomp","resource":{"kind":"Pod","name":"p"},"verdict":"Pass"}
        ]"#;
        let body: EvaluationBody = serde_json::from_str(json).unwrap();
        let evaluations = body.into_vec();
        assert_eq!(evaluations.len(), 2);
        assert_eq!(evaluations[1].verdict, Verdict::Pass);
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(serde_json::from_str::<EvaluationBody>("not json").is_err());
        assert!(serde_json::from_str::<EvaluationBody>(r#"{"policy":"Nope"}"#).is_err());
    }
}
