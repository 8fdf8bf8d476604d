use std::borrow::Cow;
use std::collections::BTreeMap;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::core::ClusterResourceScope;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= CONSTANTS ============================= */

/// Fixed name of the singleton report resource.
pub const REPORT_NAME: &str = "pepr-report";

/// Required label identifying the producing policy engine.
pub const ENGINE_LABEL: &str = "policy.kubernetes.io/engine";
pub const ENGINE_NAME: &str = "pepr";

/// Annotation recording which exemptions the current report was built from.
pub const SOURCE_ANNOTATION: &str = "uds.dev/exemption-sources";

/// Result property key carrying exemption provenance (`<namespace>:<name>`).
pub const EXEMPTION_PROPERTY: &str = "exemptionResourceProperty";

pub const REPORT_GROUP: &str = "wgpolicyk8s.io";
pub const REPORT_VERSION: &str = "v1alpha2";

/* ============================= TYPES ============================= */

/// Identity of a cluster resource that produced a policy verdict.
///
/// Dedup identity is the full tuple `(apiVersion, kind, namespace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
}

/// Per-policy result bucket, lowercase on the wire per the wgpolicyk8s
/// report schema.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    #[default]
    Pass,
    Fail,
    Warn,
    Error,
    Skip,
}

/// One entry in `results[]`: a policy's current verdict plus every distinct
/// resource that produced it, in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ReportResult {
    pub policy: String,
    pub result: ResultStatus,
    #[serde(default)]
    pub resources: Vec<ResourceRef>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, String>,
}

/// Policy-level counts: each tracked policy contributes exactly one unit to
/// exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReportSummary {
    pub pass: i64,
    pub fail: i64,
    pub warn: i64,
    pub error: i64,
    pub skip: i64,
}

impl ReportSummary {
    pub fn total(&self) -> i64 {
        self.pass + self.fail + self.warn + self.error + self.skip
    }
}

/* ============================= RESOURCE ============================= */

/// ClusterPolicyReport (`wgpolicyk8s.io/v1alpha2`), cluster-scoped.
///
/// This is a foreign CRD with `summary`/`results` at the top level rather
/// than under `spec`, so the kube `Resource` impl is written by hand instead
/// of through the `CustomResource` derive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicyReport {
    #[serde(default = "ClusterPolicyReport::default_api_version")]
    pub api_version: String,
    #[serde(default = "ClusterPolicyReport::default_kind")]
    pub kind: String,
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub summary: ReportSummary,
    #[serde(default)]
    pub results: Vec<ReportResult>,
}

impl ClusterPolicyReport {
    fn default_api_version() -> String {
        format!("{REPORT_GROUP}/{REPORT_VERSION}")
    }

    fn default_kind() -> String {
        "ClusterPolicyReport".to_string()
    }

    /// An empty report with the fixed name and required engine label.
    pub fn empty() -> Self {
        let labels = BTreeMap::from([(ENGINE_LABEL.to_string(), ENGINE_NAME.to_string())]);
        ClusterPolicyReport {
            api_version: Self::default_api_version(),
            kind: Self::default_kind(),
            metadata: ObjectMeta {
                name: Some(REPORT_NAME.to_string()),
                labels: Some(labels),
                ..Default::default()
            },
            summary: ReportSummary::default(),
            results: Vec::new(),
        }
    }
}

impl kube::Resource for ClusterPolicyReport {
    type DynamicType = ();
    type Scope = ClusterResourceScope;

    fn kind(_: &()) -> Cow<'_, str> {
        "ClusterPolicyReport".into()
    }

    fn group(_: &()) -> Cow<'_, str> {
        REPORT_GROUP.into()
    }

    fn version(_: &()) -> Cow<'_, str> {
        REPORT_VERSION.into()
    }

    fn plural(_: &()) -> Cow<'_, str> {
        "clusterpolicyreports".into()
    }

    fn meta(&self) -> &ObjectMeta {
        &self.metadata
    }

    fn meta_mut(&mut self) -> &mut ObjectMeta {
        &mut self.metadata
    }
}

/* ============================= TESTS ============================= */
