use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= SPEC ============================= */

/// Exemption overrides one or more policy verdicts for workloads matching
/// a name pattern within a namespace.
///
/// Created and updated by operators; deleting an Exemption removes its
/// overrides from the index immediately, with no grace period.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "uds.dev",
    version = "v1alpha1",
    kind = "Exemption",
    plural = "exemptions",
    status = "ExemptionStatus",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionSpec {
    /// Policy exemptions applied by this resource.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemptions: Option<Vec<ExemptionElement>>,
}

/// A single exemption rule: which workloads it matches and which policies
/// it overrides.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionElement {
    /// Human-readable reason for the exemption.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Name and namespace of the workload to exempt. Regex allowed for name.
    pub matcher: Matcher,

    /// Policies this exemption overrides for matching workloads.
    pub policies: Vec<Policy>,
}

/// Workload matcher: `name` is a regular expression (a literal name is a
/// valid single-match pattern), `namespace` is an exact match.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    pub name: String,
    pub namespace: String,
}

/* ============================= POLICIES ============================= */

/// The closed set of security policies evaluated at admission time.
///
/// Wire values match the Exemption CRD (`Disallow_Privileged`, ...); report
/// entries use the CamelCase key from [`Policy::report_key`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema,
)]
pub enum Policy {
    #[serde(rename = "Disallow_Host_Namespaces")]
    DisallowHostNamespaces,
    #[serde(rename = "Disallow_NodePort_Services")]
    DisallowNodePortServices,
    #[serde(rename = "Disallow_Privileged")]
    DisallowPrivileged,
    #[serde(rename = "Disallow_SELinux_Options")]
    DisallowSELinuxOptions,
    #[serde(rename = "Drop_All_Capabilities")]
    DropAllCapabilities,
    #[serde(rename = "Require_Non_Root_User")]
    RequireNonRootUser,
    #[serde(rename = "Restrict_Capabilities")]
    RestrictCapabilities,
    #[serde(rename = "Restrict_External_Names")]
    RestrictExternalNames,
    #[serde(rename = "Restrict_HostPath_Write")]
    RestrictHostPathWrite,
    #[serde(rename = "Restrict_Host_Ports")]
    RestrictHostPorts,
    #[serde(rename = "Restrict_Proc_Mount")]
    RestrictProcMount,
    #[serde(rename = "Restrict_SELinux_Type")]
    RestrictSELinuxType,
    #[serde(rename = "Restrict_Seccomp")]
    RestrictSeccomp,
    #[serde(rename = "Restrict_Volume_Types")]
    RestrictVolumeTypes,
}

impl Policy {
    /// Key used for `results[].policy` in the published report.
    pub fn report_key(&self) -> &'static str {
        match self {
            Policy::DisallowHostNamespaces => "DisallowHostNamespaces",
            Policy::DisallowNodePortServices => "DisallowNodePortServices",
            Policy::DisallowPrivileged => "DisallowPrivileged",
            Policy::DisallowSELinuxOptions => "DisallowSELinuxOptions",
            Policy::DropAllCapabilities => "DropAllCapabilities",
            Policy::RequireNonRootUser => "RequireNonRootUser",
            Policy::RestrictCapabilities => "RestrictCapabilities",
            Policy::RestrictExternalNames => "RestrictExternalNames",
            Policy::RestrictHostPathWrite => "RestrictHostPathWrite",
            Policy::RestrictHostPorts => "RestrictHostPorts",
            Policy::RestrictProcMount => "RestrictProcMount",
            Policy::RestrictSELinuxType => "RestrictSELinuxType",
            Policy::RestrictSeccomp => "RestrictSeccomp",
            Policy::RestrictVolumeTypes => "RestrictVolumeTypes",
        }
    }
}

/* ============================= STATUS ============================= */

/// ExemptionStatus reports whether the controller accepted the exemption.
///
/// Updated by the controller after each spec change: `Ready` once all
/// matchers compiled, `Failed` if any matcher pattern is invalid.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ExemptionStatus {
    /// The `.metadata.generation` that was last processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<Phase>,
}

/// Acceptance phase of an Exemption. `Pending` is the pre-reconcile value a
/// resource may carry before its first status write; the controller itself
/// only ever publishes `Ready` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum Phase {
    Pending,
    Ready,
    Failed,
}

/* ============================= TESTS ============================= */
