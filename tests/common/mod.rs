use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

use pepr_report::crd::{Exemption, ExemptionElement, ExemptionSpec, Matcher, Policy};
use pepr_report::ingest::{PolicyEvaluation, Verdict};
use pepr_report::report::ResourceRef;

#[allow(dead_code)]
pub fn make_exemption(
    namespace: &str,
    name: &str,
    resource_version: &str,
    elements: Vec<ExemptionElement>,
) -> Exemption {
    Exemption {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some(resource_version.to_string()),
            generation: Some(1),
            ..Default::default()
        },
        spec: ExemptionSpec {
            exemptions: Some(elements),
        },
        status: None,
    }
}

#[allow(dead_code)]
pub fn element(name_pattern: &str, namespace: &str, policies: Vec<Policy>) -> ExemptionElement {
    ExemptionElement {
        description: None,
        matcher: Matcher {
            name: name_pattern.to_string(),
            namespace: namespace.to_string(),
        },
        policies,
    }
}

#[allow(dead_code)]
pub fn pod_ref(namespace: &str, name: &str) -> ResourceRef {
    ResourceRef {
        api_version: Some("v1".to_string()),
        kind: "Pod".to_string(),
        namespace: Some(namespace.to_string()),
        name: name.to_string(),
    }
}

#[allow(dead_code)]
pub fn make_evaluation(
    policy: Policy,
    namespace: &str,
    name: &str,
    verdict: Verdict,
) -> PolicyEvaluation {
    PolicyEvaluation {
        policy,
        resource: pod_ref(namespace, name),
        verdict,
    }
}
