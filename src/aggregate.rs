use std::collections::BTreeMap;

use crate::crd::Policy;
use crate::ingest::AggregationEvent;
use crate::report::{
    ReportResult, ReportSummary, ResourceRef, ResultStatus, EXEMPTION_PROPERTY,
};

/* ============================= TYPES ============================= */

/// Accumulated state for one policy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyResultState {
    pub status: ResultStatus,
    /// Distinct resources behind the current verdict, insertion order kept.
    pub resources: Vec<ResourceRef>,
    pub properties: BTreeMap<String, String>,
}

/// Whether an applied event changed the aggregate. `Unchanged` lets the
/// controller skip a sync for duplicate deliveries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportDelta {
    Unchanged,
    Updated,
}

/// Pure read of the aggregate, ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSnapshot {
    pub summary: ReportSummary,
    pub results: Vec<ReportResult>,
}

/* ============================= AGGREGATOR ============================= */

/// In-memory per-cluster map from policy to accumulated result. The single
/// writable copy of report state; Report Sync treats it as the source of
/// truth and never reads back from the cluster.
#[derive(Debug, Default)]
pub struct ReportAggregator {
    policies: BTreeMap<Policy, PolicyResultState>,
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge one event. Idempotent: re-applying an event the state already
    /// reflects returns `Unchanged`.
    pub fn apply(&mut self, event: AggregationEvent) -> ReportDelta {
        let incoming_properties = event
            .exempted_by
            .map(|exemption| {
                BTreeMap::from([(EXEMPTION_PROPERTY.to_string(), exemption.provenance())])
            })
            .unwrap_or_default();

        let is_new_policy = !self.policies.contains_key(&event.policy);
        let state = self.policies.entry(event.policy).or_default();

        if event.status != state.status {
            state.status = event.status;
            match event.status {
                ResultStatus::Pass => {
                    state.resources.clear();
                    state.properties.clear();
                }
                _ => {
                    state.resources = event.resource.into_iter().collect();
                    state.properties = incoming_properties;
                }
            }
            return ReportDelta::Updated;
        }

        // Same status. A Pass duplicate carries nothing new; a new tracked
        // policy still changes the summary.
        if event.status == ResultStatus::Pass {
            return if is_new_policy {
                ReportDelta::Updated
            } else {
                ReportDelta::Unchanged
            };
        }

        let mut delta = ReportDelta::Unchanged;

        if let Some(resource) = event.resource {
            if !state.resources.contains(&resource) {
                state.resources.push(resource);
                delta = ReportDelta::Updated;
            }
        }

        for (key, value) in incoming_properties {
            if state.properties.get(&key) != Some(&value) {
                state.properties.insert(key, value);
                delta = ReportDelta::Updated;
            }
        }

        delta
    }

    /// Number of distinct policies ever observed.
    pub fn tracked_policies(&self) -> usize {
        self.policies.len()
    }

    /// Discard all accumulated state. Called when the exemption index
    /// empties: the report is deleted and state is re-derivable from a fresh
    /// exemption list plus re-evaluation.
    pub fn reset(&mut self) {
        self.policies.clear();
    }

    /// Pure read. Summary counts every tracked policy into exactly one
    /// bucket; `results` carries only policies with a non-default outcome
    /// (anything other than an unexempted Pass).
    pub fn snapshot(&self) -> ReportSnapshot {
        let mut summary = ReportSummary::default();
        let mut results = Vec::new();

        for (policy, state) in &self.policies {
            match state.status {
                ResultStatus::Pass => summary.pass += 1,
                ResultStatus::Fail => summary.fail += 1,
                ResultStatus::Warn => summary.warn += 1,
                ResultStatus::Error => summary.error += 1,
                ResultStatus::Skip => summary.skip += 1,
            }

            if state.status != ResultStatus::Pass || !state.properties.is_empty() {
                results.push(ReportResult {
                    policy: policy.report_key().to_string(),
                    result: state.status,
                    resources: state.resources.clone(),
                    properties: state.properties.clone(),
                });
            }
        }

        ReportSnapshot { summary, results }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exemptions::ExemptionRef;

    fn pod_ref(namespace: &str, name: &str) -> ResourceRef {
        ResourceRef {
            api_version: Some("v1".to_string()),
            kind: "Pod".to_string(),
            namespace: Some(namespace.to_string()),
            name: name.to_string(),
        }
    }

    fn fail_event(policy: Policy, resource: ResourceRef) -> AggregationEvent {
        AggregationEvent {
            policy,
            status: ResultStatus::Fail,
            resource: Some(resource),
            exempted_by: None,
        }
    }

    fn exempt_fail_event(
        policy: Policy,
        resource: ResourceRef,
        namespace: &str,
        name: &str,
    ) -> AggregationEvent {
        AggregationEvent {
            policy,
            status: ResultStatus::Fail,
            resource: Some(resource),
            exempted_by: Some(ExemptionRef::new(namespace, name)),
        }
    }

    fn pass_event(policy: Policy) -> AggregationEvent {
        AggregationEvent {
            policy,
            status: ResultStatus::Pass,
            resource: None,
            exempted_by: None,
        }
    }

    // ── merge: new policy ──

    #[test]
    fn test_new_failing_policy_seeds_resource() {
        let mut aggregator = ReportAggregator::new();
        let delta = aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));
        assert_eq!(delta, ReportDelta::Updated);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.fail, 1);
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.results[0].policy, "DisallowPrivileged");
        assert_eq!(snapshot.results[0].resources, vec![pod_ref("demo", "p")]);
    }

    #[test]
    fn test_new_passing_policy_counts_but_is_not_listed() {
        let mut aggregator = ReportAggregator::new();
        let delta = aggregator.apply(pass_event(Policy::RestrictSeccomp));
        assert_eq!(delta, ReportDelta::Updated);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.pass, 1);
        assert!(snapshot.results.is_empty());
    }

    // ── merge: duplicate events (idempotence) ──

    #[test]
    fn test_duplicate_fail_event_is_unchanged() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));
        let delta = aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));
        assert_eq!(delta, ReportDelta::Unchanged);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.results[0].resources.len(), 1);
    }

    #[test]
    fn test_duplicate_pass_event_is_unchanged() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(pass_event(Policy::RestrictSeccomp));
        let delta = aggregator.apply(pass_event(Policy::RestrictSeccomp));
        assert_eq!(delta, ReportDelta::Unchanged);
    }

    #[test]
    fn test_many_duplicates_keep_resource_exactly_once() {
        let mut aggregator = ReportAggregator::new();
        for _ in 0..10 {
            aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));
        }
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.results[0].resources.len(), 1);
        assert_eq!(snapshot.summary.fail, 1);
    }

    // ── merge: appending resources ──

    #[test]
    fn test_second_failing_resource_appends_in_order() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "a")));
        let delta = aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "b")));
        assert_eq!(delta, ReportDelta::Updated);

        let snapshot = aggregator.snapshot();
        let resources = &snapshot.results[0].resources;
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].name, "a");
        assert_eq!(resources[1].name, "b");
        // Still a single policy entry, still one unit in the fail bucket
        assert_eq!(snapshot.results.len(), 1);
        assert_eq!(snapshot.summary.fail, 1);
    }

    #[test]
    fn test_same_name_different_namespace_is_distinct() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("ns-a", "p")));
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("ns-b", "p")));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.results[0].resources.len(), 2);
    }

    // ── merge: status transitions ──

    #[test]
    fn test_fail_to_pass_clears_resources_and_properties() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(exempt_fail_event(
            Policy::DisallowPrivileged,
            pod_ref("demo", "p"),
            "demo",
            "allow",
        ));
        let delta = aggregator.apply(pass_event(Policy::DisallowPrivileged));
        assert_eq!(delta, ReportDelta::Updated);

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.pass, 1);
        assert_eq!(snapshot.summary.fail, 0);
        assert!(snapshot.results.is_empty());
    }

    #[test]
    fn test_pass_to_fail_reseeds_resources() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(pass_event(Policy::DisallowPrivileged));
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.fail, 1);
        assert_eq!(snapshot.results[0].resources, vec![pod_ref("demo", "p")]);
    }

    // ── merge: properties ──

    #[test]
    fn test_exemption_provenance_recorded() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(exempt_fail_event(
            Policy::DisallowPrivileged,
            pod_ref("pexex-clusterpolicyreport", "naughty-pod"),
            "pexex-clusterpolicyreport",
            "allow-naughtiness",
        ));

        let snapshot = aggregator.snapshot();
        assert_eq!(
            snapshot.results[0].properties.get(EXEMPTION_PROPERTY).map(String::as_str),
            Some("pexex-clusterpolicyreport:allow-naughtiness")
        );
    }

    #[test]
    fn test_conflicting_property_last_write_wins() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(exempt_fail_event(
            Policy::DisallowPrivileged,
            pod_ref("demo", "a"),
            "demo",
            "first",
        ));
        let delta = aggregator.apply(exempt_fail_event(
            Policy::DisallowPrivileged,
            pod_ref("demo", "b"),
            "demo",
            "second",
        ));
        assert_eq!(delta, ReportDelta::Updated);

        let snapshot = aggregator.snapshot();
        assert_eq!(
            snapshot.results[0].properties.get(EXEMPTION_PROPERTY).map(String::as_str),
            Some("demo:second")
        );
    }

    #[test]
    fn test_unexempted_fail_has_no_properties() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));

        let snapshot = aggregator.snapshot();
        assert!(snapshot.results[0].properties.is_empty());
    }

    // ── summary invariant ──

    #[test]
    fn test_summary_totals_equal_tracked_policies() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "a")));
        aggregator.apply(fail_event(Policy::DropAllCapabilities, pod_ref("demo", "a")));
        aggregator.apply(pass_event(Policy::RestrictSeccomp));
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "b")));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.total() as usize, aggregator.tracked_policies());
        assert_eq!(snapshot.summary.fail, 2);
        assert_eq!(snapshot.summary.pass, 1);
    }

    // ── snapshot purity / stability ──

    #[test]
    fn test_snapshot_is_stable_without_new_events() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(exempt_fail_event(
            Policy::DisallowPrivileged,
            pod_ref("demo", "p"),
            "demo",
            "allow",
        ));

        let first = aggregator.snapshot();
        let second = aggregator.snapshot();
        assert_eq!(first, second);
        assert_eq!(
            serde_json::to_string(&first.results).unwrap(),
            serde_json::to_string(&second.results).unwrap()
        );
    }

    #[test]
    fn test_results_ordered_by_policy() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::RestrictVolumeTypes, pod_ref("demo", "p")));
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));

        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.results[0].policy, "DisallowPrivileged");
        assert_eq!(snapshot.results[1].policy, "RestrictVolumeTypes");
    }

    // ── reset ──

    #[test]
    fn test_reset_discards_all_state() {
        let mut aggregator = ReportAggregator::new();
        aggregator.apply(fail_event(Policy::DisallowPrivileged, pod_ref("demo", "p")));
        aggregator.reset();

        assert_eq!(aggregator.tracked_policies(), 0);
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.summary.total(), 0);
        assert!(snapshot.results.is_empty());
    }
}
