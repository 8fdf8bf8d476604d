use std::collections::{BTreeSet, HashMap};

use kube::ResourceExt;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::crd::{Exemption, Policy};
use crate::report::ResourceRef;

/* ============================= TYPES ============================= */

/// Identity of an Exemption resource, used as provenance in report results.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExemptionRef {
    pub namespace: String,
    pub name: String,
}

impl ExemptionRef {
    pub fn new(namespace: &str, name: &str) -> Self {
        ExemptionRef {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    pub fn from_resource(exemption: &Exemption) -> Self {
        ExemptionRef {
            namespace: exemption.namespace().unwrap_or_default(),
            name: exemption.name_any(),
        }
    }

    /// Provenance string recorded in report properties: `<namespace>:<name>`.
    pub fn provenance(&self) -> String {
        format!("{}:{}", self.namespace, self.name)
    }
}

/// Matcher pattern that failed to compile. The owning exemption is marked
/// `phase=Failed` and excluded from matching until corrected.
#[derive(Debug, Error)]
#[error("invalid matcher pattern '{pattern}' in exemption {exemption}: {source}")]
pub struct PatternError {
    pub exemption: String,
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

/// One compiled rule: exact-match namespace, full-name regex, policy set.
#[derive(Debug, Clone)]
struct CompiledRule {
    namespace: String,
    pattern: Regex,
    policies: BTreeSet<Policy>,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    /// resourceVersion at the time of the upsert; the match tie-break key.
    resource_version: String,
    rules: Vec<CompiledRule>,
}

/* ============================= INDEX ============================= */

/// The active set of exemption rules, keyed by the owning Exemption's
/// identity. Mutated only from the controller's single consumer loop.
#[derive(Debug, Default)]
pub struct ExemptionIndex {
    entries: HashMap<ExemptionRef, IndexEntry>,
}

impl ExemptionIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile and store every matcher of `exemption`, replacing any previous
    /// entry for the same resource. Returns the number of rules stored.
    ///
    /// On a pattern error the previous entry is removed as well: a broken
    /// exemption must not keep matching with stale rules.
    pub fn upsert(&mut self, exemption: &Exemption) -> Result<usize, PatternError> {
        let exemption_ref = ExemptionRef::from_resource(exemption);
        self.entries.remove(&exemption_ref);

        let elements = exemption
            .spec
            .exemptions
            .as_deref()
            .unwrap_or_default();

        let mut rules = Vec::with_capacity(elements.len());
        for element in elements {
            let pattern = compile_name_pattern(&element.matcher.name).map_err(|source| {
                PatternError {
                    exemption: exemption_ref.provenance(),
                    pattern: element.matcher.name.clone(),
                    source,
                }
            })?;
            rules.push(CompiledRule {
                namespace: element.matcher.namespace.clone(),
                pattern,
                policies: element.policies.iter().copied().collect(),
            });
        }

        let rule_count = rules.len();
        self.entries.insert(
            exemption_ref.clone(),
            IndexEntry {
                resource_version: exemption.resource_version().unwrap_or_default(),
                rules,
            },
        );

        debug!(
            exemption = %exemption_ref.provenance(),
            rules = rule_count,
            "exemption_indexed"
        );
        Ok(rule_count)
    }

    /// Drop the exemption's rules. Returns whether an entry existed.
    pub fn remove(&mut self, exemption_ref: &ExemptionRef) -> bool {
        self.entries.remove(exemption_ref).is_some()
    }

    /// Find the exemption covering `(resource, policy)`, if any.
    ///
    /// A rule matches when its namespace equals the resource's namespace, its
    /// name pattern matches the full resource name, and the policy is in its
    /// policy set. When several exemptions match, the earliest-created wins:
    /// resourceVersion ascending, exemption identity as the final tie-break.
    pub fn lookup(&self, resource: &ResourceRef, policy: Policy) -> Option<ExemptionRef> {
        let resource_namespace = resource.namespace.as_deref().unwrap_or_default();

        let mut ordered: Vec<(&ExemptionRef, &IndexEntry)> = self.entries.iter().collect();
        ordered.sort_by(|(a_ref, a), (b_ref, b)| {
            version_order(&a.resource_version, &b.resource_version).then_with(|| a_ref.cmp(b_ref))
        });

        for (exemption_ref, entry) in ordered {
            for rule in &entry.rules {
                if rule.namespace == resource_namespace
                    && rule.policies.contains(&policy)
                    && rule.pattern.is_match(&resource.name)
                {
                    return Some(exemption_ref.clone());
                }
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Sorted provenance strings of all active exemptions, recorded in the
    /// report's source annotation.
    pub fn active_sources(&self) -> Vec<String> {
        let mut sources: Vec<String> = self.entries.keys().map(ExemptionRef::provenance).collect();
        sources.sort();
        sources
    }

    /// Replace the whole index from a full re-list (watcher restart path).
    /// Returns the refs of exemptions whose patterns failed to compile.
    pub fn rebuild<'a>(
        &mut self,
        exemptions: impl IntoIterator<Item = &'a Exemption>,
    ) -> Vec<PatternError> {
        self.entries.clear();
        let mut failures = Vec::new();
        for exemption in exemptions {
            if let Err(e) = self.upsert(exemption) {
                failures.push(e);
            }
        }
        failures
    }
}

/// Anchor the pattern so a literal name matches only itself; an explicitly
/// anchored regex still behaves the same inside the group.
fn compile_name_pattern(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{pattern})$"))
}

/// resourceVersions are opaque strings but numeric in practice; compare
/// numerically when both sides parse, lexically otherwise.
fn version_order(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a.cmp(&b),
        _ => a.cmp(b),
    }
}

/* ============================= TESTS ============================= */
