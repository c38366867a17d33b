use std::collections::{BTreeMap, BTreeSet};

use crate::event::{Category, ChangeEvent};
use crate::fleet::{FleetAggregator, HostReport};

/// Identifier of the fleet-wide bucket and report.
pub const ALL: &str = "all";

/// Strips the trailing run of decimal digits from a hostname: `web1` and
/// `web23` both map to `web`. Hosts without a trailing digit (`db`) carry no
/// group, as does a hostname that is digits only.
pub fn group_key(hostname: &str) -> Option<&str> {
    let stripped = hostname.trim_end_matches(|c: char| c.is_ascii_digit());
    if stripped.len() == hostname.len() || stripped.is_empty() {
        None
    } else {
        Some(stripped)
    }
}

/// The (category, package) pairs whose events are value-equal across a whole
/// reporting scope: the `"all"` scope spans every host holding data, and each
/// group scope spans the hosts sharing that group key.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CommonSets {
    buckets: BTreeMap<String, BTreeMap<Category, BTreeSet<String>>>,
}

impl CommonSets {
    pub fn compute(fleet: &FleetAggregator) -> Self {
        let mut buckets: BTreeMap<String, BTreeMap<Category, BTreeSet<String>>> = BTreeMap::new();

        // Fleet-wide bucket. Hosts with no data at all do not participate in
        // the quantifier; a host that merely lacks the pair disqualifies it.
        let data_hosts: Vec<&HostReport> = fleet
            .hostnames()
            .filter_map(|h| fleet.get(h))
            .filter(|r| !r.is_empty())
            .collect();
        if !data_hosts.is_empty() {
            let mut all: BTreeMap<Category, BTreeSet<String>> = BTreeMap::new();
            for cat in Category::ALL {
                let Some(pkgs) = fleet.union(cat) else { continue };
                for pkg in pkgs {
                    if shared_event(&data_hosts, cat, pkg).is_some() {
                        all.entry(cat).or_default().insert(pkg.clone());
                    }
                }
            }
            buckets.insert(ALL.to_string(), all);
        }

        // Group discovery: dedup the keys derived from every hostname.
        let keys: BTreeSet<String> = fleet
            .hostnames()
            .filter_map(group_key)
            .map(str::to_string)
            .collect();
        for key in keys {
            // A host literally named like the key claims the identifier, so
            // no group report would ever be emitted for it; keeping a bucket
            // here would suppress member events that then surface nowhere.
            if fleet.get(&key).is_some() {
                continue;
            }
            let members: Vec<&HostReport> = fleet
                .hostnames()
                .filter(|h| group_key(h) == Some(key.as_str()))
                .filter_map(|h| fleet.get(h))
                .collect();
            let mut bucket: BTreeMap<Category, BTreeSet<String>> = BTreeMap::new();
            for cat in Category::ALL {
                let mut candidates: BTreeSet<&String> = BTreeSet::new();
                for m in &members {
                    if let Some(pkgs) = m.categories.get(&cat) {
                        candidates.extend(pkgs.keys());
                    }
                }
                for pkg in candidates {
                    if shared_event(&members, cat, pkg).is_some() {
                        bucket.entry(cat).or_default().insert(pkg.clone());
                    }
                }
            }
            buckets.insert(key, bucket);
        }
        CommonSets { buckets }
    }

    pub fn contains(&self, identifier: &str, category: Category, package: &str) -> bool {
        self.buckets
            .get(identifier)
            .and_then(|b| b.get(&category))
            .is_some_and(|pkgs| pkgs.contains(package))
    }

    pub fn has_bucket(&self, identifier: &str) -> bool {
        self.buckets.contains_key(identifier)
    }

    /// Bucket identifiers except `"all"`, i.e. the discovered group keys.
    pub fn group_keys(&self) -> impl Iterator<Item = &str> {
        self.buckets.keys().map(String::as_str).filter(|k| *k != ALL)
    }

    pub fn bucket(&self, identifier: &str) -> Option<&BTreeMap<Category, BTreeSet<String>>> {
        self.buckets.get(identifier)
    }
}

/// The single event value all `hosts` agree on for the pair, or None when any
/// host lacks the pair or holds a differing value.
fn shared_event<'a>(hosts: &[&'a HostReport], category: Category, package: &str) -> Option<&'a ChangeEvent> {
    let mut first: Option<&ChangeEvent> = None;
    for report in hosts {
        let ev = report.get(category, package)?;
        match first {
            None => first = Some(ev),
            Some(f) if f != ev => return None,
            Some(_) => {}
        }
    }
    first
}
