use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{Category, ChangeEvent};
use crate::fleet::FleetAggregator;
use crate::merge::{self, CommonSets};

/// One event rendered for a report, version fields as display strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedChange {
    pub name: String,
    pub version: String,
    pub old_version: String,
    pub status: String,
}

impl RenderedChange {
    fn from_event(ev: &ChangeEvent) -> Self {
        RenderedChange {
            name: ev.package.clone(),
            version: ev.version.clone(),
            old_version: ev.previous_version.clone(),
            status: ev.status.clone(),
        }
    }
}

/// Everything an emitter needs for one report tier. `no_data` reflects the
/// built output (every category empty), not the analyser outcome.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReportData {
    pub label: String,
    pub no_data: bool,
    pub merge: bool,
    pub categories: BTreeMap<Category, Vec<RenderedChange>>,
}

/// Report identifiers to emit, `"all"` first, the rest lexicographic.
pub fn report_identifiers(fleet: &FleetAggregator, common: Option<&CommonSets>) -> Vec<String> {
    let mut rest: Vec<String> = fleet.hostnames().map(str::to_string).collect();
    let mut out = Vec::new();
    if let Some(c) = common {
        if c.has_bucket(merge::ALL) {
            out.push(merge::ALL.to_string());
        }
        for key in c.group_keys() {
            if !rest.iter().any(|h| h == key) {
                rest.push(key.to_string());
            }
        }
    }
    rest.sort();
    rest.dedup();
    out.extend(rest);
    out
}

/// Filters one identifier's raw data down to the events that belong in that
/// report tier. Suppression only ever removes events that a broader tier
/// already carries verbatim; with merge disabled nothing is suppressed.
pub fn build_report_data(identifier: &str, fleet: &FleetAggregator, common: Option<&CommonSets>) -> ReportData {
    let is_group = common.is_some_and(|c| c.has_bucket(identifier)) && fleet.get(identifier).is_none();
    let mut categories: BTreeMap<Category, Vec<RenderedChange>> = BTreeMap::new();

    if is_group && let Some(c) = common {
        // "all" and group reports are fed by their common bucket; every
        // in-scope host holds the same value, so any member can supply it.
        if let Some(bucket) = c.bucket(identifier) {
            for (cat, pkgs) in bucket {
                for pkg in pkgs {
                    if identifier != merge::ALL && c.contains(merge::ALL, *cat, pkg) {
                        continue;
                    }
                    if let Some(ev) = scope_event(identifier, fleet, *cat, pkg) {
                        categories.entry(*cat).or_default().push(RenderedChange::from_event(ev));
                    }
                }
            }
        }
    } else if let Some(report) = fleet.get(identifier) {
        let group = merge::group_key(identifier);
        for (cat, pkgs) in &report.categories {
            for (pkg, ev) in pkgs {
                if let Some(c) = common {
                    if c.contains(merge::ALL, *cat, pkg) {
                        continue;
                    }
                    if let Some(g) = group {
                        if c.contains(g, *cat, pkg) {
                            continue;
                        }
                    }
                }
                categories.entry(*cat).or_default().push(RenderedChange::from_event(ev));
            }
        }
    }

    for events in categories.values_mut() {
        events.sort_by(|a, b| a.name.cmp(&b.name));
    }
    let no_data = categories.values().all(Vec::is_empty);
    let label = if is_group && identifier != merge::ALL {
        format!("{}*", identifier)
    } else {
        identifier.to_string()
    };
    ReportData { label, no_data, merge: common.is_some(), categories }
}

/// Event value for a pair within a report scope: for a group the lookup is
/// restricted to member hosts (an out-of-group host may hold a differing
/// value for the same package).
fn scope_event<'a>(
    identifier: &str,
    fleet: &'a FleetAggregator,
    category: Category,
    package: &str,
) -> Option<&'a ChangeEvent> {
    let hostnames: Vec<&str> = fleet.hostnames().collect();
    for h in hostnames {
        if identifier != merge::ALL && merge::group_key(h) != Some(identifier) {
            continue;
        }
        if let Some(ev) = fleet.get(h).and_then(|r| r.get(category, package)) {
            return Some(ev);
        }
    }
    None
}
