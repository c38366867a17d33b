use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::event::{Category, ChangeEvent};

/// Snapshot of one host's categorized package changes for the run's window.
/// At most one event per (category, package); immutable once handed to the
/// aggregator.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HostReport {
    pub hostname: String,
    pub no_data: bool,
    pub categories: BTreeMap<Category, BTreeMap<String, ChangeEvent>>,
}

impl HostReport {
    pub fn new(hostname: &str) -> Self {
        HostReport { hostname: hostname.to_string(), no_data: false, categories: BTreeMap::new() }
    }

    /// Empty report standing in for a source that failed to analyse.
    pub fn failed(hostname: &str) -> Self {
        HostReport { hostname: hostname.to_string(), no_data: true, categories: BTreeMap::new() }
    }

    pub fn insert(&mut self, event: ChangeEvent) {
        self.categories.entry(event.category).or_default().insert(event.package.clone(), event);
    }

    pub fn get(&self, category: Category, package: &str) -> Option<&ChangeEvent> {
        self.categories.get(&category).and_then(|m| m.get(package))
    }

    pub fn is_empty(&self) -> bool {
        self.categories.values().all(|m| m.is_empty())
    }
}

/// All host reports keyed by hostname, plus the per-category union of package
/// names used to bound the merge engine's search. Populated once per run,
/// read-only afterwards.
#[derive(Clone, Debug, Default)]
pub struct FleetAggregator {
    hosts: BTreeMap<String, HostReport>,
    union: BTreeMap<Category, BTreeSet<String>>,
}

impl FleetAggregator {
    pub fn new() -> Self {
        FleetAggregator::default()
    }

    /// Registers a host report. A second report for the same hostname replaces
    /// the first (two log files can resolve to one hostname).
    pub fn add(&mut self, report: HostReport) {
        if self.hosts.contains_key(&report.hostname) {
            log::warn!("duplicate hostname {}: overwriting earlier report", report.hostname);
        }
        for (cat, pkgs) in &report.categories {
            self.union.entry(*cat).or_default().extend(pkgs.keys().cloned());
        }
        self.hosts.insert(report.hostname.clone(), report);
    }

    pub fn hostnames(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn get(&self, hostname: &str) -> Option<&HostReport> {
        self.hosts.get(hostname)
    }

    pub fn union(&self, category: Category) -> Option<&BTreeSet<String>> {
        self.union.get(&category)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report_with(hostname: &str, pkg: &str, version: &str) -> HostReport {
        let mut r = HostReport::new(hostname);
        r.insert(ChangeEvent::new(pkg, Category::NewlyInstalled, version, "<none>", "installed"));
        r
    }

    #[test]
    fn union_spans_hosts() {
        let mut fleet = FleetAggregator::new();
        fleet.add(report_with("web1", "nginx", "1.18.0"));
        fleet.add(report_with("db1", "postgresql", "15.4"));
        let u = fleet.union(Category::NewlyInstalled).unwrap();
        assert!(u.contains("nginx"));
        assert!(u.contains("postgresql"));
        assert!(fleet.union(Category::Removed).is_none());
    }

    #[test]
    fn duplicate_hostname_overwrites() {
        let mut fleet = FleetAggregator::new();
        fleet.add(report_with("web1", "nginx", "1.18.0"));
        fleet.add(report_with("web1", "curl", "8.0.1"));
        assert_eq!(fleet.hostnames().count(), 1);
        let r = fleet.get("web1").unwrap();
        assert!(r.get(Category::NewlyInstalled, "curl").is_some());
        assert!(r.get(Category::NewlyInstalled, "nginx").is_none());
    }

    #[test]
    fn one_event_per_category_and_package() {
        let mut r = HostReport::new("web1");
        r.insert(ChangeEvent::new("nginx", Category::Upgraded, "1.18.0", "1.16.0", "installed"));
        r.insert(ChangeEvent::new("nginx", Category::Upgraded, "1.20.0", "1.16.0", "installed"));
        assert_eq!(r.categories.get(&Category::Upgraded).unwrap().len(), 1);
        assert_eq!(r.get(Category::Upgraded, "nginx").unwrap().version, "1.20.0");
    }
}
