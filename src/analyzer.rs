use std::collections::BTreeMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use regex::Regex;

use crate::event::{Category, ChangeEvent};
use crate::fleet::HostReport;

/// Instant range selected for a run. `from = None` means no lower bound.
#[derive(Clone, Copy, Debug)]
pub struct Window {
    pub from: Option<NaiveDateTime>,
    pub to: NaiveDateTime,
}

impl Window {
    pub fn contains(&self, ts: NaiveDateTime) -> bool {
        self.from.map(|f| ts >= f).unwrap_or(true) && ts <= self.to
    }
}

fn action_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) (install|upgrade|remove) (\S+) (\S+) (\S+)")
            .expect("action pattern")
    })
}

fn status_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) status (\S+) (\S+) (\S+)")
            .expect("status pattern")
    })
}

fn hostname_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(.+)\.dpkg\.log$").expect("hostname pattern"))
}

/// A source named `<name>.dpkg.log` reports for `<name>`; anything else
/// reports under the caller-supplied default hostname.
pub fn resolve_hostname(source: &Path, default: &str) -> String {
    source
        .file_name()
        .and_then(|n| n.to_str())
        .and_then(|n| hostname_pattern().captures(n))
        .map(|c| c[1].to_string())
        .unwrap_or_else(|| default.to_string())
}

#[derive(Debug)]
enum LogLine {
    Install { ts: NaiveDateTime, package: String, previous: String, version: String },
    Upgrade { ts: NaiveDateTime, package: String, previous: String, version: String },
    Remove { ts: NaiveDateTime, package: String, version: String },
    Status { ts: NaiveDateTime, state: String, package: String, version: String },
}

impl LogLine {
    fn ts(&self) -> NaiveDateTime {
        match self {
            LogLine::Install { ts, .. }
            | LogLine::Upgrade { ts, .. }
            | LogLine::Remove { ts, .. }
            | LogLine::Status { ts, .. } => *ts,
        }
    }
}

fn base_package(name: &str) -> String {
    name.split(':').next().unwrap_or(name).to_string()
}

fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S").ok()
}

/// Parses one dpkg.log line. Startup markers, conffile prompts and the like
/// yield None and are skipped.
fn parse_line(line: &str) -> Option<LogLine> {
    if let Some(c) = status_pattern().captures(line) {
        return Some(LogLine::Status {
            ts: parse_ts(&c[1])?,
            state: c[2].to_string(),
            package: base_package(&c[3]),
            version: c[4].to_string(),
        });
    }
    let c = action_pattern().captures(line)?;
    let ts = parse_ts(&c[1])?;
    let package = base_package(&c[3]);
    match &c[2] {
        "install" => Some(LogLine::Install { ts, package, previous: c[4].to_string(), version: c[5].to_string() }),
        "upgrade" => Some(LogLine::Upgrade { ts, package, previous: c[4].to_string(), version: c[5].to_string() }),
        "remove" => Some(LogLine::Remove { ts, package, version: c[4].to_string() }),
        _ => None,
    }
}

#[derive(Default)]
struct PackageTrail {
    installed: Option<(String, String)>,          // (previous token, version)
    upgraded: Option<(String, String)>,           // (first old version, last new version)
    removed: Option<String>,                      // version removed
    installed_and_removed: Option<String>,        // version that came and went
    last_status: Option<(String, String)>,        // (state, version)
}

/// Reads and classifies one log source into a host report. Any I/O failure is
/// an analyser failure; the adapter boundary (`analyse_or_empty`) turns it
/// into a `no_data` report.
pub fn analyse_source(path: &Path, hostname: &str, window: &Window) -> Result<HostReport> {
    let f = std::fs::File::open(path).with_context(|| format!("opening log source {}", path.display()))?;
    let mut trails: BTreeMap<String, PackageTrail> = BTreeMap::new();
    let mut skipped = 0usize;
    for line in BufReader::new(f).lines() {
        let line = line.with_context(|| format!("reading log source {}", path.display()))?;
        let Some(parsed) = parse_line(&line) else {
            skipped += 1;
            continue;
        };
        if !window.contains(parsed.ts()) {
            continue;
        }
        match parsed {
            LogLine::Install { package, previous, version, .. } => {
                let t = trails.entry(package).or_default();
                t.installed = Some((previous, version));
                t.removed = None;
            }
            LogLine::Upgrade { package, previous, version, .. } => {
                let t = trails.entry(package).or_default();
                match &mut t.upgraded {
                    Some((_, last)) => *last = version,
                    None => t.upgraded = Some((previous, version)),
                }
            }
            LogLine::Remove { package, version, .. } => {
                let t = trails.entry(package).or_default();
                if let Some((_, v)) = t.installed.take() {
                    t.installed_and_removed = Some(v);
                } else {
                    t.removed = Some(version);
                }
            }
            LogLine::Status { state, package, version, .. } => {
                trails.entry(package).or_default().last_status = Some((state, version));
            }
        }
    }
    if skipped > 0 {
        log::debug!("{}: skipped {} non-change lines", path.display(), skipped);
    }

    let mut report = HostReport::new(hostname);
    for (package, t) in &trails {
        let status = t.last_status.as_ref().map(|(s, _)| s.clone()).unwrap_or_default();
        if let Some((previous, version)) = &t.installed {
            report.insert(ChangeEvent::new(package, Category::NewlyInstalled, version, previous, &status));
        }
        if let Some((previous, version)) = &t.upgraded {
            report.insert(ChangeEvent::new(package, Category::Upgraded, version, previous, &status));
        }
        if let Some(version) = &t.removed {
            report.insert(ChangeEvent::new(package, Category::Removed, version, "<none>", &status));
        }
        if let Some(version) = &t.installed_and_removed {
            report.insert(ChangeEvent::new(package, Category::InstalledAndRemoved, version, "<none>", &status));
        }
        if let Some((state, version)) = &t.last_status {
            let abnormal = match state.as_str() {
                "half-installed" => Some(Category::HalfInstalled),
                "half-configured" => Some(Category::HalfConfigured),
                _ => None,
            };
            if let Some(cat) = abnormal {
                report.insert(ChangeEvent::new(package, cat, version, "<none>", state));
            }
        }
    }
    report.no_data = report.is_empty();
    Ok(report)
}

/// Adapter boundary: one unreadable source must never abort the run.
pub fn analyse_or_empty(path: &Path, hostname: &str, window: &Window) -> HostReport {
    match analyse_source(path, hostname, window) {
        Ok(report) => report,
        Err(e) => {
            log::warn!("analysis failed for {}: {:#}", path.display(), e);
            HostReport::failed(hostname)
        }
    }
}
