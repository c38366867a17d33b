use std::sync::OnceLock;

use anyhow::{Context, Result};
use chrono::{Days, Local};
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, ValueEnum};
use clap_complete::Shell;
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::{Deserialize, Serialize};

mod analyzer;
mod builder;
mod event;
mod fleet;
mod html;
mod markdown;
mod merge;
mod sources;

use analyzer::Window;
use builder::ReportData;
use event::Category;
use fleet::FleetAggregator;
use merge::CommonSets;

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum OutputFmt { Text, Json }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum TextFormat { Lines, Table }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
pub enum Theme { Dark, Light }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum, Serialize, Deserialize)]
enum LogFormat { Json, Text }

#[derive(Parser, Debug)]
#[command(
    name = "dpkgfleet",
    about = "Fleet-wide dpkg change reporter",
    long_about = "Fleet-wide dpkg change reporter that analyses dpkg logs per host, reconciles changes common to the whole fleet and to host groups, and emits per-host, per-group, and fleet reports.",
    after_long_help = "Examples:\n  dpkgfleet --last-week --output text\n  dpkgfleet --log /srv/logs --log-glob '*.dpkg.log' --merge\n  dpkgfleet --log web1.dpkg.log --log web2.dpkg.log --merge --html fleet.html\n  dpkgfleet --today --output json",
    color = ColorChoice::Auto
)]
struct Args {
    /// Log sources: files or directories (a directory expands to its immediate entries)
    #[arg(long = "log", short = 'l', num_args = 0.., value_delimiter = ',')]
    logs: Vec<String>,
    /// Glob applied to file names when a directory source is expanded
    #[arg(long, short = 'g')]
    log_glob: Option<String>,
    /// Hostname for sources not named <host>.dpkg.log (default: $HOSTNAME, then localhost)
    #[arg(long, short = 'H')]
    hostname: Option<String>,
    /// Reconcile changes common to the whole fleet and to host groups
    #[arg(long, short = 'm', default_value_t = false)]
    merge: bool,
    #[arg(long, default_value_t = false, help = "Window: today only", conflicts_with_all = ["last_two_days", "last_week", "last_month"])]
    today: bool,
    #[arg(long, default_value_t = false, help = "Window: yesterday and today", conflicts_with_all = ["today", "last_week", "last_month"])]
    last_two_days: bool,
    #[arg(long, default_value_t = false, help = "Window: last 7 days", conflicts_with_all = ["today", "last_two_days", "last_month"])]
    last_week: bool,
    #[arg(long, default_value_t = false, help = "Window: last 30 days", conflicts_with_all = ["today", "last_two_days", "last_week"])]
    last_month: bool,
    #[arg(long, short = 'o', value_enum, default_value = "text")]
    output: OutputFmt,
    #[arg(long, value_enum, default_value = "lines")]
    text_format: TextFormat,
    #[arg(long, value_enum, default_value = "dark")]
    theme: Theme,
    #[arg(long)]
    html: Option<String>,
    #[arg(long, short = 'j')]
    json_path: Option<String>,
    #[arg(long)]
    csv_path: Option<String>,
    #[arg(long)]
    md_path: Option<String>,
    #[arg(long)]
    config: Option<String>,
    #[arg(long, short = 'C', default_value_t = false)]
    no_color: bool,
    #[arg(long, default_value_t = false)]
    force_color: bool,
    #[arg(long, default_value_t = false)]
    no_header: bool,
    #[arg(short = 'q', long, default_value_t = false)]
    quiet: bool,
    #[arg(short = 'v', long, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, default_value_t = false)]
    progress: bool,
    #[arg(long)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    log_format: Option<LogFormat>,
    #[arg(long)]
    log_path: Option<String>,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[arg(long)]
    completions_out: Option<String>,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            logs: vec![],
            log_glob: None,
            hostname: None,
            merge: false,
            today: false,
            last_two_days: false,
            last_week: false,
            last_month: false,
            output: OutputFmt::Text,
            text_format: TextFormat::Lines,
            theme: Theme::Dark,
            html: None,
            json_path: None,
            csv_path: None,
            md_path: None,
            config: None,
            no_color: false,
            force_color: false,
            no_header: false,
            quiet: false,
            verbose: 0,
            progress: false,
            log_level: None,
            log_format: None,
            log_path: None,
            completions: None,
            completions_out: None,
        }
    }
}

#[derive(Deserialize)]
struct AppConfig {
    logs: Option<Vec<String>>,
    log_glob: Option<String>,
    hostname: Option<String>,
    merge: Option<bool>,
    today: Option<bool>,
    last_two_days: Option<bool>,
    last_week: Option<bool>,
    last_month: Option<bool>,
    output: Option<OutputFmt>,
    text_format: Option<TextFormat>,
    theme: Option<Theme>,
    html: Option<String>,
    json_path: Option<String>,
    csv_path: Option<String>,
    md_path: Option<String>,
    progress: Option<bool>,
    log_format: Option<LogFormat>,
    log_path: Option<String>,
}

fn main() -> Result<()> {
    let mut args = Args::parse();
    if let Some(sh) = args.completions {
        let mut cmd = Args::command();
        if let Some(path) = args.completions_out.as_ref() {
            if let Ok(mut f) = std::fs::File::create(path) { clap_complete::generate(sh, &mut cmd, "dpkgfleet", &mut f); } else { clap_complete::generate(sh, &mut cmd, "dpkgfleet", &mut std::io::stdout()); }
        } else {
            clap_complete::generate(sh, &mut cmd, "dpkgfleet", &mut std::io::stdout());
        }
        return Ok(());
    }
    if let Some(p) = args.config.as_ref()
        && let Ok(s) = std::fs::read_to_string(p)
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    else {
        let def = "dpkgfleet.toml";
        if let Ok(s) = std::fs::read_to_string(def)
            && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut args, cfg); }
    }
    {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if args.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if let Some(lvl) = args.log_level {
            let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
            builder.filter_level(f);
        } else if args.verbose > 0 {
            let f = if args.verbose >= 3 { log::LevelFilter::Trace } else if args.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(f);
        }
        if let Some(fmt) = args.log_format {
            match fmt {
                LogFormat::Json => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().to_rfc3339();
                        let obj = serde_json::json!({
                            "ts": ts,
                            "level": record.level().to_string(),
                            "target": record.target(),
                            "msg": record.args().to_string(),
                        });
                        writeln!(buf, "{}", obj)
                    });
                }
                LogFormat::Text => {
                    builder.format(|buf, record| {
                        use std::io::Write;
                        let ts = chrono::Local::now().format("%H:%M:%S");
                        writeln!(buf, "[{:<5} {}] {}", record.level(), ts, record.args())
                    });
                }
            }
        }
        if let Some(path) = args.log_path.as_ref() {
            match std::fs::File::create(path) {
                Ok(f) => { builder.target(env_logger::Target::Pipe(Box::new(f))); }
                Err(e) => { eprintln!("Failed to open log file {}: {}", path, e); }
            }
        }
        builder.init();
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if args.force_color { true } else { color_default && !args.no_color };
    let _ = ENABLE_COLOR.set(enable_color);

    let window = compute_window(&args);
    let default_hostname = default_hostname(&args);
    let configured = if args.logs.is_empty() { vec!["/var/log/dpkg.log".to_string()] } else { args.logs.clone() };
    let sources = sources::expand_sources(&configured, args.log_glob.as_deref())?;
    if sources.is_empty() { log::warn!("no log sources found"); }

    let mut aggregator = FleetAggregator::new();
    let pb = if args.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    for src in &sources {
        if let Some(ref pb) = pb { pb.tick(); pb.set_message(format!("Analysing {}", src.display())); }
        let hostname = analyzer::resolve_hostname(src, &default_hostname);
        let report = analyzer::analyse_or_empty(src, &hostname, &window);
        aggregator.add(report);
    }
    if let Some(pb) = pb { pb.finish_and_clear(); }

    let common = if args.merge && !aggregator.is_empty() { Some(CommonSets::compute(&aggregator)) } else { None };
    let identifiers = builder::report_identifiers(&aggregator, common.as_ref());
    let reports: Vec<ReportData> = identifiers
        .iter()
        .map(|id| builder::build_report_data(id, &aggregator, common.as_ref()))
        .collect();

    match args.output {
        OutputFmt::Text => match args.text_format {
            TextFormat::Lines => print_text(&reports, &window, args.no_header),
            TextFormat::Table => print_text_table(&reports, &window, args.no_header),
        },
        OutputFmt::Json => {
            let body = serde_json::to_string_pretty(&reports).context("serializing reports to JSON")?;
            if args.json_path.is_none() && !args.quiet { println!("{}", body); }
        }
    }
    if let Some(p) = args.json_path.as_ref() {
        let body = serde_json::to_string_pretty(&reports).context("serializing reports to JSON")?;
        std::fs::write(p, body).with_context(|| format!("writing JSON report to {}", p))?;
        if !args.quiet { println!("{}", paint(&format!("JSON written: {}", p), "1;36")); }
    }
    if let Some(p) = args.csv_path.as_ref() {
        write_csv(p, &reports).with_context(|| format!("writing CSV report to {}", p))?;
        if !args.quiet { println!("{}", paint(&format!("CSV written: {}", p), "1;36")); }
    }
    if let Some(p) = args.md_path.as_ref() {
        let md = markdown::render_markdown(&reports, &window);
        std::fs::write(p, md).with_context(|| format!("writing Markdown report to {}", p))?;
        if !args.quiet { println!("{}", paint(&format!("Markdown written: {}", p), "1;36")); }
    }
    if let Some(p) = args.html.as_ref() {
        let html = html::render_html(&reports, args.theme, &window);
        std::fs::write(p, html).with_context(|| format!("writing HTML report to {}", p))?;
        if !args.quiet { println!("{}", paint(&format!("HTML generated: {}", p), "1;36")); }
    }
    Ok(())
}

fn apply_config(args: &mut Args, cfg: AppConfig) {
    if args.logs.is_empty() && let Some(v) = cfg.logs { args.logs = v; }
    if args.log_glob.is_none() && let Some(v) = cfg.log_glob { args.log_glob = Some(v); }
    if args.hostname.is_none() && let Some(v) = cfg.hostname { args.hostname = Some(v); }
    if let Some(v) = cfg.merge { args.merge = args.merge || v; }
    if let Some(v) = cfg.output { args.output = v; }
    if let Some(v) = cfg.text_format { args.text_format = v; }
    if let Some(v) = cfg.theme { args.theme = v; }
    if args.html.is_none() && let Some(v) = cfg.html { args.html = Some(v); }
    if args.json_path.is_none() && let Some(v) = cfg.json_path { args.json_path = Some(v); }
    if args.csv_path.is_none() && let Some(v) = cfg.csv_path { args.csv_path = Some(v); }
    if args.md_path.is_none() && let Some(v) = cfg.md_path { args.md_path = Some(v); }
    if let Some(v) = cfg.progress { args.progress = v; }
    if let Some(v) = cfg.log_format { args.log_format = Some(v); }
    if args.log_path.is_none() && let Some(v) = cfg.log_path { args.log_path = Some(v); }
    let any_window_flag = args.today || args.last_two_days || args.last_week || args.last_month;
    if !any_window_flag {
        if let Some(v) = cfg.today { args.today = v; }
        if let Some(v) = cfg.last_two_days { args.last_two_days = v; }
        if let Some(v) = cfg.last_week { args.last_week = v; }
        if let Some(v) = cfg.last_month { args.last_month = v; }
    }
}

/// Turns the selected window mode into a concrete range: `to` is always the
/// end of today, `from` the start of today minus 0/1/7/30 days, or unbounded
/// when no mode was chosen. Computed once per run, shared by every source.
fn compute_window(args: &Args) -> Window {
    let today = Local::now().date_naive();
    let to = today.and_hms_opt(23, 59, 59).expect("end of day");
    let days = if args.today { Some(0) } else if args.last_two_days { Some(1) } else if args.last_week { Some(7) } else if args.last_month { Some(30) } else { None };
    let from = days.map(|d| (today - Days::new(d)).and_hms_opt(0, 0, 0).expect("start of day"));
    Window { from, to }
}

fn default_hostname(args: &Args) -> String {
    args.hostname
        .clone()
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|s| !s.is_empty()))
        .unwrap_or_else(|| "localhost".to_string())
}

fn window_line(window: &Window) -> String {
    match window.from {
        Some(f) => format!("Time Window: {} to {}", f.format("%Y-%m-%d %H:%M"), window.to.format("%Y-%m-%d %H:%M")),
        None => format!("Time Window: up to {}", window.to.format("%Y-%m-%d %H:%M")),
    }
}

fn print_text(reports: &[ReportData], window: &Window, no_header: bool) {
    if !no_header { println!("{}", paint(&window_line(window), "1;36")); }
    for rep in reports {
        println!("{}", paint(&format!("Report for {}", rep.label), "1"));
        if rep.no_data {
            println!("{}", paint("No package changes recorded.", "2"));
            continue;
        }
        for cat in Category::ALL {
            let Some(events) = rep.categories.get(&cat) else { continue };
            if events.is_empty() { continue; }
            println!("{}", paint(&format!("{}:", cat.label()), "1;33"));
            for e in events {
                let line = match cat {
                    Category::Upgraded => format!("• {} {} -> {}", e.name, e.old_version, e.version),
                    _ => format!("• {} {}", e.name, e.version),
                };
                if e.status.is_empty() { println!("{}", line); } else { println!("{} ({})", line, e.status); }
            }
        }
    }
}

fn print_text_table(reports: &[ReportData], window: &Window, no_header: bool) {
    if !no_header { println!("{}", paint(&window_line(window), "1;36")); }
    for rep in reports {
        println!("{}", paint(&format!("Report for {}", rep.label), "1"));
        if rep.no_data {
            println!("{}", paint("No package changes recorded.", "2"));
            continue;
        }
        let mut table = Table::new();
        table.set_content_arrangement(ContentArrangement::Dynamic);
        table.set_header(vec!["Category", "Package", "Version", "Previous", "Status"]);
        for cat in Category::ALL {
            let Some(events) = rep.categories.get(&cat) else { continue };
            for e in events {
                table.add_row(vec![cat.label(), e.name.as_str(), e.version.as_str(), e.old_version.as_str(), e.status.as_str()]);
            }
        }
        println!("{table}");
    }
}

fn write_csv(path: &str, reports: &[ReportData]) -> Result<()> {
    let mut w = csv::Writer::from_path(path)?;
    w.write_record(["report", "category", "package", "version", "previous_version", "status"])?;
    for rep in reports {
        for cat in Category::ALL {
            let Some(events) = rep.categories.get(&cat) else { continue };
            for e in events {
                w.write_record([rep.label.as_str(), cat.label(), e.name.as_str(), e.version.as_str(), e.old_version.as_str(), e.status.as_str()])?;
            }
        }
    }
    w.flush()?;
    Ok(())
}

fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

#[cfg(test)]
mod tests_window {
    use super::*;

    #[test]
    fn no_mode_means_no_lower_bound() {
        let w = compute_window(&Args::default());
        assert!(w.from.is_none());
        let today = Local::now().date_naive();
        assert_eq!(w.to, today.and_hms_opt(23, 59, 59).unwrap());
    }

    #[test]
    fn today_starts_at_midnight() {
        let mut a = Args::default();
        a.today = true;
        let w = compute_window(&a);
        let today = Local::now().date_naive();
        assert_eq!(w.from.unwrap(), today.and_hms_opt(0, 0, 0).unwrap());
    }

    #[test]
    fn modes_reach_back_the_expected_days() {
        let today = Local::now().date_naive();
        let mut a = Args::default();
        a.last_two_days = true;
        assert_eq!(compute_window(&a).from.unwrap().date(), today - Days::new(1));
        let mut a = Args::default();
        a.last_week = true;
        assert_eq!(compute_window(&a).from.unwrap().date(), today - Days::new(7));
        let mut a = Args::default();
        a.last_month = true;
        assert_eq!(compute_window(&a).from.unwrap().date(), today - Days::new(30));
    }
}

#[cfg(test)]
mod tests_pipeline {
    use super::*;
    use std::path::PathBuf;

    fn setup_logs(dir_name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(dir_name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let shared = "2024-01-15 10:00:01 install nginx:amd64 <none> 1.18.0-6\n\
                      2024-01-15 10:00:02 status installed nginx:amd64 1.18.0-6\n";
        std::fs::write(dir.join("web1.dpkg.log"), shared).unwrap();
        let with_extra = format!("{}2024-01-15 11:00:01 install htop:amd64 <none> 3.2.2-2\n", shared);
        std::fs::write(dir.join("web2.dpkg.log"), with_extra).unwrap();
        std::fs::write(dir.join("db1.dpkg.log"), "2024-01-15 12:00:01 upgrade libpq5:amd64 15.3-0 15.4-1\n").unwrap();
        dir
    }

    fn aggregate(dir: &PathBuf) -> FleetAggregator {
        let sources = sources::expand_sources(&[dir.to_string_lossy().into_owned()], Some("*.dpkg.log")).unwrap();
        assert_eq!(sources.len(), 3);
        let window = compute_window(&Args::default());
        let mut aggregator = FleetAggregator::new();
        for src in &sources {
            let hostname = analyzer::resolve_hostname(src, "fallback");
            aggregator.add(analyzer::analyse_or_empty(src, &hostname, &window));
        }
        aggregator
    }

    #[test]
    fn merge_moves_group_common_changes_out_of_host_reports() {
        let dir = setup_logs("dpkgfleet_pipeline_merge");
        let aggregator = aggregate(&dir);
        let common = CommonSets::compute(&aggregator);
        let ids = builder::report_identifiers(&aggregator, Some(&common));
        assert_eq!(ids, vec!["all", "db", "db1", "web", "web1", "web2"]);

        let web = builder::build_report_data("web", &aggregator, Some(&common));
        let web_installed: Vec<&str> = web.categories[&Category::NewlyInstalled].iter().map(|e| e.name.as_str()).collect();
        assert_eq!(web_installed, vec!["nginx"]);

        let web1 = builder::build_report_data("web1", &aggregator, Some(&common));
        assert!(web1.no_data);
        let web2 = builder::build_report_data("web2", &aggregator, Some(&common));
        let web2_installed: Vec<&str> = web2.categories[&Category::NewlyInstalled].iter().map(|e| e.name.as_str()).collect();
        assert_eq!(web2_installed, vec!["htop"]);

        let all = builder::build_report_data("all", &aggregator, Some(&common));
        assert!(all.no_data);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn without_merge_each_host_keeps_its_own_events() {
        let dir = setup_logs("dpkgfleet_pipeline_plain");
        let aggregator = aggregate(&dir);
        let ids = builder::report_identifiers(&aggregator, None);
        assert_eq!(ids, vec!["db1", "web1", "web2"]);
        let web1 = builder::build_report_data("web1", &aggregator, None);
        assert_eq!(web1.categories[&Category::NewlyInstalled].len(), 1);
        let db1 = builder::build_report_data("db1", &aggregator, None);
        assert_eq!(db1.categories[&Category::Upgraded][0].name, "libpq5");
        let _ = std::fs::remove_dir_all(&dir);
    }
}
