use crate::analyzer::Window;
use crate::builder::ReportData;
use crate::event::Category;

pub fn render_markdown(reports: &[ReportData], window: &Window) -> String {
    let mut s = String::new();
    s.push_str("# dpkgfleet Report\n\n");
    let from_s = match window.from {
        Some(f) => format!("{}", f.format("%Y-%m-%d %H:%M:%S")),
        None => "beginning of log".to_string(),
    };
    s.push_str(&format!("Time Window: {} to {}\n\n", from_s, window.to.format("%Y-%m-%d %H:%M:%S")));
    for rep in reports {
        s.push_str(&format!("## {}\n\n", rep.label));
        if rep.no_data {
            s.push_str("No package changes recorded.\n\n");
            continue;
        }
        for cat in Category::ALL {
            let Some(events) = rep.categories.get(&cat) else { continue };
            if events.is_empty() { continue; }
            s.push_str(&format!("### {}\n", cat.label()));
            for e in events {
                match cat {
                    Category::Upgraded => s.push_str(&format!("- {} {} -> {}", e.name, e.old_version, e.version)),
                    _ => s.push_str(&format!("- {} {}", e.name, e.version)),
                }
                if !e.status.is_empty() { s.push_str(&format!(" ({})", e.status)); }
                s.push('\n');
            }
            s.push('\n');
        }
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RenderedChange;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[test]
    fn renders_sections_per_report() {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::Upgraded,
            vec![RenderedChange {
                name: "libc6".to_string(),
                version: "2.36-9".to_string(),
                old_version: "2.35-1".to_string(),
                status: "installed".to_string(),
            }],
        );
        let reports = vec![
            ReportData { label: "web*".to_string(), no_data: false, merge: true, categories },
            ReportData { label: "web1".to_string(), no_data: true, merge: true, categories: BTreeMap::new() },
        ];
        let window = Window { from: None, to: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(23, 59, 59).unwrap() };
        let md = render_markdown(&reports, &window);
        assert!(md.contains("## web*"));
        assert!(md.contains("- libc6 2.35-1 -> 2.36-9 (installed)"));
        assert!(md.contains("## web1"));
        assert!(md.contains("No package changes recorded."));
    }
}
