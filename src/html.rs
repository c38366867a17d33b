use crate::analyzer::Window;
use crate::builder::ReportData;
use crate::event::Category;

pub fn render_html(reports: &[ReportData], theme: crate::Theme, window: &Window) -> String {
    let mut s = String::new();
    s.push_str("<html lang=\"en\"><head><meta charset=\"utf-8\"><meta name=\"viewport\" content=\"width=device-width, initial-scale=1\"><title>dpkgfleet Report</title><style>");
    match theme {
        crate::Theme::Dark => s.push_str(":root{--bg:#0a0e13;--fg:#ffffff;--muted:#c0c4cc;--card:#0d131a;--border:#243041;--accent:#3b82f6;--chip:#0f172a} body{margin:0;background:var(--bg);color:var(--fg);font-family:Segoe UI,system-ui,-apple-system,Arial,sans-serif} .container{max-width:1100px;margin:0 auto;padding:24px} .header{display:flex;align-items:center;justify-content:space-between;gap:12px;margin-bottom:16px} .title{font-size:20px;font-weight:600} .sub{color:var(--muted);font-size:13px} .card{background:var(--card);border:1px solid var(--border);border-radius:10px;padding:14px;margin-top:14px} .card h2{margin:0 0 8px 0;font-size:16px} .table{width:100%;border-collapse:separate;border-spacing:0;border:1px solid var(--border);border-radius:10px;overflow:hidden;margin-top:8px} .table th{background:#0c1118;color:#ffffff;text-align:left;font-weight:600;padding:8px;border-bottom:1px solid var(--border)} .table td{padding:8px;border-bottom:1px solid var(--border)} .table tr:nth-child(odd) td{background:#0b0f14} .pill{display:inline-block;background:var(--chip);color:#ffffff;padding:4px 10px;border-radius:999px;border:1px solid var(--border);font-size:12px;margin:4px 6px 0 0} .footer{margin-top:22px;color:var(--muted);font-size:12px}"),
        crate::Theme::Light => s.push_str(":root{--bg:#f7fafc;--fg:#111827;--muted:#6b7280;--card:#ffffff;--border:#e5e7eb;--accent:#2563eb;--chip:#eef2f7} body{margin:0;background:var(--bg);color:var(--fg);font-family:Segoe UI,system-ui,-apple-system,Arial,sans-serif} .container{max-width:1100px;margin:0 auto;padding:24px} .header{display:flex;align-items:center;justify-content:space-between;gap:12px;margin-bottom:16px} .title{font-size:20px;font-weight:600} .sub{color:var(--muted);font-size:13px} .card{background:var(--card);border:1px solid var(--border);border-radius:10px;padding:14px;margin-top:14px} .card h2{margin:0 0 8px 0;font-size:16px} .table{width:100%;border-collapse:separate;border-spacing:0;border:1px solid var(--border);border-radius:10px;overflow:hidden;margin-top:8px} .table th{background:#f3f4f6;color:var(--fg);text-align:left;font-weight:600;padding:8px;border-bottom:1px solid var(--border)} .table td{padding:8px;border-bottom:1px solid var(--border)} .table tr:nth-child(odd) td{background:#fbfdff} .pill{display:inline-block;background:var(--chip);color:var(--fg);padding:4px 10px;border-radius:999px;border:1px solid var(--border);font-size:12px;margin:4px 6px 0 0} .footer{margin-top:22px;color:var(--muted);font-size:12px}"),
    }
    s.push_str("</style></head><body><div class=\"container\">");
    s.push_str("<div class=\"header\"><div class=\"title\">dpkgfleet Report</div>");
    let from_s = match window.from {
        Some(f) => f.format("%Y-%m-%d %H:%M").to_string(),
        None => "beginning of log".to_string(),
    };
    s.push_str(&format!("<div class=\"sub\">{} → {}</div></div>", from_s, window.to.format("%Y-%m-%d %H:%M")));
    for rep in reports {
        s.push_str(&format!("<div class=\"card\"><h2>{}</h2>", html_escape(&rep.label)));
        if rep.merge { s.push_str("<span class=\"pill\">merged</span>"); }
        if rep.no_data {
            s.push_str("<div class=\"sub\">No package changes recorded.</div></div>");
            continue;
        }
        for cat in Category::ALL {
            let Some(events) = rep.categories.get(&cat) else { continue };
            if events.is_empty() { continue; }
            s.push_str(&format!("<h2 class=\"sub\">{}</h2><table class=\"table\"><thead><tr><th>Package</th><th>Version</th><th>Previous</th><th>Status</th></tr></thead><tbody>", cat.label()));
            for e in events {
                s.push_str(&format!(
                    "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                    html_escape(&e.name),
                    html_escape(&e.version),
                    html_escape(&e.old_version),
                    html_escape(&e.status)
                ));
            }
            s.push_str("</tbody></table>");
        }
        s.push_str("</div>");
    }
    s.push_str("<div class=\"footer\">Generated by dpkgfleet</div></div></body></html>");
    s
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::RenderedChange;
    use chrono::NaiveDate;
    use std::collections::BTreeMap;

    #[test]
    fn escapes_package_fields() {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::NewlyInstalled,
            vec![RenderedChange {
                name: "lib<x>".to_string(),
                version: "1.0".to_string(),
                old_version: "<none>".to_string(),
                status: String::new(),
            }],
        );
        let reports = vec![ReportData { label: "web1".to_string(), no_data: false, merge: false, categories }];
        let window = Window { from: None, to: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap().and_hms_opt(23, 59, 59).unwrap() };
        let html = render_html(&reports, crate::Theme::Dark, &window);
        assert!(html.contains("lib&lt;x&gt;"));
        assert!(html.contains("&lt;none&gt;"));
        assert!(!html.contains("<none>"));
    }
}
