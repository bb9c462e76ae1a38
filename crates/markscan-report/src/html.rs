//! HTML report generator.
//!
//! Produces a self-contained HTML file with all CSS/JS inlined.

use anyhow::Result;
use std::path::Path;

use markscan_core::report::CorrectionReport;
use markscan_core::results::ScanStatus;
use markscan_core::statistics::QuestionStats;

/// Escape a string for safe HTML insertion.
fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}

/// Generate an HTML report from a correction report.
pub fn generate_html(report: &CorrectionReport) -> String {
    let mut html = String::new();

    html.push_str("<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n");
    html.push_str("<meta charset=\"utf-8\">\n");
    html.push_str("<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">\n");
    html.push_str("<title>markscan report</title>\n");
    html.push_str("<style>\n");
    html.push_str(CSS);
    html.push_str("</style>\n");
    html.push_str("</head>\n<body>\n");

    html.push_str("<header>\n");
    html.push_str("<h1>markscan report</h1>\n");
    html.push_str(&format!(
        "<p class=\"meta\">Models: <strong>{}</strong> | {} questions | {} scans ({} unreadable) | penalty {} | {}</p>\n",
        html_escape(&report.exam.models.join(", ")),
        report.exam.question_count,
        report.rows.len(),
        report.unreadable(),
        report.scoring.penalty,
        report.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    html.push_str("</header>\n");

    // Summary dashboard
    html.push_str("<section class=\"dashboard\">\n");
    html.push_str("<h2>Summary</h2>\n");
    match &report.stats {
        Some(s) => {
            html.push_str("<table class=\"summary\">\n");
            html.push_str("<thead><tr><th>Scored</th><th>Mean</th><th>Std dev</th><th>Min</th><th>Q1</th><th>Median</th><th>Q3</th><th>Max</th><th>Passed</th></tr></thead>\n");
            html.push_str(&format!(
                "<tbody><tr><td>{}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{:.2}</td><td>{}</td></tr></tbody></table>\n",
                s.count, s.mean, s.std_dev, s.min, s.q25, s.median, s.q75, s.max, s.passed
            ));
        }
        None => html.push_str("<p>No scored scans.</p>\n"),
    }
    if report.histogram.iter().any(|&n| n > 0) {
        html.push_str(&generate_histogram(&report.histogram));
    }
    html.push_str("</section>\n");

    if !report.questions.is_empty() {
        html.push_str("<section class=\"questions\">\n");
        html.push_str("<h2>Questions</h2>\n");
        html.push_str(&generate_question_table(&report.questions));
        html.push_str("</section>\n");
    }

    // Per-scan results
    html.push_str("<section class=\"results\">\n");
    html.push_str("<h2>Scans</h2>\n");
    html.push_str("<table class=\"results-table\" id=\"results\">\n");
    html.push_str("<thead><tr><th onclick=\"sortTable(0)\">Scan</th><th onclick=\"sortTable(1)\">Student</th><th onclick=\"sortTable(2)\">Name</th><th onclick=\"sortTable(3)\">Model</th><th onclick=\"sortTable(4)\">Answers</th><th onclick=\"sortTable(5)\">Mark</th><th onclick=\"sortTable(6)\">Match</th><th onclick=\"sortTable(7)\">Flags</th></tr></thead>\n");
    html.push_str("<tbody>\n");

    for r in &report.rows {
        let (class, answers) = match &r.raw.status {
            ScanStatus::Ok => (
                if r.matched.is_some() && !r.is_matched() {
                    "warn"
                } else {
                    "pass"
                },
                r.raw
                    .answers
                    .values()
                    .map(ToString::to_string)
                    .collect::<String>(),
            ),
            ScanStatus::Unreadable { reason } => ("fail", reason.clone()),
        };
        let mark = r
            .mark
            .as_ref()
            .map(|m| format!("{:.2}", m.mark))
            .unwrap_or_else(|| "-".to_string());
        let matched = r
            .matched
            .as_ref()
            .map(|m| m.status.to_string())
            .unwrap_or_else(|| "-".to_string());
        let flags = r
            .raw
            .flags
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ");

        html.push_str(&format!(
            "<tr class=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"answers\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
            class,
            html_escape(&r.raw.scan),
            html_escape(r.student_id()),
            html_escape(r.student_name().unwrap_or("")),
            html_escape(r.raw.model.as_deref().unwrap_or("")),
            html_escape(&answers),
            mark,
            matched,
            flags
        ));
    }

    html.push_str("</tbody></table>\n");
    html.push_str("</section>\n");

    // Raw JSON
    html.push_str("<section class=\"raw-data\">\n");
    html.push_str("<details>\n<summary>Raw JSON Data</summary>\n");
    html.push_str("<pre><code>");
    html.push_str(
        &serde_json::to_string_pretty(report)
            .unwrap_or_default()
            .replace('<', "&lt;")
            .replace('>', "&gt;"),
    );
    html.push_str("</code></pre>\n");
    html.push_str("</details>\n</section>\n");

    html.push_str("<script>\n");
    html.push_str(JS);
    html.push_str("</script>\n");

    html.push_str("</body>\n</html>");
    html
}

/// Write an HTML report to a file.
pub fn write_html_report(report: &CorrectionReport, path: &Path) -> Result<()> {
    let html = generate_html(report);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, html)?;
    Ok(())
}

fn generate_question_table(questions: &[QuestionStats]) -> String {
    let mut table = String::new();
    table.push_str("<table class=\"questions-table\">\n");
    table.push_str("<thead><tr><th>Question</th><th>Correct</th><th>Wrong</th><th>Blank</th><th>Ambiguous</th><th>Correct rate</th></tr></thead>\n<tbody>\n");
    for q in questions {
        table.push_str(&format!(
            "<tr{}><td>{}{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{:.1}%</td></tr>\n",
            if q.voided { " class=\"voided\"" } else { "" },
            q.question_id,
            if q.voided { " (void)" } else { "" },
            q.correct,
            q.wrong,
            q.blank,
            q.ambiguous,
            q.correct_rate * 100.0
        ));
    }
    table.push_str("</tbody></table>\n");
    table
}

/// Vertical bar chart of the rounded-mark histogram.
fn generate_histogram(bins: &[usize]) -> String {
    let bar_width = 36;
    let gap = 8;
    let max_height = 160;
    let label_height = 20;
    let top = 20;

    let peak = bins.iter().copied().max().unwrap_or(0).max(1);
    let width = bins.len() * (bar_width + gap) + gap;
    let height = top + max_height + label_height;

    let mut svg = format!(
        "<svg width=\"{}\" height=\"{}\" xmlns=\"http://www.w3.org/2000/svg\">\n",
        width, height
    );

    let fail_bins = bins.len() / 2;
    for (mark, &count) in bins.iter().enumerate() {
        let x = gap + mark * (bar_width + gap);
        let h = count * max_height / peak;
        let y = top + max_height - h;
        let color = if mark < fail_bins { "#ef4444" } else { "#22c55e" };

        svg.push_str(&format!(
            "  <rect x=\"{}\" y=\"{}\" width=\"{}\" height=\"{}\" fill=\"{}\" rx=\"4\"/>\n",
            x, y, bar_width, h, color
        ));
        if count > 0 {
            svg.push_str(&format!(
                "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" text-anchor=\"middle\">{}</text>\n",
                x + bar_width / 2,
                y.saturating_sub(4),
                count
            ));
        }
        svg.push_str(&format!(
            "  <text x=\"{}\" y=\"{}\" font-size=\"12\" fill=\"currentColor\" text-anchor=\"middle\">{}</text>\n",
            x + bar_width / 2,
            top + max_height + label_height - 4,
            mark
        ));
    }

    svg.push_str("</svg>\n");
    svg
}

const CSS: &str = r#"
:root { --bg: #fff; --fg: #1a1a1a; --border: #e5e7eb; --pass: #dcfce7; --fail: #fde2e2; --warn: #fef9c3; }
@media (prefers-color-scheme: dark) {
  :root { --bg: #111827; --fg: #f9fafb; --border: #374151; --pass: #064e3b; --fail: #7f1d1d; --warn: #713f12; }
}
body { font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', sans-serif; margin: 0; padding: 2rem; background: var(--bg); color: var(--fg); }
h1, h2 { margin-top: 2rem; }
.meta { color: #6b7280; }
table { border-collapse: collapse; width: 100%; margin: 1rem 0; }
th, td { border: 1px solid var(--border); padding: 0.5rem 1rem; text-align: left; }
th { background: var(--border); cursor: pointer; }
.pass { background: var(--pass); }
.fail { background: var(--fail); }
.warn { background: var(--warn); }
.voided { opacity: 0.5; }
.answers { font-family: 'JetBrains Mono', 'Fira Code', monospace; letter-spacing: 0.1em; }
pre { overflow-x: auto; padding: 1rem; background: var(--border); border-radius: 8px; }
code { font-family: 'JetBrains Mono', 'Fira Code', monospace; font-size: 0.85rem; }
details { margin: 1rem 0; }
summary { cursor: pointer; font-weight: bold; }
svg { margin: 1rem 0; }
"#;

const JS: &str = r#"
function sortTable(col) {
  const table = document.getElementById('results');
  const tbody = table.querySelector('tbody');
  const rows = Array.from(tbody.querySelectorAll('tr'));
  const asc = table.dataset.sortCol == col && table.dataset.sortDir == 'asc' ? false : true;
  rows.sort((a, b) => {
    const va = a.cells[col].textContent;
    const vb = b.cells[col].textContent;
    const na = parseFloat(va), nb = parseFloat(vb);
    const cmp = !isNaN(na) && !isNaN(nb) ? na - nb : va.localeCompare(vb);
    return asc ? cmp : -cmp;
  });
  table.dataset.sortCol = col;
  table.dataset.sortDir = asc ? 'asc' : 'desc';
  rows.forEach(r => tbody.appendChild(r));
}
"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::sample_report;

    #[test]
    fn html_report_contains_required_elements() {
        let report = sample_report();
        let html = generate_html(&report);

        assert!(html.contains("<html"));
        assert!(html.contains("</html>"));
        assert!(html.contains("scan_01.png"));
        assert!(html.contains("Doe, Jane"));
        assert!(html.contains("A-?B"));
        assert!(html.contains("<svg"));
        assert!(html.contains("too few markers &amp; noise"));
    }

    #[test]
    fn html_escaping() {
        assert_eq!(html_escape("<a href='x'>&"), "&lt;a href=&#x27;x&#x27;&gt;&amp;");
    }

    #[test]
    fn histogram_has_one_bar_per_bin() {
        let svg = generate_histogram(&[0, 1, 0, 3]);
        assert_eq!(svg.matches("<rect").count(), 4);
    }

    #[test]
    fn html_report_write_to_file() {
        let report = sample_report();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.html");

        write_html_report(&report, &path).unwrap();
        assert!(path.exists());

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("<html"));
    }
}
