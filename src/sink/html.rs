use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;

use super::{ensure_parent, write_atomic, Snapshot, SnapshotSink};
use crate::reconcile::OutcomeStatus;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const STYLE: &str = "\
body { font-family: Arial, sans-serif; margin: 20px; background: #f5f5f5; }
h1 { color: #333; }
.summary { background: white; padding: 20px; border-radius: 8px; margin-bottom: 20px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
.stat { display: inline-block; margin: 10px 20px; }
.stat-label { font-weight: bold; color: #666; }
.stat-value { font-size: 24px; font-weight: bold; }
.match { color: #28a745; }
.mismatch { color: #dc3545; }
.orphaned { color: #ffc107; }
.duplicate { color: #17a2b8; }
table { width: 100%; border-collapse: collapse; background: white; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
th { background: #007bff; color: white; padding: 12px; text-align: left; }
td { padding: 10px; border-bottom: 1px solid #ddd; }
tr:hover { background: #f8f9fa; }
.status-match { background: #d4edda; }
.status-mismatch { background: #f8d7da; }
.status-orphaned { background: #fff3cd; }
.key { font-family: monospace; }
";

/// Writes a self-refreshing HTML report.
pub struct HtmlSink {
    path: PathBuf,
    refresh: Duration,
}

impl HtmlSink {
    pub fn new(path: impl Into<PathBuf>, refresh: Duration) -> Self {
        Self {
            path: path.into(),
            refresh,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotSink for HtmlSink {
    fn name(&self) -> &str {
        "html"
    }

    async fn start(&mut self) -> Result<()> {
        ensure_parent(&self.path).await
    }

    async fn publish(&self, snapshot: &Snapshot) -> Result<()> {
        let page = render(snapshot, self.refresh);
        write_atomic(&self.path, page.as_bytes()).await
    }

    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Render the report page.
pub fn render(snapshot: &Snapshot, refresh: Duration) -> String {
    let mut html = String::with_capacity(8 * 1024 + snapshot.recent_outcomes.len() * 512);
    let c = &snapshot.counters;

    let _ = write!(
        html,
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset='UTF-8'>\n\
         <meta http-equiv='refresh' content='{}'>\n\
         <title>Message Reconciliation Report</title>\n<style>\n{STYLE}</style>\n</head>\n<body>\n",
        refresh.as_secs().max(1)
    );
    html.push_str("<h1>Message Reconciliation Report</h1>\n");
    let _ = writeln!(
        html,
        "<p>Generated: {}</p>",
        snapshot.generated_at.format(TIMESTAMP_FORMAT)
    );

    html.push_str("<div class='summary'>\n<h2>Summary Statistics</h2>\n");
    stat(&mut html, "Total Messages", "", c.observed.to_string());
    stat(&mut html, "Matched", "match", c.matched.to_string());
    stat(&mut html, "Mismatched", "mismatch", c.mismatched.to_string());
    stat(&mut html, "Orphaned Legacy", "orphaned", c.orphaned_legacy.to_string());
    stat(&mut html, "Orphaned Modern", "orphaned", c.orphaned_modern.to_string());
    stat(&mut html, "Duplicates", "duplicate", c.duplicates.to_string());
    stat(&mut html, "Discarded", "", c.discarded.to_string());
    stat(
        &mut html,
        "Success Rate",
        "",
        format!("{:.2}%", snapshot.success_rate),
    );
    html.push_str("</div>\n");

    html.push_str("<div class='summary'>\n<h2>Pending Message Pairs</h2>\n");
    let _ = writeln!(
        html,
        "<p>Waiting for pair: {} messages</p>",
        snapshot.pending_count
    );
    html.push_str("</div>\n");

    let _ = writeln!(
        html,
        "<h2>Recent Reconciliation Results (Last {})</h2>",
        snapshot.recent_outcomes.len()
    );
    html.push_str(
        "<table>\n<thead>\n<tr>\n\
         <th>Timestamp</th><th>Key</th><th>Program</th><th>Date</th><th>Time</th><th>Msg#</th>\
         <th>Status</th><th>Latency (ms)</th><th>Differences</th>\n\
         </tr>\n</thead>\n<tbody>\n",
    );

    for outcome in &snapshot.recent_outcomes {
        let key = &outcome.key;
        let _ = write!(
            html,
            "<tr class='{}'>\n\
             <td>{}</td>\n<td class='key'>{}</td>\n<td>{}</td>\n<td>{}</td>\n<td>{}</td>\n<td>{}</td>\n\
             <td><strong>{}</strong></td>\n<td>{}</td>\n<td>{}</td>\n</tr>\n",
            row_class(outcome.status),
            outcome.produced_at.format(TIMESTAMP_FORMAT),
            escape_html(key.as_str()),
            escape_html(key.producer_tag()),
            escape_html(key.date()),
            escape_html(key.time()),
            escape_html(key.sequence()),
            outcome.status,
            outcome.latency_ms(),
            escape_html(outcome.diff_summary.as_deref().unwrap_or("")),
        );
    }

    html.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    html
}

fn stat(html: &mut String, label: &str, class: &str, value: String) {
    let _ = writeln!(
        html,
        "<div class='stat'><div class='stat-label'>{label}</div><div class='stat-value {class}'>{value}</div></div>"
    );
}

fn row_class(status: OutcomeStatus) -> &'static str {
    match status {
        OutcomeStatus::Match => "status-match",
        OutcomeStatus::Mismatch => "status-mismatch",
        OutcomeStatus::OrphanedLegacy | OutcomeStatus::OrphanedModern => "status-orphaned",
    }
}

/// Escape text for inclusion in HTML element content or quoted attributes.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}
