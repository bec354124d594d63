//! Status rendering (§6): human-readable prose by default, newline-delimited
//! `key=value` behind `--porcelain` so scripts can depend on stable field
//! names without parsing prose.

use migr_workflow::StatusReport;

pub fn render_human(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("marker: {}\n", report.marker.as_deref().unwrap_or("absent")));
    out.push_str(&format!("journal entries: {}\n", report.journal_entries));
    out.push_str(&format!("schema hash: {}\n", report.schema_hash.as_deref().unwrap_or("n/a")));
    out.push_str(&format!("schema commit: {}\n", report.schema_commit.as_deref().unwrap_or("n/a")));
    out.push_str(&format!("new status: {}\n", report.new_status.as_deref().unwrap_or("absent")));
    out.push_str(&format!(
        "id mappings: {}\n",
        report.id_mappings.map(|n| n.to_string()).unwrap_or_else(|| "removed".to_string())
    ));
    out.push_str(&format!(
        "pending replay: {}\n",
        match (report.pending_replay, report.new_status.as_deref()) {
            (Some(n), Some("ready")) => format!("{n} (ready)"),
            (Some(n), _) => n.to_string(),
            (None, _) => "0".to_string(),
        }
    ));
    out
}

pub fn render_porcelain(report: &StatusReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("marker={}\n", report.marker.as_deref().unwrap_or("")));
    out.push_str(&format!("journal_entries={}\n", report.journal_entries));
    out.push_str(&format!("schema_hash={}\n", report.schema_hash.as_deref().unwrap_or("")));
    out.push_str(&format!("schema_commit={}\n", report.schema_commit.as_deref().unwrap_or("")));
    out.push_str(&format!("new_status={}\n", report.new_status.as_deref().unwrap_or("")));
    out.push_str(&format!("id_mappings={}\n", report.id_mappings.map(|n| n.to_string()).unwrap_or_default()));
    out.push_str(&format!("pending_replay={}\n", report.pending_replay.map(|n| n.to_string()).unwrap_or_default()));
    out
}
