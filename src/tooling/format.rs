//! Format tables, plans and cycle reports as text.

use crate::reconcile::{Action, CycleReport, PlannedAction};
use crate::table::FileTable;
use chrono::{TimeZone, Utc};
use comfy_table::presets::UTF8_BORDERS_ONLY;
use comfy_table::Table;
use owo_colors::OwoColorize;

/// Format a section heading with bold/underline.
pub fn format_section_heading(title: &str) -> String {
    format!("{}", title.bold().underline())
}

fn format_millis(millis: i64) -> String {
    Utc.timestamp_millis_opt(millis)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| millis.to_string())
}

fn colored_action(action: Action) -> String {
    let label = action.to_string();
    match action {
        Action::Skip => format!("{}", label.dimmed()),
        Action::Upload => format!("{}", label.green()),
        Action::Download => format!("{}", label.cyan()),
        Action::DeleteLocal | Action::DeleteRemote => format!("{}", label.red()),
        Action::CollectTombstone => format!("{}", label.yellow()),
    }
}

pub fn format_file_table_text(table: &FileTable) -> String {
    let mut out = format!("{}\n\n", format_section_heading("Local files"));
    if table.is_empty() {
        out.push_str("No files.\n");
        return out;
    }
    let mut rows = Table::new();
    rows.load_preset(UTF8_BORDERS_ONLY);
    rows.set_header(vec!["Path", "Size", "Modified (UTC)", "Checksum", "Exec"]);
    for record in table.iter() {
        rows.add_row(vec![
            record.path.to_string(),
            record.size.to_string(),
            format_millis(record.modified_at),
            record.checksum.to_string(),
            if record.executable { "x" } else { "" }.to_string(),
        ]);
    }
    out.push_str(&format!("{}\n\n", rows));
    let total: u64 = table.iter().map(|r| r.size).sum();
    out.push_str(&format!("Total: {} files, {} bytes.\n", table.len(), total));
    out
}

/// Plan as a table; identical paths are summarized rather than listed.
pub fn format_plan_text(planned: &[PlannedAction]) -> String {
    let mut out = format!("{}\n\n", format_section_heading("Planned actions"));
    let pending: Vec<&PlannedAction> = planned.iter().filter(|p| p.action != Action::Skip).collect();
    let in_sync = planned.len() - pending.len();

    if pending.is_empty() {
        out.push_str(&format!("Nothing to do; {} paths in sync.\n", in_sync));
        return out;
    }
    let mut rows = Table::new();
    rows.load_preset(UTF8_BORDERS_ONLY);
    rows.set_header(vec!["Path", "Action", "Reason"]);
    for p in &pending {
        rows.add_row(vec![p.path.to_string(), colored_action(p.action), p.reason.to_string()]);
    }
    out.push_str(&format!("{}\n\n", rows));
    out.push_str(&format!("{} actions, {} paths in sync.\n", pending.len(), in_sync));
    out
}

pub fn format_report_text(report: &CycleReport) -> String {
    let mut out = format!("{}\n\n", format_section_heading("Cycle report"));
    let mut rows = Table::new();
    rows.load_preset(UTF8_BORDERS_ONLY);
    rows.set_header(vec!["Outcome", "Count"]);
    for (label, count) in [
        ("Uploaded", report.uploaded),
        ("Downloaded", report.downloaded),
        ("Deleted locally", report.deleted_local),
        ("Deleted on coordinator", report.deleted_remote),
        ("Tombstones created", report.tombstones_created),
        ("Tombstones collected", report.tombstones_collected),
        ("In sync", report.skipped),
        ("Failed", report.failed()),
    ] {
        rows.add_row(vec![label.to_string(), count.to_string()]);
    }
    out.push_str(&format!("{}\n", rows));

    if !report.failures.is_empty() {
        out.push_str(&format!("\n{}\n\n", format_section_heading("Failures")));
        let mut failures = Table::new();
        failures.load_preset(UTF8_BORDERS_ONLY);
        failures.set_header(vec!["Path", "Action", "Error", "Retry"]);
        for f in &report.failures {
            failures.add_row(vec![
                f.path.to_string(),
                f.action.to_string(),
                format!("{}", f.error.red()),
                if f.retryable { "next cycle" } else { "no" }.to_string(),
            ]);
        }
        out.push_str(&format!("{}\n", failures));
    }
    out
}
