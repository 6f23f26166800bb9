use std::path::Path;

use strata_engine::{RunReport, StatusReport};

/// Print the status box: header with database and catalog, then one row per step.
pub fn print_status(status: &StatusReport, database: &Path, catalog: &Path) {
    let version = env!("CARGO_PKG_VERSION");

    let width = 78;
    let version_w = 16;
    let state_w = 22;
    let name_w = width - version_w - state_w - 7; // borders and gaps

    let title = format!("strata v{version}");
    let title_dashes = width - 2 - title.len() - 5;
    let top = format!("╭─── {title} {}╮", "─".repeat(title_dashes));
    let rule = format!("├{}┤", "─".repeat(width - 2));
    let bottom = format!("╰{}╯", "─".repeat(width - 2));

    let line = |text: &str| format!("│ {:<w$} │", truncate(text, width - 4), w = width - 4);
    let row = |v: &str, n: &str, s: &str| {
        format!(
            "│ {:<version_w$} {:<name_w$} {:<state_w$} │",
            v,
            truncate(n, name_w),
            s
        )
    };

    println!("{top}");
    println!("{}", line(&format!("Database    {}", database.display())));
    println!("{}", line(&format!("Catalog     {}", catalog.display())));
    println!(
        "{}",
        line(&format!(
            "Steps       {} applied, {} pending",
            status.applied_count(),
            status.pending_count()
        ))
    );
    println!("{rule}");
    println!("{}", row("Version", "Name", "Applied"));
    for step in &status.steps {
        let state = match step.applied_at {
            Some(at) => at.format("%Y-%m-%d %H:%M:%S").to_string(),
            None => "pending".to_string(),
        };
        println!("{}", row(&step.version.to_string(), &step.name, &state));
    }
    if !status.orphaned.is_empty() {
        println!("{rule}");
        println!("{}", line("Applied but missing from the catalog:"));
        for entry in &status.orphaned {
            println!("{}", row(&entry.version.to_string(), &entry.name, "orphaned"));
        }
    }
    println!("{bottom}");
}

pub fn status_json(status: &StatusReport) -> serde_json::Value {
    let steps: Vec<serde_json::Value> = status
        .steps
        .iter()
        .map(|s| {
            serde_json::json!({
                "version": s.version,
                "name": s.name,
                "reversible": s.reversible,
                "applied_at": s.applied_at.map(|at| at.to_rfc3339()),
            })
        })
        .collect();
    serde_json::json!({
        "steps": steps,
        "pending": status.pending_count(),
        "orphaned": status.orphaned,
    })
}

pub fn print_run(report: &RunReport) {
    if report.applied.is_empty() {
        println!(
            "Schema is up to date ({} step{} applied).",
            report.already_applied,
            plural(report.already_applied)
        );
        return;
    }
    for step in &report.applied {
        println!(
            "  {}  {:<50} {} run, {} skipped ({} ms)",
            step.version,
            truncate(&step.name, 50),
            step.outcome.executed,
            step.outcome.skipped,
            step.elapsed.as_millis()
        );
    }
    println!(
        "Applied {} step{} ({} operation{}).",
        report.applied.len(),
        plural(report.applied.len()),
        report.executed_operations(),
        plural(report.executed_operations())
    );
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "" } else { "s" }
}

fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}
