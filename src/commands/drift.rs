use anyhow::{Result, bail};
use colored::Colorize;
use provision::{DriftReport, DriftStatus, drift};

use super::Stack;
use crate::Context;
use crate::ui;

/// Exits non-zero when anything drifted
pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let snapshot = stack.store.load()?;
    if snapshot.is_empty() {
        ui::info("Nothing recorded in state; run apply first");
        return Ok(());
    }

    let report = drift::detect(&snapshot, &stack.providers());
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report, ctx.verbose > 0);
    }

    verdict(&report)
}

/// Failed reads first, then drift; either exits non-zero
fn verdict(report: &DriftReport) -> Result<()> {
    let mut failures = report.read_failures();
    if !failures.is_empty() {
        let count = failures.len();
        let first = failures.swap_remove(0);
        return Err(anyhow::Error::new(first)
            .context(format!("could not read {}", ui::plural(count, "resource"))));
    }
    let drifted = report.drifted().count();
    if drifted > 0 {
        bail!("{} drifted from recorded state", ui::plural(drifted, "resource"));
    }
    Ok(())
}

fn print_report(report: &DriftReport, show_in_sync: bool) {
    ui::header("Drift");
    for entry in &report.entries {
        let label = format!("{} ({}, {})", entry.id, entry.kind, entry.physical_id);
        match &entry.status {
            DriftStatus::InSync => {
                if show_in_sync {
                    println!("  {} {}", "✓".green(), label);
                }
            }
            DriftStatus::Drifted { fields } => {
                println!("  {} {}", "~".yellow().bold(), label);
                for field in fields {
                    let recorded = field.old.as_ref().map_or("(unset)".to_string(), |v| v.display_short());
                    let live = field.new.as_ref().map_or("(unset)".to_string(), |v| v.display_short());
                    println!("      {}: {} -> {}", field.field, recorded, live.yellow());
                }
            }
            DriftStatus::Missing => println!("  {} {} {}", "-".red().bold(), label, "missing".red()),
            DriftStatus::Unsupported => ui::dim(&format!("{label}: provider cannot read this kind")),
            DriftStatus::Error { error } => ui::warn(&format!("{label}: {error}")),
        }
    }
    let drifted = report.drifted().count();
    if drifted == 0 {
        ui::success(&format!(
            "{} in sync",
            ui::plural(report.entries.len(), "resource")
        ));
    }
}
