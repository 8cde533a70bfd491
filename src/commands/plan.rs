use anyhow::Result;
use colored::Colorize;
use provision::{Action, Cause, Change, ChangeSet, DiffSummary, diff};

use super::Stack;
use crate::Context;
use crate::ui;

pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let (doc, model) = stack.model()?;
    let snapshot = stack.store.load()?;
    let changes = diff::plan(&model, &snapshot, doc.schemas())?;

    if json {
        println!("{}", serde_json::to_string_pretty(&changes)?);
        return Ok(());
    }
    print_changes(&changes, ctx.verbose > 0);
    Ok(())
}

/// Print a change set grouped by kind, followed by a one-line summary
pub fn print_changes(changes: &ChangeSet, show_noop: bool) {
    for (kind, group) in changes.group_by_kind() {
        let visible: Vec<&Change> = group
            .into_iter()
            .filter(|c| show_noop || c.action.is_change())
            .collect();
        if visible.is_empty() {
            continue;
        }
        ui::section(kind);
        for change in visible {
            for line in describe(change) {
                println!("{line}");
            }
        }
    }
    println!();
    println!("{}", summary_line(&changes.summary()));
}

fn describe(change: &Change) -> Vec<String> {
    let mut lines = vec![format!(
        "  {} {} {}",
        ui::action_symbol(change.action),
        change.id.bold(),
        cause_note(change).dimmed()
    )];
    if matches!(change.action, Action::Update | Action::Replace) {
        for field in &change.fields {
            let old = field.old.as_ref().map_or("(unset)".to_string(), |v| v.display_short());
            let new = if field.provisional {
                "(known after apply)".to_string()
            } else {
                field.new.as_ref().map_or("(unset)".to_string(), |v| v.display_short())
            };
            let marker = if field.forces_replace {
                " # forces replacement".red().to_string()
            } else {
                String::new()
            };
            lines.push(format!("      {}: {} -> {}{}", field.field, old, new, marker));
        }
    }
    lines
}

fn cause_note(change: &Change) -> String {
    match (change.action, change.cause) {
        (Action::Replace, _) => {
            let strategy = match change.replace {
                Some(provision::ReplaceStrategy::CreateBeforeDelete) => "create before delete",
                _ => "delete before create",
            };
            match change.cause {
                Cause::KindChanged => format!("(kind changed, {strategy})"),
                Cause::UpstreamReplaced => format!("(dependency replaced, {strategy})"),
                _ => format!("({strategy})"),
            }
        }
        (_, Cause::UpstreamReplaced) => "(dependency replaced)".to_string(),
        (Action::Delete, Cause::Deposed) => "(left behind by an earlier replacement)".to_string(),
        (Action::Delete, _) => "(no longer declared)".to_string(),
        _ => String::new(),
    }
}

pub fn summary_line(summary: &DiffSummary) -> String {
    if !summary.has_changes() {
        return "No changes. Infrastructure matches the document.".to_string();
    }
    format!(
        "Plan: {} to create, {} to update, {} to replace, {} to delete.",
        summary.creates.to_string().green(),
        summary.updates.to_string().yellow(),
        summary.replaces.to_string().magenta(),
        summary.deletes.to_string().red()
    )
}
