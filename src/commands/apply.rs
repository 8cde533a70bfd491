//! `apply` and `destroy`

use anyhow::{Result, bail};
use colored::Colorize;
use provision::{
    AutoConfirm, ChangeSet, ConfirmCallback, Executor, Model, NoProgress, Outcome, RunReport,
    Schemas, diff, document::render_output,
};
use std::io::{self, IsTerminal};

use super::Stack;
use crate::Context;
use crate::cli::ApplyArgs;
use crate::progress::RunProgress;
use crate::ui;

use super::plan;

/// Confirmation through an interactive terminal prompt
pub struct PromptConfirm;

impl ConfirmCallback for PromptConfirm {
    fn confirm(&mut self, prompt: &str) -> io::Result<bool> {
        if !io::stdin().is_terminal() {
            return Err(io::Error::other(
                "refusing to prompt on a non-interactive terminal; pass --yes",
            ));
        }
        dialoguer::Confirm::new()
            .with_prompt(prompt)
            .default(false)
            .interact()
            .map_err(io::Error::other)
    }
}

pub fn apply(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let (doc, model) = stack.model()?;
    let mut confirm = confirmer(args);

    let Some(report) = converge(ctx, &stack, &model, doc.schemas(), args, &mut *confirm, "Apply")?
    else {
        return Ok(());
    };

    let snapshot = stack.store.load()?;
    let outputs = doc.outputs(&snapshot)?;
    if !outputs.is_empty() && !ctx.quiet {
        ui::section("Outputs");
        for (name, value) in &outputs {
            match value {
                Some(value) => ui::kv(name, &render_output(value)),
                None => ui::kv(name, &"(not yet known)".dimmed().to_string()),
            }
        }
    }

    finish(&report)
}

pub fn destroy(ctx: &Context, args: &ApplyArgs) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    let mut confirm = confirmer(args);
    // Kind schemas are irrelevant when every change is a delete
    let report = converge(
        ctx,
        &stack,
        &Model::new(),
        &Schemas::new(),
        args,
        &mut *confirm,
        "Destroy",
    )?;
    match report {
        Some(report) => finish(&report),
        None => Ok(()),
    }
}

fn confirmer(args: &ApplyArgs) -> Box<dyn ConfirmCallback> {
    if args.yes {
        Box::new(AutoConfirm)
    } else {
        Box::new(PromptConfirm)
    }
}

/// Lock, diff, confirm and execute
///
/// Returns `None` when the user declined.
fn converge(
    ctx: &Context,
    stack: &Stack,
    model: &Model,
    schemas: &Schemas,
    args: &ApplyArgs,
    confirm: &mut dyn ConfirmCallback,
    verb: &str,
) -> Result<Option<RunReport>> {
    let providers = stack.providers();
    let lock = stack.store.lock()?;
    let mut snapshot = lock.load()?;
    let changes = diff::plan(model, &snapshot, schemas)?;

    let options = stack.config.execute_options(args);
    let executor = Executor::new(&providers, options);

    if !changes.has_changes() {
        // Still run so unchanged entries pick up new dependency edges
        let report = executor.execute(&changes, &lock, &mut snapshot, &mut NoProgress)?;
        lock.unlock()?;
        if !ctx.quiet {
            ui::success(&plan::summary_line(&changes.summary()));
        }
        return Ok(Some(report));
    }

    if !ctx.quiet {
        plan::print_changes(&changes, ctx.verbose > 0);
        println!();
    }
    let prompt = format!("{verb} {}?", ui::plural(changes.summary().total(), "change"));
    if !confirm.confirm(&prompt)? {
        ui::info(&format!("{verb} cancelled, nothing was changed"));
        return Ok(None);
    }

    let cancel = executor.cancel_token();
    if let Err(e) = ctrlc::set_handler(move || cancel.cancel()) {
        log::warn!("Could not install Ctrl-C handler: {e}");
    }

    let mut progress = RunProgress::new(ctx.quiet);
    let report = executor.execute(&changes, &lock, &mut snapshot, &mut progress)?;
    lock.unlock()?;

    if !ctx.quiet {
        print_report(&changes, &report);
    }
    Ok(Some(report))
}

fn print_report(changes: &ChangeSet, report: &RunReport) {
    let summary = report.summary();
    println!();
    if report.is_success() {
        println!(
            "  {} {} applied",
            "✓".green().bold(),
            ui::plural(summary.succeeded, "change")
        );
        return;
    }

    if report.cancelled {
        ui::warn("Run cancelled; in-flight changes were allowed to finish");
    }
    for entry in &report.changes {
        let kind = changes.get(&entry.id).map_or("", |c| c.kind.as_str());
        match &entry.outcome {
            Outcome::Failed { error, attempts } => println!(
                "  {} {} {} ({kind}): {error} [{}]",
                ui::outcome_marker(&entry.outcome),
                entry.action,
                entry.id.bold(),
                ui::plural(*attempts as usize, "attempt")
            ),
            Outcome::Blocked { reason } => println!(
                "  {} {} {} ({kind}): {reason}",
                ui::outcome_marker(&entry.outcome),
                entry.action,
                entry.id.bold()
            ),
            _ => {}
        }
    }
    println!(
        "  {} succeeded, {} failed, {} blocked",
        summary.succeeded.to_string().green(),
        summary.failed.to_string().red(),
        summary.blocked.to_string().yellow()
    );
}

/// Non-zero exit when anything failed or was blocked
fn finish(report: &RunReport) -> Result<()> {
    if report.is_success() {
        return Ok(());
    }
    let summary = report.summary();
    if let Some(first) = report.first_error() {
        log::debug!("First failure: {first}");
    }
    bail!(
        "{} failed, {} blocked; state records everything that succeeded",
        ui::plural(summary.failed, "change"),
        ui::plural(summary.blocked, "change")
    )
}
