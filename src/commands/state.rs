use anyhow::{Result, bail};
use colored::Colorize;

use super::Stack;
use crate::Context;
use crate::cli::StateCommand;
use crate::ui;

pub fn run(ctx: &Context, cmd: StateCommand) -> Result<()> {
    let stack = Stack::locate(ctx)?;
    match cmd {
        StateCommand::Show => show(&stack),
        StateCommand::List => list(&stack),
        StateCommand::Unlock { force } => unlock(&stack, force),
    }
}

fn show(stack: &Stack) -> Result<()> {
    let snapshot = stack.store.load()?;
    ui::header(&format!("State for {}", stack.name));
    ui::kv("File", &stack.store.snapshot_path().display().to_string());
    ui::kv("Version", &snapshot.version.to_string());
    ui::kv("Serial", &snapshot.serial.to_string());
    ui::kv(
        "Updated",
        &snapshot.updated_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    );
    ui::kv("Resources", &snapshot.len().to_string());
    let deposed: usize = snapshot.deposed.values().map(Vec::len).sum();
    if deposed > 0 {
        ui::kv("Deposed", &deposed.to_string().yellow().to_string());
    }
    if !snapshot.checksum.is_empty() {
        ui::kv("Checksum", &snapshot.checksum[..snapshot.checksum.len().min(16)]);
    }
    match stack.store.lock_info()? {
        Some(info) => ui::kv("Lock", &info.describe().yellow().to_string()),
        None if stack.store.lock_path().exists() => ui::kv("Lock", &"held (unreadable)".yellow().to_string()),
        None => ui::kv("Lock", "free"),
    }
    Ok(())
}

fn list(stack: &Stack) -> Result<()> {
    let snapshot = stack.store.load()?;
    if snapshot.is_empty() {
        ui::info("No resources recorded");
        return Ok(());
    }
    let width = snapshot.ids().map(str::len).max().unwrap_or(0);
    for (id, entry) in &snapshot.resources {
        println!(
            "  {:<width$}  {}  {}",
            id.bold(),
            entry.physical_id,
            entry.kind.dimmed()
        );
    }
    Ok(())
}

fn unlock(stack: &Stack, force: bool) -> Result<()> {
    if !stack.store.lock_path().exists() {
        ui::info("State is not locked");
        return Ok(());
    }
    if !force {
        let holder = stack
            .store
            .lock_info()?
            .map_or_else(|| "unknown holder".to_string(), |info| info.describe());
        bail!(
            "state is locked by {holder}; if that run is gone, re-run with --force"
        );
    }
    match stack.store.force_unlock()? {
        Some(info) => ui::success(&format!("Removed lock held by {}", info.describe())),
        None => ui::success("Removed lock"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::tests::{NETWORK, context, stack};

    #[test]
    fn test_unlock_requires_force() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), NETWORK);
        let stack = stack(&ctx);

        unlock(&stack, false).unwrap();

        let lock = stack.store.lock().unwrap();
        // Simulate a crashed run: the lock file outlives its holder
        std::mem::forget(lock);

        let err = unlock(&stack, false).unwrap_err();
        assert!(err.to_string().contains("--force"));
        assert!(stack.store.lock_path().exists());

        unlock(&stack, true).unwrap();
        assert!(!stack.store.lock_path().exists());
        assert!(stack.store.lock().is_ok());
    }

    #[test]
    fn test_show_and_list_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path(), NETWORK);
        let stack = stack(&ctx);
        show(&stack).unwrap();
        list(&stack).unwrap();
    }
}
