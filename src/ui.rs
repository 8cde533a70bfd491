use colored::{ColoredString, Colorize};
use provision::{Action, Outcome};

/// Print an info message
pub fn info(msg: &str) {
    println!("{} {}", "ℹ".blue(), msg);
}

/// Print a success message
pub fn success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

/// Print a warning message
pub fn warn(msg: &str) {
    println!("{} {}", "⚠".yellow(), msg);
}

/// Print an error message
pub fn error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}

/// Print a dim/muted message
pub fn dim(msg: &str) {
    println!("  {}", msg.dimmed());
}

/// Print a header/title
pub fn header(title: &str) {
    println!();
    println!("{}", title.bold());
    println!("{}", "─".repeat(title.chars().count()).dimmed());
}

/// Print a section header
pub fn section(title: &str) {
    println!();
    println!("{}", title.cyan().bold());
}

/// Print a key-value pair
pub fn kv(key: &str, value: &str) {
    println!("  {}: {}", key.dimmed(), value);
}

/// Plan symbol colored by action
pub fn action_symbol(action: Action) -> ColoredString {
    let symbol = action.symbol();
    match action {
        Action::Create => symbol.green().bold(),
        Action::Update => symbol.yellow().bold(),
        Action::Replace => symbol.magenta().bold(),
        Action::Delete => symbol.red().bold(),
        Action::Noop => symbol.normal(),
    }
}

/// Outcome marker for run summaries
pub fn outcome_marker(outcome: &Outcome) -> ColoredString {
    match outcome {
        Outcome::Succeeded { .. } => "✓".green(),
        Outcome::Failed { .. } => "✗".red(),
        Outcome::Blocked { .. } => "⊘".yellow(),
        Outcome::Noop => "·".dimmed(),
    }
}

/// Pluralize a count: `plural(1, "resource")` -> "1 resource"
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{count} {noun}")
    } else {
        format!("{count} {noun}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plural() {
        assert_eq!(plural(0, "change"), "0 changes");
        assert_eq!(plural(1, "change"), "1 change");
        assert_eq!(plural(3, "resource"), "3 resources");
    }
}
