use colored::Colorize;
use converge::{ApplyResult, TaskKey, TaskOutcome};

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

/// One line describing what happened to a task
pub fn outcome_line(key: &TaskKey, outcome: &TaskOutcome) -> String {
    let key = key.to_string();
    match outcome {
        TaskOutcome::Converged(result) => match result {
            ApplyResult::NoChange => format!("  {} {}", "=".dimmed(), key.dimmed()),
            ApplyResult::Ignored => {
                format!("  {} {} {}", "-".dimmed(), key.dimmed(), "(ignored)".dimmed())
            }
            ApplyResult::Created { .. } => format!("  {} {}", "+".green(), key),
            ApplyResult::Updated { fields } => {
                format!("  {} {} {}", "~".yellow(), key, fields.join(", ").dimmed())
            }
            ApplyResult::Warned { fields } => format!(
                "  {} {} {}",
                "!".yellow(),
                key,
                format!("differs in {}", fields.join(", ")).yellow()
            ),
            ApplyResult::Planned { create: true, .. } => format!("  {} {}", "+".green(), key),
            ApplyResult::Planned { fields, .. } => {
                format!("  {} {} {}", "~".yellow(), key, fields.join(", ").dimmed())
            }
        },
        TaskOutcome::Failed(err) => format!("  {} {} {}", "✗".red(), key, err.to_string().red()),
        TaskOutcome::Skipped { cause } => format!(
            "  {} {} {}",
            "↷".dimmed(),
            key,
            format!("(skipped, {cause} failed)").dimmed()
        ),
        TaskOutcome::Cancelled => format!("  {} {} {}", "·".dimmed(), key, "(cancelled)".dimmed()),
    }
}
