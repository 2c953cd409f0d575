//! Output formatting utilities

use console::{style, Style};

use gantry_tasks::Outcome;

/// Print a success message
pub fn success(message: &str) {
    println!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message
pub fn warning(message: &str) {
    println!("{} {}", style("!").yellow().bold(), message);
}

/// Print an info message
pub fn info(message: &str) {
    println!("{} {}", style("→").blue(), message);
}

/// Create a styled header
pub fn header(text: &str) -> String {
    style(text).bold().to_string()
}

/// Create a styled key-value line
pub fn key_value(key: &str, value: &str) -> String {
    format!("  {}: {}", style(key).dim(), value)
}

/// Style for host names
pub fn host_style() -> Style {
    Style::new().cyan()
}

/// Style for group labels
pub fn group_style() -> Style {
    Style::new().yellow()
}

/// Style for a progress symbol
pub fn outcome_style(outcome: Outcome) -> Style {
    match outcome {
        Outcome::Success => Style::new().green(),
        Outcome::Failure => Style::new().red().bold(),
        Outcome::ValidationError => Style::new().magenta().bold(),
        Outcome::Timeout => Style::new().yellow().bold(),
    }
}

/// `n thing` or `n things`
pub fn plural(count: usize, noun: &str) -> String {
    if count == 1 {
        format!("{} {}", count, noun)
    } else {
        format!("{} {}s", count, noun)
    }
}
