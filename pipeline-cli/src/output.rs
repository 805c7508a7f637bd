// Output formatting helpers for CLI commands

use pipeline_template::ParseError;

/// Print a status message: "  Status message"
pub fn status(action: &str, message: &str) {
    eprintln!("\x1b[1;36m{:>12}\x1b[0m {}", action, message);
}

/// Print a success message with checkmark
pub fn success(message: &str) {
    eprintln!("\x1b[1;32m  \u{2713}\x1b[0m {}", message);
}

/// Print a check/pass item
pub fn check(message: &str) {
    eprintln!("\x1b[32m  \u{2713}\x1b[0m {}", message);
}

/// Print a dim/muted message
pub fn dim(message: &str) {
    eprintln!("\x1b[2m{}\x1b[0m", message);
}

/// Print a stage header
pub fn stage_header(name: &str, total_jobs: usize) {
    eprintln!("\x1b[1;34m  Stage\x1b[0m '{}' ({} jobs)", name, total_jobs);
}

/// Print a parse error with its location and hint, then exit
pub fn fail(err: &ParseError) -> ! {
    let text = err.to_string();
    let mut lines = text.lines();
    if let Some(first) = lines.next() {
        let message = first.strip_prefix("error: ").unwrap_or(first);
        eprintln!("\x1b[1;31merror:\x1b[0m {}", message);
    }
    for line in lines {
        eprintln!("{}", line);
    }
    std::process::exit(1);
}
