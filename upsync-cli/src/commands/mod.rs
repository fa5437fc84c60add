pub mod backups;
pub mod rollback;
pub mod sync;

use std::io::{self, Write};

use colored::Colorize;

/// Ask on stderr, read one line from stdin. Anything but `y`/`yes` is a no,
/// including EOF.
pub fn confirm(prompt: &str) -> bool {
    eprint!("{} {prompt} [y/N] ", "?".yellow().bold());
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
