use owo_colors::OwoColorize;

/// Standard output formatting for the CLI
pub struct Output;

impl Output {
    pub fn new() -> Self {
        Self
    }

    /// Print a success message (indented)
    pub fn success(&self, message: &str) {
        println!("  {} {}", "✓".bright_green(), message);
    }

    /// Print an error message (indented)
    pub fn error(&self, message: &str) {
        println!("  {} {}", "✗".bright_red(), message);
    }

    /// Print a warning message (indented)
    pub fn warning(&self, message: &str) {
        println!("  {} {}", "⚠".yellow(), message);
    }

    /// Print a section header
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(40).dimmed());
    }

    /// Print a key-value pair (indented)
    pub fn kv(&self, key: &str, value: &str) {
        println!("  {} {}", format!("{}:", key).dimmed(), value);
    }

    /// Print a dimmed status line (indented)
    pub fn status(&self, message: &str) {
        println!("  {}", message.dimmed());
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}
