use owo_colors::OwoColorize;

use crate::VERSION;

/// Print a styled banner for verbose mode
pub fn print_banner() {
    eprintln!(
        "\n{} {} {}",
        "Gleaner".bold().bright_blue(),
        "v".dimmed(),
        VERSION.dimmed()
    );
    eprintln!("{}", "Extract titles and body text from web pages\n".dimmed());
}

/// Print a styled step message
pub fn print_step(step: usize, total: usize, message: &str) {
    eprintln!("{} {}", format!("[{}/{}]", step, total).dimmed(), message.bright_cyan());
}

/// Print a success message
pub fn print_success(message: &str) {
    eprintln!("{} {}", "✓".green(), message.bright_green());
}

/// Print an info message
pub fn print_info(message: &str) {
    eprintln!("{} {}", "ℹ".blue(), message.bright_blue());
}

/// Print a warning message
pub fn print_warning(message: &str) {
    eprintln!("{} {}", "⚠".yellow(), message.bright_yellow());
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message.bright_red());
}

/// Print one persisted document
pub fn print_report(report: &gleaner_core::VisitReport) {
    let title = report.title.as_deref().unwrap_or("(untitled)");
    print_success(&format!("{} {}", title, format!("({})", format_size(report.bytes_written)).dimmed()));
    eprintln!("  {} {}", "Source:".dimmed(), report.url.bright_white());
}

/// Print the outcome of a batch run
pub fn print_summary(summary: &gleaner_core::CrawlSummary, elapsed: std::time::Duration) {
    eprintln!("\n{}", "═".repeat(60).dimmed());
    eprintln!("{}", "Run Summary".bold().cyan());
    eprintln!("{}", "═".repeat(60).dimmed());
    eprintln!(
        "  {} {}",
        "Succeeded:".dimmed(),
        summary.succeeded.len().to_string().bright_green()
    );
    eprintln!("  {} {}", "Failed:".dimmed(), summary.failed.len().to_string().bright_red());
    eprintln!(
        "  {} {}",
        "Duplicates:".dimmed(),
        summary.duplicates.to_string().bright_white()
    );
    eprintln!(
        "  {} {}",
        "Cancelled:".dimmed(),
        summary.cancelled.to_string().bright_yellow()
    );
    eprintln!(
        "  {} {:>8.2}ms\n",
        format!("{}:", "Total").bold().dimmed(),
        elapsed.as_secs_f64() * 1000.0
    );
}

/// Format file size for display
pub fn format_size(bytes: usize) -> String {
    const KB: usize = 1024;
    const MB: usize = 1024 * KB;

    if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
