use colored::{ColoredString, Colorize};
use scribe_core::{LogEntry, LogLevel, TaskId, TaskStatus};

pub fn header(title: &str) {
    println!("{}", title.bold().underline());
}

pub fn info(msg: &str) {
    eprintln!("{} {}", "info:".blue().bold(), msg);
}

pub fn warn(msg: &str) {
    eprintln!("{} {}", "warning:".yellow().bold(), msg);
}

pub fn success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg);
}

pub fn status(status: TaskStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        TaskStatus::Completed => label.green().bold(),
        TaskStatus::Failed => label.red().bold(),
        TaskStatus::Cancelled => label.yellow().bold(),
        TaskStatus::Running => label.cyan(),
        TaskStatus::Pending => label.dimmed()
    }
}

/// First 8 characters of a task id.
pub fn short_id(id: &TaskId) -> &str {
    let id = id.as_str();
    id.char_indices().nth(8).map_or(id, |(i, _)| &id[..i])
}

/// One streamed task log line, written to stderr.
pub fn log_line(id: &TaskId, entry: &LogEntry) {
    let level = match entry.level {
        LogLevel::Error => "ERROR".red().bold(),
        LogLevel::Warn => "WARN ".yellow(),
        LogLevel::Info => "INFO ".blue(),
        LogLevel::Debug => "DEBUG".dimmed()
    };
    eprintln!(
        "{} {} {} {}",
        entry.timestamp.format("%H:%M:%S%.3f").to_string().dimmed(),
        format!("[{}]", short_id(id)).cyan(),
        level,
        entry.message
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_id() {
        let id = TaskId::new("0123456789abcdef").unwrap();
        assert_eq!(short_id(&id), "01234567");
        let short = TaskId::new("abc").unwrap();
        assert_eq!(short_id(&short), "abc");
    }

    #[test]
    fn test_log_line_does_not_panic() {
        let id = TaskId::generate();
        log_line(&id, &LogEntry::new(LogLevel::Warn, "Generation attempt 1 failed"));
    }
}
