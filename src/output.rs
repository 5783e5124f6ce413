use std::io::Write;

use anyhow::Result;

use dashlog_logs::{LogLevel, ParsedLogEntry};

/// Short display string (3 chars)
fn level_tag(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "DBG",
        LogLevel::Info => "INF",
        LogLevel::Warning => "WRN",
        LogLevel::Error => "ERR",
    }
}

/// Render an entry as a single text line
pub fn format_entry(entry: &ParsedLogEntry) -> String {
    let timestamp = entry.timestamp.format("%Y-%m-%d %H:%M:%S");
    let mut line = format!("{} {}", timestamp, level_tag(entry.level));

    if let Some(component) = &entry.component {
        line.push_str(&format!(" [{}]", component));
    }
    if let Some(op) = &entry.operation_id {
        line.push_str(&format!(" ({})", op));
    }

    line.push(' ');
    line.push_str(&entry.message);
    line
}

pub fn print_entry(entry: &ParsedLogEntry, json: bool) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    if json {
        serde_json::to_writer(&mut stdout, entry)?;
        writeln!(stdout)?;
    } else {
        writeln!(stdout, "{}", format_entry(entry))?;
    }
    Ok(())
}
