use colored::Colorize;
use serde_json::Value;

use crate::cli::OutputFormat;

pub fn print_value(value: &Value, format: OutputFormat) {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(value),
        OutputFormat::Compact => serde_json::to_string(value),
    };
    println!("{}", rendered.unwrap_or_else(|_| value.to_string()));
}

pub fn print_miss(key: &str) {
    println!("{} {}", "∅".yellow(), format!("no record for {key}").dimmed());
}

pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "!".yellow(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red(), msg);
}
