use colored::Colorize;

/// Credits are tracked in minor units so fractional prices (half a credit for
/// an add-on) stay exact integers.
pub const UNITS_PER_CREDIT: u64 = 100;

/// Format credit units as a credit string with color
pub fn format_credits(units: u64) -> String {
    format!("{:.2} credits", units_to_credits(units))
        .yellow()
        .to_string()
}

pub fn units_to_credits(units: u64) -> f64 {
    units as f64 / UNITS_PER_CREDIT as f64
}

pub fn credits_to_units(credits: f64) -> u64 {
    (credits * UNITS_PER_CREDIT as f64).round() as u64
}

/// Format timestamp in human-readable format
pub fn format_timestamp(timestamp: &chrono::DateTime<chrono::Utc>) -> String {
    timestamp.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Prompt user for yes/no confirmation
pub fn confirm_action(prompt: &str) -> bool {
    use std::io::{self, Write};

    print!("{} (y/N): ", prompt);
    io::stdout().flush().unwrap();

    let mut input = String::new();
    io::stdin().read_line(&mut input).unwrap();

    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

/// Print a formatted table border
pub fn print_table_border(width: usize) {
    println!("{}", "=".repeat(width));
}

/// Print a table row with columns
pub fn print_table_row(columns: &[&str], widths: &[usize]) {
    let mut row = String::new();
    for (i, col) in columns.iter().enumerate() {
        if i < widths.len() {
            row.push_str(&format!("{:<width$}  ", col, width = widths[i]));
        }
    }
    println!("{}", row.trim_end());
}
