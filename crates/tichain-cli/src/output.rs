//! Console output helpers, grounded on `dashflow-cli::output`'s
//! colored print_* convention.

use colored::Colorize;

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "ERROR:".bright_red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    eprintln!("{} {}", "WARNING:".bright_yellow().bold(), msg);
}

pub fn print_success(msg: &str) {
    println!("{} {}", "\u{2713}".bright_green().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "\u{2139}".bright_blue().bold(), msg);
}
