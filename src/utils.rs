use std::fmt::Display;
use std::process;

pub fn print_usage() {
    println!("Usage: smash [-hvp]");
    println!("   -h   Print this help message");
    println!("   -v   Echo each dispatched command line");
    println!("   -p   Do not print a command prompt");
    process::exit(0);
}

/// All diagnostics carry the fixed prefix so they can be told apart from
/// regular command output on stderr.
pub fn report(context: &str, err: impl Display) {
    eprintln!("smash error: {}: {}", context, err);
}
