mod command;
mod exec;
mod jobs;
mod parser;
mod shell;
mod signals;
mod timeouts;
mod utils;

use std::env;

fn main() {
    // Parse command-line arguments.
    let args: Vec<String> = env::args().collect();
    let mut emit_prompt = true;
    let mut verbose = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "-h" => utils::print_usage(),
            "-v" => verbose = true,
            "-p" => emit_prompt = false,
            _ => {}
        }
    }

    let shell = shell::Shell::shared();

    // Asynchronous suspend/interrupt/alarm handling shares the same state.
    if let Err(e) = signals::install(shell.clone()) {
        utils::report("failed to set signal handlers", e);
    }

    shell::run(&shell, emit_prompt, verbose);
}
