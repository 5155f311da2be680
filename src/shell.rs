//! Shell state and the read-eval loop.
//!
//! The state is an explicitly constructed context shared behind
//! `Arc<Mutex<..>>` between the main loop and the signal dispatcher; nothing
//! here is a process-wide global. The loop reads one line, reaps finished
//! jobs, builds a command, and hands it to the execution layer.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::command::Command;
use crate::exec;
use crate::jobs::JobTable;
use crate::parser;
use crate::timeouts::TimeoutRegistry;
use crate::utils;
use nix::unistd::Pid;

pub static DEFAULT_PROMPT: &str = "smash> ";

static HISTORY_PATH: Lazy<Option<PathBuf>> =
    Lazy::new(|| dirs_next::home_dir().map(|home| home.join(".smash_history")));

/// The single command occupying the foreground slot. Both variants carry
/// the forked pid, so signalling the slot can never fall back to pid 0.
pub enum Foreground {
    /// Launched this dispatch; not yet in the job table.
    Fresh { pid: Pid, cmd: Command },
    /// Resumed via `fg`; the job table still owns the entry.
    Resumed { pid: Pid, jid: i32 },
}

impl Foreground {
    pub fn pid(&self) -> Pid {
        match self {
            Foreground::Fresh { pid, .. } | Foreground::Resumed { pid, .. } => *pid,
        }
    }
}

pub struct Shell {
    pub prompt: String,
    /// Empty until the first directory change; backs `cd -`.
    pub last_dir: Option<PathBuf>,
    pub running: bool,
    pub foreground: Option<Foreground>,
    pub jobs: JobTable,
    pub timeouts: TimeoutRegistry,
}

pub type SharedShell = Arc<Mutex<Shell>>;

impl Shell {
    pub fn new() -> Self {
        Shell {
            prompt: DEFAULT_PROMPT.to_string(),
            last_dir: None,
            running: true,
            foreground: None,
            jobs: JobTable::new(),
            timeouts: TimeoutRegistry::new(),
        }
    }

    pub fn shared() -> SharedShell {
        Arc::new(Mutex::new(Shell::new()))
    }
}

impl Default for Shell {
    fn default() -> Self {
        Shell::new()
    }
}

/// Runs the read-eval loop until `quit` clears the running flag or input
/// reaches end-of-file.
pub fn run(shell: &SharedShell, emit_prompt: bool, verbose: bool) {
    if emit_prompt {
        run_interactive(shell, verbose);
    } else {
        run_plain(shell, verbose);
    }
}

fn run_interactive(shell: &SharedShell, verbose: bool) {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            utils::report("readline init failed", e);
            return run_plain(shell, verbose);
        }
    };
    if let Some(path) = HISTORY_PATH.as_ref() {
        let _ = editor.load_history(path);
    }

    loop {
        let prompt = {
            let sh = shell.lock().unwrap();
            if !sh.running {
                break;
            }
            sh.prompt.clone()
        };
        match editor.readline(&prompt) {
            Ok(line) => {
                if line.trim().is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(line.as_str());
                if verbose {
                    println!("smash: dispatching: {}", line.trim());
                }
                dispatch(shell, &line);
            }
            // Ctrl-C at the prompt never reaches the signal dispatcher; the
            // line editor reports it as input.
            Err(ReadlineError::Interrupted) => println!("smash: got ctrl-C"),
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                utils::report("readline failed", e);
                break;
            }
        }
    }

    if let Some(path) = HISTORY_PATH.as_ref() {
        let _ = editor.save_history(path);
    }
}

fn run_plain(shell: &SharedShell, verbose: bool) {
    let stdin = io::stdin();
    loop {
        {
            let sh = shell.lock().unwrap();
            if !sh.running {
                break;
            }
        }
        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {
                if line.trim().is_empty() {
                    continue;
                }
                if verbose {
                    println!("smash: dispatching: {}", line.trim());
                }
                dispatch(shell, &line);
                let _ = io::stdout().flush();
            }
            Err(e) => {
                utils::report("read failed", e);
                break;
            }
        }
    }
}

/// Turns one input line into at most one executed command. Finished jobs
/// are reaped first; `chprompt` is handled without building a command, but
/// only when no structural form claims the line.
pub fn dispatch(shell: &SharedShell, raw: &str) {
    let line = raw.trim();
    if line.is_empty() {
        return;
    }
    let cmd = {
        let mut sh = shell.lock().unwrap();
        sh.jobs.reap_finished();

        let structural =
            parser::split_pipeline(line).is_some() || parser::split_redirect(line).is_some();
        if !structural && parser::first_token(line) == "chprompt" {
            let args = parser::tokenize(&parser::strip_background(line));
            sh.prompt = match args.get(1) {
                Some(name) => format!("{}> ", name),
                None => DEFAULT_PROMPT.to_string(),
            };
            return;
        }

        Command::parse(line, &sh.jobs, sh.last_dir.is_some())
    };
    if let Some(cmd) = cmd {
        exec::execute(shell, cmd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chprompt_sets_and_resets_prompt() {
        let shell = Shell::shared();
        dispatch(&shell, "chprompt lab3");
        assert_eq!(shell.lock().unwrap().prompt, "lab3> ");
        dispatch(&shell, "chprompt");
        assert_eq!(shell.lock().unwrap().prompt, DEFAULT_PROMPT);
    }

    #[test]
    fn test_quit_clears_running_flag() {
        let shell = Shell::shared();
        assert!(shell.lock().unwrap().running);
        dispatch(&shell, "quit");
        assert!(!shell.lock().unwrap().running);
    }

    #[test]
    fn test_empty_lines_are_ignored() {
        let shell = Shell::shared();
        dispatch(&shell, "   ");
        let sh = shell.lock().unwrap();
        assert!(sh.running);
        assert!(sh.jobs.is_empty());
        assert!(sh.foreground.is_none());
    }
}
