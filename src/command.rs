//! The command representation and its factory.
//!
//! Every input line becomes at most one [`Command`]: a closed set of variants
//! covering the built-ins, the structural pipeline / redirection forms, and
//! external programs. All argument validation happens here, at construction
//! time; a line that fails validation prints its diagnostic and yields no
//! command at all, so invalid commands can never reach the execution paths.

use nix::unistd::Pid;

use crate::jobs::JobTable;
use crate::parser;
use crate::utils;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CdTarget {
    /// Bare `cd`: the home directory.
    Home,
    /// `cd -`: the last working directory.
    Back,
    Dir(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    ShowPid,
    Pwd,
    Cd(CdTarget),
    Jobs,
    Fg { id: i32 },
    Bg { id: i32 },
    Quit { kill_jobs: bool },
    Kill { signum: i32, id: i32 },
    Setcore { id: i32, core: usize },
    GetFileType { path: String, mode: u32, size: i64 },
    Chmod { mode: u32, path: String },
    Timeout { duration: u64, target: String },
    External { wildcard: bool },
    Pipeline { left: String, right: String, to_stderr: bool },
    Redirect { left: String, dest: String, append: bool },
}

#[derive(Debug, Clone)]
pub struct Command {
    /// Raw trimmed source line, background marker included.
    pub line: String,
    /// Argument vector with the background marker stripped.
    pub argv: Vec<String>,
    /// Derived from the absence of a trailing `&`.
    pub foreground: bool,
    /// Set by the parent once the command's process has been forked.
    pub pid: Option<Pid>,
    pub kind: CommandKind,
}

impl Command {
    /// Builds a command from a trimmed input line. The structural pipeline
    /// and redirection scans run before built-in name matching, so a
    /// built-in name on the left of a `|` still becomes a pipeline leg.
    ///
    /// `jobs` backs the job-id validation of `fg`/`bg`/`kill`/`setcore`;
    /// `has_last_dir` tells `cd -` whether a previous directory exists.
    pub fn parse(raw: &str, jobs: &JobTable, has_last_dir: bool) -> Option<Command> {
        let line = raw.trim().to_string();
        let foreground = !parser::is_background(&line);
        let argv = parser::tokenize(&parser::strip_background(&line));
        if argv.is_empty() {
            return None;
        }

        let kind = if let Some((left, right, to_stderr)) = parser::split_pipeline(&line) {
            CommandKind::Pipeline { left, right, to_stderr }
        } else if let Some((left, dest, append)) = parser::split_redirect(&line) {
            CommandKind::Redirect { left, dest, append }
        } else {
            match argv[0].as_str() {
                "showpid" => CommandKind::ShowPid,
                "pwd" => CommandKind::Pwd,
                "cd" => parse_cd(&argv, has_last_dir)?,
                "jobs" => CommandKind::Jobs,
                "fg" => parse_fg(&argv, jobs)?,
                "bg" => parse_bg(&argv, jobs)?,
                "quit" => CommandKind::Quit {
                    kill_jobs: argv.get(1).map(|a| a == "kill").unwrap_or(false),
                },
                "kill" => parse_kill(&argv, jobs)?,
                "setcore" => parse_setcore(&argv, jobs)?,
                "getfiletype" => parse_getfiletype(&argv)?,
                "chmod" => parse_chmod(&argv)?,
                "timeout" => parse_timeout(&argv)?,
                _ => CommandKind::External { wildcard: parser::has_wildcard(&line) },
            }
        };

        Some(Command { line, argv, foreground, pid: None, kind })
    }
}

fn parse_cd(argv: &[String], has_last_dir: bool) -> Option<CommandKind> {
    if argv.len() > 2 {
        eprintln!("smash error: cd: too many arguments");
        return None;
    }
    let target = match argv.get(1).map(String::as_str) {
        None => CdTarget::Home,
        Some("-") => {
            if !has_last_dir {
                eprintln!("smash error: cd: OLDPWD not set");
                return None;
            }
            CdTarget::Back
        }
        Some(dir) => CdTarget::Dir(dir.to_string()),
    };
    Some(CommandKind::Cd(target))
}

fn parse_fg(argv: &[String], jobs: &JobTable) -> Option<CommandKind> {
    if argv.len() > 2 {
        eprintln!("smash error: fg: invalid arguments");
        return None;
    }
    let id = match argv.get(1) {
        Some(arg) => {
            let id = arg.parse::<i32>().ok().filter(|id| jobs.by_id(*id).is_some());
            match id {
                Some(id) => id,
                None => {
                    eprintln!("smash error: fg: job-id {} does not exist", arg);
                    return None;
                }
            }
        }
        // with no argument, the highest-id entry is brought to the foreground
        None => match jobs.last() {
            Some(entry) => entry.id,
            None => {
                eprintln!("smash error: fg: jobs list is empty");
                return None;
            }
        },
    };
    Some(CommandKind::Fg { id })
}

fn parse_bg(argv: &[String], jobs: &JobTable) -> Option<CommandKind> {
    if argv.len() > 2 {
        eprintln!("smash error: bg: invalid arguments");
        return None;
    }
    let id = match argv.get(1) {
        Some(arg) => {
            let entry = arg.parse::<i32>().ok().and_then(|id| jobs.by_id(id));
            let Some(entry) = entry else {
                eprintln!("smash error: bg: job-id {} does not exist", arg);
                return None;
            };
            if !entry.stopped {
                eprintln!(
                    "smash error: bg: job-id {} is already running in the background",
                    entry.id
                );
                return None;
            }
            entry.id
        }
        None => match jobs.last_stopped() {
            Some(entry) => entry.id,
            None => {
                eprintln!("smash error: bg: there is no stopped jobs to resume");
                return None;
            }
        },
    };
    Some(CommandKind::Bg { id })
}

fn parse_kill(argv: &[String], jobs: &JobTable) -> Option<CommandKind> {
    let invalid = || {
        eprintln!("smash error: kill: invalid arguments");
        None
    };
    if argv.len() != 3 {
        return invalid();
    }
    let Some(signum) = argv[1].strip_prefix('-') else {
        return invalid();
    };
    if !parser::is_all_digits(signum) || !parser::is_all_digits(&argv[2]) {
        return invalid();
    }
    let Ok(signum) = signum.parse::<i32>() else {
        return invalid();
    };
    if !(1..=63).contains(&signum) {
        return invalid();
    }
    let Ok(id) = argv[2].parse::<i32>() else {
        return invalid();
    };
    if jobs.by_id(id).is_none() {
        eprintln!("smash error: kill: job-id {} does not exist", id);
        return None;
    }
    Some(CommandKind::Kill { signum, id })
}

fn parse_setcore(argv: &[String], jobs: &JobTable) -> Option<CommandKind> {
    let id = argv.get(1).filter(|_| argv.len() == 3).and_then(|a| a.parse::<i32>().ok());
    let Some(id) = id else {
        eprintln!("smash error: setcore: invalid arguments");
        return None;
    };
    if jobs.by_id(id).is_none() {
        eprintln!("smash error: setcore: job-id {} does not exist", id);
        return None;
    }
    let online = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
    let core = argv[2].parse::<usize>().ok();
    match core.filter(|c| parser::is_all_digits(&argv[2]) && *c < online) {
        Some(core) => Some(CommandKind::Setcore { id, core }),
        None => {
            eprintln!("smash error: setcore: invalid core number");
            None
        }
    }
}

fn parse_getfiletype(argv: &[String]) -> Option<CommandKind> {
    if argv.len() != 2 {
        eprintln!("smash error: getfiletype: invalid arguments");
        return None;
    }
    let path = argv[1].clone();
    match nix::sys::stat::lstat(path.as_str()) {
        Ok(st) => Some(CommandKind::GetFileType { path, mode: st.st_mode, size: st.st_size }),
        Err(e) => {
            utils::report("lstat failed", e);
            None
        }
    }
}

fn parse_chmod(argv: &[String]) -> Option<CommandKind> {
    let mode = argv.get(1).and_then(|m| u32::from_str_radix(m, 8).ok());
    match (argv.len(), mode) {
        (3, Some(mode)) => Some(CommandKind::Chmod { mode, path: argv[2].clone() }),
        _ => {
            eprintln!("smash error: chmod: invalid arguments");
            None
        }
    }
}

fn parse_timeout(argv: &[String]) -> Option<CommandKind> {
    let duration = argv.get(1).and_then(|d| d.parse::<u64>().ok());
    match duration {
        Some(duration) if argv.len() >= 3 => {
            Some(CommandKind::Timeout { duration, target: argv[2..].join(" ") })
        }
        _ => {
            eprintln!("smash error: timeout: invalid arguments");
            None
        }
    }
}
