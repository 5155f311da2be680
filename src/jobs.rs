//! The job table: bookkeeping for background and stopped processes.
//!
//! The table owns no process; it only tracks them. Ids are assigned
//! `max(existing) + 1` and restart at 1 once the table empties, so entries
//! are always held in ascending-id order.

use std::time::SystemTime;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use crate::command::Command;
use crate::utils;

#[derive(Clone)]
pub struct JobEntry {
    pub id: i32,
    pub pid: Pid,
    pub stopped: bool,
    pub started: SystemTime,
    /// The table takes ownership of the command until the entry is removed.
    pub cmd: Command,
}

impl JobEntry {
    pub fn line(&self) -> &str {
        &self.cmd.line
    }

    pub fn elapsed_secs(&self) -> u64 {
        self.started.elapsed().map(|d| d.as_secs()).unwrap_or(0)
    }
}

pub struct JobTable {
    entries: Vec<JobEntry>,
    /// Cleared on snapshots, which track the same processes without
    /// owning them.
    owns_processes: bool,
}

impl Default for JobTable {
    fn default() -> Self {
        JobTable::new()
    }
}

impl JobTable {
    pub fn new() -> Self {
        JobTable { entries: Vec::new(), owns_processes: true }
    }

    /// An entry-for-entry copy for a forked pipeline leg: it lists and
    /// resolves job ids like the original but never reaps a process and
    /// never signals one on teardown.
    pub fn snapshot(&self) -> JobTable {
        JobTable { entries: self.entries.clone(), owns_processes: false }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Registers a command whose process has been forked. Returns the
    /// assigned job id, or `None` when the command carries no pid.
    pub fn add(&mut self, cmd: Command, stopped: bool) -> Option<i32> {
        let pid = cmd.pid?;
        let id = self.entries.last().map(|e| e.id + 1).unwrap_or(1);
        self.entries.push(JobEntry { id, pid, stopped, started: SystemTime::now(), cmd });
        Some(id)
    }

    pub fn by_id(&self, id: i32) -> Option<&JobEntry> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// The highest-id entry, which is also the most recently added one.
    pub fn last(&self) -> Option<&JobEntry> {
        self.entries.last()
    }

    /// The highest-id stopped entry.
    pub fn last_stopped(&self) -> Option<&JobEntry> {
        self.entries.iter().rev().find(|e| e.stopped)
    }

    pub fn set_stopped(&mut self, id: i32, stopped: bool) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.id == id) {
            entry.stopped = stopped;
        }
    }

    pub fn remove_by_id(&mut self, id: i32) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        self.entries.len() != before
    }

    pub fn remove_by_pid(&mut self, pid: Pid) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.pid != pid);
        self.entries.len() != before
    }

    /// Drops every entry whose process has already exited, using a
    /// non-blocking wait. Runs before each dispatch so the table never
    /// accumulates zombies; calling it again with no new exits is a no-op.
    pub fn reap_finished(&mut self) {
        if !self.owns_processes {
            return;
        }
        self.entries.retain(|e| match waitpid(e.pid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => true,
            Ok(_) => false,
            Err(Errno::ECHILD) => false,
            Err(err) => {
                utils::report("waitpid failed", err);
                true
            }
        });
    }

    /// The `jobs` listing: `[id] line : pid elapsed secs (stopped)`.
    pub fn print(&self) {
        for entry in &self.entries {
            println!(
                "[{}] {} : {} {} secs{}",
                entry.id,
                entry.line(),
                entry.pid,
                entry.elapsed_secs(),
                if entry.stopped { " (stopped)" } else { "" }
            );
        }
    }

    /// `quit kill`: force-terminate and report every tracked job.
    pub fn kill_all(&mut self) {
        for entry in &self.entries {
            println!("{} : {}", entry.pid, entry.line());
            if let Err(e) = kill(entry.pid, Signal::SIGKILL) {
                if e != Errno::ESRCH {
                    utils::report("kill failed", e);
                }
            }
        }
    }

    #[cfg(test)]
    fn ids(&self) -> Vec<i32> {
        self.entries.iter().map(|e| e.id).collect()
    }
}

impl Drop for JobTable {
    /// Table teardown signals termination to every process still tracked.
    fn drop(&mut self) {
        if !self.owns_processes {
            return;
        }
        for entry in &self.entries {
            let _ = kill(entry.pid, Signal::SIGKILL);
        }
    }
}
