//! Bookkeeping for in-flight `timeout` commands.
//!
//! At most one OS alarm is armed at any moment, for the entry with the
//! soonest deadline; the registry remembers which entry that is so the
//! alarm handler can resolve it directly. Entries already past their
//! deadline count as immediately due and are armed with a one-second alarm.

use std::time::{Duration, Instant};

use nix::unistd::alarm;
use nix::unistd::Pid;

pub struct TimeoutEntry {
    pub pid: Pid,
    pub line: String,
    pub deadline: Instant,
}

#[derive(Default)]
pub struct TimeoutRegistry {
    entries: Vec<TimeoutEntry>,
    armed: Option<Pid>,
}

impl TimeoutRegistry {
    pub fn new() -> Self {
        TimeoutRegistry { entries: Vec::new(), armed: None }
    }

    /// Tracks a freshly forked timeout command and recomputes the alarm.
    pub fn register(&mut self, pid: Pid, line: String, duration_secs: u64) {
        self.entries.push(TimeoutEntry {
            pid,
            line,
            deadline: Instant::now() + Duration::from_secs(duration_secs),
        });
        self.rearm();
    }

    /// The entry the current alarm belongs to, if any.
    pub fn armed(&self) -> Option<(Pid, String)> {
        let pid = self.armed?;
        self.entries.iter().find(|e| e.pid == pid).map(|e| (pid, e.line.clone()))
    }

    /// Drops an entry; the caller decides when to rearm.
    pub fn remove(&mut self, pid: Pid) {
        self.entries.retain(|e| e.pid != pid);
        if self.armed == Some(pid) {
            self.armed = None;
        }
    }

    /// Arms the OS alarm for the soonest-due entry, or cancels it when no
    /// entries remain.
    pub fn rearm(&mut self) {
        match self.next_alarm(Instant::now()) {
            Some((pid, secs)) => {
                let _ = alarm::set(secs);
                self.armed = Some(pid);
            }
            None => {
                let _ = alarm::cancel();
                self.armed = None;
            }
        }
    }

    /// The soonest-deadline entry and the whole seconds to arm for, rounded
    /// up and clamped to at least one second for overdue entries.
    pub fn next_alarm(&self, now: Instant) -> Option<(Pid, u32)> {
        let entry = self.entries.iter().min_by_key(|e| e.deadline)?;
        let remaining = entry.deadline.saturating_duration_since(now);
        let mut secs = remaining.as_secs();
        if remaining.subsec_nanos() > 0 {
            secs += 1;
        }
        Some((entry.pid, u32::try_from(secs.max(1)).unwrap_or(u32::MAX)))
    }

    #[cfg(test)]
    fn push_at(&mut self, pid: i32, deadline: Instant) {
        self.entries.push(TimeoutEntry {
            pid: Pid::from_raw(pid),
            line: format!("timeout entry {}", pid),
            deadline,
        });
    }
}
