//! Asynchronous state transitions: suspend, interrupt, and alarm.
//!
//! A dedicated thread drains the signal iterator, so the handlers below run
//! in ordinary thread context and can take the shared state lock instead of
//! mutating anything from inside an interrupt. The main loop, blocked in a
//! foreground wait without the lock, observes the resulting stop or exit.

use signal_hook::consts::signal::{SIGALRM, SIGINT, SIGTSTP};
use signal_hook::iterator::Signals;
use std::io;
use std::thread;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};

use crate::shell::{Foreground, SharedShell};
use crate::utils;

/// Installs the dispatcher for ctrl-Z, ctrl-C, and the timeout alarm.
pub fn install(shell: SharedShell) -> io::Result<()> {
    let mut signals = Signals::new([SIGTSTP, SIGINT, SIGALRM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            match signal {
                SIGTSTP => on_suspend(&shell),
                SIGINT => on_interrupt(&shell),
                SIGALRM => on_alarm(&shell),
                _ => unreachable!(),
            }
        }
    });
    Ok(())
}

/// Ctrl-Z: stop the foreground command and move it to the job table.
pub(crate) fn on_suspend(shell: &SharedShell) {
    println!("smash: got ctrl-Z");
    let mut sh = shell.lock().unwrap();
    let Some(fg) = sh.foreground.take() else {
        return;
    };
    let pid = fg.pid();
    // SIGSTOP rather than forwarding SIGTSTP: a stop cannot be ignored
    if let Err(e) = kill(pid, Signal::SIGSTOP) {
        utils::report("kill failed", e);
        sh.foreground = Some(fg);
        return;
    }
    println!("smash: process {} was stopped", pid);
    match fg {
        Foreground::Fresh { cmd, .. } => {
            sh.jobs.add(cmd, true);
        }
        Foreground::Resumed { jid, .. } => sh.jobs.set_stopped(jid, true),
    }
}

/// Ctrl-C: terminate the foreground command outright.
pub(crate) fn on_interrupt(shell: &SharedShell) {
    println!("smash: got ctrl-C");
    let mut sh = shell.lock().unwrap();
    let Some(fg) = sh.foreground.take() else {
        return;
    };
    let pid = fg.pid();
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => {
            if let Err(e) = kill(pid, Signal::SIGKILL) {
                utils::report("kill failed", e);
            } else {
                println!("smash: process {} was killed", pid);
            }
        }
        // already gone; the main loop's wait settles the rest
        _ => {}
    }
    if let Foreground::Resumed { jid, .. } = fg {
        sh.jobs.remove_by_id(jid);
    }
}

/// Alarm: resolve the remembered soonest-due timeout entry. A process that
/// beat its deadline is dropped silently; a live one is terminated and
/// reported, then the alarm is rearmed for the next entry.
pub(crate) fn on_alarm(shell: &SharedShell) {
    println!("smash: got an alarm");
    let mut sh = shell.lock().unwrap();
    let Some((pid, line)) = sh.timeouts.armed() else {
        return;
    };
    match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::StillAlive) => match kill(pid, Signal::SIGKILL) {
            Ok(()) => println!("smash: {} timed out!", line),
            Err(Errno::ESRCH) => {}
            Err(e) => utils::report("kill failed", e),
        },
        _ => {}
    }
    sh.timeouts.remove(pid);
    sh.timeouts.rearm();
    sh.jobs.remove_by_pid(pid);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::Command;
    use crate::jobs::JobTable;
    use crate::shell::Shell;
    use nix::unistd::Pid;
    use std::process::Command as OsCommand;

    fn spawn_sleeper() -> Pid {
        let child = OsCommand::new("sleep").arg("30").spawn().expect("spawn sleep");
        Pid::from_raw(child.id() as i32)
    }

    fn reap(pid: Pid) {
        loop {
            match waitpid(pid, None) {
                Err(Errno::EINTR) => continue,
                _ => break,
            }
        }
    }

    fn forked_command(line: &str, pid: Pid) -> Command {
        let mut cmd = Command::parse(line, &JobTable::new(), false).expect(line);
        cmd.pid = Some(pid);
        cmd
    }

    #[test]
    fn test_suspend_moves_foreground_into_table_stopped() {
        let shell = Shell::shared();
        let pid = spawn_sleeper();
        shell.lock().unwrap().foreground =
            Some(Foreground::Fresh { pid, cmd: forked_command("sleep 30", pid) });

        on_suspend(&shell);

        {
            let sh = shell.lock().unwrap();
            assert!(sh.foreground.is_none());
            let entry = sh.jobs.by_id(1).expect("job 1");
            assert!(entry.stopped);
            assert_eq!(entry.pid, pid);
        }
        kill(pid, Signal::SIGKILL).expect("kill sleeper");
        reap(pid);
        shell.lock().unwrap().jobs.remove_by_pid(pid);
    }

    #[test]
    fn test_interrupt_kills_live_foreground_and_drops_resumed_entry() {
        let shell = Shell::shared();
        let pid = spawn_sleeper();
        {
            let mut sh = shell.lock().unwrap();
            sh.jobs.add(forked_command("sleep 30 &", pid), false);
            sh.foreground = Some(Foreground::Resumed { pid, jid: 1 });
        }

        on_interrupt(&shell);

        {
            let sh = shell.lock().unwrap();
            assert!(sh.foreground.is_none());
            assert!(sh.jobs.is_empty());
        }
        reap(pid);
    }

    #[test]
    fn test_interrupt_with_empty_slot_changes_nothing() {
        let shell = Shell::shared();
        on_interrupt(&shell);
        let sh = shell.lock().unwrap();
        assert!(sh.foreground.is_none());
        assert!(sh.jobs.is_empty());
    }

    #[test]
    fn test_alarm_kills_live_target_and_clears_bookkeeping() {
        let shell = Shell::shared();
        let pid = spawn_sleeper();
        {
            let mut sh = shell.lock().unwrap();
            sh.timeouts.register(pid, "timeout 100 sleep 30".to_string(), 100);
            sh.jobs.add(forked_command("timeout 100 sleep 30 &", pid), false);
        }

        on_alarm(&shell);

        {
            let sh = shell.lock().unwrap();
            assert!(sh.timeouts.armed().is_none());
            assert!(sh.jobs.is_empty());
        }
        reap(pid);
    }

    #[test]
    fn test_alarm_clears_entry_whose_process_already_exited() {
        let shell = Shell::shared();
        let child = OsCommand::new("true").spawn().expect("spawn true");
        let pid = Pid::from_raw(child.id() as i32);
        reap(pid);

        shell.lock().unwrap().timeouts.register(pid, "timeout 100 true".to_string(), 100);
        on_alarm(&shell);
        assert!(shell.lock().unwrap().timeouts.armed().is_none());
    }
}
