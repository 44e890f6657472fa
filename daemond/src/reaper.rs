//! Reaping of exited children and restart of their services

use nix::errno::Errno;
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::error::SpawnError;
use crate::registry::Registry;
use crate::service::ProcessState;
use crate::signals;
use crate::spawn::Spawner;

/// How a reaped child ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    Code(i32),
    Signal(i32),
}

/// What happened to the owner of a reaped pid
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No service owned the pid (e.g. an orphan reparented to PID 1)
    Orphan,
    Respawned { service: String, pid: Pid },
    /// The executable is gone; the service and its directory were removed
    Removed { service: String },
    /// Fork failed; the service stays registered and is retried next iteration
    Stalled { service: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reaped {
    pub pid: Pid,
    pub exit: Exit,
    pub outcome: Outcome,
}

/// Collect every child that has already exited, without blocking.
pub fn reap(registry: &mut Registry, spawner: &Spawner) -> Vec<Reaped> {
    let mut reaped = Vec::new();
    loop {
        let (pid, exit) = match wait_any() {
            Ok(Some(done)) => done,
            Ok(None) | Err(Errno::ECHILD) => break,
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!("waitpid failed: {e}");
                break;
            }
        };
        let outcome = handle_exit(registry, spawner, pid, exit);
        reaped.push(Reaped { pid, exit, outcome });
    }
    reaped
}

/// One non-blocking `waitpid(-1)`.
///
/// Decodes the raw status itself: `nix::sys::wait::waitpid` returns `EINVAL`
/// for a child killed by a signal outside `nix::sys::signal::Signal`
/// (realtime signals), after the child has already been consumed.
fn wait_any() -> Result<Option<(Pid, Exit)>, Errno> {
    loop {
        let mut status: libc::c_int = 0;
        // SAFETY: status is a valid out-pointer for the duration of the call
        let res = unsafe { libc::waitpid(-1, &mut status, libc::WNOHANG) };
        let pid = match Errno::result(res)? {
            0 => return Ok(None),
            pid => Pid::from_raw(pid),
        };
        if libc::WIFEXITED(status) {
            return Ok(Some((pid, Exit::Code(libc::WEXITSTATUS(status)))));
        }
        if libc::WIFSIGNALED(status) {
            return Ok(Some((pid, Exit::Signal(libc::WTERMSIG(status)))));
        }
        debug!("{pid}: ignoring wait status {status:#x}");
    }
}

fn handle_exit(registry: &mut Registry, spawner: &Spawner, pid: Pid, exit: Exit) -> Outcome {
    let index = registry.position_by_pid(pid);
    let name = index
        .and_then(|i| registry.at(i))
        .map(|s| s.name().to_string())
        .unwrap_or_default();
    match exit {
        Exit::Code(code) => info!("{name}[{pid}]: exited with code {code}"),
        Exit::Signal(sig) => info!("{name}[{pid}]: terminated by signal {}", signals::describe(sig)),
    }
    match index {
        Some(index) => respawn(registry, spawner, index),
        None => Outcome::Orphan,
    }
}

/// Start the service at `index` again, removing it if its executable is gone
fn respawn(registry: &mut Registry, spawner: &Spawner, index: usize) -> Outcome {
    let Some(service) = registry.get_mut(index) else {
        return Outcome::Orphan;
    };
    let name = service.name().to_string();
    match spawner.spawn(service) {
        Ok(pid) => Outcome::Respawned { service: name, pid },
        Err(SpawnError::NoExecutable) => {
            if let Some(service) = registry.remove(index) {
                service.destroy(spawner.layout());
            }
            info!("removed service {name}");
            Outcome::Removed { service: name }
        }
        Err(_) => Outcome::Stalled { service: name },
    }
}

/// Retry services whose last fork failed
pub fn retry_stalled(registry: &mut Registry, spawner: &Spawner) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    let mut index = 0;
    while let Some(service) = registry.at(index) {
        if service.state() != ProcessState::SpawnFailed {
            index += 1;
            continue;
        }
        let outcome = respawn(registry, spawner, index);
        if !matches!(outcome, Outcome::Removed { .. }) {
            index += 1;
        }
        outcomes.push(outcome);
    }
    outcomes
}
