//! One supervised service and its on-disk scaffolding

use nix::unistd::Pid;
use std::fs;
use std::io;
use std::path::{Component, Path};
use tracing::{debug, info, warn};

use crate::config::Layout;
use crate::control::{ControlChannel, Request};
use crate::error::ServiceError;
use crate::signals;

/// What the service's process slot currently holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Never spawned
    Idle,
    Running(Pid),
    /// Last spawn found neither the override nor the canonical executable
    NoExecutable,
    /// Last fork failed; retried on the next loop iteration
    SpawnFailed,
}

impl ProcessState {
    pub fn pid(self) -> Option<Pid> {
        match self {
            Self::Running(pid) => Some(pid),
            _ => None,
        }
    }
}

/// A supervised unit: name, current process and control channel
#[derive(Debug)]
pub struct Service {
    name: String,
    pub(crate) state: ProcessState,
    control: Option<ControlChannel>,
}

impl Service {
    /// Materialise `<name>/` and its FIFO under `layout`.
    ///
    /// A FIFO that cannot be created or opened is not fatal: the service
    /// still runs, it just cannot receive signal requests.
    pub fn create(layout: &Layout, name: &str) -> Result<Self, ServiceError> {
        if !is_plain_name(name) {
            return Err(ServiceError::InvalidName { name: name.to_string() });
        }
        let dir = layout.service_dir(name);
        match fs::create_dir(&dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(source) => {
                return Err(ServiceError::CreateDir {
                    name: name.to_string(),
                    path: dir,
                    source,
                })
            }
        }

        let fifo = layout.fifo(name);
        let control = match ControlChannel::open(&fifo) {
            Ok(channel) => Some(channel),
            Err(e) => {
                warn!("{name}: failed to open fifo {}: {e}", fifo.display());
                None
            }
        };

        Ok(Self {
            name: name.to_string(),
            state: ProcessState::Idle,
            control,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn pid(&self) -> Option<Pid> {
        self.state.pid()
    }

    pub fn control(&self) -> Option<&ControlChannel> {
        self.control.as_ref()
    }

    /// Display form `name[pid]`, with `-1` when nothing is running
    pub fn label(&self) -> String {
        let pid = self.pid().map_or(-1, Pid::as_raw);
        format!("{}[{pid}]", self.name)
    }

    /// Record a freshly forked child and persist its pid (best-effort)
    pub(crate) fn set_running(&mut self, layout: &Layout, pid: Pid) {
        self.state = ProcessState::Running(pid);
        let path = layout.pidfile(&self.name);
        if let Err(e) = fs::write(&path, format!("{pid}\n")) {
            warn!("{}: failed to write pidfile: {e}", self.label());
        }
    }

    /// Drain the control FIFO, signalling the current process for every valid request
    pub fn handle_requests(&mut self) {
        let label = self.label();
        let pid = self.pid();
        let Some(control) = self.control.as_mut() else {
            return;
        };
        loop {
            match control.next_request() {
                Ok(Request::Pending) => break,
                Ok(Request::Signal(sig)) => send_signal(&label, pid, sig),
                Ok(Request::Invalid) => warn!("{label}: invalid signal requested on fifo"),
                Err(e) => {
                    warn!("{label}: failed to read fifo: {e}");
                    break;
                }
            }
        }
    }

    /// Close the FIFO and remove pidfile, FIFO and directory.
    pub fn destroy(self, layout: &Layout) {
        let Self { name, control, .. } = self;
        drop(control);
        for path in [layout.pidfile(&name), layout.fifo(&name)] {
            remove_quietly(&name, &path, fs::remove_file(&path));
        }
        let dir = layout.service_dir(&name);
        remove_quietly(&name, &dir, fs::remove_dir(&dir));
    }
}

fn send_signal(label: &str, pid: Option<Pid>, sig: libc::c_int) {
    let Some(pid) = pid else {
        warn!("{label}: no process to send {} to", signals::describe(sig));
        return;
    };
    // Raw kill(2): numbers outside nix's Signal enum are passed through as-is.
    // SAFETY: kill has no memory-safety preconditions.
    let res = nix::errno::Errno::result(unsafe { libc::kill(pid.as_raw(), sig) });
    match res {
        Ok(_) => info!("{label}: sent signal {} as requested on fifo", signals::describe(sig)),
        Err(e) => warn!("{label}: failed to send signal {}: {e}", signals::describe(sig)),
    }
}

fn remove_quietly(name: &str, path: &Path, res: io::Result<()>) {
    match res {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => debug!("{name}: left {} in place: {e}", path.display()),
    }
}

/// A single normal path component: no separators, not `.` or `..`
fn is_plain_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(c)), None) if c == name
    )
}
