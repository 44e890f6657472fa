//! Fork/exec of service processes

use libc::c_char;
use nix::errno::Errno;
use nix::sys::signal::{sigprocmask, SigSet, SigmaskHow};
use nix::unistd::{access, fork, setsid, AccessFlags, ForkResult, Pid};
use std::ffi::{CStr, CString};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::ptr;
use tracing::{error, info};

use crate::config::Layout;
use crate::error::SpawnError;
use crate::service::{ProcessState, Service};

/// Child exit status when setup before exec fails
pub const PRE_EXEC_FAILURE: i32 = 125;
/// Child exit status when exec itself fails
pub const EXEC_FAILURE: i32 = 127;

/// Starts service processes according to a [`Layout`]
#[derive(Debug, Clone)]
pub struct Spawner {
    layout: Layout,
}

impl Spawner {
    pub fn new(layout: Layout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// The executable a spawn of `name` would run: the override in the
    /// service directory if runnable, else the canonical source entry.
    pub fn resolve(&self, name: &str) -> Option<PathBuf> {
        [
            self.layout.override_executable(name),
            self.layout.canonical_executable(name),
        ]
        .into_iter()
        .find(|path| is_executable(path))
    }

    /// Fork and exec the service's executable, updating its state.
    ///
    /// In the child: empty signal mask, cwd = service directory, new session,
    /// standard streams closed, then `exec` with `argv = [name]`.
    pub fn spawn(&self, service: &mut Service) -> Result<Pid, SpawnError> {
        let Some(path) = self.resolve(service.name()) else {
            service.state = ProcessState::NoExecutable;
            return Err(SpawnError::NoExecutable);
        };

        // Everything the child needs is allocated before fork
        let exe = c_path(&path)?;
        let dir = c_path(&self.layout.service_dir(service.name()))?;
        let arg0 = CString::new(service.name())
            .map_err(|_| SpawnError::BadPath(PathBuf::from(service.name())))?;
        let argv: [*const c_char; 2] = [arg0.as_ptr(), ptr::null()];

        // SAFETY: the child only makes async-signal-safe calls before exec or _exit
        match unsafe { fork() } {
            Ok(ForkResult::Child) => exec_child(&exe, &dir, &argv),
            Ok(ForkResult::Parent { child }) => {
                info!("{}[{child}]: forked", service.name());
                service.set_running(&self.layout, child);
                Ok(child)
            }
            Err(e) => {
                error!("{}: fork failed: {e}", service.name());
                service.state = ProcessState::SpawnFailed;
                Err(SpawnError::Fork(e))
            }
        }
    }
}

fn is_executable(path: &Path) -> bool {
    access(path, AccessFlags::X_OK).is_ok() && !path.is_dir()
}

fn c_path(path: &Path) -> Result<CString, SpawnError> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| SpawnError::BadPath(path.to_path_buf()))
}

fn exec_child(exe: &CStr, dir: &CStr, argv: &[*const c_char; 2]) -> ! {
    let ready = sigprocmask(SigmaskHow::SIG_SETMASK, Some(&SigSet::empty()), None).is_ok()
        // SAFETY: dir is a valid NUL-terminated string
        && unsafe { libc::chdir(dir.as_ptr()) } == 0
        && setsid().is_ok()
        && close_stdio();
    // SAFETY: exe and argv are NUL-terminated and outlive the call; _exit never returns
    unsafe {
        if !ready {
            libc::_exit(PRE_EXEC_FAILURE);
        }
        libc::execv(exe.as_ptr(), argv.as_ptr());
        libc::_exit(EXEC_FAILURE)
    }
}

/// Close fds 0-2. Already-closed streams are fine.
fn close_stdio() -> bool {
    (0..=2).all(|fd| {
        // SAFETY: closing a descriptor we own in the freshly forked child
        (unsafe { libc::close(fd) == 0 }) || Errno::last() == Errno::EBADF
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_script(path: &Path, mode: u32) {
        fs::write(path, "#!/bin/sh\nexit 0\n").unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).unwrap();
    }

    #[test]
    fn test_resolve_prefers_override() {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path());
        fs::create_dir_all(layout.source_dir()).unwrap();
        fs::create_dir_all(layout.service_dir("web")).unwrap();
        let spawner = Spawner::new(layout.clone());

        assert_eq!(spawner.resolve("web"), None);

        write_script(&layout.canonical_executable("web"), 0o755);
        assert_eq!(spawner.resolve("web"), Some(layout.canonical_executable("web")));

        write_script(&layout.override_executable("web"), 0o755);
        assert_eq!(spawner.resolve("web"), Some(layout.override_executable("web")));
    }

    #[test]
    fn test_resolve_skips_non_executable() {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path());
        fs::create_dir_all(layout.source_dir()).unwrap();
        fs::create_dir_all(layout.service_dir("web")).unwrap();
        write_script(&layout.override_executable("web"), 0o644);
        write_script(&layout.canonical_executable("web"), 0o755);

        let spawner = Spawner::new(layout.clone());
        assert_eq!(spawner.resolve("web"), Some(layout.canonical_executable("web")));
    }

    #[test]
    fn test_resolve_skips_directories() {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path());
        fs::create_dir_all(layout.canonical_executable("web")).unwrap();
        assert_eq!(Spawner::new(layout).resolve("web"), None);
    }

    #[test]
    fn test_spawn_without_executable_forks_nothing() {
        let root = tempfile::tempdir().unwrap();
        let layout = Layout::new(root.path());
        fs::create_dir_all(layout.source_dir()).unwrap();
        let mut service = Service::create(&layout, "ghost").unwrap();

        let res = Spawner::new(layout.clone()).spawn(&mut service);
        assert!(matches!(res, Err(SpawnError::NoExecutable)));
        assert_eq!(service.state(), ProcessState::NoExecutable);
        assert!(!layout.pidfile("ghost").exists());
    }
}
