//! The supervisor event loop and its signal synchronization
//!
//! SIGCHLD, SIGINT and SIGTERM stay blocked for the life of the loop.
//! `ppoll` swaps in a mask with exactly those three unblocked for the
//! duration of the wait, so a signal arriving after the termination check
//! but before the wait is held pending and interrupts the wait instead of
//! being lost. The SIGCHLD handler does nothing; reaping happens at the top
//! of the next iteration.

use anyhow::{Context, Result};
use nix::errno::Errno;
use nix::poll::{ppoll, PollFd, PollFlags};
use nix::sys::signal::{sigaction, sigprocmask, SaFlags, SigAction, SigHandler, SigSet, SigmaskHow, Signal};
use nix::sys::time::TimeSpec;
use nix::unistd::execvp;
use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::SetupError;
use crate::reaper::{self, Outcome, Reaped};
use crate::registry::Registry;
use crate::scanner::{ScanReport, Scanner};
use crate::spawn::Spawner;

/// Set only by the SIGINT/SIGTERM handler, read only by the loop.
static TERMINATING: AtomicBool = AtomicBool::new(false);

const LOOP_SIGNALS: [Signal; 3] = [Signal::SIGCHLD, Signal::SIGINT, Signal::SIGTERM];

extern "C" fn request_termination(_sig: libc::c_int) {
    TERMINATING.store(true, Ordering::SeqCst);
}

extern "C" fn interrupt_wait(_sig: libc::c_int) {}

/// Whether SIGINT or SIGTERM has been received
pub fn termination_requested() -> bool {
    TERMINATING.load(Ordering::SeqCst)
}

/// Signal masks captured when the loop signals were blocked
#[derive(Debug, Clone)]
struct Masks {
    /// Mask in effect before startup, restored before exec'ing a successor
    original: SigSet,
    /// Mask used during the readiness wait
    wait: SigSet,
}

/// What one loop iteration did
#[derive(Debug, Default)]
pub struct Iteration {
    pub scan: ScanReport,
    pub reaped: Vec<Reaped>,
    pub retried: Vec<Outcome>,
    /// Services whose FIFO was readable after the wait
    pub ready: Vec<String>,
}

/// Owns every piece of supervisor state except the termination flag
#[derive(Debug)]
pub struct Supervisor {
    config: Config,
    spawner: Spawner,
    scanner: Scanner,
    registry: Registry,
    masks: Option<Masks>,
}

impl Supervisor {
    pub fn new(config: Config) -> Self {
        Self {
            spawner: Spawner::new(config.layout.clone()),
            scanner: Scanner::new(),
            registry: Registry::new(),
            masks: None,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Block the loop signals and install their handlers.
    ///
    /// Must succeed before [`Supervisor::run`]; any failure here makes
    /// lost wake-ups possible, so callers treat it as fatal.
    pub fn install_signals(&mut self) -> Result<(), SetupError> {
        let mut blocked = SigSet::empty();
        for sig in LOOP_SIGNALS {
            blocked.add(sig);
        }
        let mut original = SigSet::empty();
        sigprocmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut original)).map_err(SetupError::Mask)?;

        let mut wait = original.clone();
        for sig in LOOP_SIGNALS {
            wait.remove(sig);
        }

        let terminate = SigAction::new(
            SigHandler::Handler(request_termination),
            SaFlags::empty(),
            SigSet::empty(),
        );
        let child = SigAction::new(
            SigHandler::Handler(interrupt_wait),
            SaFlags::SA_NOCLDSTOP,
            SigSet::empty(),
        );
        for (sig, action) in [
            (Signal::SIGINT, &terminate),
            (Signal::SIGTERM, &terminate),
            (Signal::SIGCHLD, &child),
        ] {
            // SAFETY: both handlers only touch an atomic or nothing at all
            unsafe { sigaction(sig, action) }.map_err(|source| SetupError::Handler {
                signal: sig.as_str(),
                source,
            })?;
        }

        self.masks = Some(Masks { original, wait });
        Ok(())
    }

    /// Scan, reap, wait for readiness, then serve readable FIFOs.
    pub fn run_once(&mut self) -> Iteration {
        let mut iteration = Iteration {
            scan: self.scanner.scan(&mut self.registry, &self.spawner),
            reaped: reaper::reap(&mut self.registry, &self.spawner),
            retried: reaper::retry_stalled(&mut self.registry, &self.spawner),
            ready: Vec::new(),
        };

        for index in self.wait_for_requests() {
            if let Some(service) = self.registry.get_mut(index) {
                iteration.ready.push(service.name().to_string());
                service.handle_requests();
            }
        }
        iteration
    }

    /// Registry indices whose FIFO became readable
    fn wait_for_requests(&self) -> Vec<usize> {
        let (indices, mut fds): (Vec<usize>, Vec<PollFd<'_>>) = self
            .registry
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.control().map(|c| (i, PollFd::new(c.fd(), PollFlags::POLLIN))))
            .unzip();

        let timeout = self.config.timeout.map(TimeSpec::from_duration);
        let sigmask = self.masks.as_ref().map(|m| m.wait.clone());
        match ppoll(&mut fds, timeout, sigmask) {
            Ok(0) => Vec::new(),
            Ok(_) => fds
                .iter()
                .zip(indices)
                .filter(|(fd, _)| fd.revents().is_some_and(|r| !r.is_empty()))
                .map(|(_, i)| i)
                .collect(),
            Err(Errno::EINTR) => Vec::new(),
            Err(e) => {
                warn!("ppoll failed: {e}");
                Vec::new()
            }
        }
    }

    /// Iterate until SIGINT or SIGTERM arrives; returns the iteration count.
    pub fn run(&mut self) -> u64 {
        let mut iterations = 0;
        while !termination_requested() {
            let iteration = self.run_once();
            debug!(
                "iteration {iterations}: {} added, {} reaped, {} fifos ready",
                iteration.scan.added.len(),
                iteration.reaped.len(),
                iteration.ready.len()
            );
            iterations += 1;
        }
        info!("termination requested, leaving supervisor loop");
        iterations
    }

    /// Replace this process with the configured successor, if any.
    ///
    /// Returns `Ok(())` when no successor is configured. Otherwise it only
    /// returns on failure.
    pub fn exec_successor(self) -> Result<()> {
        let Some(program) = self.config.successor.first() else {
            return Ok(());
        };
        let argv = self
            .config
            .successor
            .iter()
            .map(|arg| CString::new(arg.as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .context("successor argument contains a NUL byte")?;
        let program = program.to_string_lossy().into_owned();

        if let Some(masks) = &self.masks {
            sigprocmask(SigmaskHow::SIG_SETMASK, Some(&masks.original), None)
                .context("failed to restore signal mask")?;
        }
        // Closes every FIFO before the successor takes over
        drop(self.registry);

        info!("executing successor {program}");
        let Some(file) = argv.first() else {
            return Ok(());
        };
        let err = match execvp(file, &argv) {
            Ok(never) => match never {},
            Err(e) => e,
        };
        Err(err).with_context(|| format!("failed to exec {program}"))
    }
}
