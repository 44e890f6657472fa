//! Supervisor configuration and on-disk layout

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::Args;

const SOURCE_DIR: &str = "exec";
const FIFO_NAME: &str = "kill";
const PIDFILE_NAME: &str = "pid";
const OVERRIDE_NAME: &str = "subst";

/// Where services live on disk.
///
/// Everything is relative to `root`, normally the supervisor's working
/// directory at startup:
///
/// ```text
/// root/exec/<name>     canonical executable, one entry per service
/// root/<name>/         per-service directory, child's working directory
/// root/<name>/kill     control FIFO
/// root/<name>/pid      current pid followed by a newline
/// root/<name>/subst    optional override executable
/// ```
#[derive(Debug, Clone)]
pub struct Layout {
    root: PathBuf,
}

impl Layout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source_dir(&self) -> PathBuf {
        self.root.join(SOURCE_DIR)
    }

    pub fn canonical_executable(&self, name: &str) -> PathBuf {
        self.source_dir().join(name)
    }

    pub fn service_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    pub fn fifo(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(FIFO_NAME)
    }

    pub fn pidfile(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(PIDFILE_NAME)
    }

    pub fn override_executable(&self, name: &str) -> PathBuf {
        self.service_dir(name).join(OVERRIDE_NAME)
    }
}

/// Runtime configuration assembled from the command line
#[derive(Debug, Clone)]
pub struct Config {
    /// Upper bound on one idle wait; `None` blocks until a FIFO or signal wakes us
    pub timeout: Option<Duration>,
    /// Program (and arguments) to exec once the loop exits
    pub successor: Vec<OsString>,
    pub layout: Layout,
}

impl Config {
    pub fn from_args(args: Args, root: impl Into<PathBuf>) -> Self {
        Self {
            timeout: match args.timeout {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            successor: args.next_program,
            layout: Layout::new(root),
        }
    }
}
