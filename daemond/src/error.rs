//! Error types shared across the supervisor

use nix::errno::Errno;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Why a spawn attempt did not produce a child process
#[derive(Debug, Error)]
pub enum SpawnError {
    /// Neither the override nor the canonical executable is runnable.
    /// Terminal for a service that has already run once.
    #[error("no executable")]
    NoExecutable,
    #[error("fork failed: {0}")]
    Fork(#[source] Errno),
    #[error("invalid executable path {0}")]
    BadPath(PathBuf),
}

/// Failure while materialising a service's on-disk scaffolding
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{name}: failed to create directory {path}: {source}")]
    CreateDir {
        name: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{name}: invalid service name")]
    InvalidName { name: String },
}

/// Failure while establishing the signal mask and handlers.
/// Always fatal: without them the event loop can lose signals.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to block supervisor signals: {0}")]
    Mask(#[source] Errno),
    #[error("failed to install handler for {signal}: {source}")]
    Handler {
        signal: &'static str,
        #[source]
        source: Errno,
    },
}
