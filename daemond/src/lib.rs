//! daemond — a minimal process supervisor that can run as PID 1
//!
//! Every non-hidden entry of the source directory (`exec/`) names a service.
//! Each service is started, restarted whenever it exits, and can be sent
//! signals by writing lines to its FIFO (`<name>/kill`). A service whose
//! executable disappears is removed the next time it exits.
//!
//! Layout of one supervisor iteration:
//! - scan the source directory for new services
//! - reap exited children, respawning or removing their services
//! - block in `ppoll` until a FIFO is readable, a signal arrives, or the
//!   idle timeout expires
//! - deliver signals requested on readable FIFOs

pub mod cli;
pub mod config;
pub mod control;
pub mod error;
pub mod logging;
pub mod reaper;
pub mod registry;
pub mod scanner;
pub mod service;
pub mod signals;
pub mod spawn;
pub mod supervisor;

pub use config::{Config, Layout};
pub use error::{ServiceError, SetupError, SpawnError};
pub use registry::Registry;
pub use service::{ProcessState, Service};
pub use supervisor::Supervisor;
