//! Discovery of new services in the source directory

use std::fs;
use std::io;
use std::time::SystemTime;
use tracing::{info, warn};

use crate::error::SpawnError;
use crate::registry::Registry;
use crate::service::Service;
use crate::spawn::Spawner;

/// Lists the source directory whenever its modification time changes
#[derive(Debug, Default)]
pub struct Scanner {
    last_mtime: Option<SystemTime>,
}

/// What one [`Scanner::scan`] call did
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// The directory listing was actually read
    pub listed: bool,
    pub added: Vec<String>,
    pub rejected: Vec<String>,
}

impl Scanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register and start every unregistered, non-hidden entry of the source directory.
    ///
    /// Skipped entirely while the directory's mtime matches the last
    /// successful listing. Failures are logged and leave the registry as is.
    pub fn scan(&mut self, registry: &mut Registry, spawner: &Spawner) -> ScanReport {
        let mut report = ScanReport::default();
        let source = spawner.layout().source_dir();

        let mtime = match fs::metadata(&source).and_then(|m| m.modified()) {
            Ok(mtime) => mtime,
            Err(e) => {
                warn!("failed to stat {}: {e}", source.display());
                return report;
            }
        };
        if self.last_mtime == Some(mtime) {
            return report;
        }

        let names = match list_entries(&source) {
            Ok(names) => names,
            Err(e) => {
                warn!("failed to list {}: {e}", source.display());
                return report;
            }
        };
        self.last_mtime = Some(mtime);
        report.listed = true;

        for name in names {
            if registry.contains(&name) {
                continue;
            }
            let mut service = match Service::create(spawner.layout(), &name) {
                Ok(service) => service,
                Err(e) => {
                    warn!("rejected service {name}: {e}");
                    report.rejected.push(name);
                    continue;
                }
            };
            match spawner.spawn(&mut service) {
                Ok(_) => {
                    if registry.insert(service).is_ok() {
                        info!("added service {name}");
                        report.added.push(name);
                    }
                }
                Err(e) => {
                    match e {
                        SpawnError::NoExecutable => info!("rejected service {name}: {e}"),
                        _ => warn!("rejected service {name}: {e}"),
                    }
                    service.destroy(spawner.layout());
                    report.rejected.push(name);
                }
            }
        }
        report
    }
}

/// Non-hidden entry names; names that are not valid UTF-8 are skipped
fn list_entries(dir: &std::path::Path) -> io::Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        match entry.file_name().into_string() {
            Ok(name) if !name.starts_with('.') => names.push(name),
            Ok(_) => {}
            Err(raw) => warn!("skipping non-UTF-8 entry {raw:?}"),
        }
    }
    Ok(names)
}
