//! Ordered set of live services

use nix::unistd::Pid;

use crate::service::Service;

/// Live services in discovery order.
///
/// Names are unique; so are running pids, since each pid belongs to
/// exactly one forked child until it is reaped.
#[derive(Debug, Default)]
pub struct Registry {
    services: Vec<Service>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position_by_name(name).is_some()
    }

    pub fn position_by_name(&self, name: &str) -> Option<usize> {
        self.services.iter().position(|s| s.name() == name)
    }

    pub fn position_by_pid(&self, pid: Pid) -> Option<usize> {
        self.services.iter().position(|s| s.pid() == Some(pid))
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name() == name)
    }

    pub fn at(&self, index: usize) -> Option<&Service> {
        self.services.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Service> {
        self.services.get_mut(index)
    }

    /// Append a service. Returns it back if the name is already taken.
    pub fn insert(&mut self, service: Service) -> Result<(), Service> {
        if self.contains(service.name()) {
            return Err(service);
        }
        self.services.push(service);
        Ok(())
    }

    pub fn remove(&mut self, index: usize) -> Option<Service> {
        (index < self.services.len()).then(|| self.services.remove(index))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Service> {
        self.services.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.services.iter().map(Service::name).collect()
    }
}
