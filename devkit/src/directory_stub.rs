use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use uptime_kernel::directory::{DirectoryError, HostDirectory};
use uptime_kernel::models::HostEntry;

/// In-memory host directory that tests can edit or switch off between ticks.
#[derive(Default)]
pub struct StaticDirectory {
    hosts: Mutex<Vec<HostEntry>>,
    unavailable: AtomicBool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(id, address)` pairs; the display name is the id upper-cased.
    pub fn with_hosts(hosts: &[(&str, &str)]) -> Self {
        let dir = Self::new();
        for (id, address) in hosts {
            dir.add(id, address);
        }
        dir
    }

    pub fn add(&self, id: &str, address: &str) {
        self.hosts.lock().push(HostEntry::new(id, address, id.to_uppercase()));
    }

    pub fn remove(&self, id: &str) {
        self.hosts.lock().retain(|h| h.id.as_str() != id);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl HostDirectory for StaticDirectory {
    fn list_hosts(&self) -> Result<Vec<HostEntry>, DirectoryError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(DirectoryError::Unavailable("directory switched off by test".into()));
        }
        Ok(self.hosts.lock().clone())
    }
}
