//! Host directory boundary.
//!
//! The directory owns host identity (id, address, name). The kernel only reads
//! a snapshot of it at the start of each tick or rollup run.

use crate::config::KernelConfig;
use crate::models::HostEntry;
use crate::state::Shared;

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("host directory unavailable: {0}")]
    Unavailable(String),
}

pub trait HostDirectory: Send + Sync {
    /// Read-only snapshot; later directory changes are not reflected in it.
    fn list_hosts(&self) -> Result<Vec<HostEntry>, DirectoryError>;

    fn find_host(&self, id: &str) -> Result<Option<HostEntry>, DirectoryError> {
        Ok(self.list_hosts()?.into_iter().find(|h| h.id.as_str() == id))
    }
}

/// Directory backed by the `hosts:` section of the kernel config.
pub struct ConfigDirectory {
    cfg: Shared<KernelConfig>,
}

impl ConfigDirectory {
    pub fn new(cfg: Shared<KernelConfig>) -> Self {
        Self { cfg }
    }
}

impl HostDirectory for ConfigDirectory {
    fn list_hosts(&self) -> Result<Vec<HostEntry>, DirectoryError> {
        let cfg = self.cfg.lock();
        // BTreeMap iteration keeps the snapshot sorted by id
        Ok(cfg
            .hosts
            .iter()
            .map(|(id, host)| {
                let name = host.name.clone().unwrap_or_else(|| id.clone());
                HostEntry::new(id.as_str(), host.address.clone(), name)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HostConf;
    use crate::state::new_state;

    #[test]
    fn test_config_directory_snapshot() {
        let mut cfg = KernelConfig::default();
        cfg.hosts.insert("b".into(), HostConf { address: "10.0.0.2".into(), name: None });
        cfg.hosts.insert("a".into(), HostConf { address: "10.0.0.1".into(), name: Some("Alpha".into()) });
        let shared = new_state(cfg);
        let dir = ConfigDirectory::new(shared.clone());

        let hosts = dir.list_hosts().unwrap();
        assert_eq!(hosts.len(), 2);
        assert_eq!(hosts[0].display_name, "Alpha");
        assert_eq!(hosts[1].display_name, "b");

        // a snapshot taken earlier is not affected by later edits
        shared.lock().hosts.remove("a");
        assert_eq!(hosts.len(), 2);
        assert_eq!(dir.list_hosts().unwrap().len(), 1);
        assert!(dir.find_host("a").unwrap().is_none());
        assert_eq!(dir.find_host("b").unwrap().unwrap().address, "10.0.0.2");
    }
}
