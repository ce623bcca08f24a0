//! Name directory
//!
//! [`PvDirectory`] answers a server's name resolution from a table of PVs.
//! It holds the PVs weakly: a PV disappears from the directory once host
//! code and the engine have both let go of it.

use std::collections::HashMap;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::bridge::{AttachResponse, ClientAddress, ExistsResponse, FieldType, HostEnum, Pv, ServerHandler, WeakPv};
use crate::error::{BridgeError, HandlerResult, Result};
use crate::host::HostValue;

use super::simple::{PvOptions, SimplePv};

#[derive(Debug, Default)]
pub struct PvDirectory {
    pvs: RwLock<HashMap<String, WeakPv>>,
    /// Alias name to PV name.
    aliases: RwLock<HashMap<String, String>>,
}

impl PvDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `pv` under its own name, replacing any PV of the same name.
    /// Returns the replaced PV if it was still alive.
    pub fn insert(&self, pv: &Pv) -> Option<Pv> {
        let previous = self.pvs.write().insert(pv.name().to_owned(), pv.downgrade());
        debug!(pv = pv.name(), "PV added to directory");
        previous.and_then(|weak| weak.upgrade())
    }

    /// Create a [`SimplePv`] and serve it. The caller must keep the returned
    /// handle alive for the PV to stay in the directory.
    pub fn create_pv(
        &self,
        name: impl Into<String>,
        field_type: FieldType,
        count: u32,
        options: PvOptions,
    ) -> Result<SimplePv> {
        let pv = SimplePv::with_options(name, field_type, count, options)?;
        if self.insert(pv.pv()).is_some() {
            info!(pv = pv.name(), "Replaced existing PV");
        }
        Ok(pv)
    }

    pub fn remove(&self, name: &str) -> Option<Pv> {
        self.pvs.write().remove(name).and_then(|weak| weak.upgrade())
    }

    /// Make `target` reachable as `alias` as well.
    pub fn add_alias(&self, alias: impl Into<String>, target: impl Into<String>) -> Result<()> {
        let alias = alias.into();
        let target = target.into();
        if alias.is_empty() || alias.contains('\0') || alias == target {
            return Err(BridgeError::InvalidName(alias));
        }
        debug!(alias = %alias, target = %target, "Alias added");
        self.aliases.write().insert(alias, target);
        Ok(())
    }

    pub fn remove_alias(&self, alias: &str) -> bool {
        self.aliases.write().remove(alias).is_some()
    }

    /// Resolve `name`, trying PV names before aliases.
    pub fn get(&self, name: &str) -> Option<Pv> {
        if let Some(pv) = self.lookup(name) {
            return Some(pv);
        }
        let target = self.aliases.read().get(name).cloned()?;
        self.lookup(&target)
    }

    fn lookup(&self, name: &str) -> Option<Pv> {
        let pvs = self.pvs.read();
        pvs.get(name).and_then(WeakPv::upgrade)
    }

    /// Names of the PVs still alive, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .pvs
            .read()
            .iter()
            .filter(|(_, weak)| weak.upgrade().is_some())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Drop entries whose PV is gone. Returns how many were removed.
    pub fn prune(&self) -> usize {
        let mut pvs = self.pvs.write();
        let before = pvs.len();
        pvs.retain(|_, weak| weak.upgrade().is_some());
        before - pvs.len()
    }
}

impl ServerHandler for PvDirectory {
    fn pv_exist_test(&self, _client: &ClientAddress, pv_name: &str) -> HandlerResult<HostValue> {
        Ok(match self.get(pv_name) {
            Some(_) => ExistsResponse::ExistsHere.to_host(),
            None => ExistsResponse::NotExistsHere.to_host(),
        })
    }

    fn pv_attach(&self, pv_name: &str) -> HandlerResult<HostValue> {
        Ok(match self.get(pv_name) {
            Some(pv) => pv.into(),
            None => AttachResponse::NotFound.to_host(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn client() -> ClientAddress {
        ClientAddress {
            host: Ipv4Addr::LOCALHOST,
            port: 5064,
        }
    }

    #[test]
    fn test_create_and_resolve() {
        let directory = PvDirectory::new();
        let pv = directory
            .create_pv("DIR:TEMP", FieldType::Double, 1, PvOptions::default())
            .unwrap();
        assert_eq!(directory.get("DIR:TEMP").as_ref(), Some(pv.pv()));
        assert_eq!(
            directory.pv_exist_test(&client(), "DIR:TEMP"),
            Ok(ExistsResponse::ExistsHere.to_host())
        );
        assert_eq!(
            directory.pv_attach("missing:pv"),
            Ok(AttachResponse::NotFound.to_host())
        );
    }

    #[test]
    fn test_create_replaces_same_name() {
        let directory = PvDirectory::new();
        let first = directory
            .create_pv("DIR:SAME", FieldType::Long, 1, PvOptions::default())
            .unwrap();
        let second = directory
            .create_pv("DIR:SAME", FieldType::Long, 1, PvOptions::default())
            .unwrap();
        assert_ne!(first.pv(), second.pv());
        assert_eq!(directory.get("DIR:SAME").as_ref(), Some(second.pv()));
    }

    #[test]
    fn test_aliases() {
        let directory = PvDirectory::new();
        let pv = directory
            .create_pv("DIR:REAL", FieldType::String, 1, PvOptions::default())
            .unwrap();
        directory.add_alias("DIR:ALIAS", "DIR:REAL").unwrap();
        match directory.pv_attach("DIR:ALIAS").unwrap() {
            HostValue::Pv(attached) => assert_eq!(&attached, pv.pv()),
            other => panic!("unexpected {other:?}"),
        }
        assert!(directory.remove_alias("DIR:ALIAS"));
        assert!(directory.get("DIR:ALIAS").is_none());
        assert!(directory.add_alias("DIR:REAL", "DIR:REAL").is_err());
    }

    #[test]
    fn test_dropped_pv_disappears() {
        let directory = PvDirectory::new();
        let pv = directory
            .create_pv("DIR:GONE", FieldType::Double, 1, PvOptions::default())
            .unwrap();
        assert_eq!(directory.names(), vec!["DIR:GONE".to_owned()]);
        drop(pv);
        assert!(directory.get("DIR:GONE").is_none());
        assert!(directory.names().is_empty());
        assert_eq!(directory.prune(), 1);
    }
}
