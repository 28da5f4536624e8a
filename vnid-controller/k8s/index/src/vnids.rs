use ahash::AHashMap as HashMap;
use parking_lot::Mutex;
use std::{collections::BTreeSet, sync::Arc};
use tokio::time;
use tracing::info;
use vnid_controller_core::{Backoff, NetNamespace, Vnid};

/// Maps namespaces to their VNIDs, with a reverse index from each VNID to the
/// namespaces that share it.
///
/// The two indexes are only updated together, under a single lock, so readers
/// never observe them disagreeing. The table is written by the node's
/// NetNamespace watch; every other subsystem only reads it.
#[derive(Debug, Default)]
pub struct VnidMap {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    ids: HashMap<String, Vnid>,
    namespaces: HashMap<Vnid, BTreeSet<String>>,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum VnidError {
    #[error("failed to find VNID for namespace {0:?}")]
    NotFound(String),
}

// === impl VnidMap ===

impl VnidMap {
    /// Bounds how long a lookup waits for an assignment to reach this node.
    pub const LOOKUP_BACKOFF: Backoff = Backoff::new(time::Duration::from_millis(100), 1.5, 5);

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get_vnid(&self, name: &str) -> Result<Vnid, VnidError> {
        self.inner
            .lock()
            .ids
            .get(name)
            .copied()
            .ok_or_else(|| VnidError::NotFound(name.to_string()))
    }

    /// Looks up a namespace's VNID, retrying with [`Self::LOOKUP_BACKOFF`].
    ///
    /// Assignments are made by the network master and reach this node
    /// asynchronously, so a namespace created moments ago may not be known yet.
    pub async fn wait_and_get_vnid(&self, name: &str) -> Result<Vnid, VnidError> {
        Self::LOOKUP_BACKOFF
            .retry(|| self.get_vnid(name).ok())
            .await
            .ok_or_else(|| VnidError::NotFound(name.to_string()))
    }

    /// Returns the namespaces assigned `vnid`, sorted by name.
    pub fn namespaces(&self, vnid: Vnid) -> Vec<String> {
        self.inner
            .lock()
            .namespaces
            .get(&vnid)
            .map(|names| names.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub(crate) fn set_vnid(&self, name: &str, vnid: Vnid) {
        self.inner.lock().insert(name, vnid);
        info!(ns = %name, vnid, "Associated namespace with VNID");
    }

    pub(crate) fn unset_vnid(&self, name: &str) -> Result<Vnid, VnidError> {
        let vnid = self
            .inner
            .lock()
            .remove(name)
            .ok_or_else(|| VnidError::NotFound(name.to_string()))?;
        info!(ns = %name, vnid, "Dissociated namespace from VNID");
        Ok(vnid)
    }

    /// Returns the number of namespaces assigned to each VNID in use.
    pub(crate) fn vnid_sizes(&self) -> Vec<(Vnid, usize)> {
        self.inner
            .lock()
            .namespaces
            .iter()
            .map(|(vnid, names)| (*vnid, names.len()))
            .collect()
    }
}

impl FromIterator<NetNamespace> for VnidMap {
    fn from_iter<I: IntoIterator<Item = NetNamespace>>(netnss: I) -> Self {
        let mut inner = Inner::default();
        for NetNamespace { name, vnid } in netnss {
            inner.insert(&name, vnid);
        }
        Self {
            inner: Mutex::new(inner),
        }
    }
}

// === impl Inner ===

impl Inner {
    fn insert(&mut self, name: &str, vnid: Vnid) {
        if let Some(old) = self.ids.insert(name.to_string(), vnid) {
            self.remove_from_set(name, old);
        }
        self.namespaces
            .entry(vnid)
            .or_default()
            .insert(name.to_string());
    }

    fn remove(&mut self, name: &str) -> Option<Vnid> {
        let vnid = self.ids.remove(name)?;
        self.remove_from_set(name, vnid);
        Some(vnid)
    }

    fn remove_from_set(&mut self, name: &str, vnid: Vnid) {
        if let Some(names) = self.namespaces.get_mut(&vnid) {
            names.remove(name);
            if names.is_empty() {
                self.namespaces.remove(&vnid);
            }
        }
    }
}
