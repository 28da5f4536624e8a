use crate::Node;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use anyhow::{anyhow, Context, Result};
use futures::prelude::*;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, info, trace, warn};
use vnid_controller_k8s_api::{
    service::{is_service_ip_set, port_protocol, service_ports},
    watcher, ResourceExt, Service,
};

/// Holds the last programmed version of each service, by UID.
///
/// Services are keyed by UID rather than name so that a service that is deleted and recreated
/// under the same name is treated as a new object.
#[derive(Debug, Default)]
pub(crate) struct ServiceIndex {
    by_uid: HashMap<String, Service>,

    /// Set while the watch is relisting, holding the UIDs listed so far.
    relisted: Option<HashSet<String>>,
}

/// Classifies a service notification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delta {
    Sync,
    Added,
    Updated,
    Deleted,
}

/// Returns true if the services' ports differ in number, order, protocol, or port number.
pub(crate) fn ports_changed(old: &Service, new: &Service) -> bool {
    let (old, new) = (service_ports(old), service_ports(new));
    old.len() != new.len()
        || old
            .iter()
            .zip(new)
            .any(|(o, n)| port_protocol(o) != port_protocol(n) || o.port != n.port)
}

// === impl Delta ===

impl Delta {
    fn name(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::Added => "added",
            Self::Updated => "updated",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for Delta {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// === impl ServiceIndex ===

impl ServiceIndex {
    pub(crate) fn get(&self, uid: &str) -> Option<&Service> {
        self.by_uid.get(uid)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.by_uid.len()
    }

    fn contains(&self, svc: &Service) -> bool {
        svc.uid().is_some_and(|uid| self.by_uid.contains_key(&uid))
    }

    fn begin_relist(&mut self) {
        self.relisted = Some(HashSet::default());
    }

    fn relisted(&mut self, svc: &Service) {
        if let (Some(relisted), Some(uid)) = (self.relisted.as_mut(), svc.uid()) {
            relisted.insert(uid);
        }
    }

    /// Returns the services that were not listed since the relist began.
    fn end_relist(&mut self) -> Vec<Service> {
        let Some(relisted) = self.relisted.take() else {
            return Vec::new();
        };
        self.by_uid
            .iter()
            .filter(|(uid, _)| !relisted.contains(*uid))
            .map(|(_, svc)| svc.clone())
            .collect()
    }
}

// === impl Node ===

impl Node {
    /// Watches services until `shutdown` is signaled, resubscribing whenever the watch fails.
    pub async fn watch_services(self: Arc<Self>, shutdown: drain::Watch) {
        let watch = async {
            let mut services = ServiceIndex::default();
            loop {
                match self.watch_services_once(&mut services).await {
                    Ok(()) => info!("Watch ended"),
                    Err(error) => warn!(%error, "Watch failed"),
                }
                time::sleep(self.watch_restart_delay).await;
                info!("Restarting");
            }
        };
        Self::until_shutdown(watch, shutdown).await
    }

    async fn watch_services_once(&self, services: &mut ServiceIndex) -> Result<()> {
        let mut events = self.cluster.watch_services();
        while let Some(event) = events.next().await {
            match event? {
                watcher::Event::Init => {
                    debug!("Relisting");
                    services.begin_relist();
                }
                watcher::Event::InitApply(svc) => {
                    services.relisted(&svc);
                    self.handle_service_delta(services, Delta::Sync, svc).await;
                }
                watcher::Event::InitDone => {
                    for svc in services.end_relist() {
                        self.handle_service_delta(services, Delta::Deleted, svc)
                            .await;
                    }
                }
                watcher::Event::Apply(svc) => {
                    let delta = if services.contains(&svc) {
                        Delta::Updated
                    } else {
                        Delta::Added
                    };
                    self.handle_service_delta(services, delta, svc).await;
                }
                watcher::Event::Delete(svc) => {
                    self.handle_service_delta(services, Delta::Deleted, svc)
                        .await;
                }
            }
        }
        Ok(())
    }

    /// Applies a delta, logging failures so that the watch continues.
    async fn handle_service_delta(&self, services: &mut ServiceIndex, delta: Delta, svc: Service) {
        self.metrics.service_event(delta.name());
        let ns = svc.namespace().unwrap_or_default();
        let name = svc.name_any();
        trace!(%ns, service = %name, %delta, "Handling");
        if let Err(error) = self.apply_service_delta(services, delta, svc).await {
            warn!(%ns, service = %name, %delta, %error, "Failed to update service rules");
        }
    }

    pub(crate) async fn apply_service_delta(
        &self,
        services: &mut ServiceIndex,
        delta: Delta,
        svc: Service,
    ) -> Result<()> {
        if !is_service_ip_set(&svc) {
            return Ok(());
        }
        let uid = svc
            .uid()
            .ok_or_else(|| anyhow!("service {} has no UID", svc.name_any()))?;

        match delta {
            Delta::Sync | Delta::Added | Delta::Updated => {
                if let Some(old) = services.get(&uid) {
                    if !ports_changed(old, &svc) {
                        return Ok(());
                    }
                    if let Err(error) = self.dataplane.delete_service_rules(old).await {
                        warn!(%error, service = %old.name_any(), "Could not delete stale service rules");
                        self.metrics.failure("delete_service_rules");
                    }
                }

                let ns = svc.namespace().unwrap_or_default();
                let vnid = self
                    .vnids
                    .wait_and_get_vnid(&ns)
                    .await
                    .with_context(|| format!("skipped adding service rules for {delta} event"))?;

                self.dataplane
                    .add_service_rules(&svc, vnid)
                    .await
                    .inspect_err(|_| self.metrics.failure("add_service_rules"))?;
                debug!(%ns, service = %svc.name_any(), vnid, "Programmed service rules");
                services.by_uid.insert(uid, svc);
            }

            Delta::Deleted => {
                services.by_uid.remove(&uid);
                self.dataplane
                    .delete_service_rules(&svc)
                    .await
                    .inspect_err(|_| self.metrics.failure("delete_service_rules"))?;
                debug!(service = %svc.name_any(), "Removed service rules");
            }
        }

        Ok(())
    }
}
