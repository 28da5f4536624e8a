use crate::Node;
use anyhow::{Context, Result};
use futures::prelude::*;
use std::sync::Arc;
use tokio::time;
use tracing::{debug, error, info, instrument, trace, warn};
use vnid_controller_core::{Event, NetNamespace, PodPartition, Vnid, GLOBAL_VNID};
use vnid_controller_k8s_api::{service::is_service_ip_set, ResourceExt};

impl Node {
    /// Loads every assignment in the node's network into the VNID table.
    #[instrument(skip(self), fields(network = %self.network))]
    pub async fn populate(&self) -> Result<()> {
        let netnss = self
            .store
            .net_namespaces(&self.network)
            .await
            .with_context(|| format!("failed to list NetNamespaces in network {}", self.network))?;
        debug!(?netnss, "Loaded NetNamespaces");

        for NetNamespace { name, vnid } in netnss {
            self.vnids.set_vnid(&name, vnid);
        }
        Ok(())
    }

    /// Watches NetNamespace assignments until `shutdown` is signaled, resubscribing whenever
    /// the watch fails.
    pub async fn watch_net_namespaces(self: Arc<Self>, shutdown: drain::Watch) {
        let watch = async {
            loop {
                match self.watch_net_namespaces_once().await {
                    Ok(()) => info!("Watch ended"),
                    Err(error) => warn!(%error, "Watch failed"),
                }
                time::sleep(self.watch_restart_delay).await;
                info!("Restarting");
            }
        };
        Self::until_shutdown(watch, shutdown).await
    }

    async fn watch_net_namespaces_once(&self) -> Result<()> {
        let mut batches = self.store.watch(&self.network).await?;
        debug!(network = %self.network, "Watching");
        while let Some(batch) = batches.next().await {
            self.handle_netns_events(batch?).await;
        }
        Ok(())
    }

    /// Applies a batch of assignment changes, in order.
    pub async fn handle_netns_events(&self, batch: Vec<Event>) {
        for event in batch {
            self.metrics.netns_event(event.name());
            match event {
                Event::Added(NetNamespace { name, vnid }) => {
                    let old = self.vnids.get_vnid(&name).ok();
                    if old == Some(vnid) {
                        trace!(ns = %name, vnid, "VNID unchanged");
                        continue;
                    }
                    self.vnids.set_vnid(&name, vnid);
                    self.update_pod_network(&name, old, vnid).await;
                }

                Event::Removed(NetNamespace { name, vnid }) => {
                    // The namespace's traffic falls back to the global network. Its assignment
                    // must stay visible until the dataplane has been updated.
                    let old = self.vnids.get_vnid(&name).unwrap_or(vnid);
                    self.update_pod_network(&name, Some(old), GLOBAL_VNID).await;
                    if let Err(error) = self.vnids.unset_vnid(&name) {
                        debug!(%error, "NetNamespace was not assigned");
                    }
                }
            }
        }
    }

    /// Updates this node's pods and the namespace's services after the namespace moves from
    /// `old` to `new`.
    ///
    /// Failures are logged and skipped so that the rest of the namespace is still updated.
    ///
    /// The steps are not applied atomically: pods are switched to the new VNID before the
    /// namespace's service rules are rewritten, so policy is briefly inconsistent while the
    /// update runs.
    #[instrument(skip(self, namespace), fields(ns = %namespace))]
    pub(crate) async fn update_pod_network(&self, namespace: &str, old: Option<Vnid>, new: Vnid) {
        let PodPartition { running, other } = match self.pods.local_pods(namespace).await {
            Ok(pods) => pods,
            Err(error) => {
                error!(%error, "Could not list local pods");
                self.metrics.failure("list_pods");
                PodPartition::default()
            }
        };

        let services = match self.cluster.list_services(namespace).await {
            Ok(services) => services,
            Err(error) => {
                error!(%error, "Could not list services");
                self.metrics.failure("list_services");
                Vec::new()
            }
        };

        for pod in &running {
            if let Err(error) = self.dataplane.update_pod(pod).await {
                error!(%error, pod = %pod.name_any(), "Could not update pod");
                self.metrics.failure("update_pod");
            }
        }

        for pod in &other {
            let name = pod.name_any();
            match self.cluster.delete_pod(namespace, &name).await {
                Ok(()) => debug!(pod = %name, "Deleted pod"),
                Err(error) => {
                    error!(%error, pod = %name, "Could not delete pod");
                    self.metrics.failure("delete_pod");
                }
            }
        }

        for svc in services.iter().filter(|svc| is_service_ip_set(svc)) {
            if let Err(error) = self.dataplane.delete_service_rules(svc).await {
                error!(%error, service = %svc.name_any(), "Could not delete service rules");
                self.metrics.failure("delete_service_rules");
            }
            if let Err(error) = self.dataplane.add_service_rules(svc, new).await {
                error!(%error, service = %svc.name_any(), vnid = new, "Could not add service rules");
                self.metrics.failure("add_service_rules");
            }
        }

        debug!(
            pods = running.len(),
            deleted = other.len(),
            services = services.len(),
            "Updated pod network"
        );
    }
}
