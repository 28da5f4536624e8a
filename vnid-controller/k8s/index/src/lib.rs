//! Node-side VNID controller
//!
//! Each namespace is assigned a virtual network ID (VNID) by the cluster's network master. This
//! crate keeps a node's view of those assignments current and rewrites the node's dataplane rules
//! when they change:
//!
//! - `NetNamespace` assignments are loaded synchronously at startup and then watched. When a
//!   namespace's VNID changes, the node's pods in that namespace are updated (or deleted, when they
//!   can't be updated in place) and the namespace's service rules are reprogrammed under the new
//!   VNID.
//! - `Service`s are watched independently. Rules are programmed for each service with a cluster IP
//!   using its namespace's VNID. A shadow copy of each programmed service, keyed by UID, is used to
//!   skip updates that don't change the service's ports.
//!
//! ```text
//! [ NetNamespace ] -> [ VnidMap ] <- [ Service ]
//!        \                               /
//!         `------> [ Dataplane ] <------'
//! ```
//!
//! The two watches only meet through the [`VnidMap`]. Reads of the map are always internally
//! consistent but may lag either watch.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod metrics;
mod namespace;
mod service;
mod vnids;


pub use self::{metrics::NodeMetrics, vnids::VnidError, vnids::VnidMap};
use anyhow::Result;
use futures::prelude::*;
use std::sync::Arc;
use tokio::time;
use tracing::{info, info_span, Instrument};
use vnid_controller_core::{ClusterApi, Dataplane, LocalPods, NetNamespaceStore};

/// Configures a [`Node`].
#[derive(Clone, Debug)]
pub struct Config {
    /// The logical network whose assignments this node follows.
    pub network: String,

    /// How long to wait before resubscribing to a failed watch.
    pub watch_restart_delay: time::Duration,
}

/// The external systems a [`Node`] reads from and writes to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn NetNamespaceStore>,
    pub cluster: Arc<dyn ClusterApi>,
    pub pods: Arc<dyn LocalPods>,
    pub dataplane: Arc<dyn Dataplane>,
}

/// Reconciles a node's dataplane with the cluster's VNID assignments and services.
pub struct Node {
    network: String,
    watch_restart_delay: time::Duration,
    vnids: Arc<VnidMap>,
    store: Arc<dyn NetNamespaceStore>,
    cluster: Arc<dyn ClusterApi>,
    pods: Arc<dyn LocalPods>,
    dataplane: Arc<dyn Dataplane>,
    metrics: NodeMetrics,
}

// === impl Config ===

impl Default for Config {
    fn default() -> Self {
        Self {
            network: "default".to_string(),
            watch_restart_delay: time::Duration::from_secs(1),
        }
    }
}

// === impl Node ===

impl Node {
    pub fn new(
        config: Config,
        vnids: Arc<VnidMap>,
        collaborators: Collaborators,
        metrics: NodeMetrics,
    ) -> Arc<Self> {
        let Config {
            network,
            watch_restart_delay,
        } = config;
        let Collaborators {
            store,
            cluster,
            pods,
            dataplane,
        } = collaborators;
        Arc::new(Self {
            network,
            watch_restart_delay,
            vnids,
            store,
            cluster,
            pods,
            dataplane,
            metrics,
        })
    }

    #[cfg(test)]
    pub(crate) fn vnids(&self) -> &Arc<VnidMap> {
        &self.vnids
    }

    /// Loads all VNID assignments and then spawns the NetNamespace and Service watches.
    ///
    /// Fails if the assignments can't be loaded: serving pods or services from a partial table
    /// could grant or deny connectivity incorrectly. Once started, the watches run until
    /// `shutdown` is signaled.
    pub async fn start(self: &Arc<Self>, shutdown: drain::Watch) -> Result<()> {
        self.populate().await?;
        info!(
            network = %self.network,
            namespaces = self.vnids.vnid_sizes().iter().map(|(_, n)| n).sum::<usize>(),
            "Loaded VNIDs"
        );

        tokio::spawn(
            self.clone()
                .watch_net_namespaces(shutdown.clone())
                .instrument(info_span!("netnamespaces")),
        );
        tokio::spawn(
            self.clone()
                .watch_services(shutdown)
                .instrument(info_span!("services")),
        );
        Ok(())
    }

    /// Runs `watch` until it completes or `shutdown` is signaled.
    async fn until_shutdown(watch: impl Future<Output = ()>, shutdown: drain::Watch) {
        tokio::select! {
            () = watch => {}
            release = shutdown.signaled() => {
                info!("Stopped");
                drop(release);
            }
        }
    }
}
