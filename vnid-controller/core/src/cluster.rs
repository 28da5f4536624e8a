use anyhow::Result;
use futures::prelude::*;
use std::pin::Pin;
use vnid_controller_k8s_api::{watcher, Pod, Service};

/// A stream of service notifications. The stream ends, or yields an error, when the watch is
/// lost.
pub type ServiceEventStream =
    Pin<Box<dyn Stream<Item = Result<watcher::Event<Service>>> + Send + 'static>>;

/// This node's pods in a namespace.
#[derive(Clone, Debug, Default)]
pub struct PodPartition {
    /// Running pods whose dataplane state can be updated in place.
    pub running: Vec<Pod>,

    /// Pods that must be recreated to pick up a network change.
    pub other: Vec<Pod>,
}

/// Lists the pods hosted on this node.
#[async_trait::async_trait]
pub trait LocalPods: Send + Sync {
    async fn local_pods(&self, namespace: &str) -> Result<PodPartition>;
}

/// The subset of the cluster API used by the node.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Subscribes to all services in the cluster.
    fn watch_services(&self) -> ServiceEventStream;

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>>;

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()>;
}
