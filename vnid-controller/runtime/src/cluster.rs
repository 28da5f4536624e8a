use crate::{
    core::{ClusterApi, LocalPods, PodPartition, ServiceEventStream},
    k8s::{watcher, Api, Client, DeleteParams, ListParams, Pod, Service},
};
use anyhow::Result;
use futures::prelude::*;
use tracing::debug;

/// Reads services and pods from the Kubernetes API.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,

    /// Scopes pod listings to this node.
    node_name: String,
}

// === impl KubeCluster ===

impl KubeCluster {
    pub fn new(client: Client, node_name: String) -> Self {
        Self { client, node_name }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeCluster {
    fn watch_services(&self) -> ServiceEventStream {
        let api = Api::<Service>::all(self.client.clone());
        Box::pin(watcher::watcher(api, watcher::Config::default()).map_err(anyhow::Error::from))
    }

    async fn list_services(&self, namespace: &str) -> Result<Vec<Service>> {
        let api = Api::<Service>::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn delete_pod(&self, namespace: &str, name: &str) -> Result<()> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        api.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LocalPods for KubeCluster {
    async fn local_pods(&self, namespace: &str) -> Result<PodPartition> {
        let api = Api::<Pod>::namespaced(self.client.clone(), namespace);
        let params = ListParams::default().fields(&format!("spec.nodeName={}", self.node_name));
        let pods = api.list(&params).await?.items;
        debug!(%namespace, pods = pods.len(), "Listed local pods");
        Ok(partition(pods))
    }
}

/// Splits pods into those that can be updated in place and those that must be recreated.
///
/// A pod can be updated if it is running and has an IP. Completed pods have no dataplane state
/// and are skipped.
fn partition(pods: impl IntoIterator<Item = Pod>) -> PodPartition {
    let mut partition = PodPartition::default();
    for pod in pods {
        let status = pod.status.as_ref();
        let phase = status.and_then(|s| s.phase.as_deref()).unwrap_or_default();
        let has_ip = status
            .and_then(|s| s.pod_ip.as_deref())
            .is_some_and(|ip| !ip.is_empty());
        match phase {
            "Running" if has_ip => partition.running.push(pod),
            "Succeeded" | "Failed" => {}
            _ => partition.other.push(pod),
        }
    }
    partition
}
