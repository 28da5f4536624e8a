use crate::Vnid;
use anyhow::Result;
use vnid_controller_k8s_api::{Pod, Service};

/// Programs service and pod rules on this node.
///
/// Calls are independent of one another: a sequence of calls is not applied
/// atomically.
#[async_trait::async_trait]
pub trait Dataplane: Send + Sync {
    /// Installs rules admitting `vnid`'s traffic to the service's cluster IP
    /// and ports.
    async fn add_service_rules(&self, svc: &Service, vnid: Vnid) -> Result<()>;

    /// Removes all rules installed for the service.
    async fn delete_service_rules(&self, svc: &Service) -> Result<()>;

    /// Reprograms the pod's rules for its namespace's current VNID.
    async fn update_pod(&self, pod: &Pod) -> Result<()>;
}
