use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Scopes a `NetNamespace` to a single logical network.
pub const NETWORK_LABEL: &str = "network.ksdn.io/name";

/// Assigns a Kubernetes namespace to a virtual network ID.
///
/// Assignments are made by the cluster's network master; nodes only read them.
#[derive(Clone, Debug, PartialEq, Eq, CustomResource, Deserialize, Serialize)]
#[kube(
    group = "network.ksdn.io",
    version = "v1",
    kind = "NetNamespace",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct NetNamespaceSpec {
    /// The name of the namespace this assignment applies to.
    pub netname: String,

    /// The namespace's VNID. Zero is the global VNID.
    pub netid: u32,
}

/// Returns a label selector matching all assignments in `network`.
pub fn network_selector(network: &str) -> String {
    format!("{NETWORK_LABEL}={network}")
}
