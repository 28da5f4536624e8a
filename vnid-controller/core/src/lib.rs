#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod backoff;
pub mod cluster;
pub mod dataplane;
pub mod store;

pub use self::{
    backoff::Backoff,
    cluster::{ClusterApi, LocalPods, PodPartition, ServiceEventStream},
    dataplane::Dataplane,
    store::{EventStream, NetNamespaceStore},
};

/// A virtual network ID.
pub type Vnid = u32;

/// The VNID of the global network. Namespaces on the global network may reach
/// (and be reached from) every other namespace.
pub const GLOBAL_VNID: Vnid = 0;

/// Assigns a namespace to a VNID.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct NetNamespace {
    pub name: String,
    pub vnid: Vnid,
}

/// A change to a namespace's VNID assignment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    /// The namespace was assigned a VNID, or its VNID changed.
    Added(NetNamespace),

    /// The namespace's assignment was deleted.
    Removed(NetNamespace),
}

// === impl NetNamespace ===

impl NetNamespace {
    pub fn new(name: impl Into<String>, vnid: Vnid) -> Self {
        Self {
            name: name.into(),
            vnid,
        }
    }
}

// === impl Event ===

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Added(_) => "added",
            Self::Removed(_) => "removed",
        }
    }
}
