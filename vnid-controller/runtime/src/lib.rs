#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use vnid_controller_core as core;
pub use vnid_controller_k8s_api as k8s;
pub use vnid_controller_k8s_index as index;

mod args;
mod cluster;
mod dataplane;
mod store;

pub use self::{args::Args, cluster::KubeCluster, dataplane::RuleIndex, store::KubeStore};
