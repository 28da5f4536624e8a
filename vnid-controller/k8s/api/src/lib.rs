#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod net_namespace;
pub mod service;

pub use self::net_namespace::{NetNamespace, NetNamespaceSpec};
pub use k8s_openapi::api::{
    self,
    core::v1::{Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec},
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, ResourceExt},
    runtime::watcher,
    Client, Error, Resource,
};
