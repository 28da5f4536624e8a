use crate::{Event, NetNamespace};
use anyhow::Result;
use futures::prelude::*;
use std::pin::Pin;

/// A stream of assignment changes. Each item holds the events observed in one
/// notification cycle, in order.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Vec<Event>>> + Send + 'static>>;

/// Models the distributed store holding namespace-to-VNID assignments.
#[async_trait::async_trait]
pub trait NetNamespaceStore: Send + Sync {
    /// Lists all assignments currently recorded for `network`.
    async fn net_namespaces(&self, network: &str) -> Result<Vec<NetNamespace>>;

    /// Subscribes to assignment changes for `network`.
    ///
    /// The stream ends, or yields an error, when the subscription is lost. Callers
    /// are expected to subscribe again.
    async fn watch(&self, network: &str) -> Result<EventStream>;
}
