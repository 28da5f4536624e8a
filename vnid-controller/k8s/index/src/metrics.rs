use crate::VnidMap;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeLabelSet, EncodeMetric},
    metrics::{counter::Counter, family::Family, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;

#[derive(Clone, Debug, Default)]
pub struct NodeMetrics {
    netns_events: Family<EventLabels, Counter>,
    service_events: Family<EventLabels, Counter>,
    failures: Family<OperationLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct EventLabels {
    event: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct OperationLabels {
    operation: &'static str,
}

#[derive(Debug)]
struct Instrumented(Arc<VnidMap>);

/// Exposes the size of each VNID's namespace set.
pub fn register_vnids(reg: &mut Registry, vnids: Arc<VnidMap>) {
    reg.register_collector(Box::new(Instrumented(vnids)));
}

// === impl NodeMetrics ===

impl NodeMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let netns_events = Family::<EventLabels, Counter>::default();
        reg.register(
            "netnamespace_events",
            "Total number of NetNamespace events processed",
            netns_events.clone(),
        );

        let service_events = Family::<EventLabels, Counter>::default();
        reg.register(
            "service_events",
            "Total number of service deltas processed",
            service_events.clone(),
        );

        let failures = Family::<OperationLabels, Counter>::default();
        reg.register(
            "reconcile_failures",
            "Total number of failed dataplane and cluster operations",
            failures.clone(),
        );

        Self {
            netns_events,
            service_events,
            failures,
        }
    }

    pub(crate) fn netns_event(&self, event: &'static str) {
        self.netns_events
            .get_or_create(&EventLabels { event })
            .inc();
    }

    pub(crate) fn service_event(&self, event: &'static str) {
        self.service_events
            .get_or_create(&EventLabels { event })
            .inc();
    }

    pub(crate) fn failure(&self, operation: &'static str) {
        self.failures
            .get_or_create(&OperationLabels { operation })
            .inc();
    }

    #[cfg(test)]
    pub(crate) fn failures(&self, operation: &'static str) -> u64 {
        self.failures
            .get_or_create(&OperationLabels { operation })
            .get()
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let mut vnids_encoder = encoder.encode_descriptor(
            "vnid_namespaces",
            "The number of namespaces assigned to each VNID",
            None,
            MetricType::Gauge,
        )?;
        for (vnid, size) in self.0.vnid_sizes() {
            let vnid = vnid.to_string();
            let labels = [("vnid", vnid.as_str())];
            let namespaces = ConstGauge::new(size as u32);
            let namespaces_encoder = vnids_encoder.encode_family(&labels)?;
            namespaces.encode(namespaces_encoder)?;
        }
        Ok(())
    }
}
