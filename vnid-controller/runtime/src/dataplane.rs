use crate::{
    core::{Dataplane, Vnid},
    index::VnidMap,
    k8s::{
        service::{is_service_ip_set, port_protocol, service_ports},
        Pod, ResourceExt, Service,
    },
};
use ahash::AHashMap as HashMap;
use anyhow::{anyhow, bail, Result};
use parking_lot::Mutex;
use prometheus_client::{
    collector::Collector,
    encoding::{DescriptorEncoder, EncodeMetric},
    metrics::{counter::Counter, gauge::ConstGauge, MetricType},
    registry::Registry,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Records the rules this node should have programmed.
///
/// Each service's rules admit traffic from a single VNID to the service's cluster IP and ports.
/// Each pod's rules tag its traffic with its namespace's VNID.
#[derive(Debug)]
pub struct RuleIndex {
    vnids: Arc<VnidMap>,
    state: Mutex<State>,
    pod_updates: Counter,
}

/// The rules programmed for a service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceRules {
    pub namespace: String,
    pub name: String,
    pub cluster_ip: String,
    /// Protocol and port pairs, in spec order.
    pub ports: Vec<(String, i32)>,
    pub vnid: Vnid,
}

#[derive(Debug, Default)]
struct State {
    /// Indexed by service UID.
    services: HashMap<String, ServiceRules>,

    /// Indexed by namespace and name.
    pods: HashMap<(String, String), Vnid>,
}

#[derive(Debug)]
struct Instrumented(Arc<RuleIndex>);

// === impl RuleIndex ===

impl RuleIndex {
    pub fn shared(vnids: Arc<VnidMap>) -> Arc<Self> {
        Arc::new(Self {
            vnids,
            state: Mutex::new(State::default()),
            pod_updates: Counter::default(),
        })
    }

    pub fn register(reg: &mut Registry, index: Arc<Self>) {
        reg.register(
            "pod_updates",
            "Total number of pod rule updates",
            index.pod_updates.clone(),
        );
        reg.register_collector(Box::new(Instrumented(index)));
    }

    pub fn service_rules(&self, uid: &str) -> Option<ServiceRules> {
        self.state.lock().services.get(uid).cloned()
    }

    pub fn pod_vnid(&self, namespace: &str, name: &str) -> Option<Vnid> {
        self.state
            .lock()
            .pods
            .get(&(namespace.to_string(), name.to_string()))
            .copied()
    }
}

#[async_trait::async_trait]
impl Dataplane for RuleIndex {
    async fn add_service_rules(&self, svc: &Service, vnid: Vnid) -> Result<()> {
        let uid = svc
            .uid()
            .ok_or_else(|| anyhow!("service {} has no UID", svc.name_any()))?;
        let cluster_ip = match svc.spec.as_ref().and_then(|spec| spec.cluster_ip.clone()) {
            Some(ip) if is_service_ip_set(svc) => ip,
            _ => bail!("service {} has no cluster IP", svc.name_any()),
        };
        let rules = ServiceRules {
            namespace: svc.namespace().unwrap_or_default(),
            name: svc.name_any(),
            cluster_ip,
            ports: service_ports(svc)
                .iter()
                .map(|port| (port_protocol(port).to_string(), port.port))
                .collect(),
            vnid,
        };
        info!(
            ns = %rules.namespace,
            service = %rules.name,
            ip = %rules.cluster_ip,
            ports = ?rules.ports,
            vnid,
            "Adding service rules"
        );
        self.state.lock().services.insert(uid, rules);
        Ok(())
    }

    async fn delete_service_rules(&self, svc: &Service) -> Result<()> {
        let Some(uid) = svc.uid() else {
            bail!("service {} has no UID", svc.name_any());
        };
        match self.state.lock().services.remove(&uid) {
            Some(rules) => info!(ns = %rules.namespace, service = %rules.name, "Deleted service rules"),
            None => debug!(service = %svc.name_any(), "No service rules to delete"),
        }
        Ok(())
    }

    async fn update_pod(&self, pod: &Pod) -> Result<()> {
        let ns = pod.namespace().unwrap_or_default();
        let vnid = self.vnids.get_vnid(&ns)?;
        let name = pod.name_any();
        info!(%ns, pod = %name, vnid, "Updating pod rules");
        self.state.lock().pods.insert((ns, name), vnid);
        self.pod_updates.inc();
        Ok(())
    }
}

// === impl Instrumented ===

impl Collector for Instrumented {
    fn encode(&self, mut encoder: DescriptorEncoder<'_>) -> Result<(), std::fmt::Error> {
        let services = self.0.state.lock().services.len();
        let service_encoder = encoder.encode_descriptor(
            "service_rules",
            "The number of services with programmed rules",
            None,
            MetricType::Gauge,
        )?;
        ConstGauge::new(services as u32).encode(service_encoder)?;
        Ok(())
    }
}
