use crate::{Service, ServicePort};

/// Returns true if the service has a cluster IP. Headless services (and services
/// that have not been allocated an IP yet) have no rules in the dataplane.
pub fn is_service_ip_set(svc: &Service) -> bool {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.cluster_ip.as_deref())
        .map(|ip| !ip.is_empty() && ip != "None")
        .unwrap_or(false)
}

/// Returns the service's ports in spec order.
pub fn service_ports(svc: &Service) -> &[ServicePort] {
    svc.spec
        .as_ref()
        .and_then(|spec| spec.ports.as_deref())
        .unwrap_or_default()
}

/// Returns the port's protocol, applying the API server's default.
pub fn port_protocol(port: &ServicePort) -> &str {
    port.protocol.as_deref().unwrap_or("TCP")
}
