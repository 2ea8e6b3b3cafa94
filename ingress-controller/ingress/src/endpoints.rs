use crate::{EndpointMap, NamedPath};
use events_ingress_controller_k8s_api::eventsource::EventSourceSpec;

/// Joins a Service's ports with the EventSource webhook specs.
///
/// Every service port seeds a `"<port>" → empty` entry; webhook and github
/// entries naming a seeded port fill in its name and endpoint path. Entries
/// referencing a port the service does not expose are skipped.
pub fn endpoint_map(ports: &[i32], spec: &EventSourceSpec) -> EndpointMap {
    let mut endpoints: EndpointMap = ports
        .iter()
        .map(|port| (port.to_string(), NamedPath::default()))
        .collect();

    for (name, webhook) in spec.webhook.iter().flatten() {
        if let Some(named) = endpoints.get_mut(&webhook.port) {
            named.name = name.clone();
            named.path = webhook.endpoint.clone();
        }
    }

    for (name, github) in spec.github.iter().flatten() {
        let Some(webhook) = &github.webhook else {
            continue;
        };
        if let Some(named) = endpoints.get_mut(&webhook.port) {
            named.name = name.clone();
            named.path = webhook.endpoint.clone();
        }
    }

    endpoints
}
