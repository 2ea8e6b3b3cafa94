use ahash::AHashMap as HashMap;
use events_ingress_controller_core::{ResourceId, EVENT_SOURCE_NAME_LABEL};
use events_ingress_controller_k8s_api::{ResourceExt, Service};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedServiceIndex = Arc<RwLock<ServiceIndex>>;

/// Caches the Services labelled for an EventSource, keyed by namespace, and
/// wakes the owning EventSource on every change.
pub struct ServiceIndex {
    services: HashMap<String, HashMap<String, ServiceMeta>>,
    requests: UnboundedSender<ResourceId>,
}

/// The subset of a Service the reconciler needs.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceMeta {
    pub name: String,
    /// Value of the `eventsource-name` label, when present.
    pub eventsource: Option<String>,
    pub ports: Vec<i32>,
}

impl ServiceIndex {
    pub fn shared(requests: UnboundedSender<ResourceId>) -> SharedServiceIndex {
        Arc::new(RwLock::new(Self {
            services: HashMap::new(),
            requests,
        }))
    }

    /// Services in `namespace` labelled `eventsource-name=<eventsource>`.
    pub fn eventsource_services(&self, namespace: &str, eventsource: &str) -> Vec<ServiceMeta> {
        self.services
            .get(namespace)
            .into_iter()
            .flat_map(|by_name| by_name.values())
            .filter(|meta| meta.eventsource.as_deref() == Some(eventsource))
            .cloned()
            .collect()
    }

    fn enqueue(&self, id: ResourceId) {
        if let Err(error) = self.requests.send(id.clone()) {
            tracing::error!(%id, %error, "Failed to enqueue EventSource reconcile");
        }
    }
}

impl kubert::index::IndexNamespacedResource<Service> for ServiceIndex {
    fn apply(&mut self, resource: Service) {
        let namespace = resource.namespace().expect("Service must have a namespace");
        let name = resource.name_unchecked();
        let eventsource = resource.labels().get(EVENT_SOURCE_NAME_LABEL).cloned();
        let ports = resource
            .spec
            .as_ref()
            .and_then(|spec| spec.ports.as_ref())
            .map(|ports| ports.iter().map(|port| port.port).collect())
            .unwrap_or_default();

        let meta = ServiceMeta {
            name: name.clone(),
            eventsource: eventsource.clone(),
            ports,
        };
        let previous = self
            .services
            .entry(namespace.clone())
            .or_default()
            .insert(name, meta);

        // Wake the owner, and the previous owner when the label moved.
        let mut owners = Vec::new();
        owners.extend(eventsource);
        if let Some(previous) = previous.and_then(|meta| meta.eventsource) {
            if !owners.contains(&previous) {
                owners.push(previous);
            }
        }
        for owner in owners {
            self.enqueue(ResourceId::new(namespace.clone(), owner));
        }
    }

    fn delete(&mut self, namespace: String, name: String) {
        let Some(by_name) = self.services.get_mut(&namespace) else {
            return;
        };
        let Some(meta) = by_name.remove(&name) else {
            return;
        };
        if by_name.is_empty() {
            self.services.remove(&namespace);
        }
        if let Some(owner) = meta.eventsource {
            self.enqueue(ResourceId::new(namespace, owner));
        }
    }
}
