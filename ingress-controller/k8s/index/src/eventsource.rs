use ahash::AHashMap as HashMap;
use events_ingress_controller_core::ResourceId;
use events_ingress_controller_k8s_api::{EventSource, ResourceExt};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

pub type SharedEventSourceIndex = Arc<RwLock<EventSourceIndex>>;

/// Caches EventSources and enqueues a reconcile request on every change.
pub struct EventSourceIndex {
    eventsources: HashMap<ResourceId, EventSource>,
    requests: UnboundedSender<ResourceId>,
}

impl EventSourceIndex {
    pub fn shared(requests: UnboundedSender<ResourceId>) -> SharedEventSourceIndex {
        Arc::new(RwLock::new(Self {
            eventsources: HashMap::new(),
            requests,
        }))
    }

    pub fn get(&self, id: &ResourceId) -> Option<EventSource> {
        self.eventsources.get(id).cloned()
    }

    fn enqueue(&self, id: ResourceId) {
        if let Err(error) = self.requests.send(id.clone()) {
            tracing::error!(%id, %error, "Failed to enqueue EventSource reconcile");
        }
    }
}

impl kubert::index::IndexNamespacedResource<EventSource> for EventSourceIndex {
    fn apply(&mut self, resource: EventSource) {
        let namespace = resource
            .namespace()
            .expect("EventSource must have a namespace");
        let name = resource.name_unchecked();
        let id = ResourceId::new(namespace, name);
        self.eventsources.insert(id.clone(), resource);
        self.enqueue(id);
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        self.eventsources.remove(&id);
        self.enqueue(id);
    }
}
