#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod endpoints;
pub mod istio;

pub use self::{endpoints::endpoint_map, istio::IstioConfigurator};

use events_ingress_controller_core::{IpGetter, ResourceId};
use std::{collections::BTreeMap, fmt, sync::Arc};

/// A named path behind a service port.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NamedPath {
    pub name: String,
    pub path: String,
}

/// Service port (as a decimal string) to the named endpoint it serves.
/// Ordered so that rendering is deterministic.
pub type EndpointMap = BTreeMap<String, NamedPath>;

/// Everything needed to render the ingress artefacts of one EventSource.
/// Assembled per reconciliation and immutable within it.
#[derive(Clone)]
pub struct EventSourceIngressConfig {
    /// CIDR provider for the upstream source; absent only on removal.
    pub ip_getter: Option<Arc<dyn IpGetter>>,
    pub event_source: ResourceId,
    pub service: ResourceId,
    pub endpoints: EndpointMap,
    pub admin_namespace: String,
    pub base_url: String,
    pub gateway: ResourceId,
}

impl EventSourceIngressConfig {
    /// A config for removal only; carries no provider, service, or endpoints.
    pub fn for_removal(
        event_source: ResourceId,
        admin_namespace: impl Into<String>,
        gateway: ResourceId,
    ) -> Self {
        Self {
            ip_getter: None,
            event_source,
            service: ResourceId::default(),
            endpoints: EndpointMap::new(),
            admin_namespace: admin_namespace.into(),
            base_url: String::new(),
            gateway,
        }
    }
}

/// A configure failure, reporting any artefacts applied before it.
#[derive(Debug)]
pub struct ConfigureError {
    pub applied: Vec<ResourceId>,
    pub source: anyhow::Error,
}

impl fmt::Display for ConfigureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.source.fmt(f)
    }
}

impl std::error::Error for ConfigureError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Writes and removes the gateway artefacts of an EventSource.
#[async_trait::async_trait]
pub trait IngressConfigurator: Send + Sync {
    /// Renders and upserts the artefact pair, returning the applied ids.
    async fn configure(
        &self,
        config: &EventSourceIngressConfig,
    ) -> Result<Vec<ResourceId>, ConfigureError>;

    /// Deletes the artefact pair; missing artefacts are a no-op.
    async fn remove(&self, config: &EventSourceIngressConfig) -> anyhow::Result<()>;
}
