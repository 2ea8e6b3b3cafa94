#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod cidr;
pub mod errors;
pub mod ratelimit;

pub use self::{cidr::validate_cidrs, ratelimit::RateLimitCalculator};
pub use ipnet::{IpNet, Ipv4Net, Ipv6Net};

use anyhow::Result;
use events_ingress_controller_k8s_api::sensor::RateLimit;
use std::fmt;

/// Label identifying the EventSource that owns a derived resource.
pub const EVENT_SOURCE_NAME_LABEL: &str = "eventsource-name";

/// Label identifying the owning EventSource's namespace.
pub const EVENT_SOURCE_NAMESPACE_LABEL: &str = "eventsource-namespace";

/// Provides the source CIDR ranges of an upstream webhook producer.
#[async_trait::async_trait]
pub trait IpGetter: Send + Sync {
    async fn get_ips(&self) -> Result<Vec<String>>;
}

/// Answers whether a namespace participates in the service mesh.
pub trait MeshChecker: Send + Sync {
    fn on_mesh(&self, namespace: &str) -> Result<bool>;
}

/// Exposes a namespace's rate-limit quota, `None` when unset.
pub trait RateLimitGetter: Send + Sync {
    fn rate_limit(&self, namespace: &str) -> Result<Option<RateLimit>>;
}

/// A namespace/name pair identifying a cluster resource.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
