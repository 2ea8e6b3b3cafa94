use ahash::AHashMap as HashMap;
use anyhow::{anyhow, bail, Context as _, Result};
use events_ingress_controller_core::{ratelimit, MeshChecker, RateLimitGetter};
use events_ingress_controller_k8s_api::{
    sensor::{RateLimit, RateLimitUnit},
    Namespace, ResourceExt,
};
use parking_lot::RwLock;
use std::{collections::BTreeMap, sync::Arc};

const MESH_REVISION_LABEL: &str = "istio.io/rev";

pub type SharedNamespaceIndex = Arc<RwLock<NamespaceIndex>>;

/// Caches the labels and annotations of every namespace in the cluster.
#[derive(Debug, Default)]
pub struct NamespaceIndex {
    namespaces: HashMap<String, Metadata>,
}

#[derive(Debug, Default)]
struct Metadata {
    labels: BTreeMap<String, String>,
    annotations: BTreeMap<String, String>,
}

impl NamespaceIndex {
    pub fn shared() -> SharedNamespaceIndex {
        Arc::new(RwLock::new(Self::default()))
    }

    fn get(&self, name: &str) -> Option<&Metadata> {
        self.namespaces.get(name)
    }
}

impl kubert::index::IndexClusterResource<Namespace> for NamespaceIndex {
    fn apply(&mut self, resource: Namespace) {
        let name = resource.name_unchecked();
        let metadata = Metadata {
            labels: resource.labels().clone(),
            annotations: resource.annotations().clone(),
        };
        self.namespaces.insert(name, metadata);
    }

    fn delete(&mut self, name: String) {
        self.namespaces.remove(&name);
    }
}

/// Derives per-namespace platform policy from namespace metadata.
#[derive(Clone)]
pub struct NamespaceInfo {
    index: SharedNamespaceIndex,
    rate_limit_unit_annotation: String,
    requests_per_unit_annotation: String,
}

impl NamespaceInfo {
    pub fn new(
        index: SharedNamespaceIndex,
        rate_limit_unit_annotation: impl Into<String>,
        requests_per_unit_annotation: impl Into<String>,
    ) -> Self {
        Self {
            index,
            rate_limit_unit_annotation: rate_limit_unit_annotation.into(),
            requests_per_unit_annotation: requests_per_unit_annotation.into(),
        }
    }
}

impl RateLimitGetter for NamespaceInfo {
    /// The namespace's rate-limit quota, `None` when the requests annotation
    /// is unset. The unit annotation defaults to `Second`.
    fn rate_limit(&self, namespace: &str) -> Result<Option<RateLimit>> {
        if namespace.is_empty() {
            bail!("invalid namespace: {namespace:?}");
        }

        let index = self.index.read();
        let metadata = index
            .get(namespace)
            .ok_or_else(|| anyhow!("namespace {namespace} not found"))?;

        let unit = match metadata.annotations.get(&self.rate_limit_unit_annotation) {
            Some(value) => value
                .parse::<RateLimitUnit>()
                .with_context(|| format!("annotation {}", self.rate_limit_unit_annotation))?,
            None => RateLimitUnit::Second,
        };

        let requests_per_unit = match metadata.annotations.get(&self.requests_per_unit_annotation)
        {
            Some(value) => value
                .parse::<i32>()
                .ok()
                .filter(|requests| *requests >= 0)
                .ok_or_else(|| {
                    anyhow!(
                        "invalid {}: {value:?} is not a non-negative integer",
                        self.requests_per_unit_annotation
                    )
                })?,
            None => return Ok(None),
        };

        let limit = RateLimit {
            unit,
            requests_per_unit,
        };
        ratelimit::checked_requests_per_hour(&limit)
            .with_context(|| format!("annotation {}", self.requests_per_unit_annotation))?;
        Ok(Some(limit))
    }
}

impl MeshChecker for NamespaceInfo {
    fn on_mesh(&self, namespace: &str) -> Result<bool> {
        if namespace.is_empty() {
            return Ok(false);
        }

        let index = self.index.read();
        let metadata = index
            .get(namespace)
            .ok_or_else(|| anyhow!("namespace {namespace} not found"))?;
        Ok(metadata
            .labels
            .get(MESH_REVISION_LABEL)
            .is_some_and(|revision| !revision.is_empty()))
    }
}
