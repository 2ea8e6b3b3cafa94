use crate::metrics::{Metrics, ReconcileOutcome};
use anyhow::{anyhow, Result};
use events_ingress_controller_core::{errors, ResourceId};
use events_ingress_controller_ingress::{
    endpoint_map, EventSourceIngressConfig, IngressConfigurator,
};
use events_ingress_controller_iplist::IpGetters;
use events_ingress_controller_k8s_api::ResourceExt;
use events_ingress_controller_k8s_index::{SharedEventSourceIndex, SharedServiceIndex};
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

const BACKOFF_BASE: Duration = Duration::from_secs(1);
const BACKOFF_CAP: Duration = Duration::from_secs(5 * 60);

/// Settings shared by every reconciliation.
#[derive(Clone, Debug)]
pub(crate) struct IngressSettings {
    pub(crate) admin_namespace: String,
    pub(crate) base_url: String,
    pub(crate) gateway: ResourceId,
}

/// Drains reconcile requests sequentially, driving each EventSource toward
/// its gateway artefact pair. Retryable failures are re-enqueued with
/// exponential backoff; everything else is dropped.
pub(crate) struct Controller {
    eventsources: SharedEventSourceIndex,
    services: SharedServiceIndex,
    ip_getters: Arc<IpGetters>,
    configurator: Arc<dyn IngressConfigurator>,
    settings: IngressSettings,
    annotation_key: String,
    requests: UnboundedReceiver<ResourceId>,
    requeue: UnboundedSender<ResourceId>,
    attempts: HashMap<ResourceId, u32>,
    metrics: Metrics,
}

impl Controller {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        eventsources: SharedEventSourceIndex,
        services: SharedServiceIndex,
        ip_getters: Arc<IpGetters>,
        configurator: Arc<dyn IngressConfigurator>,
        settings: IngressSettings,
        annotation_key: String,
        requeue: UnboundedSender<ResourceId>,
        requests: UnboundedReceiver<ResourceId>,
        metrics: Metrics,
    ) -> Self {
        Self {
            eventsources,
            services,
            ip_getters,
            configurator,
            settings,
            annotation_key,
            requests,
            requeue,
            attempts: HashMap::new(),
            metrics,
        }
    }

    pub(crate) async fn run(mut self) {
        while let Some(id) = self.requests.recv().await {
            match self.reconcile(&id).await {
                Ok(()) => {
                    self.attempts.remove(&id);
                    self.metrics.observe_reconcile(ReconcileOutcome::Success);
                }
                Err(error) if errors::is_retryable(&error) => {
                    let attempt = self.attempts.entry(id.clone()).or_default();
                    *attempt += 1;
                    let delay = backoff(*attempt);
                    warn!(%id, %error, attempt, ?delay, "Reconcile failed; requeueing");
                    self.metrics.observe_reconcile(ReconcileOutcome::Requeued);

                    let requeue = self.requeue.clone();
                    let id = id.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(delay).await;
                        let _ = requeue.send(id);
                    });
                }
                Err(error) => {
                    self.attempts.remove(&id);
                    info!(%id, %error, "Reconcile failed; dropping");
                    self.metrics.observe_reconcile(ReconcileOutcome::Dropped);
                }
            }
        }
    }

    async fn reconcile(&self, id: &ResourceId) -> Result<()> {
        let eventsource = self.eventsources.read().get(id);
        let Some(eventsource) = eventsource else {
            // Deleted; removal is idempotent.
            debug!(%id, "EventSource gone; removing ingress");
            let config = EventSourceIngressConfig::for_removal(
                id.clone(),
                self.settings.admin_namespace.clone(),
                self.settings.gateway.clone(),
            );
            return self.configurator.remove(&config).await;
        };

        let Some(source) = eventsource.annotations().get(&self.annotation_key) else {
            // Unannotated EventSources are not ours to manage.
            return Ok(());
        };

        let services = self
            .services
            .read()
            .eventsource_services(&id.namespace, &id.name);
        let service = match services.as_slice() {
            [service] => service.clone(),
            [] => return Err(errors::retryable(anyhow!("no service labelled for {id}"))),
            _ => {
                return Err(errors::retryable(anyhow!(
                    "expected exactly one service labelled for {id}, found {}",
                    services.len()
                )))
            }
        };

        let endpoints = endpoint_map(&service.ports, &eventsource.spec);
        if endpoints.is_empty() {
            return Err(errors::unretryable(anyhow!(
                "no webhook endpoints for {id}"
            )));
        }

        let Some(ip_getter) = self.ip_getters.get(source) else {
            return Err(errors::unretryable(anyhow!(
                "no ip getter for source {source:?} on {id}"
            )));
        };

        let config = EventSourceIngressConfig {
            ip_getter: Some(ip_getter),
            event_source: id.clone(),
            service: ResourceId::new(id.namespace.clone(), service.name),
            endpoints,
            admin_namespace: self.settings.admin_namespace.clone(),
            base_url: self.settings.base_url.clone(),
            gateway: self.settings.gateway.clone(),
        };

        match self.configurator.configure(&config).await {
            Ok(applied) => {
                debug!(%id, resources = ?applied, "Applied ingress artefacts");
                Ok(())
            }
            Err(error) => {
                if !error.applied.is_empty() {
                    warn!(%id, applied = ?error.applied, "Partial ingress configuration");
                }
                Err(error.source)
            }
        }
    }
}

fn backoff(attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(10);
    std::cmp::min(BACKOFF_BASE * 2u32.pow(exp), BACKOFF_CAP)
}
