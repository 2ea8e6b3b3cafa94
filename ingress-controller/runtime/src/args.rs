use crate::{
    admission::{eventsource, sensor, Admission},
    controller::{Controller, IngressSettings},
    metrics::Metrics,
};
use anyhow::{bail, Result};
use clap::Parser;
use events_ingress_controller_core::{
    IpGetter, RateLimitCalculator, ResourceId, EVENT_SOURCE_NAME_LABEL,
};
use events_ingress_controller_ingress::IstioConfigurator;
use events_ingress_controller_iplist as iplist;
use events_ingress_controller_k8s_api::{
    sensor::{RateLimit, RateLimitUnit},
    EventSource, Namespace, Service,
};
use events_ingress_controller_k8s_index::{EventSourceIndex, NamespaceIndex, NamespaceInfo, ServiceIndex};
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{info_span, warn, Instrument};

#[derive(Debug, Parser)]
#[clap(name = "events-ingress", about = "An event-source ingress controller")]
pub struct Args {
    #[clap(
        long,
        default_value = "events_ingress=info,warn",
        env = "EVENTS_INGRESS_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    server: kubert::ServerArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// Disables the admission controller server.
    #[clap(long)]
    admission_controller_disabled: bool,

    /// Disables the EventSource ingress reconciler.
    #[clap(long)]
    ingress_controller_disabled: bool,

    /// Base URL webhook ingress is served under.
    #[clap(long, default_value = "webhooks.example.com")]
    webhook_url: String,

    /// Namespace holding the gateway authorization policies.
    #[clap(long, default_value = "routing")]
    admin_namespace: String,

    /// Namespace of the ingress gateway.
    #[clap(long, default_value = "routing-rules")]
    gateway_namespace: String,

    /// Name of the ingress gateway.
    #[clap(long, default_value = "events-webhook-gateway")]
    gateway_name: String,

    /// `key=value,...` labels selecting the gateway workload.
    #[clap(long, default_value = "istio=ingressgateway")]
    gateway_selector: KeyValues,

    /// `annotationValue=providerKind,...` assigning an IP-list provider to
    /// each supported hook annotation. Providers: github|file|officeips|any.
    #[clap(long, default_value = "github=github")]
    supported_hooks: KeyValues,

    /// Annotation marking an EventSource as a known webhook source.
    #[clap(long, default_value = eventsource::DEFAULT_KNOWN_SOURCE_ANNOTATION)]
    known_source_annotation: String,

    #[clap(long, default_value = "Second")]
    default_rate_limit_unit: RateLimitUnit,

    #[clap(long, default_value = "1")]
    default_requests_per_unit: i32,

    /// Namespace annotation carrying the rate-limit unit.
    #[clap(long, default_value = "events-ingress.io/rate-limit-unit")]
    rate_limit_unit_annotation: String,

    /// Namespace annotation carrying the requests-per-unit quota.
    #[clap(long, default_value = "events-ingress.io/requests-per-unit")]
    requests_per_unit_annotation: String,

    /// Local YAML file backing `file` providers.
    #[clap(long, default_value = "/etc/events-ingress/iplists.yaml")]
    ip_file: PathBuf,

    /// Comma-separated source names read from the ip file, in order.
    #[clap(long, default_value = "")]
    ip_file_sources: String,

    /// Feed endpoint for `officeips` providers.
    #[clap(long, default_value = "")]
    office_ips_url: String,

    #[clap(long, default_value = "", env = "OFFICE_IPS_USERNAME")]
    office_ips_username: String,

    #[clap(long, default_value = "", env = "OFFICE_IPS_PASSWORD")]
    office_ips_password: String,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            log_level,
            log_format,
            client,
            server,
            admin,
            admission_controller_disabled,
            ingress_controller_disabled,
            webhook_url,
            admin_namespace,
            gateway_namespace,
            gateway_name,
            gateway_selector: KeyValues(gateway_selector),
            supported_hooks: KeyValues(supported_hooks),
            known_source_annotation,
            default_rate_limit_unit,
            default_requests_per_unit,
            rate_limit_unit_annotation,
            requests_per_unit_annotation,
            ip_file,
            ip_file_sources,
            office_ips_url,
            office_ips_username,
            office_ips_password,
        } = self;

        if gateway_selector.is_empty() {
            bail!("invalid --gateway-selector: at least one key=value pair is required");
        }

        let server = if admission_controller_disabled {
            None
        } else {
            Some(server)
        };

        let mut prom = <Registry>::default();
        let metrics = Metrics::register(prom.sub_registry_with_prefix("events_ingress"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .with_optional_server(server)
            .build()
            .await?;

        // IP-list providers keyed by annotation value; read-only once the
        // controller starts serving.
        let mut ip_getters = iplist::IpGetters::default();
        for (hook, provider) in &supported_hooks {
            if hook.is_empty() {
                continue;
            }
            let getter: Arc<dyn IpGetter> = match provider.as_str() {
                "github" => Arc::new(iplist::CachedIpLister::new(iplist::github_meta())),
                "file" => {
                    let sources = ip_file_sources
                        .split(',')
                        .filter(|source| !source.is_empty())
                        .map(String::from)
                        .collect();
                    let lister = iplist::IpLister::new(
                        iplist::reader::FileReader::new(&ip_file),
                        iplist::decode::IpListsFile::new(sources),
                    );
                    Arc::new(iplist::CachedIpLister::new(lister))
                }
                "officeips" => {
                    let reader = iplist::reader::HttpReader::new(&office_ips_url)
                        .with_basic_auth(&office_ips_username, &office_ips_password);
                    let lister = iplist::IpLister::new(reader, iplist::decode::OfficeIps);
                    Arc::new(iplist::CachedIpLister::new(lister))
                }
                "any" => {
                    warn!(%hook, "The any provider matches all addresses and is for debug use only");
                    Arc::new(iplist::AnyGetter)
                }
                unknown => bail!("unknown webhook provider kind {unknown} for hook {hook}"),
            };
            ip_getters.insert(hook.clone(), getter);
        }
        let ip_getters = Arc::new(ip_getters);

        let namespaces = NamespaceIndex::shared();
        let namespace_watch = runtime.watch_all::<Namespace>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(namespaces.clone(), namespace_watch)
                .instrument(info_span!("namespaces")),
        );

        let namespace_info = Arc::new(NamespaceInfo::new(
            namespaces,
            rate_limit_unit_annotation,
            requests_per_unit_annotation,
        ));
        let calculator = RateLimitCalculator::new(RateLimit {
            unit: default_rate_limit_unit,
            requests_per_unit: default_requests_per_unit,
        });

        if !ingress_controller_disabled {
            let (requests_tx, requests_rx) = mpsc::unbounded_channel();

            let eventsources = EventSourceIndex::shared(requests_tx.clone());
            let eventsource_watch = runtime.watch_all::<EventSource>(watcher::Config::default());
            tokio::spawn(
                kubert::index::namespaced(eventsources.clone(), eventsource_watch)
                    .instrument(info_span!("eventsources")),
            );

            let services = ServiceIndex::shared(requests_tx.clone());
            let service_watch = runtime
                .watch_all::<Service>(watcher::Config::default().labels(EVENT_SOURCE_NAME_LABEL));
            tokio::spawn(
                kubert::index::namespaced(services.clone(), service_watch)
                    .instrument(info_span!("services")),
            );

            let configurator = IstioConfigurator::new(runtime.client(), gateway_selector);
            let controller = Controller::new(
                eventsources,
                services,
                ip_getters.clone(),
                Arc::new(configurator),
                IngressSettings {
                    admin_namespace,
                    base_url: webhook_url,
                    gateway: ResourceId::new(gateway_namespace, gateway_name),
                },
                known_source_annotation.clone(),
                requests_tx,
                requests_rx,
                metrics.clone(),
            );
            tokio::spawn(controller.run().instrument(info_span!("eventsource_controller")));
        }

        let admission = Admission::new(
            eventsource::Handler::new(
                namespace_info.clone(),
                ip_getters,
                known_source_annotation,
            ),
            sensor::Handler::new(namespace_info, calculator),
            metrics,
        );
        let runtime = runtime.spawn_server(move || admission);

        // Block on the shutdown signal; background tasks wind down with it.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}

/// A comma-delimited `key=value` list flag. Malformed pairs are skipped, as
/// are pairs with an empty key or value.
#[derive(Clone, Debug, Default)]
struct KeyValues(BTreeMap<String, String>);

impl std::str::FromStr for KeyValues {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let mut pairs = BTreeMap::new();
        for pair in s.split(',') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            if key.is_empty() || value.is_empty() {
                continue;
            }
            pairs.insert(key.to_string(), value.to_string());
        }
        Ok(Self(pairs))
    }
}
