//! Renders and writes the Istio artefact pair for an annotated EventSource:
//! a VirtualService in the gateway namespace routing the external paths to
//! the event-source service, and an AuthorizationPolicy in the admin
//! namespace denying traffic from outside the provider's source ranges.

use crate::{ConfigureError, EventSourceIngressConfig, IngressConfigurator};
use anyhow::{anyhow, bail, Result};
use events_ingress_controller_core::{
    errors, ResourceId, EVENT_SOURCE_NAMESPACE_LABEL, EVENT_SOURCE_NAME_LABEL,
};
use events_ingress_controller_k8s_api::{
    istio::{self, AuthorizationPolicy, VirtualService},
    Api, Client, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams,
};
use std::collections::BTreeMap;

const FIELD_MANAGER: &str = "events-ingress-controller";

/// Rejects bearer tokens short enough to be placeholders before they reach
/// the event engine.
const SHORT_BEARER_REGEX: &str = r"^Bearer\s+\S{0,11}\s*$";
const SHORT_BEARER_BODY: &str =
    r#"{"error":"invalid_request","error_description":"secret too short"}"#;

pub struct IstioConfigurator {
    client: Client,
    gateway_selector: BTreeMap<String, String>,
}

impl IstioConfigurator {
    pub fn new(client: Client, gateway_selector: BTreeMap<String, String>) -> Self {
        Self {
            client,
            gateway_selector,
        }
    }
}

#[async_trait::async_trait]
impl IngressConfigurator for IstioConfigurator {
    async fn configure(
        &self,
        config: &EventSourceIngressConfig,
    ) -> Result<Vec<ResourceId>, ConfigureError> {
        let mut applied = Vec::new();
        let fail = |applied, source| Err(ConfigureError { applied, source });

        let Some(getter) = config.ip_getter.as_ref() else {
            return fail(
                applied,
                errors::unretryable(anyhow!("no ip getter for {}", config.event_source)),
            );
        };
        let cidrs = match getter.get_ips().await {
            Ok(cidrs) if cidrs.is_empty() => {
                return fail(
                    applied,
                    errors::retryable(anyhow!("empty CIDR list for {}", config.event_source)),
                )
            }
            Ok(cidrs) => cidrs,
            Err(error) => {
                return fail(
                    applied,
                    errors::retryable(error.context("fetching source CIDRs")),
                )
            }
        };

        let policy = match authorization_policy(config, &self.gateway_selector, cidrs) {
            Ok(policy) => policy,
            Err(error) => return fail(applied, errors::unretryable(error)),
        };
        let route = match virtual_service(config) {
            Ok(route) => route,
            Err(error) => return fail(applied, errors::unretryable(error)),
        };

        let params = PatchParams::apply(FIELD_MANAGER).force();
        let name = artefact_name(&config.event_source);

        let routes =
            Api::<VirtualService>::namespaced(self.client.clone(), &config.gateway.namespace);
        if let Err(error) = routes.patch(&name, &params, &Patch::Apply(&route)).await {
            return fail(
                applied,
                errors::retryable(
                    anyhow::Error::new(error).context("applying virtual service"),
                ),
            );
        }
        applied.push(ResourceId::new(config.gateway.namespace.clone(), name.clone()));

        let policies =
            Api::<AuthorizationPolicy>::namespaced(self.client.clone(), &config.admin_namespace);
        if let Err(error) = policies.patch(&name, &params, &Patch::Apply(&policy)).await {
            return fail(
                applied,
                errors::retryable(
                    anyhow::Error::new(error).context("applying authorization policy"),
                ),
            );
        }
        applied.push(ResourceId::new(config.admin_namespace.clone(), name));

        Ok(applied)
    }

    async fn remove(&self, config: &EventSourceIngressConfig) -> Result<()> {
        let es = &config.event_source;
        let selector = format!(
            "{EVENT_SOURCE_NAME_LABEL}={},{EVENT_SOURCE_NAMESPACE_LABEL}={}",
            es.name, es.namespace
        );

        let mut failures = Vec::new();
        let routes =
            Api::<VirtualService>::namespaced(self.client.clone(), &config.gateway.namespace);
        if let Err(error) = delete_labelled(&routes, &selector).await {
            failures.push(format!("virtual services: {error}"));
        }
        let policies =
            Api::<AuthorizationPolicy>::namespaced(self.client.clone(), &config.admin_namespace);
        if let Err(error) = delete_labelled(&policies, &selector).await {
            failures.push(format!("authorization policies: {error}"));
        }

        if failures.is_empty() {
            return Ok(());
        }
        Err(errors::retryable(anyhow!(
            "removing ingress for {es}: {}",
            failures.join("; ")
        )))
    }
}

async fn delete_labelled<K>(api: &Api<K>, selector: &str) -> kube::Result<()>
where
    K: kube::Resource + Clone + serde::de::DeserializeOwned + std::fmt::Debug,
{
    let result = api
        .delete_collection(
            &DeleteParams::default(),
            &ListParams::default().labels(selector),
        )
        .await;
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
        Err(error) => Err(error),
    }
}

fn artefact_name(es: &ResourceId) -> String {
    format!("{}-{}", es.namespace, es.name)
}

fn eventsource_labels(es: &ResourceId) -> BTreeMap<String, String> {
    BTreeMap::from([
        (EVENT_SOURCE_NAME_LABEL.to_string(), es.name.clone()),
        (
            EVENT_SOURCE_NAMESPACE_LABEL.to_string(),
            es.namespace.clone(),
        ),
    ])
}

fn path_prefix(es: &ResourceId) -> String {
    format!("/{}/{}", es.namespace, es.name)
}

/// The DENY policy for the gateway workload: traffic to this EventSource's
/// paths is rejected unless it originates inside the provider's ranges.
fn authorization_policy(
    config: &EventSourceIngressConfig,
    gateway_selector: &BTreeMap<String, String>,
    cidrs: Vec<String>,
) -> Result<AuthorizationPolicy> {
    let es = &config.event_source;
    let prefix = path_prefix(es);

    let paths: Vec<String> = config
        .endpoints
        .values()
        .map(|endpoint| format!("{prefix}{}/*", endpoint.path))
        .collect();
    if paths.is_empty() {
        bail!("no endpoints for {es}");
    }

    Ok(AuthorizationPolicy {
        metadata: ObjectMeta {
            name: Some(artefact_name(es)),
            namespace: Some(config.admin_namespace.clone()),
            labels: Some(eventsource_labels(es)),
            ..Default::default()
        },
        spec: istio::AuthorizationPolicySpec {
            selector: Some(istio::WorkloadSelector {
                match_labels: gateway_selector.clone(),
            }),
            action: Some(istio::Action::Deny),
            rules: vec![istio::Rule {
                from: vec![istio::RuleFrom {
                    source: Some(istio::Source {
                        not_ip_blocks: cidrs,
                        ..Default::default()
                    }),
                }],
                to: vec![istio::RuleTo {
                    operation: Some(istio::Operation {
                        hosts: vec![
                            config.base_url.clone(),
                            format!("{}:*", config.base_url),
                        ],
                        paths,
                    }),
                }],
            }],
        },
    })
}

/// The route pair per endpoint: a guard rule returning 400 for short bearer
/// tokens, then the destination rule. The guard must come first; the gateway
/// takes the first matching route.
fn virtual_service(config: &EventSourceIngressConfig) -> Result<VirtualService> {
    let es = &config.event_source;
    let prefix = path_prefix(es);
    let service_host = format!(
        "{}.{}.svc.cluster.local",
        config.service.name, config.service.namespace
    );

    let mut routes = Vec::with_capacity(config.endpoints.len() * 2);
    for (port, endpoint) in &config.endpoints {
        let Ok(port) = port.parse::<u32>() else {
            tracing::warn!(%es, %port, "Skipping unparseable service port");
            continue;
        };

        let uri_prefix = format!("{prefix}{}/", endpoint.path);
        let name = (!endpoint.name.is_empty()).then(|| endpoint.name.clone());

        routes.push(istio::HttpRoute {
            name: name.as_ref().map(|name| format!("{name}-short-secret")),
            matches: vec![istio::HttpMatchRequest {
                uri: Some(istio::StringMatch::Prefix(uri_prefix.clone())),
                headers: BTreeMap::from([(
                    "authorization".to_string(),
                    istio::StringMatch::Regex(SHORT_BEARER_REGEX.to_string()),
                )]),
            }],
            route: Vec::new(),
            rewrite: None,
            direct_response: Some(istio::HttpDirectResponse {
                status: 400,
                body: Some(istio::HttpBody {
                    string: Some(SHORT_BEARER_BODY.to_string()),
                }),
            }),
        });

        routes.push(istio::HttpRoute {
            name,
            matches: vec![istio::HttpMatchRequest {
                uri: Some(istio::StringMatch::Prefix(uri_prefix)),
                headers: BTreeMap::new(),
            }],
            route: vec![istio::HttpRouteDestination {
                destination: istio::Destination {
                    host: service_host.clone(),
                    port: Some(istio::PortSelector { number: port }),
                },
            }],
            rewrite: Some(istio::HttpRewrite {
                uri: Some("/".to_string()),
            }),
            direct_response: None,
        });
    }

    if routes.is_empty() {
        bail!("no routes rendered for {es}");
    }

    Ok(VirtualService {
        metadata: ObjectMeta {
            name: Some(artefact_name(es)),
            namespace: Some(config.gateway.namespace.clone()),
            labels: Some(eventsource_labels(es)),
            ..Default::default()
        },
        spec: istio::VirtualServiceSpec {
            hosts: vec![config.base_url.clone()],
            gateways: vec![format!("{}/{}", config.gateway.namespace, config.gateway.name)],
            http: routes,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NamedPath;
    use maplit::btreemap;

    fn config() -> EventSourceIngressConfig {
        EventSourceIngressConfig {
            ip_getter: None,
            event_source: ResourceId::new("tenant", "es"),
            service: ResourceId::new("tenant", "es-svc"),
            endpoints: btreemap! {
                "12345".to_string() => NamedPath {
                    name: "ghs".to_string(),
                    path: "/hook".to_string(),
                },
            },
            admin_namespace: "routing".to_string(),
            base_url: "webhooks.example.com".to_string(),
            gateway: ResourceId::new("routing-rules", "events-webhook-gateway"),
        }
    }

    fn selector() -> BTreeMap<String, String> {
        btreemap! { "istio".to_string() => "ingressgateway".to_string() }
    }

    #[test]
    fn policy_denies_outside_the_provider_ranges() {
        let policy =
            authorization_policy(&config(), &selector(), vec!["140.82.112.0/20".to_string()])
                .unwrap();

        assert_eq!(policy.metadata.name.as_deref(), Some("tenant-es"));
        assert_eq!(policy.metadata.namespace.as_deref(), Some("routing"));
        assert_eq!(
            policy.metadata.labels.as_ref().unwrap(),
            &eventsource_labels(&ResourceId::new("tenant", "es"))
        );

        let spec = &policy.spec;
        assert_eq!(spec.action, Some(istio::Action::Deny));
        assert_eq!(
            spec.selector.as_ref().unwrap().match_labels,
            selector()
        );

        let rule = &spec.rules[0];
        let source = rule.from[0].source.as_ref().unwrap();
        assert_eq!(source.not_ip_blocks, vec!["140.82.112.0/20".to_string()]);
        assert!(source.ip_blocks.is_empty());

        let operation = rule.to[0].operation.as_ref().unwrap();
        assert_eq!(
            operation.hosts,
            vec![
                "webhooks.example.com".to_string(),
                "webhooks.example.com:*".to_string()
            ]
        );
        assert_eq!(operation.paths, vec!["/tenant/es/hook/*".to_string()]);
    }

    #[test]
    fn policy_requires_endpoints() {
        let mut config = config();
        config.endpoints.clear();
        assert!(
            authorization_policy(&config, &selector(), vec!["140.82.112.0/20".to_string()])
                .is_err()
        );
    }

    #[test]
    fn route_pairs_guard_before_destination() {
        let route = virtual_service(&config()).unwrap();

        assert_eq!(route.metadata.name.as_deref(), Some("tenant-es"));
        assert_eq!(route.metadata.namespace.as_deref(), Some("routing-rules"));
        assert_eq!(
            route.spec.hosts,
            vec!["webhooks.example.com".to_string()]
        );
        assert_eq!(
            route.spec.gateways,
            vec!["routing-rules/events-webhook-gateway".to_string()]
        );

        let http = &route.spec.http;
        assert_eq!(http.len(), 2);

        let guard = &http[0];
        assert!(guard.route.is_empty());
        let direct = guard.direct_response.as_ref().unwrap();
        assert_eq!(direct.status, 400);
        assert!(direct
            .body
            .as_ref()
            .and_then(|body| body.string.as_deref())
            .unwrap()
            .contains("secret too short"));
        assert_eq!(
            guard.matches[0].uri,
            Some(istio::StringMatch::Prefix("/tenant/es/hook/".to_string()))
        );
        assert_eq!(
            guard.matches[0].headers["authorization"],
            istio::StringMatch::Regex(SHORT_BEARER_REGEX.to_string())
        );

        let destination = &http[1];
        assert!(destination.direct_response.is_none());
        assert_eq!(
            destination.matches[0].uri,
            Some(istio::StringMatch::Prefix("/tenant/es/hook/".to_string()))
        );
        let target = &destination.route[0].destination;
        assert_eq!(target.host, "es-svc.tenant.svc.cluster.local");
        assert_eq!(target.port, Some(istio::PortSelector { number: 12345 }));
        assert_eq!(
            destination.rewrite.as_ref().unwrap().uri.as_deref(),
            Some("/")
        );
    }

    #[test]
    fn unparseable_port_keys_are_skipped() {
        let mut config = config();
        config.endpoints.insert(
            "not-a-port".to_string(),
            NamedPath {
                name: "bad".to_string(),
                path: "/bad".to_string(),
            },
        );

        let route = virtual_service(&config).unwrap();
        assert_eq!(route.spec.http.len(), 2);
    }

    #[test]
    fn only_unparseable_ports_is_an_error() {
        let mut config = config();
        config.endpoints = btreemap! {
            "not-a-port".to_string() => NamedPath::default(),
        };
        assert!(virtual_service(&config).is_err());
    }

    #[test]
    fn rendering_is_deterministic() {
        let mut config = config();
        config.endpoints.insert(
            "80".to_string(),
            NamedPath {
                name: "plain".to_string(),
                path: "/plain".to_string(),
            },
        );

        let first = virtual_service(&config).unwrap();
        let second = virtual_service(&config).unwrap();
        assert_eq!(first, second);

        let policy_a =
            authorization_policy(&config, &selector(), vec!["10.0.0.0/8".to_string()]).unwrap();
        let policy_b =
            authorization_policy(&config, &selector(), vec!["10.0.0.0/8".to_string()]).unwrap();
        assert_eq!(policy_a, policy_b);
    }

    #[test]
    fn unnamed_endpoints_route_without_rule_names() {
        let mut config = config();
        config.endpoints = btreemap! {
            "8080".to_string() => NamedPath::default(),
        };

        let route = virtual_service(&config).unwrap();
        assert_eq!(route.spec.http.len(), 2);
        assert_eq!(route.spec.http[0].name, None);
        assert_eq!(route.spec.http[1].name, None);
        assert_eq!(
            route.spec.http[1].matches[0].uri,
            Some(istio::StringMatch::Prefix("/tenant/es/".to_string()))
        );
    }
}
