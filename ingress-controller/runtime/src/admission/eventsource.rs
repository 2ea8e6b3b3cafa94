use super::{errored, forbidden, parse_spec, AdmissionRequest, AdmissionResponse};
use anyhow::{anyhow, Result};
use events_ingress_controller_core::MeshChecker;
use events_ingress_controller_iplist::IpGetters;
use events_ingress_controller_k8s_api::{eventsource::EventSourceSpec, ResourceExt};
use serde_json::Value;
use std::{collections::BTreeMap, sync::Arc};
use tracing::info;

pub(crate) const KIND: &str = "EventSource";

/// Annotation marking an EventSource as fed by a known webhook source; its
/// value names the provider.
pub(crate) const DEFAULT_KNOWN_SOURCE_ANNOTATION: &str =
    "v1alpha1.events-ingress.io/known-source";

const SIDECAR_INJECT_LABEL: &str = "sidecar.istio.io/inject";

/// Validates and annotates EventSources that opt into managed ingress.
#[derive(Clone)]
pub(crate) struct Handler {
    mesh: Arc<dyn MeshChecker>,
    known_sources: Arc<IpGetters>,
    annotation_key: String,
}

impl Handler {
    pub(crate) fn new(
        mesh: Arc<dyn MeshChecker>,
        known_sources: Arc<IpGetters>,
        annotation_key: impl Into<String>,
    ) -> Self {
        Self {
            mesh,
            known_sources,
            annotation_key: annotation_key.into(),
        }
    }

    pub(crate) async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let (obj, spec) = match parse_spec::<EventSourceSpec>(req) {
            Ok(parsed) => parsed,
            Err(error) => {
                info!(%error, "Failed to parse EventSource");
                return errored(rsp, 400, &error);
            }
        };

        let Some(source) = obj.annotations().get(&self.annotation_key).cloned() else {
            // Unmarked EventSources pass through untouched.
            return rsp;
        };

        let namespace = obj.namespace().unwrap_or_default();
        match self.mesh.on_mesh(&namespace) {
            Ok(true) => {}
            Ok(false) => {
                return rsp.deny(format!(
                    "Namespace {namespace} is not opted into the mesh. \
                     Please contact your cluster administrator and try again"
                ))
            }
            Err(error) => return errored(rsp, 500, &error),
        }

        if !self.known_sources.contains(&source) {
            return forbidden(rsp, format!("Unknown webhook source: {source}"));
        }

        if let Err(error) = validate(&spec) {
            info!(%error, %namespace, "Denied EventSource");
            return rsp.deny(format!("{error:#}"));
        }

        let raw = match serde_json::to_value(&obj) {
            Ok(raw) => raw,
            Err(error) => return errored(rsp, 500, &anyhow::Error::new(error)),
        };
        let mut mutated = raw.clone();
        inject_sidecar_label(&mut mutated);

        let patch = json_patch::diff(&raw, &mutated);
        match rsp.clone().with_patch(patch) {
            Ok(rsp) => rsp,
            Err(error) => errored(rsp, 500, &anyhow::Error::new(error)),
        }
    }
}

/// The spec must expose at least one webhook or github endpoint, and every
/// endpoint must carry its secret. Failures are aggregated.
fn validate(spec: &EventSourceSpec) -> Result<()> {
    let webhooks = spec.webhook.as_ref().map_or(0, BTreeMap::len);
    let githubs = spec.github.as_ref().map_or(0, BTreeMap::len);

    let mut failures = Vec::new();
    if webhooks + githubs == 0 {
        failures.push("at least one webhook or github source must be configured".to_string());
    }
    for (name, webhook) in spec.webhook.iter().flatten() {
        if webhook.auth_secret.is_none() {
            failures.push(format!("webhook {name} must set authSecret"));
        }
    }
    for (name, github) in spec.github.iter().flatten() {
        if github.webhook_secret.is_none() {
            failures.push(format!("github {name} must set webhookSecret"));
        }
    }

    if failures.is_empty() {
        return Ok(());
    }
    Err(anyhow!(failures.join("; ")))
}

/// Sets `spec.template.metadata.labels["sidecar.istio.io/inject"] = "true"`
/// on the raw object, creating intermediate objects as needed.
fn inject_sidecar_label(object: &mut Value) {
    let mut node = object;
    for key in ["spec", "template", "metadata", "labels"] {
        node = ensure_object(node).entry(key).or_insert(Value::Null);
    }
    ensure_object(node).insert(
        SIDECAR_INJECT_LABEL.to_string(),
        Value::String("true".to_string()),
    );
}

fn ensure_object(node: &mut Value) -> &mut serde_json::Map<String, Value> {
    if !node.is_object() {
        *node = Value::Object(Default::default());
    }
    match node {
        Value::Object(map) => map,
        _ => unreachable!("value was just replaced with an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_request;
    use super::*;
    use events_ingress_controller_iplist::AnyGetter;
    use serde_json::json;

    struct FakeMesh {
        on_mesh: bool,
        error: Option<&'static str>,
    }

    impl MeshChecker for FakeMesh {
        fn on_mesh(&self, _namespace: &str) -> Result<bool> {
            match self.error {
                Some(message) => Err(anyhow!(message)),
                None => Ok(self.on_mesh),
            }
        }
    }

    fn handler(on_mesh: bool, error: Option<&'static str>) -> Handler {
        let mut getters = IpGetters::default();
        getters.insert("github", Arc::new(AnyGetter));
        Handler::new(
            Arc::new(FakeMesh { on_mesh, error }),
            Arc::new(getters),
            DEFAULT_KNOWN_SOURCE_ANNOTATION,
        )
    }

    fn github_eventsource(annotations: Value) -> Value {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "EventSource",
            "metadata": {
                "namespace": "tenant",
                "name": "es",
                "annotations": annotations,
            },
            "spec": {
                "github": {
                    "ghs": {
                        "webhook": {"endpoint": "/hook", "port": "12345"},
                        "webhookSecret": {"name": "gh-secret", "key": "secret"},
                    }
                }
            }
        })
    }

    fn apply_patch(mut object: Value, rsp: &AdmissionResponse) -> Value {
        let patch: json_patch::Patch =
            serde_json::from_slice(rsp.patch.as_ref().expect("expected a patch")).unwrap();
        json_patch::patch(&mut object, &patch).unwrap();
        object
    }

    #[tokio::test]
    async fn unannotated_eventsources_are_allowed_without_patches() {
        let object = github_eventsource(json!({}));
        let rsp = handler(true, None)
            .admit(test_request(KIND, object))
            .await;
        assert!(rsp.allowed);
        assert!(rsp.patch.is_none());
    }

    #[tokio::test]
    async fn annotated_eventsources_get_the_sidecar_label() {
        let object = github_eventsource(json!({
            DEFAULT_KNOWN_SOURCE_ANNOTATION: "github",
        }));
        let rsp = handler(true, None)
            .admit(test_request(KIND, object.clone()))
            .await;
        assert!(rsp.allowed);

        let patch: json_patch::Patch =
            serde_json::from_slice(rsp.patch.as_ref().expect("expected a patch")).unwrap();
        assert_eq!(patch.0.len(), 1);

        let mutated = apply_patch(object, &rsp);
        assert_eq!(
            mutated
                .pointer("/spec/template/metadata/labels/sidecar.istio.io~1inject")
                .and_then(Value::as_str),
            Some("true")
        );
    }

    #[tokio::test]
    async fn existing_labels_are_preserved() {
        let mut object = github_eventsource(json!({
            DEFAULT_KNOWN_SOURCE_ANNOTATION: "github",
        }));
        object["spec"]["template"] =
            json!({"metadata": {"labels": {"app": "es"}}, "serviceAccountName": "runner"});

        let rsp = handler(true, None)
            .admit(test_request(KIND, object.clone()))
            .await;
        assert!(rsp.allowed);

        let mutated = apply_patch(object, &rsp);
        assert_eq!(
            mutated
                .pointer("/spec/template/metadata/labels/app")
                .and_then(Value::as_str),
            Some("es")
        );
        assert_eq!(
            mutated
                .pointer("/spec/template/serviceAccountName")
                .and_then(Value::as_str),
            Some("runner")
        );
    }

    #[tokio::test]
    async fn non_mesh_namespaces_are_denied() {
        let object = github_eventsource(json!({
            DEFAULT_KNOWN_SOURCE_ANNOTATION: "github",
        }));
        let rsp = handler(false, None)
            .admit(test_request(KIND, object))
            .await;
        assert!(!rsp.allowed);
        assert!(rsp.result.message.contains("is not opted into the mesh"));
    }

    #[tokio::test]
    async fn mesh_lookup_failures_are_errors_not_denials() {
        let object = github_eventsource(json!({
            DEFAULT_KNOWN_SOURCE_ANNOTATION: "github",
        }));
        let rsp = handler(true, Some("cache not ready"))
            .admit(test_request(KIND, object))
            .await;
        assert!(!rsp.allowed);
        assert_eq!(rsp.result.code, 500);
    }

    #[tokio::test]
    async fn unknown_sources_are_forbidden() {
        let object = github_eventsource(json!({
            DEFAULT_KNOWN_SOURCE_ANNOTATION: "gitlab",
        }));
        let rsp = handler(true, None)
            .admit(test_request(KIND, object))
            .await;
        assert!(!rsp.allowed);
        assert_eq!(rsp.result.reason, "Forbidden");
        assert!(rsp.result.message.contains("Unknown webhook source"));
    }

    #[tokio::test]
    async fn structural_failures_are_aggregated() {
        let object = json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "EventSource",
            "metadata": {
                "namespace": "tenant",
                "name": "es",
                "annotations": {DEFAULT_KNOWN_SOURCE_ANNOTATION: "github"},
            },
            "spec": {
                "webhook": {"wh": {"endpoint": "/wh", "port": "80"}},
                "github": {"ghs": {"webhook": {"endpoint": "/hook", "port": "12345"}}},
            }
        });
        let rsp = handler(true, None)
            .admit(test_request(KIND, object))
            .await;
        assert!(!rsp.allowed);
        assert!(rsp.result.message.contains("webhook wh must set authSecret"));
        assert!(rsp
            .result
            .message
            .contains("github ghs must set webhookSecret"));
    }

    #[tokio::test]
    async fn specs_without_sources_are_denied() {
        let object = json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "EventSource",
            "metadata": {
                "namespace": "tenant",
                "name": "es",
                "annotations": {DEFAULT_KNOWN_SOURCE_ANNOTATION: "github"},
            },
            "spec": {}
        });
        let rsp = handler(true, None)
            .admit(test_request(KIND, object))
            .await;
        assert!(!rsp.allowed);
        assert!(rsp
            .result
            .message
            .contains("at least one webhook or github source"));
    }
}
