use k8s_openapi::api::core::v1::SecretKeySelector;
use std::collections::BTreeMap;

/// The subset of the argoproj.io EventSource spec this controller reads.
///
/// Unknown fields are ignored on decode and never written back; admission
/// mutations are applied to the raw object, not to this projection.
#[derive(
    Clone, Debug, Default, kube::CustomResource, serde::Deserialize, serde::Serialize,
    schemars::JsonSchema,
)]
#[kube(
    group = "argoproj.io",
    version = "v1alpha1",
    kind = "EventSource",
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct EventSourceSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<Template>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<BTreeMap<String, WebhookEventSource>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github: Option<BTreeMap<String, GithubEventSource>>,
}

/// Pod template metadata applied to the event-source deployment.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

/// A generic incoming-webhook endpoint.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEventSource {
    /// URL path the webhook is served on.
    #[serde(default)]
    pub endpoint: String,

    /// Container port, as a decimal string.
    #[serde(default)]
    pub port: String,

    /// Secret holding the token callers must present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_secret: Option<SecretKeySelector>,
}

/// A GitHub webhook endpoint.
#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct GithubEventSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookContext>,

    /// Secret shared with GitHub for payload signing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_secret: Option<SecretKeySelector>,
}

#[derive(
    Clone, Debug, Default, PartialEq, serde::Deserialize, serde::Serialize, schemars::JsonSchema,
)]
#[serde(rename_all = "camelCase")]
pub struct WebhookContext {
    #[serde(default)]
    pub endpoint: String,

    #[serde(default)]
    pub port: String,
}
