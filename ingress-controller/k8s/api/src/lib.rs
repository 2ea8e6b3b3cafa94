#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod eventsource;
pub mod istio;
pub mod sensor;

pub use self::{eventsource::EventSource, sensor::Sensor};
pub use k8s_openapi::api::core::v1::{
    Namespace, SecretKeySelector, Service, ServicePort, ServiceSpec,
};
pub use kube::{
    api::{Api, DeleteParams, ListParams, ObjectMeta, Patch, PatchParams, Resource, ResourceExt},
    core::DynamicObject,
    Client, Error,
};
