#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod eventsource;
mod namespace;
mod service;

pub use self::{
    eventsource::{EventSourceIndex, SharedEventSourceIndex},
    namespace::{NamespaceIndex, NamespaceInfo, SharedNamespaceIndex},
    service::{ServiceIndex, ServiceMeta, SharedServiceIndex},
};
