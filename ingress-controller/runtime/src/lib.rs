#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub use events_ingress_controller_core as core;
pub use events_ingress_controller_ingress as ingress;
pub use events_ingress_controller_iplist as iplist;
pub use events_ingress_controller_k8s_api as k8s;
pub use events_ingress_controller_k8s_index as index;

mod admission;
mod args;
mod controller;
mod metrics;

pub use self::args::Args;
