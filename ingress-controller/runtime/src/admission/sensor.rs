use super::{errored, parse_spec, AdmissionRequest, AdmissionResponse};
use events_ingress_controller_core::{RateLimitCalculator, RateLimitGetter};
use events_ingress_controller_k8s_api::{sensor::SensorSpec, ResourceExt};
use std::sync::Arc;
use tracing::info;

pub(crate) const KIND: &str = "Sensor";

/// Clamps each Kubernetes trigger's rate limit to the namespace quota.
#[derive(Clone)]
pub(crate) struct Handler {
    rate_limits: Arc<dyn RateLimitGetter>,
    calculator: RateLimitCalculator,
}

impl Handler {
    pub(crate) fn new(
        rate_limits: Arc<dyn RateLimitGetter>,
        calculator: RateLimitCalculator,
    ) -> Self {
        Self {
            rate_limits,
            calculator,
        }
    }

    pub(crate) async fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let (obj, spec) = match parse_spec::<SensorSpec>(req) {
            Ok(parsed) => parsed,
            Err(error) => {
                info!(%error, "Failed to parse Sensor");
                return errored(rsp, 400, &error);
            }
        };

        let namespace = obj.namespace().unwrap_or_default();
        let namespace_limit = match self.rate_limits.rate_limit(&namespace) {
            Ok(limit) => limit,
            Err(error) => return errored(rsp, 400, &error),
        };

        let raw = match serde_json::to_value(&obj) {
            Ok(raw) => raw,
            Err(error) => return errored(rsp, 500, &anyhow::Error::new(error)),
        };
        let mut mutated = raw.clone();

        for (index, trigger) in spec.triggers.iter().enumerate() {
            // Only triggers with a Kubernetes target are clamped.
            if trigger
                .template
                .as_ref()
                .and_then(|template| template.k8s.as_ref())
                .is_none()
            {
                continue;
            }

            let limit = self.calculator.calculate(namespace_limit, trigger.rate_limit);
            mutated["spec"]["triggers"][index]["rateLimit"] = serde_json::json!({
                "unit": limit.unit,
                "requestsPerUnit": limit.requests_per_unit,
            });
        }

        let patch = json_patch::diff(&raw, &mutated);
        match rsp.clone().with_patch(patch) {
            Ok(rsp) => rsp,
            Err(error) => errored(rsp, 500, &anyhow::Error::new(error)),
        }
    }
}
