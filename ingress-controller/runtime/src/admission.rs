pub(crate) mod eventsource;
pub(crate) mod sensor;

use crate::metrics::Metrics;
use anyhow::{anyhow, Result};
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Clone)]
pub(crate) struct Admission {
    eventsource: eventsource::Handler,
    sensor: sensor::Handler,
    metrics: Metrics,
}

#[derive(Debug, Error)]
pub(crate) enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("failed to encode json response: {0}")]
    Json(#[from] serde_json::Error),
}

type Review = kube::core::admission::AdmissionReview<DynamicObject>;
type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<bytes::Bytes>;

// === impl Admission ===

impl tower::Service<Request<hyper::body::Incoming>> for Admission {
    type Response = Response<Body>;
    type Error = Error;
    type Future = future::BoxFuture<'static, Result<Response<Body>, Error>>;

    fn poll_ready(
        &mut self,
        _cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::result::Result<(), Self::Error>> {
        std::task::Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<hyper::body::Incoming>) -> Self::Future {
        trace!(?req);
        if req.method() != http::Method::POST || req.uri().path() != "/" {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::NOT_FOUND)
                    .body(Body::default())
                    .expect("not found response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            use bytes::Buf;
            let bytes = req.into_body().collect().await?.to_bytes();
            let review: Review = match serde_json::from_reader(bytes.reader()) {
                Ok(review) => review,
                Err(error) => {
                    warn!(%error, "Failed to parse request body");
                    return json_response(AdmissionResponse::invalid(error).into_review());
                }
            };
            trace!(?review);

            let rsp = match review.try_into() {
                Ok(req) => {
                    debug!(?req);
                    admission.admit(req).await
                }
                Err(error) => {
                    warn!(%error, "Invalid admission request");
                    AdmissionResponse::invalid(error)
                }
            };
            debug!(?rsp);
            json_response(rsp.into_review())
        })
    }
}

impl Admission {
    pub(crate) fn new(
        eventsource: eventsource::Handler,
        sensor: sensor::Handler,
        metrics: Metrics,
    ) -> Self {
        Self {
            eventsource,
            sensor,
            metrics,
        }
    }

    async fn admit(self, req: AdmissionRequest) -> AdmissionResponse {
        let kind = req.request_kind.as_ref().unwrap_or(&req.kind).kind.clone();
        let rsp = match kind.as_str() {
            eventsource::KIND => self.eventsource.admit(req).await,
            sensor::KIND => self.sensor.admit(req).await,
            _ => AdmissionResponse::from(&req)
                .deny(format!("Kind {kind} not supported by controller")),
        };
        self.metrics.observe_admission(&kind, rsp.allowed);
        rsp
    }
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

fn parse_spec<T: DeserializeOwned>(req: AdmissionRequest) -> Result<(DynamicObject, T)> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value(data)?
    };

    Ok((obj, spec))
}

/// An in-band error result carrying an HTTP-class code, mirroring the API
/// server's code-bearing admission failures.
fn errored(rsp: AdmissionResponse, code: u16, error: &anyhow::Error) -> AdmissionResponse {
    let mut rsp = rsp.deny(format!("{error:#}"));
    rsp.result.code = code;
    rsp
}

fn forbidden(rsp: AdmissionResponse, message: impl ToString) -> AdmissionResponse {
    let mut rsp = rsp.deny(message.to_string());
    rsp.result.reason = "Forbidden".to_string();
    rsp.result.code = 403;
    rsp
}

#[cfg(test)]
pub(crate) fn test_request(kind: &str, object: serde_json::Value) -> AdmissionRequest {
    let review: Review = serde_json::from_value(serde_json::json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "test-request",
            "kind": {"group": "argoproj.io", "version": "v1alpha1", "kind": kind},
            "resource": {"group": "argoproj.io", "version": "v1alpha1", "resource": format!("{}s", kind.to_lowercase())},
            "operation": "CREATE",
            "userInfo": {},
            "namespace": object
                .pointer("/metadata/namespace")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default(),
            "object": object,
        }
    }))
    .expect("review fixture must parse");
    review.try_into().expect("review fixture must convert")
}
