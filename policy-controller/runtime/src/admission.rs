use crate::{
    core::{PolicyConfig, Violation, WorkloadSpec, DENIED_STATUS_REASON},
    k8s::{self, JobSpec},
    metrics::AdmissionMetrics,
    route::{self, Bypass, Route},
};
use anyhow::{anyhow, bail, Result};
use bytes::Bytes;
use futures::future;
use http_body_util::BodyExt;
use hyper::{http, Request, Response};
use kube::core::{admission::ConvertAdmissionReviewError, DynamicObject};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, trace, warn};


/// Validates Job admission reviews against the sandbox policy.
#[derive(Clone)]
pub struct Admission {
    config: Arc<PolicyConfig>,
    decode_failure: DecodeFailure,
    metrics: AdmissionMetrics,
}

/// Determines how a Job whose spec cannot be decoded is handled.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum DecodeFailure {
    /// Admit the Job without evaluating it.
    #[default]
    Allow,

    /// Deny the Job.
    Deny,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("failed to read request body: {0}")]
    Request(#[from] hyper::Error),

    #[error("request body is empty")]
    EmptyBody,

    #[error("failed to parse admission review: {0}")]
    Review(#[source] serde_json::Error),

    #[error("invalid admission review: {0}")]
    Invalid(#[from] ConvertAdmissionReviewError),

    #[error("failed to encode json response: {0}")]
    Json(#[source] serde_json::Error),
}

type AdmissionRequest = kube::core::admission::AdmissionRequest<DynamicObject>;
type AdmissionResponse = kube::core::admission::AdmissionResponse;
type AdmissionReview = kube::core::admission::AdmissionReview<DynamicObject>;

type Body = http_body_util::Full<Bytes>;

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
        if req.method() != http::Method::POST {
            return Box::pin(future::ok(
                Response::builder()
                    .status(http::StatusCode::METHOD_NOT_ALLOWED)
                    .header(http::header::ALLOW, "POST")
                    .body(Body::default())
                    .expect("method not allowed response must be valid"),
            ));
        }

        let admission = self.clone();
        Box::pin(async move {
            let bytes = req.into_body().collect().await?.to_bytes();
            Ok(admission.handle(&bytes))
        })
    }
}

impl Admission {
    pub fn new(
        config: PolicyConfig,
        decode_failure: DecodeFailure,
        metrics: AdmissionMetrics,
    ) -> Self {
        Self {
            config: Arc::new(config),
            decode_failure,
            metrics,
        }
    }

    /// Produces the HTTP response for a request body.
    fn handle(&self, body: &[u8]) -> Response<Body> {
        match self.review(body).and_then(json_response) {
            Ok(rsp) => rsp,
            Err(error) => {
                let status = error.status();
                if status.is_client_error() {
                    warn!(%error, "Rejected admission request");
                    self.metrics.invalid();
                } else {
                    error!(%error, "Failed to respond to admission request");
                }
                Response::builder()
                    .status(status)
                    .header(http::header::CONTENT_TYPE, "text/plain")
                    .body(Body::from(error.to_string()))
                    .expect("error response must be valid")
            }
        }
    }

    fn review(&self, body: &[u8]) -> Result<AdmissionReview, Error> {
        if body.is_empty() {
            return Err(Error::EmptyBody);
        }

        let review: AdmissionReview = serde_json::from_slice(body).map_err(Error::Review)?;
        trace!(?review);

        let req: AdmissionRequest = review.try_into()?;
        debug!(?req);

        let rsp = self.admit(req);
        debug!(?rsp);
        Ok(rsp.into_review())
    }

    fn admit(&self, req: AdmissionRequest) -> AdmissionResponse {
        let rsp = AdmissionResponse::from(&req);

        let kind = req.request_kind.as_ref().unwrap_or(&req.kind);
        match route::classify(
            &kind.group,
            &kind.kind,
            &req.operation,
            req.namespace.as_deref(),
        ) {
            Route::Evaluate => {}
            Route::Bypass(Bypass::KubeSystem) => {
                warn!(
                    name = %req.name,
                    kind = %kind.kind,
                    operation = ?req.operation,
                    "Admitting kube-system resource without evaluation"
                );
                self.metrics.bypassed();
                return rsp;
            }
            Route::Bypass(Bypass::OutOfScope) => {
                debug!(
                    group = %kind.group,
                    kind = %kind.kind,
                    operation = ?req.operation,
                    "Not a Job creation; admitting without evaluation"
                );
                self.metrics.bypassed();
                return rsp;
            }
        }

        let ns = req.namespace.clone().unwrap_or_default();
        let workload = match parse_job(req) {
            Ok(workload) => workload,
            Err(error) => {
                let error = format!("{error:#}");
                self.metrics.decode_error();
                return match self.decode_failure {
                    DecodeFailure::Allow => {
                        info!(%ns, %error, "Admitting Job that could not be decoded");
                        rsp
                    }
                    DecodeFailure::Deny => {
                        info!(%ns, %error, "Denying Job that could not be decoded");
                        deny(rsp, format!("failed to decode Job: {error}"))
                    }
                };
            }
        };

        let name = workload.display_name();
        match self.config.evaluate(&workload).into_violation() {
            None => {
                debug!(%ns, %name, "Allowed");
                self.metrics.allowed();
                rsp
            }
            Some(Violation { rule, reason }) => {
                info!(%ns, %name, %rule, %reason, "Denied");
                self.metrics.denied(rule);
                deny(rsp, reason)
            }
        }
    }
}

// === impl DecodeFailure ===

impl std::str::FromStr for DecodeFailure {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "allow" => Ok(Self::Allow),
            "deny" => Ok(Self::Deny),
            s => bail!("invalid decode failure mode {s:?}: expected 'allow' or 'deny'"),
        }
    }
}

// === impl Error ===

impl Error {
    fn status(&self) -> http::StatusCode {
        match self {
            Self::Request(_) | Self::EmptyBody | Self::Review(_) | Self::Invalid(_) => {
                http::StatusCode::BAD_REQUEST
            }
            Self::Json(_) => http::StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn deny(rsp: AdmissionResponse, reason: impl ToString) -> AdmissionResponse {
    let mut rsp = rsp.deny(reason);
    rsp.result.reason = DENIED_STATUS_REASON.to_string();
    rsp
}

fn json_response(rsp: AdmissionReview) -> Result<Response<Body>, Error> {
    let bytes = serde_json::to_vec(&rsp).map_err(Error::Json)?;
    Ok(Response::builder()
        .status(http::StatusCode::OK)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(Body::from(bytes))
        .expect("admission review response must be valid"))
}

/// Decodes the Job carried by an admission request.
///
/// The Job's name falls back to the request's name when the object has none.
fn parse_job(req: AdmissionRequest) -> Result<WorkloadSpec> {
    let obj = req
        .object
        .ok_or_else(|| anyhow!("admission request missing 'object'"))?;

    let spec = {
        let data = obj
            .data
            .get("spec")
            .cloned()
            .ok_or_else(|| anyhow!("admission request missing 'spec'"))?;
        serde_json::from_value::<JobSpec>(data)?
    };

    let name = obj
        .metadata
        .name
        .or_else(|| Some(req.name).filter(|name| !name.is_empty()));
    Ok(k8s::workload::decode(name, spec)?)
}
