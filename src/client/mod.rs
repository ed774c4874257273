use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::endpoints::{Endpoint, EndpointSet};
use crate::error::{DataAccessError, Result};
use crate::metrics::AppMetrics;

pub mod transport;

pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError};

/// Gateway/service/timeout statuses that trigger failover by default.
pub const DEFAULT_RETRYABLE_STATUSES: [StatusCode; 3] = [
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Caller-supplied request options. Copied afresh for every attempt.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub signal: Option<CancellationToken>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            signal: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    /// A `POST` carrying `payload` as a JSON body.
    pub fn post_json<T: Serialize + ?Sized>(payload: &T) -> serde_json::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            method: Method::POST,
            headers,
            body: Some(serde_json::to_vec(payload)?),
            signal: None,
        })
    }

    pub fn with_signal(mut self, signal: CancellationToken) -> Self {
        self.signal = Some(signal);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.signal.as_ref().is_some_and(CancellationToken::is_cancelled)
    }

    fn to_request(&self, url: String) -> HttpRequest {
        HttpRequest {
            method: self.method.clone(),
            url,
            headers: self.headers.clone(),
            body: self.body.clone(),
        }
    }
}

/// Result of one attempt against one endpoint.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(HttpResponse),
    Retryable(String),
    Fatal(DataAccessError),
    Cancelled,
}

impl FetchOutcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::Retryable(_) => "retryable",
            Self::Fatal(_) => "fatal",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Map the raw transport result of one attempt to a [`FetchOutcome`].
///
/// Any response outside `retryable` counts as success, whatever its status;
/// interpreting it is the caller's job.
pub fn classify(
    url: &str,
    result: std::result::Result<HttpResponse, TransportError>,
    retryable: &[StatusCode],
) -> FetchOutcome {
    match result {
        Ok(response) if retryable.contains(&response.status) => {
            FetchOutcome::Retryable(format!("HTTP {} from {url}", response.status.as_u16()))
        }
        Ok(response) => FetchOutcome::Success(response),
        Err(TransportError::Aborted) => FetchOutcome::Cancelled,
        Err(TransportError::Network(message)) => FetchOutcome::Retryable(format!("{url}: {message}")),
        Err(TransportError::InvalidRequest(message)) => {
            FetchOutcome::Fatal(DataAccessError::InvalidRequest(format!("{url}: {message}")))
        }
    }
}

/// Join a base and a path with exactly one slash between them.
pub fn build_url(base: &Endpoint, path: &str) -> String {
    format!("{}/{}", base.as_str(), path.trim_start_matches('/'))
}

/// Issues logical requests against an [`EndpointSet`], failing over between
/// endpoints and remembering the last one that answered.
pub struct FailoverClient {
    endpoints: EndpointSet,
    transport: Arc<dyn Transport>,
    retryable: Vec<StatusCode>,
    /// Index + 1 of the sticky endpoint; 0 when nothing has succeeded yet.
    sticky: AtomicUsize,
    metrics: Option<AppMetrics>,
}

impl FailoverClient {
    pub fn new(endpoints: EndpointSet, transport: Arc<dyn Transport>) -> Self {
        Self {
            endpoints,
            transport,
            retryable: DEFAULT_RETRYABLE_STATUSES.to_vec(),
            sticky: AtomicUsize::new(0),
            metrics: None,
        }
    }

    pub fn with_retryable_statuses(mut self, statuses: Vec<StatusCode>) -> Self {
        self.retryable = statuses;
        self
    }

    pub fn with_metrics(mut self, metrics: AppMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    pub fn sticky_endpoint(&self) -> Option<&Endpoint> {
        match self.sticky.load(Ordering::Relaxed) {
            0 => None,
            slot => self.endpoints.get(slot - 1),
        }
    }

    /// The endpoint the next request will try first.
    pub fn active_endpoint(&self) -> &Endpoint {
        self.sticky_endpoint()
            .unwrap_or_else(|| self.endpoints.primary())
    }

    /// Sticky endpoint first, then the rest in configured order.
    pub fn attempt_order(&self) -> Vec<usize> {
        let sticky = match self.sticky.load(Ordering::Relaxed) {
            0 => None,
            slot if slot <= self.endpoints.len() => Some(slot - 1),
            _ => None,
        };
        let mut order = Vec::with_capacity(self.endpoints.len());
        order.extend(sticky);
        order.extend((0..self.endpoints.len()).filter(|idx| Some(*idx) != sticky));
        order
    }

    #[instrument(skip(self, options), fields(method = %options.method))]
    pub async fn issue(&self, path: &str, options: &RequestOptions) -> Result<HttpResponse> {
        let mut diagnostics = Vec::new();

        for idx in self.attempt_order() {
            let Some(endpoint) = self.endpoints.get(idx) else {
                continue;
            };
            if options.is_cancelled() {
                return Err(self.fail(DataAccessError::Cancelled));
            }

            let url = build_url(endpoint, path);
            debug!(endpoint = %endpoint, %url, "attempting request");

            let started = Instant::now();
            let outcome = self.attempt(url.clone(), options).await;
            self.observe(endpoint, &outcome, started);

            match outcome {
                FetchOutcome::Success(response) => {
                    self.remember(idx, endpoint);
                    return Ok(response);
                }
                FetchOutcome::Retryable(reason) => {
                    warn!(endpoint = %endpoint, %reason, "endpoint failed; trying next");
                    diagnostics.push(reason);
                }
                FetchOutcome::Fatal(err) => return Err(self.fail(err)),
                FetchOutcome::Cancelled => {
                    info!(endpoint = %endpoint, "request cancelled by caller");
                    return Err(self.fail(DataAccessError::Cancelled));
                }
            }
        }

        error!(attempts = diagnostics.len(), "all API endpoints failed");
        Err(self.fail(DataAccessError::AllEndpointsFailed(diagnostics)))
    }

    async fn attempt(&self, url: String, options: &RequestOptions) -> FetchOutcome {
        let request = options.to_request(url.clone());
        let result = match &options.signal {
            Some(signal) => {
                tokio::select! {
                    biased;
                    _ = signal.cancelled() => return FetchOutcome::Cancelled,
                    result = self.transport.send(request) => result,
                }
            }
            None => self.transport.send(request).await,
        };
        classify(&url, result, &self.retryable)
    }

    fn remember(&self, idx: usize, endpoint: &Endpoint) {
        let previous = self.sticky.swap(idx + 1, Ordering::Relaxed);
        if previous != idx + 1 {
            info!(endpoint = %endpoint, "switched active API endpoint");
            if let Some(metrics) = &self.metrics {
                let all: Vec<&str> = self.endpoints.iter().map(Endpoint::as_str).collect();
                metrics.set_sticky(endpoint.as_str(), &all);
            }
        }
    }

    fn observe(&self, endpoint: &Endpoint, outcome: &FetchOutcome, started: Instant) {
        if let Some(metrics) = &self.metrics {
            metrics.record_attempt(endpoint.as_str(), outcome.label(), started.elapsed());
        }
    }

    fn fail(&self, err: DataAccessError) -> DataAccessError {
        if let Some(metrics) = &self.metrics {
            metrics.inc_request_failure(err.kind());
        }
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoints::{PageContext, resolve};

    fn endpoint(base: &str) -> Endpoint {
        let set = resolve([Some(base)], &PageContext::detached()).unwrap();
        set.primary().clone()
    }

    #[test]
    fn build_url_normalizes_slashes() {
        let base = endpoint("https://a.test/api/");
        assert_eq!(build_url(&base, "locations"), "https://a.test/api/locations");
        assert_eq!(build_url(&base, "/locations"), "https://a.test/api/locations");
        assert_eq!(build_url(&base, "//locations/7"), "https://a.test/api/locations/7");
    }

    #[test]
    fn classify_treats_client_errors_as_success() {
        let outcome = classify(
            "https://a.test/x",
            Ok(HttpResponse::new("https://a.test/x", StatusCode::NOT_FOUND, "")),
            &DEFAULT_RETRYABLE_STATUSES,
        );
        assert!(matches!(outcome, FetchOutcome::Success(r) if r.status == StatusCode::NOT_FOUND));
    }

    #[test]
    fn classify_gateway_statuses_are_retryable() {
        for status in DEFAULT_RETRYABLE_STATUSES {
            let outcome = classify(
                "https://a.test/x",
                Ok(HttpResponse::new("https://a.test/x", status, "")),
                &DEFAULT_RETRYABLE_STATUSES,
            );
            match outcome {
                FetchOutcome::Retryable(reason) => {
                    assert_eq!(reason, format!("HTTP {} from https://a.test/x", status.as_u16()))
                }
                other => panic!("expected retryable, got {other:?}"),
            }
        }
    }

    #[test]
    fn classify_transport_errors() {
        let network = classify(
            "https://a.test/x",
            Err(TransportError::Network("connection refused".into())),
            &DEFAULT_RETRYABLE_STATUSES,
        );
        assert!(
            matches!(network, FetchOutcome::Retryable(reason) if reason == "https://a.test/x: connection refused")
        );

        let aborted = classify("u", Err(TransportError::Aborted), &DEFAULT_RETRYABLE_STATUSES);
        assert!(matches!(aborted, FetchOutcome::Cancelled));

        let invalid = classify(
            "u",
            Err(TransportError::InvalidRequest("bad header".into())),
            &DEFAULT_RETRYABLE_STATUSES,
        );
        assert!(matches!(
            invalid,
            FetchOutcome::Fatal(DataAccessError::InvalidRequest(_))
        ));
    }
}
