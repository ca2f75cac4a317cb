use std::{fmt, sync::Arc, time::Duration};

use rama::{
    Service,
    error::OpaqueError,
    http::{
        Body, BodyExtractExt as _, HeaderValue, Method, Request, Response, StatusCode, Uri,
        Version,
        header::{CONNECTION, CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING},
    },
    telemetry::tracing,
};
use tokio::time::Instant;

use super::counters::Counters;
use crate::{metrics::Batch, statsd::TimingSink};

/// Payloads above this size are most likely rejected by the ingestion endpoint.
pub const MAX_PAYLOAD_SIZE: usize = 1_048_576;

/// Name of the timing sample emitted per completed request.
pub const REQUEST_TIME_METRIC: &str = "request_time";

/// Successful delivery of one batch.
#[derive(Debug, Clone, Copy)]
pub struct DispatchOutcome {
    pub latency: Duration,
    pub payload_size: usize,
}

/// Failure to deliver a batch.
///
/// All variants are fatal for a benchmark run,
/// none of them are retried.
#[derive(Debug)]
pub enum DispatchError {
    /// batch could not be encoded as json
    Serialize(serde_json::Error),
    /// no (valid) response received, e.g. connection refused or reset
    Transport(OpaqueError),
    /// response received with a status code other than 200
    Protocol { status: StatusCode, body: String },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Serialize(err) => write!(f, "DispatchError: serialize batch: {err}"),
            DispatchError::Transport(err) => write!(f, "DispatchError: transport: {err}"),
            DispatchError::Protocol { status, body } => {
                write!(f, "DispatchError: unexpected status {status}: {body}")
            }
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Serialize(err) => Some(err),
            DispatchError::Transport(_) | DispatchError::Protocol { .. } => None,
        }
    }
}

/// Sends batches to the ingestion endpoint and keeps the run counters.
pub struct Dispatcher<S> {
    client: S,
    uri: Uri,
    chunked: bool,
    counters: Arc<Counters>,
    telemetry: Option<Arc<dyn TimingSink>>,
}

impl<S: fmt::Debug> fmt::Debug for Dispatcher<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("client", &self.client)
            .field("uri", &self.uri)
            .field("chunked", &self.chunked)
            .field("counters", &self.counters)
            .field("telemetry", &self.telemetry.is_some())
            .finish()
    }
}

impl<S> Dispatcher<S>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
{
    pub fn new(client: S, uri: Uri, counters: Arc<Counters>) -> Self {
        Self {
            client,
            uri,
            chunked: false,
            counters,
            telemetry: None,
        }
    }

    /// Send bodies with chunked transfer encoding instead of a Content-Length.
    pub fn with_chunked(mut self, chunked: bool) -> Self {
        self.chunked = chunked;
        self
    }

    /// Emit a timing sample for every completed request.
    pub fn with_telemetry(mut self, sink: Arc<dyn TimingSink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Send one batch and wait for its response.
    pub async fn dispatch(&self, batch: &Batch) -> Result<DispatchOutcome, DispatchError> {
        let payload = batch.to_json().map_err(DispatchError::Serialize)?;
        let payload_size = payload.len();

        if payload_size > MAX_PAYLOAD_SIZE {
            tracing::warn!(
                prefix = batch.prefix(),
                index = batch.index(),
                points = batch.points().len(),
                %payload_size,
                "payload exceeds maximum size of {MAX_PAYLOAD_SIZE} bytes: ingestion endpoint is likely to reject it",
            );
        }

        let req = self.new_request(payload)?;

        let start = Instant::now();
        self.counters.record_issued();
        let result = self.client.serve(req).await;
        let latency = start.elapsed();

        let resp = match result {
            Ok(resp) => resp,
            Err(err) => {
                tracing::error!(
                    prefix = batch.prefix(),
                    index = batch.index(),
                    uri = %self.uri,
                    "failed to send batch: {err}",
                );
                return Err(DispatchError::Transport(err));
            }
        };

        if let Some(sink) = self.telemetry.as_deref() {
            sink.timing(REQUEST_TIME_METRIC, latency);
        }

        let status = resp.status();
        if status != StatusCode::OK {
            let body = match resp.try_into_string().await {
                Ok(body) => body,
                Err(err) => format!("<failed to read response body: {err}>"),
            };
            tracing::error!(
                prefix = batch.prefix(),
                index = batch.index(),
                %status,
                "unexpected response status; error response: {body}",
            );
            return Err(DispatchError::Protocol { status, body });
        }

        self.counters.record_success();

        // consume the body so the connection can go back into the pool
        if let Err(err) = resp.try_into_string().await {
            tracing::debug!("failed to drain response body: {err}");
        }

        Ok(DispatchOutcome {
            latency,
            payload_size,
        })
    }

    fn new_request(&self, payload: Vec<u8>) -> Result<Request, DispatchError> {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(self.uri.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(CONNECTION, HeaderValue::from_static("keep-alive"));

        // chunked framing only exists in HTTP/1.1, pin the version
        // so the connection is never negotiated to h2
        builder = if self.chunked {
            builder
                .version(Version::HTTP_11)
                .header(TRANSFER_ENCODING, HeaderValue::from_static("chunked"))
        } else {
            builder.header(CONTENT_LENGTH, HeaderValue::from(payload.len()))
        };

        builder
            .body(Body::from(payload))
            .map_err(|err| DispatchError::Transport(OpaqueError::from_std(err)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use parking_lot::Mutex;
    use rama::{
        error::ErrorContext as _,
        http::{header::HeaderName, service::web::response::IntoResponse as _},
        service::service_fn,
        telemetry::tracing,
    };
    use rand::{SeedableRng as _, rngs::SmallRng};
    use tracing_test::traced_test;

    use crate::{bench::counters::CounterSnapshot, metrics::BatchBuilder};

    #[derive(Debug, Default)]
    struct RecordingSink(Mutex<Vec<(String, Duration)>>);

    impl TimingSink for RecordingSink {
        fn timing(&self, name: &str, value: Duration) {
            self.0.lock().push((name.to_owned(), value));
        }
    }

    #[derive(Debug, Clone)]
    struct SeenRequest {
        method: Method,
        version: Version,
        uri: String,
        content_type: Option<String>,
        content_length: Option<String>,
        transfer_encoding: Option<String>,
        body: String,
    }

    fn header(req: &Request, name: HeaderName) -> Option<String> {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(ToOwned::to_owned)
    }

    fn mock_client(
        status: StatusCode,
        seen: Arc<Mutex<Vec<SeenRequest>>>,
    ) -> impl Service<Request, Output = Response, Error = OpaqueError> {
        service_fn(move |req: Request| {
            let seen = seen.clone();
            async move {
                let method = req.method().clone();
                let version = req.version();
                let uri = req.uri().to_string();
                let content_type = header(&req, CONTENT_TYPE);
                let content_length = header(&req, CONTENT_LENGTH);
                let transfer_encoding = header(&req, TRANSFER_ENCODING);
                let body = req
                    .try_into_string()
                    .await
                    .context("read mock request body")?;
                seen.lock().push(SeenRequest {
                    method,
                    version,
                    uri,
                    content_type,
                    content_length,
                    transfer_encoding,
                    body,
                });
                Ok::<_, OpaqueError>((status, "mock response").into_response())
            }
        })
    }

    fn test_uri() -> Uri {
        Uri::from_static("http://127.0.0.1:19000/v1.0/123456/experimental/metrics")
    }

    fn test_batch(n: usize) -> Batch {
        BatchBuilder::new(n).build(0, 0, 1_000, &mut SmallRng::seed_from_u64(1))
    }

    #[tokio::test]
    async fn ok_response_counts_success_and_emits_timing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::new());
        let sink = Arc::new(RecordingSink::default());

        let dispatcher = Dispatcher::new(
            mock_client(StatusCode::OK, seen.clone()),
            test_uri(),
            counters.clone(),
        )
        .with_telemetry(sink.clone());

        let batch = test_batch(3);
        let outcome = dispatcher.dispatch(&batch).await.unwrap();

        let expected_body = String::from_utf8(batch.to_json().unwrap()).unwrap();
        assert_eq!(outcome.payload_size, expected_body.len());
        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                requests_issued: 1,
                successes: 1,
            }
        );

        let timings = sink.0.lock();
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].0, REQUEST_TIME_METRIC);

        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let req = &seen[0];
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.uri, test_uri().to_string());
        assert_eq!(req.content_type.as_deref(), Some("application/json"));
        assert_eq!(
            req.content_length.as_deref(),
            Some(expected_body.len().to_string().as_str())
        );
        assert_eq!(req.transfer_encoding, None);
        assert_eq!(req.body, expected_body);
    }

    #[tokio::test]
    async fn chunked_mode_uses_http_1_1_framing() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let dispatcher = Dispatcher::new(
            mock_client(StatusCode::OK, seen.clone()),
            test_uri(),
            Arc::new(Counters::new()),
        )
        .with_chunked(true);

        dispatcher.dispatch(&test_batch(1)).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen[0].content_length, None);
        assert_eq!(seen[0].transfer_encoding.as_deref(), Some("chunked"));
        assert_eq!(seen[0].version, Version::HTTP_11);
    }

    #[tokio::test]
    async fn non_200_status_is_a_protocol_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::new());
        let sink = Arc::new(RecordingSink::default());
        let dispatcher = Dispatcher::new(
            mock_client(StatusCode::INTERNAL_SERVER_ERROR, seen),
            test_uri(),
            counters.clone(),
        )
        .with_telemetry(sink.clone());

        let err = dispatcher.dispatch(&test_batch(1)).await.unwrap_err();
        match err {
            DispatchError::Protocol { status, body } => {
                assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
                assert_eq!(body, "mock response");
            }
            other => panic!("unexpected error: {other}"),
        }

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                requests_issued: 1,
                successes: 0,
            }
        );
        // a response was received, so its timing is still reported
        assert_eq!(sink.0.lock().len(), 1);
    }

    #[tokio::test]
    async fn other_2xx_status_is_not_a_success() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::new());
        let dispatcher = Dispatcher::new(
            mock_client(StatusCode::ACCEPTED, seen),
            test_uri(),
            counters.clone(),
        );

        assert!(matches!(
            dispatcher.dispatch(&test_batch(1)).await,
            Err(DispatchError::Protocol { status: StatusCode::ACCEPTED, .. })
        ));
        assert_eq!(counters.snapshot().successes, 0);
    }

    #[tokio::test]
    async fn transport_failure_is_fatal_and_counted_as_issued() {
        let counters = Arc::new(Counters::new());
        let sink = Arc::new(RecordingSink::default());
        let client = service_fn(async |_req: Request| {
            Err::<Response, _>(OpaqueError::from_display("connection refused"))
        });
        let dispatcher =
            Dispatcher::new(client, test_uri(), counters.clone()).with_telemetry(sink.clone());

        let err = dispatcher.dispatch(&test_batch(1)).await.unwrap_err();
        assert!(matches!(err, DispatchError::Transport(_)));
        assert!(err.to_string().contains("connection refused"));

        assert_eq!(
            counters.snapshot(),
            CounterSnapshot {
                requests_issued: 1,
                successes: 0,
            }
        );
        assert!(sink.0.lock().is_empty());
    }

    #[traced_test]
    #[tokio::test]
    async fn oversized_payload_is_sent_with_a_warning() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let counters = Arc::new(Counters::new());
        let dispatcher = Dispatcher::new(
            mock_client(StatusCode::OK, seen.clone()),
            test_uri(),
            counters.clone(),
        );

        // each point serializes to well over 100 bytes
        let batch = test_batch(12_000);
        assert!(batch.to_json().unwrap().len() > MAX_PAYLOAD_SIZE);

        dispatcher.dispatch(&batch).await.unwrap();

        assert!(logs_contain("payload exceeds maximum size"));
        assert_eq!(seen.lock().len(), 1);
        assert_eq!(counters.snapshot().successes, 1);
    }
}
