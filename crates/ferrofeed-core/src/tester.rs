//! One-shot diagnostic request run before a source is attached.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::discovery::{discover, FieldNode};
use crate::error::SyncError;
use crate::financial::detect_series_paths;
use crate::http_client::{execute_with_timeout, HttpClient, ReqwestHttpClient, DEFAULT_TIMEOUT_MS};
use crate::pipeline::parse_payload;
use crate::source::SourceConfig;

/// Outcome of a successful connection test.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestReport {
    pub fields: Vec<FieldNode>,
    pub total_field_count: usize,
    pub paths: Vec<String>,
    pub is_array: bool,
    pub response_time_ms: u64,
    pub status_code: u16,
    pub raw_data: Value,
    /// Candidate values for `financialDataPath` found in the body.
    pub financial_series_paths: Vec<String>,
}

/// Tests candidate endpoints. Holds no per-source state, so concurrent
/// calls for different candidates are independent of each other and of any
/// running synchronization.
#[derive(Clone)]
pub struct ConnectionTester {
    client: Arc<dyn HttpClient>,
    default_timeout: Duration,
}

impl ConnectionTester {
    pub fn new(client: Arc<dyn HttpClient>) -> Self {
        Self {
            client,
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub async fn test(&self, config: &SourceConfig) -> Result<TestReport, SyncError> {
        config.validate_endpoint()?;

        let request = config.to_http_request(self.default_timeout);
        tracing::debug!(
            endpoint = %request.url,
            method = request.method.as_str(),
            timeout_ms = request.timeout_ms,
            "probing endpoint"
        );

        let started = Instant::now();
        let response = execute_with_timeout(self.client.as_ref(), request).await?;
        let response_time_ms = elapsed_ms(started);

        if !response.is_success() {
            tracing::info!(status = response.status, "connection test returned non-success status");
            return Err(SyncError::http_status(response.status));
        }

        let raw_data = parse_payload(&response.body)?;
        let discovery = discover(&raw_data);

        Ok(TestReport {
            total_field_count: discovery.total_fields,
            fields: discovery.fields,
            paths: discovery.paths,
            is_array: discovery.is_array,
            response_time_ms,
            status_code: response.status,
            financial_series_paths: detect_series_paths(&raw_data),
            raw_data,
        })
    }
}

impl Default for ConnectionTester {
    fn default() -> Self {
        Self::new(Arc::new(ReqwestHttpClient::new()))
    }
}

impl std::fmt::Debug for ConnectionTester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionTester")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::SyncErrorKind;
    use crate::http_client::{HttpError, HttpRequest, HttpResponse};

    struct CannedClient {
        response: HttpResponse,
        calls: AtomicUsize,
    }

    impl CannedClient {
        fn new(response: HttpResponse) -> Arc<Self> {
            Arc::new(Self {
                response,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl HttpClient for CannedClient {
        fn execute<'a>(
            &'a self,
            _request: HttpRequest,
        ) -> Pin<Box<dyn Future<Output = Result<HttpResponse, HttpError>> + Send + 'a>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let response = self.response.clone();
            Box::pin(async move { Ok(response) })
        }
    }

    #[tokio::test]
    async fn malformed_url_fails_before_any_request() {
        let client = CannedClient::new(HttpResponse::ok_json("{}"));
        let tester = ConnectionTester::new(client.clone());

        let error = tester
            .test(&SourceConfig::new("not a url"))
            .await
            .expect_err("malformed endpoint");

        assert_eq!(error.kind(), SyncErrorKind::MalformedEndpoint);
        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn success_reports_schema_and_series_paths() {
        let body = r#"{
            "Meta Data": {"2. Symbol": "IBM"},
            "Time Series (Daily)": {
                "2025-01-02": {"1. open": "11", "4. close": "12"},
                "2025-01-01": {"1. open": "10", "4. close": "11"}
            }
        }"#;
        let tester = ConnectionTester::new(CannedClient::new(HttpResponse::ok_json(body)));

        let report = tester
            .test(&SourceConfig::new("https://api.example.com/daily"))
            .await
            .expect("connection test succeeds");

        assert_eq!(report.status_code, 200);
        assert_eq!(report.financial_series_paths, vec!["Time Series (Daily)"]);
        assert_eq!(report.total_field_count, report.paths.len());
        assert!(report.paths.contains(&String::from("Meta Data.2. Symbol")));
    }

    #[tokio::test]
    async fn string_wrapped_json_is_described_like_a_live_update() {
        let body = r#""{\"price\": 1, \"symbol\": \"IBM\"}""#;
        let tester = ConnectionTester::new(CannedClient::new(HttpResponse::ok_json(body)));

        let report = tester
            .test(&SourceConfig::new("https://api.example.com"))
            .await
            .expect("wrapped payload is accepted");

        assert_eq!(report.paths, vec!["price", "symbol"]);
        assert_eq!(report.raw_data["symbol"], Value::from("IBM"));
    }

    #[tokio::test]
    async fn non_json_body_is_a_parse_failure() {
        let tester = ConnectionTester::new(CannedClient::new(HttpResponse::ok_json("<html>")));

        let error = tester
            .test(&SourceConfig::new("https://api.example.com"))
            .await
            .expect_err("html body");

        assert_eq!(error.kind(), SyncErrorKind::Parse);
    }
}
