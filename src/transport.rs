//! Delivery of batched entries to the collection endpoint.
//!
//! A batch is one POST whose body is the queued entries joined by newlines.
//! Routing headers are attached only when the corresponding setting is
//! non-empty. The [`Transport`] trait is the seam the logger sends through;
//! [`HttpTransport`] is the reqwest-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, error, warn};

use crate::config::TransportConfig;

/// Header naming the source.
pub const SOURCE_NAME_HEADER: &str = "X-Sumo-Name";

/// Header naming the source category.
pub const SOURCE_CATEGORY_HEADER: &str = "X-Sumo-Category";

/// Header naming the originating host.
pub const HOST_NAME_HEADER: &str = "X-Sumo-Host";

/// Default base delay for exponential backoff (in milliseconds).
const DEFAULT_BASE_DELAY_MS: u64 = 500;

/// Maximum delay between retries (in milliseconds).
const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Optional routing metadata sent as request headers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingHeaders {
    pub source_name: Option<String>,
    pub source_category: Option<String>,
    pub host_name: Option<String>,
}

impl RoutingHeaders {
    /// Header name/value pairs for every non-empty setting.
    pub fn pairs(&self) -> Vec<(&'static str, &str)> {
        [
            (SOURCE_NAME_HEADER, &self.source_name),
            (SOURCE_CATEGORY_HEADER, &self.source_category),
            (HOST_NAME_HEADER, &self.host_name),
        ]
        .into_iter()
        .filter_map(|(name, value)| match value.as_deref() {
            Some(v) if !v.is_empty() => Some((name, v)),
            _ => None,
        })
        .collect()
    }
}

/// A single batch ready to send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryRequest {
    /// Collection endpoint URL
    pub endpoint: String,

    /// Newline-delimited JSON body
    pub body: String,

    /// Routing headers
    pub headers: RoutingHeaders,

    /// Number of entries in the body
    pub entry_count: usize,
}

/// Errors that can occur while delivering a batch.
#[derive(Debug)]
pub enum DeliveryError {
    /// The request could not be constructed (bad endpoint or header value)
    Build(String),

    /// HTTP request failed
    Request(reqwest::Error),

    /// Collector returned a non-success status code
    Status { code: StatusCode, message: String },

    /// Request timeout
    Timeout,

    /// All retry attempts exhausted
    RetriesExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for DeliveryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeliveryError::Build(e) => write!(f, "Failed to build request: {}", e),
            DeliveryError::Request(e) => write!(f, "HTTP request failed: {}", e),
            DeliveryError::Status { code, message } => {
                write!(f, "Collector error ({}): {}", code, message)
            }
            DeliveryError::Timeout => write!(f, "Request timed out"),
            DeliveryError::RetriesExhausted {
                attempts,
                last_error,
            } => write!(
                f,
                "All {} delivery attempts failed. Last error: {}",
                attempts, last_error
            ),
        }
    }
}

impl std::error::Error for DeliveryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeliveryError::Request(e) => Some(e),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for DeliveryError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeliveryError::Timeout
        } else if err.is_builder() {
            DeliveryError::Build(err.to_string())
        } else {
            DeliveryError::Request(err)
        }
    }
}

/// Sends batches to the collector.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver `request`. `Ok` means the collector acknowledged the batch.
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DeliveryError>;
}

/// reqwest-backed transport with optional retries.
///
/// The underlying client is reused across batches for connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,

    /// Retries within a single delivery attempt; zero sends exactly once
    max_retries: u32,

    /// Request timeout duration
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport from transport settings.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Build` if the HTTP client cannot be built.
    pub fn new(config: &TransportConfig) -> Result<Self, DeliveryError> {
        Self::with_settings(config.request_timeout, config.max_retries)
    }

    pub fn with_settings(timeout: Duration, max_retries: u32) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(2)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| DeliveryError::Build(e.to_string()))?;

        Ok(Self {
            client,
            max_retries,
            timeout,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send a single HTTP request without retry logic.
    async fn send_once(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        let url = Url::parse(&request.endpoint)
            .map_err(|e| DeliveryError::Build(format!("invalid endpoint '{}': {}", request.endpoint, e)))?;

        let mut builder = self
            .client
            .post(url)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (name, value) in request.headers.pairs() {
            let value = HeaderValue::from_str(value)
                .map_err(|e| DeliveryError::Build(format!("invalid {} header: {}", name, e)))?;
            builder = builder.header(name, value);
        }

        let response = builder.body(request.body.clone()).send().await?;
        let status = response.status();

        if status.is_success() {
            Ok(())
        } else {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            Err(DeliveryError::Status {
                code: status,
                message,
            })
        }
    }

    /// Calculate the backoff delay before retry number `retry` (1-based).
    ///
    /// delay = min(base_delay * 2^(retry - 1) + jitter, max_delay)
    fn calculate_backoff_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(10);
        let exponential_delay = DEFAULT_BASE_DELAY_MS.saturating_mul(1 << exponent);

        // Jitter up to 25% of the delay
        let jitter = rand::random::<u64>() % (exponential_delay / 4 + 1);

        let total_delay = exponential_delay
            .saturating_add(jitter)
            .min(MAX_RETRY_DELAY_MS);

        Duration::from_millis(total_delay)
    }

    /// Connection errors, timeouts, 5xx and 429 are worth retrying.
    fn is_retryable_error(&self, error: &DeliveryError) -> bool {
        match error {
            DeliveryError::Request(e) => e.is_connect() || e.is_timeout() || e.is_request(),
            DeliveryError::Timeout => true,
            DeliveryError::Status { code, .. } => {
                code.is_server_error() || *code == StatusCode::TOO_MANY_REQUESTS
            }
            DeliveryError::Build(_) => false,
            DeliveryError::RetriesExhausted { .. } => false,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(&self, request: &DeliveryRequest) -> Result<(), DeliveryError> {
        debug!(
            entries = request.entry_count,
            url = %request.endpoint,
            "Sending log batch"
        );

        let mut retry = 0;
        loop {
            match self.send_once(request).await {
                Ok(()) => {
                    debug!(entries = request.entry_count, "Log batch delivered");
                    return Ok(());
                }
                Err(e) if self.is_retryable_error(&e) && retry < self.max_retries => {
                    retry += 1;
                    let delay = self.calculate_backoff_delay(retry);
                    warn!(
                        error = %e,
                        retry = retry,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "Delivery failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) if retry > 0 => {
                    error!(error = %e, attempts = retry + 1, "Delivery failed permanently");
                    return Err(DeliveryError::RetriesExhausted {
                        attempts: retry + 1,
                        last_error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(error = %e, "Delivery failed");
                    return Err(e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn request(endpoint: String, headers: RoutingHeaders) -> DeliveryRequest {
        DeliveryRequest {
            endpoint,
            body: "{\"a\":1}\n{\"a\":2}".to_string(),
            headers,
            entry_count: 2,
        }
    }

    #[test]
    fn test_routing_headers_skip_empty_values() {
        let headers = RoutingHeaders {
            source_name: Some("web".to_string()),
            source_category: Some(String::new()),
            host_name: None,
        };
        assert_eq!(headers.pairs(), vec![(SOURCE_NAME_HEADER, "web")]);
        assert!(RoutingHeaders::default().pairs().is_empty());
    }

    #[test]
    fn test_delivery_error_display() {
        let err = DeliveryError::Timeout;
        assert_eq!(format!("{}", err), "Request timed out");

        let err = DeliveryError::Status {
            code: StatusCode::BAD_REQUEST,
            message: "bad batch".to_string(),
        };
        assert!(format!("{}", err).contains("400"));
        assert!(format!("{}", err).contains("bad batch"));

        let err = DeliveryError::RetriesExhausted {
            attempts: 3,
            last_error: "Connection refused".to_string(),
        };
        assert!(format!("{}", err).contains("3"));
        assert!(format!("{}", err).contains("Connection refused"));
    }

    #[test]
    fn test_backoff_delay_increases_and_caps() {
        let transport = HttpTransport::with_settings(Duration::from_secs(5), 3).unwrap();

        let first = transport.calculate_backoff_delay(1);
        assert!(first.as_millis() >= 500 && first.as_millis() <= 625);

        let second = transport.calculate_backoff_delay(2);
        assert!(second.as_millis() >= 1000 && second.as_millis() <= 1250);

        let capped = transport.calculate_backoff_delay(30);
        assert!(capped.as_millis() <= MAX_RETRY_DELAY_MS as u128);
    }

    #[test]
    fn test_retryable_error_detection() {
        let transport = HttpTransport::with_settings(Duration::from_secs(5), 0).unwrap();

        assert!(transport.is_retryable_error(&DeliveryError::Timeout));
        assert!(transport.is_retryable_error(&DeliveryError::Status {
            code: StatusCode::SERVICE_UNAVAILABLE,
            message: String::new(),
        }));
        assert!(transport.is_retryable_error(&DeliveryError::Status {
            code: StatusCode::TOO_MANY_REQUESTS,
            message: String::new(),
        }));
        assert!(!transport.is_retryable_error(&DeliveryError::Status {
            code: StatusCode::UNAUTHORIZED,
            message: String::new(),
        }));
        assert!(!transport.is_retryable_error(&DeliveryError::Build("bad".to_string())));
    }

    #[tokio::test]
    async fn test_posts_ndjson_with_routing_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collect")
            .match_header("content-type", "application/json")
            .match_header("x-sumo-name", "web")
            .match_header("x-sumo-category", "prod/web")
            .match_header("x-sumo-host", Matcher::Missing)
            .match_body("{\"a\":1}\n{\"a\":2}")
            .with_status(200)
            .create_async()
            .await;

        let transport = HttpTransport::with_settings(Duration::from_secs(5), 0).unwrap();
        let headers = RoutingHeaders {
            source_name: Some("web".to_string()),
            source_category: Some("prod/web".to_string()),
            host_name: Some(String::new()),
        };

        let result = transport
            .send(&request(format!("{}/collect", server.url()), headers))
            .await;

        assert!(result.is_ok(), "unexpected error: {:?}", result);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_success_status_is_error() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collect")
            .with_status(401)
            .with_body("no such collector")
            .expect(1)
            .create_async()
            .await;

        let transport = HttpTransport::with_settings(Duration::from_secs(5), 2).unwrap();
        let result = transport
            .send(&request(format!("{}/collect", server.url()), RoutingHeaders::default()))
            .await;

        match result {
            Err(DeliveryError::Status { code, message }) => {
                assert_eq!(code, StatusCode::UNAUTHORIZED);
                assert_eq!(message, "no such collector");
            }
            other => panic!("expected status error, got {:?}", other),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/collect")
            .with_status(503)
            .expect(2)
            .create_async()
            .await;

        let transport = HttpTransport::with_settings(Duration::from_secs(5), 1).unwrap();
        let result = transport
            .send(&request(format!("{}/collect", server.url()), RoutingHeaders::default()))
            .await;

        assert!(matches!(
            result,
            Err(DeliveryError::RetriesExhausted { attempts: 2, .. })
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_invalid_endpoint_is_build_error() {
        let transport = HttpTransport::with_settings(Duration::from_secs(5), 3).unwrap();
        let result = transport
            .send(&request("not a url".to_string(), RoutingHeaders::default()))
            .await;

        assert!(matches!(result, Err(DeliveryError::Build(_))));
    }

    #[tokio::test]
    async fn test_invalid_header_value_is_build_error() {
        let transport = HttpTransport::with_settings(Duration::from_secs(5), 0).unwrap();
        let headers = RoutingHeaders {
            host_name: Some("bad\nhost".to_string()),
            ..RoutingHeaders::default()
        };

        let result = transport
            .send(&request("http://127.0.0.1:9/collect".to_string(), headers))
            .await;

        assert!(matches!(result, Err(DeliveryError::Build(_))));
    }
}
