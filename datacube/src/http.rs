//! HTTP client abstraction for the catalog and the band loader.
//!
//! Production code uses [`AsyncReqwestClient`]; tests inject a mock through
//! the [`AsyncHttpClient`] trait.

use std::future::Future;
use std::ops::Range;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, trace, warn};

/// User agent sent with every request.
pub const DEFAULT_USER_AGENT: &str = concat!("datacube/", env!("CARGO_PKG_VERSION"));

/// Default request timeout. Full-resolution band files can be large.
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 300;

/// Errors from HTTP requests.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HttpError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("failed to read response body from {url}: {message}")]
    Body { url: String, message: String },
}

/// Async HTTP operations used by this crate.
pub trait AsyncHttpClient: Send + Sync {
    /// GET `url` and return the body.
    fn get(&self, url: &str) -> impl Future<Output = Result<Vec<u8>, HttpError>> + Send;

    /// GET the bytes `range` of `url`.
    ///
    /// The result is shorter than the range when the resource ends inside it.
    fn get_range(
        &self,
        url: &str,
        range: Range<u64>,
    ) -> impl Future<Output = Result<Vec<u8>, HttpError>> + Send;

    /// POST a JSON document to `url` and return the body.
    fn post_json(
        &self,
        url: &str,
        body: &serde_json::Value,
    ) -> impl Future<Output = Result<Vec<u8>, HttpError>> + Send;
}

/// Async HTTP client implementation using reqwest.
#[derive(Clone)]
pub struct AsyncReqwestClient {
    client: reqwest::Client,
}

impl AsyncReqwestClient {
    /// Creates a client with the default timeout.
    pub fn new() -> Result<Self, HttpError> {
        Self::with_timeout(DEFAULT_HTTP_TIMEOUT_SECS)
    }

    /// Creates a client with a custom timeout.
    pub fn with_timeout(timeout_secs: u64) -> Result<Self, HttpError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(DEFAULT_USER_AGENT)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| HttpError::Client(e.to_string()))?;

        Ok(Self { client })
    }

    async fn read(url: &str, response: reqwest::Response) -> Result<Vec<u8>, HttpError> {
        let status = response.status();
        debug!(url = url, status = status.as_u16(), "HTTP response received");
        if !status.is_success() {
            return Err(HttpError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| HttpError::Body {
                url: url.to_string(),
                message: e.to_string(),
            })
    }
}

impl AsyncHttpClient for AsyncReqwestClient {
    async fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
        trace!(url = url, "HTTP GET request starting");
        let response = self.client.get(url).send().await.map_err(|e| {
            warn!(url = url, error = %e, "HTTP GET failed");
            HttpError::Request {
                url: url.to_string(),
                message: e.to_string(),
            }
        })?;
        Self::read(url, response).await
    }

    async fn get_range(&self, url: &str, range: Range<u64>) -> Result<Vec<u8>, HttpError> {
        if range.is_empty() {
            return Ok(Vec::new());
        }
        trace!(url = url, start = range.start, end = range.end, "HTTP range request starting");
        let response = self
            .client
            .get(url)
            .header(
                reqwest::header::RANGE,
                format!("bytes={}-{}", range.start, range.end - 1),
            )
            .send()
            .await
            .map_err(|e| {
                warn!(url = url, error = %e, "HTTP range request failed");
                HttpError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            })?;

        // The range starts at or past the end of the resource.
        if response.status() == reqwest::StatusCode::RANGE_NOT_SATISFIABLE {
            return Ok(Vec::new());
        }
        let partial = response.status() == reqwest::StatusCode::PARTIAL_CONTENT;
        let body = Self::read(url, response).await?;
        if partial {
            return Ok(body);
        }
        // Server ignored the Range header and sent the whole resource.
        debug!(url = url, bytes = body.len(), "Range not honoured, slicing full body");
        Ok(slice_range(body, range))
    }

    async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<Vec<u8>, HttpError> {
        trace!(url = url, "HTTP POST request starting");
        let response = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = url, error = %e, "HTTP POST failed");
                HttpError::Request {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            })?;
        Self::read(url, response).await
    }
}

/// The part of a full body that falls inside `range`.
fn slice_range(mut body: Vec<u8>, range: Range<u64>) -> Vec<u8> {
    let len = body.len() as u64;
    let start = range.start.min(len) as usize;
    let end = range.end.min(len) as usize;
    let start = start.min(end);
    body.truncate(end);
    body.split_off(start)
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// A recorded request: method, URL and optional JSON body.
    pub type RecordedRequest = (&'static str, String, Option<serde_json::Value>);

    /// Mock HTTP client answering from a list of `(url prefix, response)` routes.
    ///
    /// The first matching prefix wins; unmatched URLs return 404.
    #[derive(Default)]
    pub struct MockAsyncHttpClient {
        pub routes: Vec<(String, Result<Vec<u8>, HttpError>)>,
        pub requests: Mutex<Vec<RecordedRequest>>,
    }

    impl MockAsyncHttpClient {
        pub fn with_route(mut self, prefix: &str, response: Result<Vec<u8>, HttpError>) -> Self {
            self.routes.push((prefix.to_string(), response));
            self
        }

        fn respond(&self, url: &str) -> Result<Vec<u8>, HttpError> {
            self.routes
                .iter()
                .find(|(prefix, _)| url.starts_with(prefix.as_str()))
                .map(|(_, response)| response.clone())
                .unwrap_or_else(|| {
                    Err(HttpError::Status {
                        url: url.to_string(),
                        status: 404,
                    })
                })
        }
    }

    impl MockAsyncHttpClient {
        /// Bytes served through range requests so far.
        pub fn range_bytes(&self) -> u64 {
            self.requests
                .lock()
                .iter()
                .filter(|(method, _, _)| *method == "RANGE")
                .filter_map(|(_, _, body)| {
                    let body = body.as_ref()?;
                    Some(body[1].as_u64()? - body[0].as_u64()?)
                })
                .sum()
        }
    }

    impl AsyncHttpClient for MockAsyncHttpClient {
        async fn get(&self, url: &str) -> Result<Vec<u8>, HttpError> {
            self.requests.lock().push(("GET", url.to_string(), None));
            self.respond(url)
        }

        async fn get_range(&self, url: &str, range: Range<u64>) -> Result<Vec<u8>, HttpError> {
            let body = self.respond(url)?;
            let served = slice_range(body, range.clone());
            let end = range.start + served.len() as u64;
            self.requests.lock().push((
                "RANGE",
                url.to_string(),
                Some(serde_json::json!([range.start, end])),
            ));
            Ok(served)
        }

        async fn post_json(
            &self,
            url: &str,
            body: &serde_json::Value,
        ) -> Result<Vec<u8>, HttpError> {
            self.requests
                .lock()
                .push(("POST", url.to_string(), Some(body.clone())));
            self.respond(url)
        }
    }

    #[tokio::test]
    async fn test_mock_client_routes_by_prefix() {
        let mock = MockAsyncHttpClient::default()
            .with_route("http://a/", Ok(vec![1, 2]))
            .with_route("http://b/", Ok(vec![3]));

        assert_eq!(mock.get("http://a/x").await.unwrap(), vec![1, 2]);
        assert_eq!(mock.get("http://b/y").await.unwrap(), vec![3]);
        assert!(matches!(
            mock.get("http://c/").await,
            Err(HttpError::Status { status: 404, .. })
        ));
        assert_eq!(mock.requests.lock().len(), 3);
    }

    #[test]
    fn test_slice_range_clamps_to_body() {
        assert_eq!(slice_range(vec![0, 1, 2, 3, 4], 1..3), vec![1, 2]);
        assert_eq!(slice_range(vec![0, 1, 2], 2..10), vec![2]);
        assert!(slice_range(vec![0, 1], 5..9).is_empty());
    }

    #[tokio::test]
    async fn test_mock_client_serves_ranges() {
        let mock = MockAsyncHttpClient::default().with_route("http://a/", Ok((0..10).collect()));
        assert_eq!(mock.get_range("http://a/f", 2..5).await.unwrap(), vec![2, 3, 4]);
        assert_eq!(mock.get_range("http://a/f", 8..16).await.unwrap(), vec![8, 9]);
        assert_eq!(mock.range_bytes(), 5);
    }

    #[tokio::test]
    async fn test_mock_client_records_post_body() {
        let mock = MockAsyncHttpClient::default().with_route("http://a/", Ok(b"{}".to_vec()));
        let body = serde_json::json!({"limit": 1});
        mock.post_json("http://a/search", &body).await.unwrap();

        let requests = mock.requests.lock();
        assert_eq!(requests[0].0, "POST");
        assert_eq!(requests[0].2.as_ref(), Some(&body));
    }
}
