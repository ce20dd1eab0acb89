//! Mock HTTP client for testing.
//!
//! Returns configured responses per URL and records every request for
//! verification. A URL may carry a queue of responses so tests can
//! script fail-then-succeed sequences.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::traits::{Headers, HttpClient, HttpError, Response};

/// A recorded HTTP request for verification in tests.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    /// HTTP method (GET or POST)
    pub method: String,
    /// Request URL
    pub url: String,
    /// Request headers
    pub headers: Headers,
    /// Request body (for POST requests)
    pub body: Option<String>,
}

/// Configuration for a mock response.
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Return a response (any status; non-2xx drives error branches)
    Success(Response),
    /// Return a transport error
    Error(HttpError),
}

/// Mock HTTP client for testing.
///
/// `set_response` installs a sticky response for a URL; `push_response`
/// enqueues one-shot responses consumed in order before the sticky one.
/// Unconfigured URLs fail with a connection error.
#[derive(Debug, Clone, Default)]
pub struct MockHttpClient {
    sticky: Arc<Mutex<HashMap<String, MockResponse>>>,
    queued: Arc<Mutex<HashMap<String, VecDeque<MockResponse>>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockHttpClient {
    /// Create a new mock HTTP client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the sticky response for a URL.
    pub fn set_response(&self, url: impl Into<String>, response: MockResponse) {
        self.sticky.lock().unwrap().insert(url.into(), response);
    }

    /// Enqueue a one-shot response for a URL, consumed before the sticky
    /// response.
    pub fn push_response(&self, url: impl Into<String>, response: MockResponse) {
        self.queued
            .lock()
            .unwrap()
            .entry(url.into())
            .or_default()
            .push_back(response);
    }

    /// All requests made so far, in order.
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Requests made to one URL, in order.
    pub fn requests_to(&self, url: &str) -> Vec<RecordedRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url == url)
            .collect()
    }

    fn record(&self, method: &str, url: &str, headers: &Headers, body: Option<&str>) {
        self.requests.lock().unwrap().push(RecordedRequest {
            method: method.to_string(),
            url: url.to_string(),
            headers: headers.clone(),
            body: body.map(str::to_string),
        });
    }

    fn next_response(&self, url: &str) -> MockResponse {
        if let Some(queue) = self.queued.lock().unwrap().get_mut(url) {
            if let Some(response) = queue.pop_front() {
                return response;
            }
        }
        self.sticky
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or(MockResponse::Error(HttpError::ConnectionFailed(format!(
                "no mock response for {}",
                url
            ))))
    }

    fn resolve(&self, url: &str) -> Result<Response, HttpError> {
        match self.next_response(url) {
            MockResponse::Success(response) => Ok(response),
            MockResponse::Error(e) => Err(e),
        }
    }
}

#[async_trait]
impl HttpClient for MockHttpClient {
    async fn get(&self, url: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("GET", url, headers, None);
        self.resolve(url)
    }

    async fn post(&self, url: &str, body: &str, headers: &Headers) -> Result<Response, HttpError> {
        self.record("POST", url, headers, Some(body));
        self.resolve(url)
    }
}
