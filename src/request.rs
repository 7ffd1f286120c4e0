use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use serde::Serialize;

use crate::{CallContext, DelayStrategy, HttpxError, Result, JSON_CONTENT_TYPE};

/// Hook run between attempts with the 1-based count of failed attempts so
/// far and the latest error. Runs inline, so a slow hook delays the next
/// attempt.
pub type OnRetry = Arc<dyn Fn(u32, &HttpxError) + Send + Sync>;

/// Decides whether an attempt error may be retried.
pub type RetryIf = Arc<dyn Fn(&HttpxError) -> bool + Send + Sync>;

/// Full description of one logical call for [`Client::do_request`].
///
/// Zero or empty fields fall back to defaults when the call starts:
/// one attempt, a 100 ms retry delay and `[200]` as the accepted set.
///
/// [`Client::do_request`]: crate::Client::do_request
#[derive(Clone, Default)]
pub struct Request {
    pub context: CallContext,
    /// Per-attempt timeout. Zero disables it.
    pub timeout: Duration,
    pub method: Method,
    pub url: String,
    /// Applied as `Content-Type` when non-empty, replacing any header value.
    pub content_type: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub expected_status_codes: Vec<u16>,
    /// Total attempts, not retries.
    pub retry_attempts: u32,
    pub retry_delay: Duration,
    pub retry_delay_strategy: DelayStrategy,
    /// Return only the latest attempt error instead of all of them.
    pub last_error_only: bool,
    pub on_retry: Option<OnRetry>,
    /// Overrides [`HttpxError::is_retryable`].
    pub retry_if: Option<RetryIf>,
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .field("content_type", &self.content_type)
            .field("headers", &self.headers)
            .field("body_len", &self.body.len())
            .field("expected_status_codes", &self.expected_status_codes)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay", &self.retry_delay)
            .field("retry_delay_strategy", &self.retry_delay_strategy)
            .field("last_error_only", &self.last_error_only)
            .field("on_retry", &self.on_retry.is_some())
            .field("retry_if", &self.retry_if.is_some())
            .finish()
    }
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    /// Appends a header value, keeping earlier values for the same name.
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serializes `value` as the body and marks it as JSON.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        let body = serde_json::to_vec(value)
            .map_err(|err| HttpxError::InvalidRequest(format!("invalid JSON body: {err}")))?;
        self.body = Bytes::from(body);
        self.content_type = JSON_CONTENT_TYPE.to_owned();
        Ok(self)
    }

    pub fn with_expected_status_codes(mut self, codes: impl IntoIterator<Item = u16>) -> Self {
        self.expected_status_codes = codes.into_iter().collect();
        self
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration, strategy: DelayStrategy) -> Self {
        self.retry_attempts = attempts;
        self.retry_delay = delay;
        self.retry_delay_strategy = strategy;
        self
    }

    pub fn with_last_error_only(mut self, last_error_only: bool) -> Self {
        self.last_error_only = last_error_only;
        self
    }

    pub fn with_on_retry<F>(mut self, hook: F) -> Self
    where
        F: Fn(u32, &HttpxError) + Send + Sync + 'static,
    {
        self.on_retry = Some(Arc::new(hook));
        self
    }

    pub fn with_retry_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&HttpxError) -> bool + Send + Sync + 'static,
    {
        self.retry_if = Some(Arc::new(predicate));
        self
    }

    pub(crate) fn is_retryable(&self, error: &HttpxError) -> bool {
        match &self.retry_if {
            Some(predicate) => predicate(error),
            None => error.is_retryable(),
        }
    }

    /// Builds the transport request for one attempt.
    pub(crate) fn native(&self) -> Result<reqwest::Request> {
        let url = reqwest::Url::parse(&self.url)
            .map_err(|err| HttpxError::InvalidRequest(format!("invalid url '{}': {err}", self.url)))?;
        let mut request = reqwest::Request::new(self.method.clone(), url);
        *request.headers_mut() = self.attempt_headers()?;
        if !self.body.is_empty() {
            *request.body_mut() = Some(self.body.clone().into());
        }
        Ok(request)
    }

    /// Headers for one attempt: `content_type` first, then every
    /// descriptor header appended.
    pub(crate) fn attempt_headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + 1);
        if !self.content_type.is_empty() {
            let value = HeaderValue::from_str(&self.content_type).map_err(|err| {
                HttpxError::InvalidRequest(format!(
                    "invalid content type '{}': {err}",
                    self.content_type
                ))
            })?;
            headers.insert(reqwest::header::CONTENT_TYPE, value);
        }
        for (name, value) in &self.headers {
            if name == reqwest::header::CONTENT_TYPE && !self.content_type.is_empty() {
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        Ok(headers)
    }
}
