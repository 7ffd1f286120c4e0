use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use opentelemetry::global;
use opentelemetry::trace::{Tracer, TracerProvider as _};
use reqwest::Method;

use crate::{
    options::options_from_lookup, telemetry, CallContext, ClientOption, HttpxError, PoolConfig,
    Request, Result, RetryError, DEFAULT_RETRY_DELAY, FORM_CONTENT_TYPE, TRACER_NAME,
};

const DEFAULT_EXPECTED_STATUS: &[u16] = &[200];

#[derive(Clone)]
/// HTTP client owning one connection pool.
///
/// Cloning is cheap and clones share the pool. Calls keep their state in
/// the [`Request`] and [`CallContext`] they are given, so one client can
/// serve any number of concurrent calls.
pub struct Client {
    http: reqwest::Client,
    pool: PoolConfig,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client").field("pool", &self.pool).finish()
    }
}

impl Default for Client {
    /// Client with the default pool settings.
    ///
    /// # Panics
    ///
    /// See [`Client::new`].
    fn default() -> Self {
        Self::new(std::iter::empty())
    }
}

impl Client {
    /// Creates a client, applying `options` in order over the defaults.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized, the same condition
    /// under which `reqwest::Client::new` panics. Use [`Client::try_new`]
    /// to handle it.
    pub fn new<I>(options: I) -> Self
    where
        I: IntoIterator<Item = ClientOption>,
    {
        match Self::try_new(options) {
            Ok(client) => client,
            Err(err) => panic!("httpx client could not be built: {err}"),
        }
    }

    /// Creates a client, returning the transport build error instead of
    /// panicking.
    pub fn try_new<I>(options: I) -> Result<Self>
    where
        I: IntoIterator<Item = ClientOption>,
    {
        let pool = PoolConfig::from_options(options);
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(pool.max_idle_conns_per_host)
            .pool_idle_timeout(pool.idle_timeout())
            .build()
            .map_err(HttpxError::Build)?;
        Ok(Self { http, pool })
    }

    /// Creates a client with pool settings read from the environment.
    ///
    /// Reads:
    /// - `HTTPX_MAX_IDLE_CONNS_PER_HOST`: idle connections kept per host
    /// - `HTTPX_IDLE_CONN_TIMEOUT_MS`: idle connection lifetime, `0` for none
    ///
    /// Unset variables keep their defaults. Returns an error if a variable
    /// cannot be parsed.
    pub fn from_env() -> std::result::Result<Self, String> {
        let options = options_from_lookup(|key| std::env::var(key).ok())?;
        Self::try_new(options).map_err(|err| err.to_string())
    }

    /// Pool settings this client was built with.
    pub fn pool_config(&self) -> &PoolConfig {
        &self.pool
    }

    /// Sends `request` once inside a client span.
    ///
    /// The span is named after the URL path, carries the request
    /// attributes and is propagated to the callee through the request
    /// headers. It is closed before this returns on every path. A response
    /// with any status is a success here; only transport failures and
    /// `ctx` ending are errors.
    pub async fn execute(
        &self,
        ctx: &CallContext,
        request: reqwest::Request,
    ) -> Result<reqwest::Response> {
        let parent = ctx.otel_context();
        match ctx.trace_provider() {
            Some(provider) => {
                let tracer = provider.tracer(TRACER_NAME);
                self.send_traced(ctx, &tracer, &parent, request).await
            }
            None => {
                let tracer = global::tracer(TRACER_NAME);
                self.send_traced(ctx, &tracer, &parent, request).await
            }
        }
    }

    async fn send_traced<T>(
        &self,
        ctx: &CallContext,
        tracer: &T,
        parent: &opentelemetry::Context,
        mut request: reqwest::Request,
    ) -> Result<reqwest::Response>
    where
        T: Tracer + Sync,
        T::Span: Send,
    {
        let span = telemetry::start_client_span(tracer, parent, &mut request);

        let outcome = tokio::select! {
            biased;
            reason = ctx.done() => Err(HttpxError::cancelled(reason)),
            result = self.http.execute(request) => result.map_err(HttpxError::Transport),
        };

        match outcome {
            Ok(response) => {
                telemetry::end_with_status(span, response.status().as_u16());
                Ok(response)
            }
            Err(err) => {
                telemetry::end_with_error(span, &err);
                Err(err)
            }
        }
    }

    /// Sends a GET once with a background context.
    pub async fn get(&self, url: &str) -> Result<reqwest::Response> {
        self.send_once(Request::get(url)).await
    }

    /// Sends a HEAD once with a background context.
    pub async fn head(&self, url: &str) -> Result<reqwest::Response> {
        self.send_once(Request::new(Method::HEAD, url)).await
    }

    /// Sends a POST once with `body` and the given content type.
    pub async fn post(
        &self,
        url: &str,
        content_type: &str,
        body: impl Into<Bytes>,
    ) -> Result<reqwest::Response> {
        self.send_once(Request::post(url, body).with_content_type(content_type))
            .await
    }

    /// Sends `form` URL-encoded in a POST body.
    pub async fn post_form<I, K, V>(&self, url: &str, form: I) -> Result<reqwest::Response>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let encoded = url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(form)
            .finish();
        self.post(url, FORM_CONTENT_TYPE, encoded).await
    }

    async fn send_once(&self, request: Request) -> Result<reqwest::Response> {
        let native = request.native()?;
        self.execute(&request.context, native).await
    }

    /// Runs `request` with retries and returns the buffered body of the
    /// first attempt whose status is accepted.
    ///
    /// Attempts run one after another. Between them the `on_retry` hook
    /// runs and the configured delay elapses. The call stops early when the
    /// request context ends, returning [`HttpxError::Cancelled`] with the
    /// failures seen so far, or when `retry_if` rejects an error.
    pub async fn do_request(&self, request: &Request) -> Result<Bytes> {
        let attempts = request.retry_attempts.max(1);
        let base_delay = if request.retry_delay.is_zero() {
            DEFAULT_RETRY_DELAY
        } else {
            request.retry_delay
        };
        let expected = if request.expected_status_codes.is_empty() {
            DEFAULT_EXPECTED_STATUS
        } else {
            request.expected_status_codes.as_slice()
        };
        let ctx = &request.context;

        let mut earlier = Vec::new();
        let mut failed = 0u32;
        loop {
            let error = match self.attempt(request, expected).await {
                Ok(body) => {
                    #[cfg(feature = "tracing")]
                    if failed > 0 {
                        tracing::debug!(url = %request.url, attempts = failed + 1, "request succeeded after retry");
                    }
                    return Ok(body);
                }
                Err(error) => error,
            };
            failed += 1;

            if let Some(reason) = ctx.done_reason() {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %request.url, attempts = failed, %reason, "request context ended");
                return Err(interrupted(reason, earlier, error, request.last_error_only));
            }

            if failed >= attempts || !request.is_retryable(&error) {
                #[cfg(feature = "tracing")]
                tracing::warn!(url = %request.url, attempts = failed, error = %error, "request failed");
                return Err(RetryError::collapse(earlier, error, request.last_error_only));
            }

            if let Some(on_retry) = &request.on_retry {
                on_retry(failed, &error);
            }

            let delay = request.retry_delay_strategy.delay_for(base_delay, failed);
            #[cfg(feature = "tracing")]
            tracing::debug!(
                url = %request.url,
                attempt = failed,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "retrying request"
            );

            let cancelled = tokio::select! {
                biased;
                reason = ctx.done() => Some(reason),
                () = tokio::time::sleep(delay) => None,
            };
            if let Some(reason) = cancelled {
                #[cfg(feature = "tracing")]
                tracing::debug!(url = %request.url, attempts = failed, %reason, "request context ended during retry delay");
                return Err(interrupted(reason, earlier, error, request.last_error_only));
            }
            earlier.push(error);
        }
    }

    /// One request/response cycle under its own timeout scope.
    async fn attempt(&self, request: &Request, expected: &[u16]) -> Result<Bytes> {
        let timeout = (!request.timeout.is_zero()).then_some(request.timeout);
        let (ctx, _release) = request.context.child_with_timeout(timeout);
        let scoped = |err: HttpxError| attempt_scoped_error(&request.context, timeout, err);

        let native = request.native()?;
        let mut response = self.execute(&ctx, native).await.map_err(scoped)?;
        let status = response.status();

        let mut buffer = BytesMut::new();
        loop {
            let chunk = tokio::select! {
                biased;
                reason = ctx.done() => return Err(scoped(HttpxError::cancelled(reason))),
                chunk = response.chunk() => chunk,
            };
            match chunk {
                Ok(Some(chunk)) => buffer.extend_from_slice(&chunk),
                Ok(None) => break,
                Err(source) => {
                    return Err(HttpxError::BodyRead {
                        status,
                        body: buffer.freeze(),
                        source,
                    })
                }
            }
        }
        drop(response);

        let body = buffer.freeze();
        if !expected.contains(&status.as_u16()) {
            return Err(HttpxError::UnexpectedStatus {
                status,
                expected: expected.to_vec(),
                body,
            });
        }
        Ok(body)
    }
}

/// Reports an attempt scope that ended while the caller's context is still
/// live as a per-attempt timeout.
fn attempt_scoped_error(
    parent: &CallContext,
    timeout: Option<Duration>,
    err: HttpxError,
) -> HttpxError {
    match (err, timeout) {
        (HttpxError::Cancelled { last: None, .. }, Some(timeout))
            if parent.done_reason().is_none() =>
        {
            HttpxError::Timeout(timeout)
        }
        (err, _) => err,
    }
}

/// Error for a call whose context ended after `last` failed.
fn interrupted(
    reason: crate::CancelReason,
    mut earlier: Vec<HttpxError>,
    last: HttpxError,
    last_error_only: bool,
) -> HttpxError {
    let last = match last {
        HttpxError::Cancelled { last: None, .. } => match earlier.pop() {
            Some(previous) => previous,
            None => return HttpxError::cancelled(reason),
        },
        other => other,
    };
    HttpxError::Cancelled {
        reason,
        last: Some(Box::new(RetryError::collapse(
            earlier,
            last,
            last_error_only,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use reqwest::StatusCode;

    use super::{attempt_scoped_error, interrupted, Client};
    use crate::{
        with_idle_conn_timeout, with_max_idle_conns_per_host, CallContext, CancelReason, HttpxError,
    };

    fn bad_gateway() -> HttpxError {
        HttpxError::UnexpectedStatus {
            status: StatusCode::BAD_GATEWAY,
            expected: vec![200],
            body: Bytes::from_static(b"upstream down"),
        }
    }

    #[test]
    fn client_keeps_pool_options() {
        let client = Client::new([
            with_max_idle_conns_per_host(5),
            with_idle_conn_timeout(Duration::from_secs(10)),
        ]);
        assert_eq!(client.pool_config().max_idle_conns_per_host, 5);
        assert_eq!(
            client.pool_config().idle_conn_timeout,
            Duration::from_secs(10)
        );
    }

    #[test]
    fn debug_shows_pool_settings() {
        let debug = format!("{:?}", Client::default());
        assert!(debug.contains("max_idle_conns_per_host: 1000"));
    }

    #[test]
    fn expired_attempt_scope_becomes_timeout_while_call_is_live() {
        let err = attempt_scoped_error(
            &CallContext::background(),
            Some(Duration::from_millis(20)),
            HttpxError::cancelled(CancelReason::DeadlineExceeded),
        );
        assert!(matches!(err, HttpxError::Timeout(_)));
    }

    #[test]
    fn ended_call_context_stays_cancelled() {
        let token = tokio_util::sync::CancellationToken::new();
        token.cancel();
        let parent = CallContext::background().with_cancellation(token);
        let err = attempt_scoped_error(
            &parent,
            Some(Duration::from_millis(20)),
            HttpxError::cancelled(CancelReason::Cancelled),
        );
        assert!(err.is_cancelled());
    }

    #[test]
    fn interrupted_keeps_prior_failures() {
        let err = interrupted(
            CancelReason::Cancelled,
            vec![bad_gateway()],
            HttpxError::cancelled(CancelReason::Cancelled),
            false,
        );
        assert!(err.is_cancelled());
        assert_eq!(err.status(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.attempt_errors().len(), 1);
    }

    #[test]
    fn interrupted_without_failures_is_bare_cancellation() {
        let err = interrupted(
            CancelReason::DeadlineExceeded,
            Vec::new(),
            HttpxError::cancelled(CancelReason::DeadlineExceeded),
            false,
        );
        assert!(matches!(
            err,
            HttpxError::Cancelled {
                reason: CancelReason::DeadlineExceeded,
                last: None
            }
        ));
    }
}
