use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

use crate::CancelReason;

/// Error type returned by this crate.
#[derive(Debug, thiserror::Error)]
pub enum HttpxError {
    /// Method, URL or header could not form a request. Never retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// The underlying transport could not be constructed.
    #[error("failed to build transport: {0}")]
    Build(#[source] reqwest::Error),
    /// Connection, DNS or TLS failure from `reqwest`.
    #[error("transport error: {0}")]
    Transport(#[source] reqwest::Error),
    /// The per-attempt timeout expired while the call itself was still live.
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    /// The response arrived but its body could not be fully read.
    #[error("http status:{status}, error:{source}")]
    BodyRead {
        status: StatusCode,
        /// Bytes buffered before the failure.
        body: Bytes,
        #[source]
        source: reqwest::Error,
    },
    /// The status code is outside the accepted set. `body` holds the
    /// response payload.
    #[error("http status:{}, expectCode:{expected:?}", status.as_u16())]
    UnexpectedStatus {
        status: StatusCode,
        expected: Vec<u16>,
        body: Bytes,
    },
    /// The call's context ended. `last` is the latest attempt failure
    /// observed before that, if any.
    #[error("request cancelled: {reason}")]
    Cancelled {
        reason: CancelReason,
        #[source]
        last: Option<Box<HttpxError>>,
    },
    /// Every attempt failed; errors are kept in attempt order.
    #[error(transparent)]
    Attempts(RetryError),
}

impl HttpxError {
    pub(crate) fn cancelled(reason: CancelReason) -> Self {
        Self::Cancelled { reason, last: None }
    }

    /// True when the call was stopped by its context. Distinct from a
    /// per-attempt [`HttpxError::Timeout`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }

    /// True when the final attempt hit its per-attempt timeout.
    pub fn is_timeout(&self) -> bool {
        match self.last_attempt() {
            Self::Timeout(_) => true,
            Self::Transport(err) => err.is_timeout(),
            _ => false,
        }
    }

    /// Default retry classification: everything except malformed requests
    /// and cancellation.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidRequest(_) | Self::Build(_) | Self::Cancelled { .. }
        )
    }

    /// HTTP status of the final attempt, when a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self.last_attempt() {
            Self::BodyRead { status, .. } | Self::UnexpectedStatus { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Response body bytes of the final attempt, when any were read.
    pub fn body(&self) -> Option<&Bytes> {
        match self.last_attempt() {
            Self::BodyRead { body, .. } | Self::UnexpectedStatus { body, .. } => Some(body),
            _ => None,
        }
    }

    /// The error produced by the last attempt.
    ///
    /// Aggregates resolve to their final entry and cancellations to the
    /// attempt error they interrupted, if any.
    pub fn last_attempt(&self) -> &HttpxError {
        match self {
            Self::Attempts(errors) => errors.last().map_or(self, HttpxError::last_attempt),
            Self::Cancelled {
                last: Some(last), ..
            } => last.last_attempt(),
            other => other,
        }
    }

    /// Every attempt error in order. A single failure is a sequence of one;
    /// a cancellation yields the attempts it interrupted.
    pub fn attempt_errors(&self) -> Vec<&HttpxError> {
        match self {
            Self::Attempts(errors) => errors.iter().collect(),
            Self::Cancelled {
                last: Some(last), ..
            } => last.attempt_errors(),
            other => vec![other],
        }
    }
}

/// Ordered attempt failures of one retried call. Never empty.
#[derive(Debug)]
pub struct RetryError {
    errors: Vec<HttpxError>,
}

impl RetryError {
    /// Folds attempt failures into the error returned to the caller: `last`
    /// alone, or every failure in order.
    pub(crate) fn collapse(
        mut earlier: Vec<HttpxError>,
        last: HttpxError,
        last_error_only: bool,
    ) -> HttpxError {
        if last_error_only || earlier.is_empty() {
            return last;
        }
        earlier.push(last);
        HttpxError::Attempts(Self { errors: earlier })
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, HttpxError> {
        self.errors.iter()
    }

    pub fn last(&self) -> Option<&HttpxError> {
        self.errors.last()
    }

    pub fn into_inner(self) -> Vec<HttpxError> {
        self.errors
    }
}

impl fmt::Display for RetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} attempts failed:", self.errors.len())?;
        for (index, error) in self.errors.iter().enumerate() {
            write!(f, "\n#{}: {error}", index + 1)?;
        }
        Ok(())
    }
}

impl std::error::Error for RetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.errors
            .last()
            .map(|error| error as &(dyn std::error::Error + 'static))
    }
}
