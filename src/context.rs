use std::fmt;
use std::time::Duration;

use opentelemetry::trace::TraceContextExt;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};

/// Why a [`CallContext`] stopped accepting work.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CancelReason {
    /// The cancellation token fired.
    Cancelled,
    /// The deadline passed.
    DeadlineExceeded,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("context deadline exceeded"),
        }
    }
}

/// Cancellation scope and trace parent for one logical call.
///
/// Clones share the same cancellation token. A context that carries a
/// valid parent span together with the provider that recorded it makes
/// request spans come from that provider; otherwise the global tracer is
/// used.
#[derive(Clone, Default)]
pub struct CallContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
    otel: Option<opentelemetry::Context>,
    provider: Option<SdkTracerProvider>,
}

impl fmt::Debug for CallContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallContext")
            .field("cancelled", &self.cancel.is_cancelled())
            .field("deadline", &self.deadline)
            .field("has_trace_parent", &self.otel.is_some())
            .finish()
    }
}

impl CallContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Ties the context to an externally owned token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Sets an absolute deadline, keeping an earlier one if present.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Sets a deadline `timeout` from now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attaches the OpenTelemetry context holding the caller's span and
    /// the provider that span belongs to.
    pub fn with_trace_parent(
        mut self,
        provider: SdkTracerProvider,
        otel: opentelemetry::Context,
    ) -> Self {
        self.provider = Some(provider);
        self.otel = Some(otel);
        self
    }

    /// Token observed by this context.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns the reason if the context is already done.
    pub fn done_reason(&self) -> Option<CancelReason> {
        if self.cancel.is_cancelled() {
            return Some(CancelReason::Cancelled);
        }
        match self.deadline {
            Some(deadline) if deadline <= Instant::now() => Some(CancelReason::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the token fires or the deadline passes.
    pub async fn done(&self) -> CancelReason {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                () = self.cancel.cancelled() => CancelReason::Cancelled,
                () = tokio::time::sleep_until(deadline) => CancelReason::DeadlineExceeded,
            },
            None => {
                self.cancel.cancelled().await;
                CancelReason::Cancelled
            }
        }
    }

    /// Derives a context bounded by `timeout` for a single attempt.
    ///
    /// The returned guard cancels the child when dropped; the parent is
    /// unaffected.
    pub(crate) fn child_with_timeout(&self, timeout: Option<Duration>) -> (Self, DropGuard) {
        let mut child = Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
            otel: self.otel.clone(),
            provider: self.provider.clone(),
        };
        if let Some(timeout) = timeout {
            child = child.with_timeout(timeout);
        }
        let guard = child.cancel.clone().drop_guard();
        (child, guard)
    }

    /// Parent context for spans started under this call.
    pub(crate) fn otel_context(&self) -> opentelemetry::Context {
        self.otel
            .clone()
            .unwrap_or_else(opentelemetry::Context::current)
    }

    /// Provider owning the parent span, if the parent span is valid.
    pub(crate) fn trace_provider(&self) -> Option<&SdkTracerProvider> {
        let otel = self.otel.as_ref()?;
        if otel.span().span_context().is_valid() {
            self.provider.as_ref()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::{CallContext, CancelReason};

    #[test]
    fn background_is_never_done() {
        assert_eq!(CallContext::background().done_reason(), None);
    }

    #[test]
    fn cancelled_token_reports_cancelled() {
        let token = CancellationToken::new();
        let ctx = CallContext::background().with_cancellation(token.clone());
        token.cancel();
        assert_eq!(ctx.done_reason(), Some(CancelReason::Cancelled));
    }

    #[tokio::test]
    async fn expired_deadline_reports_deadline_exceeded() {
        let ctx = CallContext::background().with_timeout(Duration::from_millis(5));
        assert_eq!(ctx.done().await, CancelReason::DeadlineExceeded);
        assert_eq!(ctx.done_reason(), Some(CancelReason::DeadlineExceeded));
    }

    #[test]
    fn earlier_deadline_wins() {
        let ctx = CallContext::background()
            .with_timeout(Duration::from_secs(1))
            .with_timeout(Duration::from_secs(60));
        let deadline = ctx.deadline().unwrap();
        assert!(deadline <= tokio::time::Instant::now() + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn dropping_child_guard_leaves_parent_live() {
        let parent = CallContext::background();
        let (child, guard) = parent.child_with_timeout(Some(Duration::from_secs(30)));
        drop(guard);
        assert_eq!(child.done_reason(), Some(CancelReason::Cancelled));
        assert_eq!(parent.done_reason(), None);
    }

    #[test]
    fn parent_cancellation_reaches_child() {
        let token = CancellationToken::new();
        let parent = CallContext::background().with_cancellation(token.clone());
        let (child, _guard) = parent.child_with_timeout(None);
        token.cancel();
        assert_eq!(child.done_reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn trace_provider_requires_valid_parent_span() {
        let provider = opentelemetry_sdk::trace::SdkTracerProvider::builder().build();
        let ctx = CallContext::background()
            .with_trace_parent(provider, opentelemetry::Context::new());
        assert!(ctx.trace_provider().is_none());
    }
}
