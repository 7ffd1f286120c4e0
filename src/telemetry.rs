use opentelemetry::global;
use opentelemetry::propagation::Injector;
use opentelemetry::trace::{Span, SpanKind, Status, TraceContextExt, Tracer};
use opentelemetry::KeyValue;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

/// Instrumentation scope name for request spans.
pub const TRACER_NAME: &str = "httpx";

/// Starts a client span for `request` under `parent` and injects the new
/// span's trace context into the request headers.
pub(crate) fn start_client_span<T>(
    tracer: &T,
    parent: &opentelemetry::Context,
    request: &mut reqwest::Request,
) -> T::Span
where
    T: Tracer,
{
    let name = span_name(request.url());
    let span = tracer
        .span_builder(name)
        .with_kind(SpanKind::Client)
        .with_attributes(request_attributes(request))
        .start_with_context(tracer, parent);

    let cx = parent.with_remote_span_context(span.span_context().clone());
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(request.headers_mut()));
    });
    span
}

/// Closes `span` after a transport failure.
pub(crate) fn end_with_error<S: Span>(mut span: S, error: &(dyn std::error::Error + 'static)) {
    span.record_error(error);
    span.set_status(Status::error(error.to_string()));
    span.end();
}

/// Closes `span` after a response head arrived.
pub(crate) fn end_with_status<S: Span>(mut span: S, status: u16) {
    span.set_attribute(KeyValue::new(
        "http.response.status_code",
        i64::from(status),
    ));
    span.set_status(client_span_status(status));
    span.end();
}

/// Path only; query strings would explode span cardinality.
fn span_name(url: &reqwest::Url) -> String {
    url.path().to_owned()
}

fn request_attributes(request: &reqwest::Request) -> Vec<KeyValue> {
    let url = request.url();
    let mut attributes = Vec::with_capacity(6);
    attributes.push(KeyValue::new(
        "http.request.method",
        request.method().as_str().to_owned(),
    ));
    attributes.push(KeyValue::new("url.full", url.as_str().to_owned()));
    attributes.push(KeyValue::new("url.scheme", url.scheme().to_owned()));
    if let Some(host) = url.host_str() {
        attributes.push(KeyValue::new("server.address", host.to_owned()));
    }
    if let Some(port) = url.port_or_known_default() {
        attributes.push(KeyValue::new("server.port", i64::from(port)));
    }
    attributes.push(KeyValue::new("url.path", url.path().to_owned()));
    attributes
}

/// Client-span status mapping: 4xx and 5xx are errors, anything outside
/// 100..=599 is invalid, the rest stays unset.
pub(crate) fn client_span_status(status: u16) -> Status {
    match status {
        100..=399 => Status::Unset,
        400..=599 => Status::error(""),
        other => Status::error(format!("invalid HTTP status code {other}")),
    }
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
    }
}
