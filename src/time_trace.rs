use reqwest::{Request, Response};
use reqwest_tracing::{default_on_request_end, reqwest_otel_span, ReqwestOtelSpanBackend};
use std::time::Instant;
use task_local_extensions::Extensions;

/// When the request left, kept in the middleware extensions.
struct SentAt(Instant);

/// Span backend for attendance backend calls.
///
/// Spans are named `attendance <METHOD> <path>` and record `time_elapsed_ms` once the
/// response (or the transport error) is in.
pub struct TimeTrace;

impl ReqwestOtelSpanBackend for TimeTrace {
    fn on_request_start(req: &Request, extension: &mut Extensions) -> tracing::Span {
        extension.insert(SentAt(Instant::now()));
        reqwest_otel_span!(
            name = format!("attendance {} {}", req.method(), req.url().path()),
            req,
            time_elapsed_ms = tracing::field::Empty
        )
    }

    fn on_request_end(
        span: &tracing::Span,
        outcome: &reqwest_middleware::Result<Response>,
        extension: &mut Extensions,
    ) {
        default_on_request_end(span, outcome);
        let Some(SentAt(sent_at)) = extension.get::<SentAt>() else {
            return;
        };
        span.record("time_elapsed_ms", sent_at.elapsed().as_millis() as i64);
    }
}
