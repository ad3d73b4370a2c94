//! Request tracing.

use std::time::Instant;

use tracing::{info, info_span};

use crate::handler::{BoxedHandler, Handler, handler_fn};

/// Opens an `info` span per request and emits one event when the rest of
/// the chain returns.
///
/// Register it first so it measures everything after it:
///
/// ```rust
/// use kumi::{middleware, Mux};
///
/// let mux = Mux::new().middleware(middleware::trace());
/// ```
pub fn trace() -> impl Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static {
    |next: BoxedHandler| {
        handler_fn(move |w, req| {
            let span = info_span!("request", method = %req.method(), path = req.path());
            let _guard = span.enter();
            let started = Instant::now();

            next.serve(w, req);

            info!(
                status = w.status().as_u16(),
                size = w.size(),
                latency_us = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX),
                "request completed"
            );
        })
        .into_boxed_handler()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::{Arc, Mutex};

    use http::{Method, StatusCode, Uri};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    use super::*;
    use crate::{Mux, Recorder, Request};

    #[derive(Debug, Default, PartialEq)]
    struct Completion {
        status: u64,
        size: u64,
        latency: bool,
    }

    impl Visit for Completion {
        fn record_u64(&mut self, field: &Field, value: u64) {
            match field.name() {
                "status" => self.status = value,
                "size" => self.size = value,
                "latency_us" => self.latency = true,
                _ => {}
            }
        }

        fn record_debug(&mut self, _field: &Field, _value: &dyn std::fmt::Debug) {}
    }

    /// Collects every "request completed" event.
    #[derive(Clone, Default)]
    struct Completions(Arc<Mutex<Vec<Completion>>>);

    impl<S: Subscriber> Layer<S> for Completions {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if event.metadata().fields().field("latency_us").is_none() {
                return;
            }
            let mut completion = Completion::default();
            event.record(&mut completion);
            self.0.lock().unwrap().push(completion);
        }
    }

    fn send(mux: &Mux, method: Method, path: &'static str) -> Recorder {
        let mut rec = Recorder::new();
        mux.dispatch(&mut rec, Request::new(method, Uri::from_static(path)));
        rec
    }

    #[test]
    fn completion_event_carries_status_size_and_latency() {
        let mux = Mux::new()
            .middleware(trace())
            .handle("POST /users", handler_fn(|w, _req| {
                w.write_header(StatusCode::CREATED);
                let _ = w.write_all(b"created");
            }))
            .handle("GET /users/{id}", handler_fn(|w, _req| {
                w.write_header(StatusCode::NOT_FOUND);
                let _ = w.write_all(b"no such user");
            }))
            .with_not_found(handler_fn(|w, _req| {
                w.write_header(StatusCode::NOT_FOUND);
                let _ = w.write_all(b"gone");
            }));

        let completions = Completions::default();
        let subscriber = tracing_subscriber::registry().with(completions.clone());
        tracing::subscriber::with_default(subscriber, || {
            assert_eq!(send(&mux, Method::POST, "/users").status(), StatusCode::CREATED);
            assert_eq!(send(&mux, Method::GET, "/users/7").body(), b"gone");
        });

        assert_eq!(
            *completions.0.lock().unwrap(),
            [
                Completion { status: 201, size: 7, latency: true },
                Completion { status: 404, size: 4, latency: true },
            ]
        );
    }
}
