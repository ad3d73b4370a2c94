//! Minimal kumi example: scoped middleware, prefixes, custom 404/405.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!   LISTEN=127.0.0.1:8080 cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/api/v1/users/42 -H 'authorization: demo'
//!   curl http://localhost:3000/api/v1/users/42            # 401
//!   curl -X POST http://localhost:3000/api/v1/users/42    # custom 405
//!   curl http://localhost:3000/nowhere                    # custom 404
//!   curl http://localhost:3000/healthz
//!   curl -N http://localhost:3000/ticks                   # streamed events

use std::io::Write;
use std::thread;
use std::time::Duration;

use http::header::CONTENT_TYPE;
use http::{HeaderValue, StatusCode};
use kumi::{BoxedHandler, Handler, Mux, Request, ResponseWriter, Server, handler_fn, health, middleware};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let addr = std::env::var("LISTEN").unwrap_or_else(|_| "0.0.0.0:3000".to_owned());

    let app = Mux::new()
        .middleware(middleware::trace())
        .handle("GET /healthz", handler_fn(health::liveness))
        .handle("GET /readyz", handler_fn(health::readiness))
        .handle("GET /ticks", handler_fn(ticks))
        .route("/api/v1", |api| {
            api.middleware(require_token)
                .handle("GET /users/{id}", handler_fn(get_user))
                .handle("DELETE /users/{id}", handler_fn(delete_user));
        })
        .with_not_found(handler_fn(|w, req| {
            json_error(w, StatusCode::NOT_FOUND, &format!("no route for {}", req.path()));
        }))
        .with_method_not_allowed(handler_fn(|w, req| {
            json_error(w, StatusCode::METHOD_NOT_ALLOWED, &format!("{} not allowed", req.method()));
        }));

    Server::bind(&addr).serve(app).await.expect("server error");
}

// Rejects requests without an authorization header. Only wraps /api/v1.
fn require_token(next: BoxedHandler) -> BoxedHandler {
    handler_fn(move |w, req| {
        if req.header("authorization").is_none() {
            json_error(w, StatusCode::UNAUTHORIZED, "missing token");
            return;
        }
        next.serve(w, req);
    })
    .into_boxed_handler()
}

// GET /api/v1/users/{id}
fn get_user(w: &mut ResponseWriter<'_>, req: &Request) {
    let id = req.param("id").unwrap_or("unknown");
    w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    let _ = write!(w, r#"{{"id":"{id}","name":"alice"}}"#);
}

// DELETE /api/v1/users/{id} → 204 No Content
fn delete_user(w: &mut ResponseWriter<'_>, _req: &Request) {
    w.write_header(StatusCode::NO_CONTENT);
}

// GET /ticks → server-sent events, one per second
fn ticks(w: &mut ResponseWriter<'_>, _req: &Request) {
    w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    for n in 1..=5 {
        if write!(w, "data: tick {n}\n\n").is_err() {
            return;
        }
        w.flush();
        thread::sleep(Duration::from_secs(1));
    }
}

fn json_error(w: &mut ResponseWriter<'_>, status: StatusCode, message: &str) {
    w.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    w.write_header(status);
    let _ = write!(w, r#"{{"error":"{message}"}}"#);
}
