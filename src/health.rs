//! Built-in Kubernetes health-check handlers.
//!
//! | Probe | Path | Question |
//! |---|---|---|
//! | **Liveness** | `/healthz` | Is the process alive? Failure → restart. |
//! | **Readiness** | `/readyz` | Can the pod serve traffic? Failure → pulled from load-balancer. |
//!
//! ```rust
//! use kumi::{handler_fn, health, Mux};
//!
//! let mux = Mux::new()
//!     .handle("GET /healthz", handler_fn(health::liveness))
//!     .handle("GET /readyz", handler_fn(health::readiness));
//! ```
//!
//! Register your own readiness handler instead if the pod must wait for
//! dependencies (database connections, downstream services, etc.).
//!
//! Health routes usually belong outside any authentication group. Register
//! them on the [`Mux`](crate::Mux) before adding such middleware, or keep
//! the middleware inside a [`group`](crate::Mux::group).

use std::io::Write;

use http::HeaderValue;
use http::header::CONTENT_TYPE;

use crate::{Request, ResponseWriter};

/// Liveness probe. Always `200 OK` with body `ok`.
pub fn liveness(w: &mut ResponseWriter<'_>, _req: &Request) {
    plain(w, b"ok");
}

/// Readiness probe (default implementation). Always `200 OK` with body `ready`.
pub fn readiness(w: &mut ResponseWriter<'_>, _req: &Request) {
    plain(w, b"ready");
}

fn plain(w: &mut ResponseWriter<'_>, body: &[u8]) {
    w.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    let _ = w.write_all(body);
}

#[cfg(test)]
mod tests {
    use http::{Method, StatusCode, Uri};
    use rstest::rstest;

    use super::*;
    use crate::Recorder;

    #[rstest]
    #[case::liveness(liveness, "ok")]
    #[case::readiness(readiness, "ready")]
    fn health_handler_answers_plain_text(
        #[case] check: fn(&mut ResponseWriter<'_>, &Request),
        #[case] expected: &str,
    ) {
        let req = Request::new(Method::GET, Uri::from_static("/healthz"));
        let mut rec = Recorder::new();

        check(&mut ResponseWriter::new(&mut rec, &req), &req);

        assert_eq!(rec.status(), StatusCode::OK);
        assert_eq!(rec.body(), expected.as_bytes());
        assert_eq!(rec.headers()[CONTENT_TYPE], "text/plain; charset=utf-8");
    }
}
