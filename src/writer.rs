//! The per-request response writer.
//!
//! [`ResponseWriter`] wraps the transport's [`ResponseSink`] for the
//! duration of one request. Middleware and handlers only ever see this
//! wrapper, which gives them three things the raw sink does not:
//!
//! - **Inspection**: [`status`](ResponseWriter::status),
//!   [`size`](ResponseWriter::size) and [`written`](ResponseWriter::written)
//!   report what the effective handler produced, so an outer middleware can
//!   log or measure it after `next.serve(..)` returns.
//! - **Commit protection**: the first status commit wins; later commits are
//!   dropped instead of reaching the sink as a second status line.
//! - **Interception**: when the router is about to commit `404` or `405`
//!   and the [`Mux`](crate::Mux) has a substitute handler for it, the
//!   substitute runs in its place (see below).
//!
//! # Interception
//!
//! ```text
//!   Fresh ── write_header(s) ─────────────────────────────▶ Committed(s)
//!     │                                                         ▲
//!     └─ write_header(404|405), substitute registered           │
//!          1. consume both substitutes (one shot per request)   │
//!          2. clear headers the router already set              │
//!          3. substitute.serve(self, req) ──────────────────────┘
//!          4. discard every later write from the router
//! ```
//!
//! Step 1 happens before the substitute runs, so a substitute that itself
//! answers 404 commits it normally instead of recursing. Step 4 exists
//! because control returns to the router after `write_header`, and the
//! router goes on to write its boilerplate body. Those writes report
//! success and go nowhere.

use std::io;

use http::{HeaderMap, StatusCode};
use tracing::{debug, trace};

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::sink::{Hijacked, PushOptions, ResponseSink};

/// Substitute handlers for the router's terminal outcomes.
#[derive(Clone, Default)]
pub(crate) struct Fallbacks {
    pub(crate) not_found: Option<BoxedHandler>,
    pub(crate) method_not_allowed: Option<BoxedHandler>,
}

impl Fallbacks {
    fn for_status(&self, status: StatusCode) -> Option<&BoxedHandler> {
        match status {
            StatusCode::NOT_FOUND => self.not_found.as_ref(),
            StatusCode::METHOD_NOT_ALLOWED => self.method_not_allowed.as_ref(),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.not_found.is_none() && self.method_not_allowed.is_none()
    }
}

/// Status-tracking, interception-aware wrapper around a [`ResponseSink`].
///
/// Implements [`std::io::Write`] for the body: the first write commits
/// `200 OK` if no status was committed yet.
pub struct ResponseWriter<'a> {
    sink: &'a mut dyn ResponseSink,
    req: &'a Request,
    status: Option<StatusCode>,
    size: usize,
    written: bool,
    discard: bool,
    // `None` once interception has fired, or when nothing can intercept.
    fallbacks: Option<Fallbacks>,
}

impl<'a> ResponseWriter<'a> {
    /// Wraps `sink` for `req` with interception disabled.
    ///
    /// The [`Mux`](crate::Mux) builds its writers itself; this constructor is
    /// for driving a handler or middleware chain directly.
    pub fn new(sink: &'a mut dyn ResponseSink, req: &'a Request) -> Self {
        Self::with_fallbacks(sink, req, Fallbacks::default())
    }

    pub(crate) fn with_fallbacks(
        sink: &'a mut dyn ResponseSink,
        req: &'a Request,
        fallbacks: Fallbacks,
    ) -> Self {
        Self {
            sink,
            req,
            status: None,
            size: 0,
            written: false,
            discard: false,
            fallbacks: (!fallbacks.is_empty()).then_some(fallbacks),
        }
    }

    /// The committed status, or `200 OK` if nothing was committed yet.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    /// Body bytes forwarded to the sink so far.
    pub fn size(&self) -> usize { self.size }

    /// Whether a status has been committed.
    pub fn written(&self) -> bool { self.written }

    /// The request this writer answers.
    pub fn request(&self) -> &'a Request { self.req }

    /// Headers to be sent with the status.
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        self.sink.headers_mut()
    }

    /// Commits `status`. Only the first call has any effect.
    pub fn write_header(&mut self, status: StatusCode) {
        if self.written {
            debug!(committed = %self.status(), ignored = %status, "duplicate status commit ignored");
            return;
        }

        if self.status.is_none() {
            if let Some(substitute) = self.take_fallback(status) {
                self.intercept(status, substitute);
                return;
            }
        }

        self.commit(status);
    }

    /// The immediately-wrapped sink, for callers that need capabilities this
    /// wrapper does not expose.
    pub fn get_mut(&mut self) -> &mut dyn ResponseSink {
        &mut *self.sink
    }

    /// Flushes buffered body bytes if the sink can; does nothing otherwise.
    pub fn flush(&mut self) {
        if let Some(flusher) = self.sink.as_flusher() {
            flusher.flush();
        }
    }

    /// Takes over the connection.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if the sink cannot hijack, otherwise whatever
    /// the sink's hijack returns.
    pub fn hijack(&mut self) -> Result<Hijacked, Error> {
        self.sink
            .as_hijacker()
            .ok_or(Error::NotSupported("hijack"))?
            .hijack()
    }

    /// Starts an HTTP/2 server push of `target`.
    ///
    /// # Errors
    ///
    /// [`Error::NotSupported`] if the sink cannot push, otherwise whatever
    /// the sink's push returns.
    pub fn push(&mut self, target: &str, opts: Option<&PushOptions>) -> Result<(), Error> {
        self.sink
            .as_pusher()
            .ok_or(Error::NotSupported("push"))?
            .push(target, opts)
    }

    fn commit(&mut self, status: StatusCode) {
        self.status = Some(status);
        self.written = true;
        self.sink.write_header(status);
    }

    /// Consumes every substitute if one is registered for `status`.
    fn take_fallback(&mut self, status: StatusCode) -> Option<BoxedHandler> {
        let substitute = self.fallbacks.as_ref()?.for_status(status)?.clone();
        self.fallbacks = None;
        Some(substitute)
    }

    fn intercept(&mut self, status: StatusCode, substitute: BoxedHandler) {
        debug!(%status, path = self.req.path(), "intercepting router response");

        self.sink.headers_mut().clear();

        let req = self.req;
        substitute.serve(self, req);

        self.discard = true;
    }
}

impl io::Write for ResponseWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.discard {
            trace!(len = buf.len(), "discarding write after interception");
            return Ok(buf.len());
        }
        if !self.written {
            self.commit(StatusCode::OK);
        }
        let n = self.sink.write(buf)?;
        self.size += n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        ResponseWriter::flush(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Write};
    use std::sync::{Arc, Mutex};

    use bytes::BytesMut;
    use http::header::CONTENT_TYPE;
    use http::{HeaderValue, Method, Uri};

    use super::*;
    use crate::handler::{Handler, handler_fn};
    use crate::sink::{Flusher, Hijacker, Pusher};

    // ── Mock sinks ────────────────────────────────────────────────────────────

    /// Supports no optional capability.
    #[derive(Default)]
    struct Plain {
        headers: HeaderMap,
        statuses: Vec<StatusCode>,
        body: Vec<u8>,
    }

    impl ResponseSink for Plain {
        fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
        fn write_header(&mut self, status: StatusCode) { self.statuses.push(status); }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.body.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    /// Supports flush, hijack and push, recording each call.
    #[derive(Default)]
    struct Full {
        inner: Plain,
        flushed: bool,
        hijacked: bool,
        pushed: Option<(String, Option<Method>)>,
    }

    impl ResponseSink for Full {
        fn headers_mut(&mut self) -> &mut HeaderMap { self.inner.headers_mut() }
        fn write_header(&mut self, status: StatusCode) { self.inner.write_header(status) }
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> { self.inner.write(buf) }
        fn as_flusher(&mut self) -> Option<&mut dyn Flusher> { Some(self) }
        fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> { Some(self) }
        fn as_pusher(&mut self) -> Option<&mut dyn Pusher> { Some(self) }
    }

    impl Flusher for Full {
        fn flush(&mut self) { self.flushed = true; }
    }

    impl Hijacker for Full {
        fn hijack(&mut self) -> Result<Hijacked, Error> {
            self.hijacked = true;
            Ok(Hijacked {
                conn: Box::new(Cursor::new(b"raw".to_vec())),
                buffered: BytesMut::from(&b"pending"[..]),
            })
        }
    }

    impl Pusher for Full {
        fn push(&mut self, target: &str, opts: Option<&PushOptions>) -> Result<(), Error> {
            self.pushed = Some((target.to_owned(), opts.and_then(|o| o.method.clone())));
            Ok(())
        }
    }

    /// Fails every body write.
    #[derive(Default)]
    struct Broken {
        headers: HeaderMap,
    }

    impl ResponseSink for Broken {
        fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
        fn write_header(&mut self, _status: StatusCode) {}
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::BrokenPipe, "peer went away"))
        }
    }

    fn get(path: &'static str) -> Request {
        Request::new(Method::GET, Uri::from_static(path))
    }

    fn substitute(status: StatusCode, body: &'static str) -> BoxedHandler {
        handler_fn(move |w, _req| {
            w.write_header(status);
            let _ = w.write_all(body.as_bytes());
        })
        .into_boxed_handler()
    }

    // Mirrors what the router's default 404 path does.
    fn router_not_found(w: &mut ResponseWriter<'_>) {
        w.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        w.write_header(StatusCode::NOT_FOUND);
        let _ = w.write_all(b"404 page not found\n");
    }

    // ── Basic bookkeeping ─────────────────────────────────────────────────────

    #[test]
    fn fresh_writer_reports_defaults() {
        let req = get("/");
        let mut sink = Plain::default();
        let w = ResponseWriter::new(&mut sink, &req);

        assert_eq!(w.status(), StatusCode::OK);
        assert!(!w.written());
        assert_eq!(w.size(), 0);
    }

    #[test]
    fn commit_then_write_reaches_sink() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.write_header(StatusCode::CREATED);
        assert_eq!(w.status(), StatusCode::CREATED);
        assert!(w.written());

        let n = w.write(b"test content").unwrap();
        assert_eq!(n, 12);
        assert_eq!(w.size(), 12);

        assert_eq!(sink.statuses, vec![StatusCode::CREATED]);
        assert_eq!(sink.body, b"test content");
    }

    #[test]
    fn write_without_header_commits_ok() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.write_all(b"test").unwrap();

        assert_eq!(w.status(), StatusCode::OK);
        assert!(w.written());
        assert_eq!(sink.statuses, vec![StatusCode::OK]);
    }

    #[test]
    fn first_commit_wins() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.write_header(StatusCode::ACCEPTED);
        w.write_header(StatusCode::BAD_REQUEST);

        assert_eq!(w.status(), StatusCode::ACCEPTED);
        assert_eq!(sink.statuses, vec![StatusCode::ACCEPTED]);
    }

    #[test]
    fn size_sums_all_writes_including_empty_and_large() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        let large = vec![b'x'; 1024 * 1024];
        w.write_all(b"").unwrap();
        w.write_all(&large).unwrap();
        w.write_all(b"tail").unwrap();

        assert_eq!(w.size(), large.len() + 4);
        assert_eq!(sink.body.len(), large.len() + 4);
    }

    #[test]
    fn failed_write_is_returned_and_not_counted() {
        let req = get("/");
        let mut sink = Broken::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        let err = w.write(b"data").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(w.size(), 0);
        assert!(w.written());
    }

    #[test]
    fn get_mut_returns_the_wrapped_sink() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.get_mut().write_header(StatusCode::IM_A_TEAPOT);

        // Bypassing the wrapper leaves its own bookkeeping untouched.
        assert!(!w.written());
        assert_eq!(sink.statuses, vec![StatusCode::IM_A_TEAPOT]);
    }

    // ── Capabilities ──────────────────────────────────────────────────────────

    #[test]
    fn capabilities_missing_on_plain_sink() {
        let req = get("/");
        let mut sink = Plain::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.flush();
        assert!(matches!(w.hijack(), Err(Error::NotSupported("hijack"))));
        assert!(matches!(w.push("/app.css", None), Err(Error::NotSupported("push"))));
    }

    #[test]
    fn capabilities_delegate_when_supported() {
        let req = get("/");
        let mut sink = Full::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        w.flush();

        let mut hijacked = w.hijack().unwrap();
        let mut raw = String::new();
        io::Read::read_to_string(&mut hijacked.conn, &mut raw).unwrap();
        assert_eq!(raw, "raw");
        assert_eq!(&hijacked.buffered[..], b"pending");

        let opts = PushOptions { method: Some(Method::HEAD), ..PushOptions::default() };
        w.push("/static/app.js", Some(&opts)).unwrap();

        assert!(sink.flushed);
        assert!(sink.hijacked);
        assert_eq!(sink.pushed, Some(("/static/app.js".to_owned(), Some(Method::HEAD))));
    }

    #[test]
    fn io_flush_goes_through_capability() {
        let req = get("/");
        let mut sink = Full::default();
        let mut w = ResponseWriter::new(&mut sink, &req);

        Write::flush(&mut w).unwrap();
        assert!(sink.flushed);
    }

    // ── Interception ──────────────────────────────────────────────────────────

    #[test]
    fn not_found_is_replaced_by_substitute() {
        let req = get("/missing");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(substitute(StatusCode::NOT_FOUND, "Custom 404")),
            method_not_allowed: None,
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        router_not_found(&mut w);

        assert_eq!(w.status(), StatusCode::NOT_FOUND);
        assert_eq!(w.size(), "Custom 404".len());
        assert_eq!(sink.statuses, vec![StatusCode::NOT_FOUND]);
        assert_eq!(sink.body, b"Custom 404");
        assert!(sink.headers.get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn substitute_outcome_can_differ_from_intercepted_status() {
        let req = get("/missing");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(substitute(StatusCode::OK, "landing page")),
            method_not_allowed: None,
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        router_not_found(&mut w);

        assert_eq!(w.status(), StatusCode::OK);
        assert_eq!(sink.statuses, vec![StatusCode::OK]);
        assert_eq!(sink.body, b"landing page");
    }

    #[test]
    fn method_not_allowed_is_replaced_by_substitute() {
        let req = get("/only-post");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: None,
            method_not_allowed: Some(substitute(StatusCode::METHOD_NOT_ALLOWED, "Custom 405")),
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        w.write_header(StatusCode::METHOD_NOT_ALLOWED);
        w.write_all(b"Method Not Allowed\n").unwrap();

        assert_eq!(w.size(), "Custom 405".len());
        assert_eq!(sink.body, b"Custom 405");
    }

    #[test]
    fn unregistered_status_commits_normally() {
        let req = get("/");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: None,
            method_not_allowed: Some(substitute(StatusCode::METHOD_NOT_ALLOWED, "Custom 405")),
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        router_not_found(&mut w);

        assert_eq!(sink.statuses, vec![StatusCode::NOT_FOUND]);
        assert_eq!(sink.body, b"404 page not found\n");
    }

    #[test]
    fn interception_is_one_shot() {
        let calls = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&calls);
        // The substitute itself answers 405 and 404; neither may re-intercept.
        let reentrant = handler_fn(move |w, _req| {
            *counter.lock().unwrap() += 1;
            w.write_header(StatusCode::METHOD_NOT_ALLOWED);
            w.write_header(StatusCode::NOT_FOUND);
            let _ = w.write_all(b"gone");
        })
        .into_boxed_handler();

        let req = get("/missing");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(Arc::clone(&reentrant)),
            method_not_allowed: Some(reentrant),
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        router_not_found(&mut w);

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(sink.statuses, vec![StatusCode::METHOD_NOT_ALLOWED]);
        assert_eq!(sink.body, b"gone");
    }

    #[test]
    fn interception_requires_fresh_writer() {
        let req = get("/");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(substitute(StatusCode::NOT_FOUND, "Custom 404")),
            method_not_allowed: None,
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        w.write_all(b"already streaming").unwrap();
        w.write_header(StatusCode::NOT_FOUND);

        assert_eq!(w.status(), StatusCode::OK);
        assert_eq!(sink.statuses, vec![StatusCode::OK]);
        assert_eq!(sink.body, b"already streaming");
    }

    #[test]
    fn silent_substitute_leaves_writer_uncommitted() {
        let req = get("/missing");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(handler_fn(|_w, _req| {}).into_boxed_handler()),
            method_not_allowed: None,
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        router_not_found(&mut w);

        assert!(!w.written());
        assert_eq!(w.size(), 0);
        assert!(sink.statuses.is_empty());
        assert!(sink.body.is_empty());
    }

    #[test]
    fn substitute_sees_the_original_request() {
        let seen = Arc::new(Mutex::new(String::new()));
        let sink_seen = Arc::clone(&seen);
        let req = get("/where/am/i");
        let mut sink = Plain::default();
        let fallbacks = Fallbacks {
            not_found: Some(
                handler_fn(move |_w, req| *sink_seen.lock().unwrap() = req.path().to_owned())
                    .into_boxed_handler(),
            ),
            method_not_allowed: None,
        };
        let mut w = ResponseWriter::with_fallbacks(&mut sink, &req, fallbacks);

        w.write_header(StatusCode::NOT_FOUND);

        assert_eq!(*seen.lock().unwrap(), "/where/am/i");
    }
}
