//! The dispatcher: route table, root scope and substitute handlers.

use std::sync::Arc;

use tracing::trace;

use crate::handler::{BoxedHandler, Handler};
use crate::request::Request;
use crate::router::{self, Resolution, Router};
use crate::scope::{Group, Scope};
use crate::sink::ResponseSink;
use crate::writer::{Fallbacks, ResponseWriter};

/// The application multiplexer.
///
/// Build it once at startup, then hand it to [`Server::serve`](crate::Server::serve)
/// or call [`dispatch`](Mux::dispatch) yourself. Builder methods take and
/// return `self`; [`group`](Mux::group) and [`route`](Mux::route) callbacks
/// receive a [`Group`] that chains through `&mut`.
///
/// ```rust
/// use std::io::Write;
/// use http::StatusCode;
/// use kumi::{handler_fn, middleware, Handler, Mux};
///
/// let mux = Mux::new()
///     .middleware(middleware::trace())
///     .handle("GET /", handler_fn(|w, _req| { let _ = w.write_all(b"home"); }))
///     .route("/api", |api| {
///         api.middleware(|next| next) // only /api routes see this layer
///            .handle("GET /users/{id}", handler_fn(|w, req| {
///                let _ = write!(w, "user {}", req.param("id").unwrap_or("?"));
///            }));
///     })
///     .with_not_found(handler_fn(|w, _req| {
///         w.write_header(StatusCode::NOT_FOUND);
///         let _ = w.write_all(b"nothing here");
///     }));
/// ```
#[derive(Default)]
pub struct Mux {
    router: Router,
    scope: Scope,
    fallbacks: Fallbacks,
}

impl Mux {
    pub fn new() -> Self {
        Self { router: Router::new(), scope: Scope::new(), fallbacks: Fallbacks::default() }
    }

    /// Appends `mw` to the root chain.
    ///
    /// Applies to routes registered afterwards, including those in groups
    /// derived afterwards. Middleware runs in registration order: the first
    /// one added sees the request first and the response last.
    pub fn middleware<F>(mut self, mw: F) -> Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        self.scope.push(Arc::new(mw));
        self
    }

    /// Runs `f` on a group with a copy of the root chain. Middleware the
    /// group adds stays in the group.
    pub fn group<F>(mut self, f: F) -> Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let scope = self.scope.derive("");
        f(&mut Group::new(&mut self.router, scope));
        self
    }

    /// Like [`group`](Mux::group), with `prefix` prepended to every pattern
    /// registered inside. Prefixes nest.
    pub fn route<F>(mut self, prefix: &str, f: F) -> Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let scope = self.scope.derive(prefix);
        f(&mut Group::new(&mut self.router, scope));
        self
    }

    /// Registers `handler` under `pattern`, wrapped in the root chain.
    ///
    /// # Panics
    ///
    /// Panics if the router rejects the pattern (syntax error, host pattern,
    /// or a method already registered on that path).
    pub fn handle(mut self, pattern: &str, handler: impl Handler) -> Self {
        self.scope.register(&mut self.router, pattern, handler.into_boxed_handler());
        self
    }

    /// Substitute for the router's default 404.
    ///
    /// The substitute is not wrapped in any middleware; it runs in place of
    /// the router's default response, which middleware never wraps either.
    pub fn with_not_found(mut self, handler: impl Handler) -> Self {
        self.fallbacks.not_found = Some(handler.into_boxed_handler());
        self
    }

    /// Substitute for the router's default 405.
    pub fn with_method_not_allowed(mut self, handler: impl Handler) -> Self {
        self.fallbacks.method_not_allowed = Some(handler.into_boxed_handler());
        self
    }

    /// Drops the 404 substitute; the router's default answers again.
    pub fn without_not_found(mut self) -> Self {
        self.fallbacks.not_found = None;
        self
    }

    /// Drops the 405 substitute; the router's default answers again.
    pub fn without_method_not_allowed(mut self) -> Self {
        self.fallbacks.method_not_allowed = None;
        self
    }

    /// Serves one request into `sink`.
    ///
    /// Resolves the route, wraps `sink` in a fresh [`ResponseWriter`] and
    /// runs the route's pre-composed chain, or the router's default 404/405
    /// (which a registered substitute intercepts).
    pub fn dispatch(&self, sink: &mut dyn ResponseSink, mut req: Request) {
        let resolution = self.router.resolve(&mut req);
        let mut w = ResponseWriter::with_fallbacks(sink, &req, self.fallbacks.clone());

        match resolution {
            Resolution::Matched(handler) => handler.serve(&mut w, &req),
            Resolution::NotFound => router::not_found(&mut w),
            Resolution::MethodNotAllowed { allow } => router::method_not_allowed(&mut w, &allow),
        }

        trace!(
            method = %req.method(),
            path = req.path(),
            status = w.status().as_u16(),
            size = w.size(),
            "dispatched"
        );
    }
}
