//! # kumi
//!
//! Scoped middleware chains and response interception for hyper services.
//!
//! kumi sits between the listener and your handlers. It does three things:
//!
//! - **Composes middleware**: globally or per group of routes, in a fixed
//!   order decided once at registration time.
//! - **Scopes routes**: [`Mux::route`] nests path prefixes,
//!   [`Mux::group`] isolates middleware stacks; both nest arbitrarily.
//! - **Watches the response**: every handler writes through a
//!   [`ResponseWriter`] that records status and size, swallows duplicate
//!   status commits, and can replace the router's 404/405 with your own
//!   handler after the fact.
//!
//! Routing itself is a radix tree ([`matchit`]) keyed by path, then method.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::io::Write;
//! use http::StatusCode;
//! use kumi::{handler_fn, middleware, BoxedHandler, Handler, Mux, Request, ResponseWriter, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = Mux::new()
//!         .middleware(middleware::trace())
//!         .route("/api/v1", |api| {
//!             api.middleware(require_token)
//!                .handle("GET /users/{id}", handler_fn(get_user));
//!         })
//!         .with_not_found(handler_fn(|w, _req| {
//!             w.write_header(StatusCode::NOT_FOUND);
//!             let _ = w.write_all(br#"{"error":"not found"}"#);
//!         }));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//!
//! fn require_token(next: BoxedHandler) -> BoxedHandler {
//!     handler_fn(move |w, req| match req.header("authorization") {
//!         Some(_) => next.serve(w, req),
//!         None => w.write_header(StatusCode::UNAUTHORIZED),
//!     })
//!     .into_boxed_handler()
//! }
//!
//! fn get_user(w: &mut ResponseWriter<'_>, req: &Request) {
//!     let id = req.param("id").unwrap_or("unknown");
//!     let _ = write!(w, r#"{{"id":"{id}"}}"#);
//! }
//! ```

mod error;
mod handler;
mod mux;
mod recorder;
mod request;
mod router;
mod scope;
mod server;
mod sink;
mod streaming;
mod writer;

pub mod health;
pub mod middleware;

pub use error::Error;
pub use handler::{BoxedHandler, Handler, HandlerFn, handler_fn};
pub use mux::Mux;
pub use recorder::Recorder;
pub use request::Request;
pub use scope::{Group, Middleware, Scope};
pub use server::Server;
pub use sink::{Connection, Flusher, Hijacked, Hijacker, PushOptions, Pusher, ResponseSink};
pub use writer::ResponseWriter;
