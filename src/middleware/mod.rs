//! Built-in middleware.
//!
//! Middleware is any `Fn(BoxedHandler) -> BoxedHandler`; register it with
//! [`Mux::middleware`](crate::Mux::middleware) or
//! [`Group::middleware`](crate::Group::middleware). This module holds the
//! ones kumi ships:
//!
//! - [`trace`]: per-request span with method, path, status, size, latency

mod trace;

pub use trace::trace;
