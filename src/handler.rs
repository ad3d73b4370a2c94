//! Handler trait and type erasure.
//!
//! # How handlers are stored
//!
//! The router holds handlers of *different* concrete types in one table, and
//! middleware wraps handlers it knows nothing about. Both need a single
//! type, so every handler is erased to a trait object behind an `Arc`:
//!
//! ```text
//! fn hello(w: &mut ResponseWriter<'_>, req: &Request) { … }  ← user writes this
//!        ↓ handler_fn(hello)
//! HandlerFn(hello)                                          ← implements Handler
//!        ↓ .into_boxed_handler()
//! Arc<dyn Handler>  (BoxedHandler)                          ← what middleware sees
//!        ↓
//! handler.serve(&mut w, &req)  at request time              ← one vtable dispatch
//! ```
//!
//! Middleware composition happens once, at registration. A request pays one
//! virtual call per middleware layer and nothing else.

use std::fmt;
use std::sync::Arc;

use crate::request::Request;
use crate::writer::ResponseWriter;

/// A request-handling unit.
///
/// Writes its outcome through the [`ResponseWriter`]; returns nothing.
/// Handlers are shared across concurrent requests, hence `Send + Sync`.
///
/// Plain functions and closures become handlers through [`handler_fn`].
/// Implement the trait directly for handlers that carry state:
///
/// ```rust
/// use std::io::Write;
/// use kumi::{Handler, Request, ResponseWriter};
///
/// struct Greeting(&'static str);
///
/// impl Handler for Greeting {
///     fn serve(&self, w: &mut ResponseWriter<'_>, _req: &Request) {
///         let _ = w.write_all(self.0.as_bytes());
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, w: &mut ResponseWriter<'_>, req: &Request);

    /// Erases the concrete type. Middleware receives and returns this form.
    fn into_boxed_handler(self) -> BoxedHandler
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

/// A type-erased handler shared across concurrent requests.
///
/// `Arc` gives cheap, thread-safe shared ownership: one middleware layer can
/// hold its `next` without knowing or copying it.
pub type BoxedHandler = Arc<dyn Handler>;

impl<H: Handler + ?Sized> Handler for Arc<H> {
    fn serve(&self, w: &mut ResponseWriter<'_>, req: &Request) {
        (**self).serve(w, req)
    }
}

/// Adapter that lets a plain function or closure act as a [`Handler`].
#[derive(Clone)]
pub struct HandlerFn<F>(F);

/// Wraps `f` as a [`Handler`].
///
/// ```rust
/// use std::io::Write;
/// use kumi::{handler_fn, Mux};
///
/// let mux = Mux::new().handle("GET /ping", handler_fn(|w, _req| {
///     let _ = w.write_all(b"pong");
/// }));
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: Fn(&mut ResponseWriter<'_>, &Request) + Send + Sync + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: Fn(&mut ResponseWriter<'_>, &Request) + Send + Sync + 'static,
{
    fn serve(&self, w: &mut ResponseWriter<'_>, req: &Request) {
        (self.0)(w, req)
    }
}

impl<F> fmt::Debug for HandlerFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerFn").finish_non_exhaustive()
    }
}
