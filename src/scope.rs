//! Scopes: a path prefix plus an ordered middleware chain.
//!
//! Every registration happens inside a [`Scope`]. The root scope belongs to
//! the [`Mux`](crate::Mux); [`group`](Group::group) and
//! [`route`](Group::route) derive child scopes from it, and children derive
//! further children.
//!
//! # Copy on derive
//!
//! A child gets its own copy of the parent's chain at the moment it is
//! derived. Middleware added to the child never reaches the parent or its
//! siblings; middleware added to the parent afterwards never reaches the
//! child. The copied vector holds `Arc`s, so the copy is a handful of
//! reference-count increments.
//!
//! # Ordering
//!
//! For middleware registered as `m1, m2, …, mn` around handler `h`:
//!
//! ```text
//! m1 → m2 → … → mn → h → mn → … → m2 → m1
//! ```
//!
//! The first middleware registered sees the request first and the response
//! last.

use std::fmt;
use std::sync::Arc;

use crate::handler::{BoxedHandler, Handler};
use crate::router::Router;

/// A transformation from one handler into another, composed around it.
///
/// ```rust
/// use kumi::{handler_fn, BoxedHandler, Handler};
///
/// fn powered_by(next: BoxedHandler) -> BoxedHandler {
///     handler_fn(move |w, req| {
///         w.headers_mut().insert("x-powered-by", "kumi".parse().unwrap());
///         next.serve(w, req);
///     })
///     .into_boxed_handler()
/// }
/// ```
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

/// A path prefix and the middleware applied to routes registered under it.
#[derive(Clone, Default)]
pub struct Scope {
    prefix: String,
    middleware: Vec<Middleware>,
}

impl Scope {
    /// The root scope: no prefix, no middleware.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated prefix of every enclosing `route`.
    pub fn prefix(&self) -> &str { &self.prefix }

    /// Number of middleware layers a handler registered here receives.
    pub fn depth(&self) -> usize { self.middleware.len() }

    pub(crate) fn push(&mut self, mw: Middleware) {
        self.middleware.push(mw);
    }

    /// A child scope with a private copy of this chain and `prefix` appended.
    pub(crate) fn derive(&self, prefix: &str) -> Self {
        Self {
            prefix: format!("{}{}", self.prefix, prefix),
            middleware: self.middleware.clone(),
        }
    }

    /// Wraps `handler` so the first-registered middleware is outermost.
    pub fn compose(&self, handler: BoxedHandler) -> BoxedHandler {
        self.middleware.iter().rev().fold(handler, |next, mw| mw(next))
    }

    /// Inserts the prefix in front of the path part of `pattern`, leaving a
    /// leading method token alone: `"GET /users"` under `/api` becomes
    /// `"GET /api/users"`.
    pub fn prefix_pattern(&self, pattern: &str) -> String {
        if self.prefix.is_empty() {
            return pattern.to_owned();
        }
        let path_start = pattern.find('/').unwrap_or(0);
        format!("{}{}{}", &pattern[..path_start], self.prefix, &pattern[path_start..])
    }

    pub(crate) fn register(&self, router: &mut Router, pattern: &str, handler: BoxedHandler) {
        let full = self.prefix_pattern(pattern);
        router
            .insert(&full, self.compose(handler))
            .unwrap_or_else(|e| panic!("kumi: {e}"));
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("prefix", &self.prefix)
            .field("depth", &self.middleware.len())
            .finish()
    }
}

/// A derived scope, handed to [`group`](crate::Mux::group) and
/// [`route`](crate::Mux::route) callbacks.
///
/// Registrations made through a `Group` land in the same route table as the
/// [`Mux`](crate::Mux) it came from, wrapped in the group's own chain.
pub struct Group<'m> {
    router: &'m mut Router,
    scope: Scope,
}

impl<'m> Group<'m> {
    pub(crate) fn new(router: &'m mut Router, scope: Scope) -> Self {
        Self { router, scope }
    }

    pub fn scope(&self) -> &Scope { &self.scope }

    /// Appends `mw` to this group's chain. Applies to routes registered
    /// afterwards, in this group and in groups derived from it afterwards.
    pub fn middleware<F>(&mut self, mw: F) -> &mut Self
    where
        F: Fn(BoxedHandler) -> BoxedHandler + Send + Sync + 'static,
    {
        self.scope.push(Arc::new(mw));
        self
    }

    /// Runs `f` on a child group sharing this group's prefix.
    pub fn group<F>(&mut self, f: F) -> &mut Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let scope = self.scope.derive("");
        f(&mut Group::new(&mut *self.router, scope));
        self
    }

    /// Runs `f` on a child group whose prefix is this group's plus `prefix`.
    pub fn route<F>(&mut self, prefix: &str, f: F) -> &mut Self
    where
        F: FnOnce(&mut Group<'_>),
    {
        let scope = self.scope.derive(prefix);
        f(&mut Group::new(&mut *self.router, scope));
        self
    }

    /// Registers `handler` under `pattern`, prefixed and wrapped by this group.
    ///
    /// # Panics
    ///
    /// Panics if the router rejects the pattern (syntax error, host pattern,
    /// or a method already registered on that path).
    pub fn handle(&mut self, pattern: &str, handler: impl Handler) -> &mut Self {
        self.scope.register(&mut *self.router, pattern, handler.into_boxed_handler());
        self
    }
}
