//! Radix-tree pattern matcher.
//!
//! One radix tree per method, one for method-less patterns. O(path-length)
//! lookup via [`matchit`]. The router knows nothing about middleware or
//! scopes; it stores finished handler chains under finished patterns.
//!
//! # Pattern syntax
//!
//! ```text
//! [METHOD ]/path
//!
//! /users/{id}         one segment, read with req.param("id")
//! /files/{path...}    the rest of the path
//! /static/            subtree: /static/ and everything below it
//! /static/{$}         exactly /static/
//! ```
//!
//! A pattern without a method answers every method its path matches,
//! unless a pattern for the request's own method matches too. `GET` also
//! answers `HEAD`.
//!
//! # Terminal outcomes
//!
//! When nothing matches, the router writes its default 404 or 405 response
//! through the [`ResponseWriter`] like any handler would. That is the only
//! signal the [`Mux`](crate::Mux) needs to swap in a substitute handler.

use std::collections::{BTreeSet, HashMap};
use std::io::Write;
use std::sync::Arc;

use http::header::{ALLOW, CONTENT_LENGTH, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use http::{HeaderValue, Method, StatusCode};
use matchit::Router as MatchitRouter;
use tracing::debug;

use crate::error::Error;
use crate::handler::BoxedHandler;
use crate::request::Request;
use crate::writer::ResponseWriter;

// Synthetic catch-all used to implement subtree patterns. Never exposed
// as a request parameter.
const SUBTREE: &str = "__kumi_subtree";

/// A handler together with the parameters its route captured.
type Matched = (BoxedHandler, HashMap<String, String>);

/// Where a matchit route points.
#[derive(Clone, Copy)]
struct Slot {
    index: usize,
    // `false` for the exact path a subtree pattern claims on the side. A
    // later `{$}` pattern on the same path takes it over.
    explicit: bool,
}

/// One radix tree: either one method's routes or the method-less ones.
#[derive(Default)]
struct Tree {
    matcher: MatchitRouter<usize>,
    handlers: Vec<BoxedHandler>,
    routes: HashMap<String, Slot>,
}

impl Tree {
    fn insert(&mut self, pattern: &str, parsed: &Pattern, handler: BoxedHandler) -> Result<(), Error> {
        let duplicate = match &parsed.subtree {
            Some(subtree) => self.routes.contains_key(subtree),
            None => self.routes.get(&parsed.route).is_some_and(|slot| slot.explicit),
        };
        if duplicate {
            return Err(Error::DuplicatePattern { pattern: pattern.to_owned() });
        }

        match &parsed.subtree {
            Some(subtree) => {
                self.claim(pattern, subtree, handler.clone(), true)?;
                if !self.routes.contains_key(&parsed.route) {
                    self.claim(pattern, &parsed.route, handler, false)?;
                }
                Ok(())
            }
            None => self.claim(pattern, &parsed.route, handler, true),
        }
    }

    fn claim(
        &mut self,
        pattern: &str,
        route: &str,
        handler: BoxedHandler,
        explicit: bool,
    ) -> Result<(), Error> {
        if let Some(slot) = self.routes.get_mut(route) {
            self.handlers[slot.index] = handler;
            slot.explicit = explicit;
            return Ok(());
        }

        let index = self.handlers.len();
        self.matcher
            .insert(route, index)
            .map_err(|e| Error::InvalidPattern { pattern: pattern.to_owned(), reason: e.to_string() })?;
        self.handlers.push(handler);
        self.routes.insert(route.to_owned(), Slot { index, explicit });
        Ok(())
    }

    fn at(&self, path: &str) -> Option<Matched> {
        let matched = self.matcher.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .filter(|(k, _)| *k != SUBTREE)
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(&self.handlers[*matched.value]), params))
    }
}

/// How the router resolved one request.
pub(crate) enum Resolution {
    Matched(BoxedHandler),
    NotFound,
    MethodNotAllowed { allow: String },
}

/// The application's route table.
///
/// One radix tree per method plus one for method-less patterns. Filled
/// during setup through the [`Mux`](crate::Mux), read concurrently while
/// serving.
#[derive(Default)]
pub(crate) struct Router {
    by_method: HashMap<Method, Tree>,
    any: Tree,
}

impl Router {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` under a full `[METHOD ]/path` pattern.
    pub(crate) fn insert(&mut self, pattern: &str, handler: BoxedHandler) -> Result<(), Error> {
        let parsed = Pattern::parse(pattern)?;
        let tree = match &parsed.method {
            Some(method) => self.by_method.entry(method.clone()).or_default(),
            None => &mut self.any,
        };
        tree.insert(pattern, &parsed, handler)?;

        debug!(pattern, "route registered");
        Ok(())
    }

    /// Resolves `req` and, on a match, stores its path parameters in it.
    ///
    /// The request method's tree is searched first (`HEAD` falls back to
    /// `GET`), then the method-less tree. Only when neither matches but
    /// another method's tree does is the outcome a 405.
    pub(crate) fn resolve(&self, req: &mut Request) -> Resolution {
        let path = req.path();
        let method = req.method();

        let found = self
            .lookup(method, path)
            .or_else(|| {
                if *method == Method::HEAD { self.lookup(&Method::GET, path) } else { None }
            })
            .or_else(|| self.any.at(path));

        match found {
            Some((handler, params)) => {
                req.params = params;
                Resolution::Matched(handler)
            }
            None => match self.allowed(path) {
                Some(allow) => Resolution::MethodNotAllowed { allow },
                None => Resolution::NotFound,
            },
        }
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<Matched> {
        self.by_method.get(method)?.at(path)
    }

    /// Value for the `allow` header: every method with a route for `path`.
    fn allowed(&self, path: &str) -> Option<String> {
        let mut methods: BTreeSet<&str> = self
            .by_method
            .iter()
            .filter(|(_, tree)| tree.matcher.at(path).is_ok())
            .map(|(method, _)| method.as_str())
            .collect();
        if methods.is_empty() {
            return None;
        }
        if methods.contains("GET") {
            methods.insert("HEAD");
        }
        Some(methods.into_iter().collect::<Vec<_>>().join(", "))
    }
}

/// A parsed `[METHOD ]/path` pattern in matchit's syntax.
#[derive(Debug, PartialEq)]
struct Pattern {
    method: Option<Method>,
    route: String,
    // Extra catch-all route for trailing-slash patterns.
    subtree: Option<String>,
}

impl Pattern {
    fn parse(pattern: &str) -> Result<Self, Error> {
        let invalid = |reason: &str| Error::InvalidPattern {
            pattern: pattern.to_owned(),
            reason: reason.to_owned(),
        };

        let trimmed = pattern.trim();
        if trimmed.is_empty() {
            return Err(invalid("empty pattern"));
        }

        let (method, path) = match trimmed.split_once(char::is_whitespace) {
            Some((token, rest)) => {
                let method = Method::from_bytes(token.as_bytes())
                    .map_err(|_| invalid("invalid method token"))?;
                (Some(method), rest.trim_start())
            }
            None => (None, trimmed),
        };

        if !path.starts_with('/') {
            return Err(invalid("host patterns are not supported; path must start with `/`"));
        }

        let mut route = String::with_capacity(path.len());
        let mut segments = path.split('/').skip(1).peekable();
        let mut subtree = None;
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            route.push('/');
            match segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
                Some("$") if last => return Ok(Self { method, route, subtree: None }),
                Some("$") => return Err(invalid("`{$}` must be the final segment")),
                Some(name) => {
                    let (name, rest) = match name.strip_suffix("...") {
                        Some(name) => (name, true),
                        None => (name, false),
                    };
                    if !is_wildcard_name(name) {
                        return Err(invalid("wildcard name must be a non-empty identifier"));
                    }
                    if !rest {
                        route.push_str(segment);
                    } else if last {
                        route.push_str(&format!("{{*{name}}}"));
                    } else {
                        return Err(invalid("`{name...}` must be the final segment"));
                    }
                }
                None if segment.contains(['{', '}']) => {
                    return Err(invalid("a wildcard must be a whole segment"));
                }
                None if segment.is_empty() && last => {
                    subtree = Some(format!("{route}{{*{SUBTREE}}}"));
                }
                None => route.push_str(segment),
            }
        }

        Ok(Self { method, route, subtree })
    }
}

fn is_wildcard_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
}

// ── Default terminal responses ────────────────────────────────────────────────

/// The default 404 response.
pub(crate) fn not_found(w: &mut ResponseWriter<'_>) {
    plain_error(w, StatusCode::NOT_FOUND, "404 page not found");
}

/// The default 405 response.
pub(crate) fn method_not_allowed(w: &mut ResponseWriter<'_>, allow: &str) {
    if let Ok(value) = HeaderValue::from_str(allow) {
        w.headers_mut().insert(ALLOW, value);
    }
    plain_error(w, StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
}

fn plain_error(w: &mut ResponseWriter<'_>, status: StatusCode, message: &str) {
    let headers = w.headers_mut();
    headers.remove(CONTENT_LENGTH);
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    w.write_header(status);
    if let Err(e) = writeln!(w, "{message}") {
        debug!(%status, "default response body not written: {e}");
    }
}
