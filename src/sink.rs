//! The raw response sink and its optional transport capabilities.
//!
//! A [`ResponseSink`] is whatever the transport hands kumi to write a
//! response into: headers may change until the status is committed, the
//! status is committed once, then body bytes stream.
//!
//! Some transports can do more: flush buffered bytes to the network, give
//! up the raw connection, or start an HTTP/2 server push. Those are separate
//! traits ([`Flusher`], [`Hijacker`], [`Pusher`]) that a sink *may* expose
//! through the `as_*` query methods. The queries default to `None`, so a
//! sink opts in per capability:
//!
//! ```rust
//! use std::io;
//! use http::{HeaderMap, StatusCode};
//! use kumi::{Flusher, ResponseSink};
//!
//! struct Stdout { headers: HeaderMap }
//!
//! impl ResponseSink for Stdout {
//!     fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
//!     fn write_header(&mut self, status: StatusCode) { println!("{status}"); }
//!     fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
//!         io::Write::write(&mut io::stdout(), buf)
//!     }
//!     fn as_flusher(&mut self) -> Option<&mut dyn Flusher> { Some(self) }
//! }
//!
//! impl Flusher for Stdout {
//!     fn flush(&mut self) { let _ = io::Write::flush(&mut io::stdout()); }
//! }
//! ```
//!
//! The capability is asked for at call time, not encoded in a type bound:
//! what a sink can do depends on the transport a deployment runs on.

use std::io;

use bytes::BytesMut;
use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;

/// One-shot-commit response output.
pub trait ResponseSink {
    /// Headers to be sent with the status. Mutations after the commit are
    /// the sink's business; most ignore them.
    fn headers_mut(&mut self) -> &mut HeaderMap;

    /// Commits the status line and the current headers.
    fn write_header(&mut self, status: StatusCode);

    /// Streams body bytes. Returns how many were accepted.
    fn write(&mut self, buf: &[u8]) -> io::Result<usize>;

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> { None }
    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> { None }
    fn as_pusher(&mut self) -> Option<&mut dyn Pusher> { None }
}

/// Sends buffered body bytes to the client now.
pub trait Flusher {
    fn flush(&mut self);
}

/// Hands the underlying connection over to the caller.
///
/// After a successful hijack the sink must not be written to again; the
/// caller owns the connection and is responsible for closing it.
pub trait Hijacker {
    fn hijack(&mut self) -> Result<Hijacked, Error>;
}

/// Initiates an HTTP/2 server push of `target`.
pub trait Pusher {
    fn push(&mut self, target: &str, opts: Option<&PushOptions>) -> Result<(), Error>;
}

/// A bidirectional byte stream taken over from the server.
pub trait Connection: io::Read + io::Write + Send {}

impl<T: io::Read + io::Write + Send> Connection for T {}

/// The result of a [`Hijacker::hijack`]: the raw connection plus any bytes
/// the server had already read from it but not yet consumed.
pub struct Hijacked {
    pub conn: Box<dyn Connection>,
    pub buffered: BytesMut,
}

/// Parameters of a pushed request.
#[derive(Debug, Default, Clone)]
pub struct PushOptions {
    /// `GET` when unset.
    pub method: Option<Method>,
    pub headers: HeaderMap,
}
