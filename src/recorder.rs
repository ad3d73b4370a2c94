//! In-memory [`ResponseSink`].
//!
//! Drives a [`Mux`](crate::Mux) without a network: dispatch into a
//! [`Recorder`], then inspect what the handler chain produced or turn it
//! into an `http::Response`.

use std::io;

use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use http_body_util::Full;

use crate::sink::{Flusher, ResponseSink};

/// Buffers a complete response.
///
/// The first status commit wins. A body write with nothing committed implies
/// `200 OK`. Headers stay mutable after the commit, as they would on a
/// buffered transport.
#[derive(Debug, Default)]
pub struct Recorder {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
    flushed: bool,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed status; `200 OK` if none was committed.
    pub fn status(&self) -> StatusCode {
        self.status.unwrap_or(StatusCode::OK)
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &[u8] { &self.body }

    /// Whether a flush was requested.
    pub fn flushed(&self) -> bool { self.flushed }

    /// Converts the recording into a response hyper can send.
    pub fn into_response(self) -> http::Response<Full<Bytes>> {
        let status = self.status();
        let mut res = http::Response::new(Full::new(self.body.freeze()));
        *res.status_mut() = status;
        *res.headers_mut() = self.headers;
        res
    }
}

impl ResponseSink for Recorder {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.status.get_or_insert(StatusCode::OK);
        self.body.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        Some(self)
    }
}

impl Flusher for Recorder {
    fn flush(&mut self) {
        self.status.get_or_insert(StatusCode::OK);
        self.flushed = true;
    }
}
