//! The server's streaming [`ResponseSink`].
//!
//! Handlers run on a blocking-pool thread while hyper writes the response
//! from the connection task. The two sides meet over channels:
//!
//! ```text
//! blocking thread                          connection task
//! ───────────────                          ───────────────
//! flush / full buffer / return ── head ──▶ response status + headers
//! flush / full buffer          ── chunk ─▶ ChannelBody::poll_frame
//! dispatch returns             ── close ─▶ end of body
//! ```
//!
//! The head leaves lazily, with the first chunk, so headers set after
//! `write_header` still make it out. A response that fits in one chunk and
//! is never flushed goes out with a `content-length`.
//!
//! The chunk queue is bounded: a slow client blocks the handler thread
//! instead of piling the response up in memory.
//!
//! HTTP/1.1 upgrade requests can be hijacked. The sink answers
//! `101 Switching Protocols` with the headers set so far and hands the
//! upgraded connection back as a blocking [`Connection`](crate::Connection).
//! HTTP/2 server push has no hyper server API, so push stays unsupported.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderMap, HeaderValue, StatusCode};
use hyper::body::{Body, Frame};
use hyper::upgrade::{OnUpgrade, Upgraded};
use hyper_util::rt::TokioIo;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::Error;
use crate::sink::{Flusher, Hijacked, Hijacker, ResponseSink};

/// Buffered body bytes that trigger a send without an explicit flush.
const CHUNK_SIZE: usize = 16 * 1024;

/// Chunks in flight between the handler thread and the connection.
const QUEUE_DEPTH: usize = 8;

/// Status line and headers, sent once.
pub(crate) type Head = (StatusCode, HeaderMap);

/// Creates a connected sink, head receiver and response body.
///
/// `upgrade` is the request's pending upgrade, if it asked for one;
/// `runtime` drives hijacked connections from the handler thread.
pub(crate) fn channel(
    upgrade: Option<OnUpgrade>,
    runtime: Handle,
) -> (StreamingSink, oneshot::Receiver<Head>, ChannelBody) {
    let (head_tx, head_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::channel(QUEUE_DEPTH);
    let sink = StreamingSink {
        status: None,
        headers: HeaderMap::new(),
        head: Some(head_tx),
        chunks: Some(chunk_tx),
        pending: BytesMut::new(),
        upgrade,
        runtime,
    };
    (sink, head_rx, ChannelBody { rx: chunk_rx })
}

pub(crate) struct StreamingSink {
    status: Option<StatusCode>,
    headers: HeaderMap,
    // `None` once the head is on its way.
    head: Option<oneshot::Sender<Head>>,
    // `None` after a hijack.
    chunks: Option<mpsc::Sender<Bytes>>,
    pending: BytesMut,
    upgrade: Option<OnUpgrade>,
    runtime: Handle,
}

impl StreamingSink {
    /// Sends whatever the handler left behind and closes the body.
    pub(crate) fn finish(mut self) {
        if self.head.is_some() && !self.headers.contains_key(CONTENT_LENGTH) {
            let status = self.status.unwrap_or(StatusCode::OK);
            if permits_body(status) {
                self.headers.insert(CONTENT_LENGTH, HeaderValue::from(self.pending.len()));
            }
        }
        self.send_head(StatusCode::OK);
        if let Err(e) = self.send_pending() {
            debug!("response tail dropped: {e}");
        }
    }

    fn send_head(&mut self, default: StatusCode) {
        let Some(tx) = self.head.take() else { return };
        let status = *self.status.get_or_insert(default);
        let headers = std::mem::take(&mut self.headers);
        if tx.send((status, headers)).is_err() {
            debug!(%status, "client went away before the response head");
        }
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = self.pending.split().freeze();
        let Some(tx) = &self.chunks else {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection was hijacked"));
        };
        tx.blocking_send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "client went away"))
    }
}

impl ResponseSink for StreamingSink {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status.get_or_insert(status);
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.chunks.is_none() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "connection was hijacked"));
        }
        self.status.get_or_insert(StatusCode::OK);
        self.pending.extend_from_slice(buf);
        if self.pending.len() >= CHUNK_SIZE {
            self.send_head(StatusCode::OK);
            self.send_pending()?;
        }
        Ok(buf.len())
    }

    fn as_flusher(&mut self) -> Option<&mut dyn Flusher> {
        Some(self)
    }

    fn as_hijacker(&mut self) -> Option<&mut dyn Hijacker> {
        // Once the head is gone the 101 can no longer be sent.
        if self.upgrade.is_some() && self.head.is_some() { Some(self) } else { None }
    }
}

impl Flusher for StreamingSink {
    fn flush(&mut self) {
        self.send_head(StatusCode::OK);
        if let Err(e) = self.send_pending() {
            debug!("flush dropped: {e}");
        }
    }
}

impl Hijacker for StreamingSink {
    fn hijack(&mut self) -> Result<Hijacked, Error> {
        let upgrade = self.upgrade.take().ok_or(Error::NotSupported("hijack"))?;
        self.chunks = None;
        self.pending.clear();
        self.status = Some(StatusCode::SWITCHING_PROTOCOLS);
        self.send_head(StatusCode::SWITCHING_PROTOCOLS);

        let upgraded = self.runtime.block_on(upgrade).map_err(|e| Error::Io(io::Error::other(e)))?;
        debug!("connection hijacked");

        // hyper replays bytes it read past the request head, so nothing is
        // left over for `buffered`.
        Ok(Hijacked {
            conn: Box::new(UpgradedConn { io: TokioIo::new(upgraded), runtime: self.runtime.clone() }),
            buffered: BytesMut::new(),
        })
    }
}

fn permits_body(status: StatusCode) -> bool {
    !(status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED)
}

/// Response body fed by a [`StreamingSink`].
pub(crate) struct ChannelBody {
    rx: mpsc::Receiver<Bytes>,
}

impl Body for ChannelBody {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, Infallible>>> {
        self.rx.poll_recv(cx).map(|chunk| chunk.map(|data| Ok(Frame::data(data))))
    }
}

/// An upgraded connection driven synchronously from a handler thread.
struct UpgradedConn {
    io: TokioIo<Upgraded>,
    runtime: Handle,
}

impl io::Read for UpgradedConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.runtime.block_on(self.io.read(buf))
    }
}

impl io::Write for UpgradedConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.runtime.block_on(self.io.write(buf))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.runtime.block_on(self.io.flush())
    }
}
