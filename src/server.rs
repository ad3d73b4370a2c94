//! HTTP server and graceful shutdown.
//!
//! # Request path
//!
//! hyper hands over a request; the body is collected and the request is
//! dispatched through the [`Mux`] on a blocking-pool thread. Handlers are
//! synchronous and may block, so they never run on the async worker
//! threads. They write into a streaming sink: the response head goes back
//! to hyper as soon as the handler flushes or returns, and body chunks
//! follow while the handler keeps running.
//!
//! Under this server [`ResponseWriter::flush`](crate::ResponseWriter::flush)
//! reaches the client, HTTP/1.1 upgrade requests can be
//! [hijacked](crate::ResponseWriter::hijack), and
//! [push](crate::ResponseWriter::push) reports
//! [`Error::NotSupported`](crate::Error::NotSupported).
//!
//! # Graceful shutdown and Kubernetes
//!
//! When Kubernetes terminates a pod it sends **SIGTERM** and waits
//! `terminationGracePeriodSeconds` (default 30 s) before sending SIGKILL.
//!
//! The server reacts by:
//! 1. Immediately stopping `listener.accept()`, so no new connections are made.
//! 2. Letting every in-flight connection task run to completion.
//! 3. Returning from [`Server::serve`], which lets `main` exit cleanly.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http::StatusCode;
use http::header::UPGRADE;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tokio::runtime::Handle;
use tracing::{error, info, warn};

use crate::error::Error;
use crate::mux::Mux;
use crate::request::Request;
use crate::streaming;

type ResponseBody = UnsyncBoxBody<Bytes, Infallible>;

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind to `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use kumi::Server;
    /// let server = Server::bind("0.0.0.0:3000");
    /// ```
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr
            .parse()
            .unwrap_or_else(|e| panic!("kumi: invalid socket address `{addr}`: {e}"));
        Self { addr }
    }

    /// Serves `mux` until SIGTERM or Ctrl-C, then drains in-flight
    /// connections.
    pub async fn serve(self, mux: Mux) -> Result<(), Error> {
        self.serve_with_shutdown(mux, shutdown_signal()).await
    }

    /// Serves `mux` until `signal` resolves, then drains in-flight
    /// connections.
    pub async fn serve_with_shutdown<S>(self, mux: Mux, signal: S) -> Result<(), Error>
    where
        S: Future<Output = ()>,
    {
        let listener = TcpListener::bind(self.addr).await?;
        run(listener, mux, signal).await
    }
}

/// Accept loop over an already bound listener.
async fn run<S>(listener: TcpListener, mux: Mux, signal: S) -> Result<(), Error>
where
    S: Future<Output = ()>,
{
    let mux = Arc::new(mux);

    info!(addr = %listener.local_addr()?, "kumi listening");

    let mut tasks = tokio::task::JoinSet::new();

    tokio::pin!(signal);

    loop {
        tokio::select! {
            // Shutdown is checked first so a signal stops accepting even
            // while connections are queued.
            biased;

            () = &mut signal => {
                info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, remote_addr) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let mux = Arc::clone(&mux);
                let io = TokioIo::new(stream);

                tasks.spawn(async move {
                    let svc = service_fn(move |req| handle(Arc::clone(&mux), req));

                    // HTTP/1.1 or HTTP/2, whichever the client negotiates.
                    // Upgrades stay available for hijacking handlers.
                    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                        .serve_connection_with_upgrades(io, svc)
                        .await
                    {
                        error!(peer = %remote_addr, "connection error: {e}");
                    }
                });
            }

            // Reap finished connection tasks so the set does not grow
            // without bound.
            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    while tasks.join_next().await.is_some() {}

    info!("kumi stopped");
    Ok(())
}

// ── Request handling ──────────────────────────────────────────────────────────

/// Turns one hyper request into one response. Never fails: body errors
/// answer 400, a handler that panics before sending anything answers 500.
async fn handle<B>(
    mux: Arc<Mux>,
    mut req: http::Request<B>,
) -> Result<http::Response<ResponseBody>, Infallible>
where
    B: Body,
    B::Error: std::fmt::Display,
{
    let upgrade = req.headers().contains_key(UPGRADE).then(|| hyper::upgrade::on(&mut req));

    let (parts, body) = req.into_parts();
    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(path = parts.uri.path(), "failed to read request body: {e}");
            return Ok(status_only(StatusCode::BAD_REQUEST));
        }
    };
    let req = Request::from_parts(parts, body);

    let (mut sink, head, body) = streaming::channel(upgrade, Handle::current());
    let dispatched = tokio::task::spawn_blocking(move || {
        mux.dispatch(&mut sink, req);
        sink.finish();
    });

    match head.await {
        Ok((status, headers)) => {
            // Still streaming: a later panic can only cut the body short.
            tokio::spawn(async move {
                if let Err(e) = dispatched.await {
                    error!("handler fault after response head: {e}");
                }
            });
            let mut res = http::Response::new(body.boxed_unsync());
            *res.status_mut() = status;
            *res.headers_mut() = headers;
            Ok(res)
        }
        Err(_) => {
            if let Err(e) = dispatched.await {
                error!("handler fault: {e}");
            }
            Ok(status_only(StatusCode::INTERNAL_SERVER_ERROR))
        }
    }
}

fn status_only(status: StatusCode) -> http::Response<ResponseBody> {
    let mut res = http::Response::new(Full::new(Bytes::new()).boxed_unsync());
    *res.status_mut() = status;
    res
}

// ── Shutdown signal ───────────────────────────────────────────────────────────

/// Resolves on the first shutdown signal the process receives.
///
/// On Unix this listens for both **SIGTERM** (sent by `kubectl` and the
/// Kubernetes control plane) and **SIGINT** (Ctrl-C, for local dev).
/// On Windows only Ctrl-C is available.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    // `pending()` never resolves, so on non-Unix platforms the SIGTERM arm is
    // effectively disabled.
    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}
