//! HTTP listener running on a background task.
//!
//! [`HttpServer`] owns the bound socket until [`HttpServer::spawn`] hands it
//! to the accept loop. Every accepted connection is driven by hyper's HTTP/1
//! connection on its own task, with the [`ServerLimits`] applied to its
//! socket. The returned [`ServerHandle`] is the only way to stop it: a
//! one-shot notification closes the listener and asks every connection to
//! finish its current request, and [`ServerHandle::shutdown`] waits for that
//! drain for at most the given deadline before aborting the task.

mod stream;

use axum::Router;
use hyper::{body::Incoming, server::conn::http1, service::service_fn, Request};
use hyper_util::rt::{TokioIo, TokioTimer};
use std::{io, net::SocketAddr, time::Duration};
use tokio::{
    net::{TcpListener, TcpStream},
    sync::{oneshot, watch},
    task::{JoinHandle, JoinSet},
};
use tower::ServiceExt;
use tower_http::timeout::RequestBodyTimeoutLayer;
use tracing::{debug, warn};

use crate::utils::error::AppError;
use stream::{ActiveRequests, TimedStream};

/// Per-connection I/O limits. None of them ends a running handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerLimits {
    /// Upper bound for reading a request head, and for each body read.
    pub read_timeout: Duration,
    /// Upper bound for a socket write or flush that makes no progress.
    pub write_timeout: Duration,
    /// Keep-alive connections with nothing in flight close after this long
    /// without client bytes.
    pub idle_timeout: Duration,
}

impl Default for ServerLimits {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(60),
        }
    }
}

pub struct HttpServer {
    listener: TcpListener,
    app: Router,
    limits: ServerLimits,
    local_addr: SocketAddr,
}

impl HttpServer {
    /// Binds every interface on `port`.
    pub async fn bind(port: &str, router: Router, limits: ServerLimits) -> Result<Self, AppError> {
        Self::bind_addr(&format!("0.0.0.0:{port}"), router, limits).await
    }

    pub async fn bind_addr(
        addr: &str,
        router: Router,
        limits: ServerLimits,
    ) -> Result<Self, AppError> {
        let bind_err = |source| AppError::Bind {
            addr: addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(addr).await.map_err(bind_err)?;
        let local_addr = listener.local_addr().map_err(bind_err)?;
        debug!(
            addr = %local_addr,
            read_timeout = ?limits.read_timeout,
            write_timeout = ?limits.write_timeout,
            idle_timeout = ?limits.idle_timeout,
            "listener bound"
        );

        let app = router.layer(RequestBodyTimeoutLayer::new(limits.read_timeout));

        Ok(Self {
            listener,
            app,
            limits,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Starts serving on a new task. Connections are accepted from here on.
    pub fn spawn(self) -> ServerHandle {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let Self {
            listener,
            app,
            limits,
            ..
        } = self;

        let task = tokio::spawn(serve(listener, app, limits, shutdown_rx));

        ServerHandle { task, shutdown_tx }
    }
}

/// Accepts until told to stop, then waits for every connection to close.
/// Aborting this task drops the connections still open.
async fn serve(
    listener: TcpListener,
    app: Router,
    limits: ServerLimits,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> io::Result<()> {
    let (drain_tx, drain_rx) = watch::channel(false);
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            // a dropped sender also means stop
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    connections.spawn(serve_connection(
                        stream,
                        peer,
                        app.clone(),
                        limits,
                        drain_rx.clone(),
                    ));
                }
                Err(e) if is_transient(&e) => debug!(error = %e, "accept failed"),
                Err(e) => return Err(e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    drop(listener);
    let _ = drain_tx.send(true);
    debug!(open = connections.len(), "draining connections");
    while connections.join_next().await.is_some() {}
    Ok(())
}

/// Errors tied to a single incoming connection rather than the listener.
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
    )
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    app: Router,
    limits: ServerLimits,
    mut drain: watch::Receiver<bool>,
) {
    let active = ActiveRequests::default();
    let io = TokioIo::new(TimedStream::new(
        stream,
        active.clone(),
        limits.idle_timeout,
        limits.write_timeout,
    ));
    let service = service_fn(move |req: Request<Incoming>| {
        let guard = active.enter();
        let app = app.clone();
        async move {
            let resp = app.oneshot(req).await;
            drop(guard);
            resp
        }
    });

    let mut builder = http1::Builder::new();
    builder
        .timer(TokioTimer::new())
        .header_read_timeout(limits.read_timeout);
    let conn = builder.serve_connection(io, service);
    tokio::pin!(conn);

    let mut draining = false;
    loop {
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(e) = res {
                    debug!(%peer, error = %e, "connection closed with error");
                }
                break;
            }
            Ok(_) = drain.wait_for(|stop| *stop), if !draining => {
                draining = true;
                conn.as_mut().graceful_shutdown();
            }
        }
    }
}

pub struct ServerHandle {
    task: JoinHandle<io::Result<()>>,
    shutdown_tx: oneshot::Sender<()>,
}

impl ServerHandle {
    /// Completes only when the serving task ends without having been asked
    /// to, which is always a failure.
    pub async fn stopped(&mut self) -> AppError {
        match (&mut self.task).await {
            Ok(Ok(())) => AppError::ListenerExited,
            Ok(Err(e)) => AppError::Listener(e),
            Err(join) => AppError::ListenerTask(join.to_string()),
        }
    }

    /// Stops accepting, then waits up to `deadline` for accepted connections
    /// to finish. Past the deadline the serving task is aborted, and with it
    /// every connection still open.
    pub async fn shutdown(self, deadline: Duration) -> Result<(), AppError> {
        let Self {
            mut task,
            shutdown_tx,
        } = self;
        let _ = shutdown_tx.send(());

        match tokio::time::timeout(deadline, &mut task).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(AppError::Listener(e)),
            Ok(Err(join)) => Err(AppError::ListenerTask(join.to_string())),
            Err(_) => {
                warn!(?deadline, "drain deadline exceeded, aborting server task");
                task.abort();
                Err(AppError::ForcedShutdown(deadline))
            }
        }
    }
}
