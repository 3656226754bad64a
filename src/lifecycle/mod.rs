//! Process lifecycle: serve until the first termination signal, then drain
//! the server within a deadline and release dependencies.
//!
//! Shutdown is strictly ordered: stop accepting, drain in-flight requests,
//! close the database. The database is closed on every exit path that got
//! this far, including a forced shutdown.

use std::{fmt, future::Future, time::Duration};
use tracing::{info, warn};

use crate::config::AppConfig;
#[cfg(feature = "database")]
use crate::db::Database;
use crate::server::HttpServer;
use crate::utils::error::AppError;

/// How long in-flight requests get once shutdown starts.
pub const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Interrupt,
    Terminate,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Interrupt => f.write_str("SIGINT"),
            Signal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Waits for SIGINT or SIGTERM and reports which one arrived first.
pub async fn shutdown_signal() -> Signal {
    let ctrl_c = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => Signal::Interrupt,
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGINT");
                std::future::pending().await
            }
        }
    };
    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                Signal::Terminate
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending().await
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<Signal>();

    tokio::select! {
        s = ctrl_c => s,
        s = terminate => s,
    }
}

/// External resources released once the server has stopped. The default
/// value holds nothing.
#[derive(Debug, Default)]
pub struct Dependencies {
    #[cfg(feature = "database")]
    database: Option<Database>,
}

impl Dependencies {
    /// Opens and verifies every dependency this build needs.
    #[cfg_attr(not(feature = "database"), allow(unused_variables))]
    pub async fn connect(cfg: &AppConfig) -> Result<Self, AppError> {
        Ok(Self {
            #[cfg(feature = "database")]
            database: Some(Database::connect(&cfg.database).await?),
        })
    }

    pub async fn release(self) {
        #[cfg(feature = "database")]
        if let Some(database) = self.database {
            database.close().await;
        }
    }
}

pub struct Lifecycle {
    server: HttpServer,
    dependencies: Dependencies,
    shutdown_deadline: Duration,
}

impl Lifecycle {
    pub fn new(
        server: HttpServer,
        dependencies: Dependencies,
        shutdown_deadline: Duration,
    ) -> Self {
        Self {
            server,
            dependencies,
            shutdown_deadline,
        }
    }

    /// Serves until `signal` resolves or the server fails on its own.
    ///
    /// Returns `Ok` only for a graceful stop. A drain that outlives the
    /// deadline comes back as [`AppError::ForcedShutdown`].
    pub async fn run<S>(self, signal: S) -> Result<(), AppError>
    where
        S: Future<Output = Signal>,
    {
        let Self {
            server,
            dependencies,
            shutdown_deadline,
        } = self;

        info!(addr = %server.local_addr(), "server listening");
        let mut handle = server.spawn();

        let trigger = tokio::select! {
            sig = signal => Ok(sig),
            err = handle.stopped() => Err(err),
        };

        let served = match trigger {
            Ok(sig) => {
                info!(signal = %sig, "shutting down server");
                handle.shutdown(shutdown_deadline).await
            }
            Err(err) => Err(err),
        };

        match &served {
            Ok(()) => info!("server stopped"),
            Err(AppError::ForcedShutdown(_)) => warn!("in-flight requests dropped"),
            // reported by the caller
            Err(_) => {}
        }

        dependencies.release().await;
        served
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use crate::server::ServerLimits;
    use tokio::sync::oneshot;

    #[test]
    fn signal_names() {
        assert_eq!(Signal::Interrupt.to_string(), "SIGINT");
        assert_eq!(Signal::Terminate.to_string(), "SIGTERM");
    }

    #[test]
    fn default_deadline_is_ten_seconds() {
        assert_eq!(SHUTDOWN_DEADLINE, Duration::from_secs(10));
    }

    #[tokio::test]
    async fn signal_stops_idle_server() {
        let server =
            HttpServer::bind_addr("127.0.0.1:0", routes::router(), ServerLimits::default())
                .await
                .unwrap();
        let (tx, rx) = oneshot::channel();
        let lifecycle = Lifecycle::new(server, Dependencies::default(), SHUTDOWN_DEADLINE);
        let lifecycle = tokio::spawn(lifecycle.run(async move {
            rx.await.unwrap_or(Signal::Terminate)
        }));

        tx.send(Signal::Interrupt).unwrap();
        let res = tokio::time::timeout(Duration::from_secs(5), lifecycle)
            .await
            .expect("lifecycle hung")
            .unwrap();
        assert!(res.is_ok(), "{res:?}");
    }

    /// Raises `raw` until the waiting `shutdown_signal` picks it up.
    #[cfg(unix)]
    async fn deliver(raw: libc::c_int) -> Signal {
        let mut waiting = tokio::spawn(shutdown_signal());
        for _ in 0..50 {
            assert_eq!(unsafe { libc::raise(raw) }, 0);
            if let Ok(sig) = tokio::time::timeout(Duration::from_millis(100), &mut waiting).await {
                return sig.unwrap();
            }
        }
        panic!("signal {raw} never observed");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn os_signals_are_reported() {
        use tokio::signal::unix::{signal, SignalKind};

        // installs the handlers up front so a raise never hits the default action
        let _term = signal(SignalKind::terminate()).unwrap();
        let _int = signal(SignalKind::interrupt()).unwrap();

        assert_eq!(deliver(libc::SIGTERM).await, Signal::Terminate);
        assert_eq!(deliver(libc::SIGINT).await, Signal::Interrupt);
    }
}
