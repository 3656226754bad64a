use dotenvy::dotenv;
use std::process::ExitCode;
use tracing::{error, info};

mod config;
#[cfg(feature = "database")]
mod db;
mod handlers;
mod lifecycle;
mod logging;
mod models;
mod routes;
mod server;
mod utils;

#[cfg(test)]
mod tests;

use config::AppConfig;
use lifecycle::{Dependencies, Lifecycle};
use server::{HttpServer, ServerLimits};
use utils::error::AppError;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            let _guard = logging::bootstrap();
            error!(error = %err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    logging::init(&cfg.log.level);
    info!(
        port = %cfg.server.port,
        db_host = %cfg.database.host,
        log_level = %cfg.log.level,
        jwt_configured = cfg.jwt.has_secrets(),
        "starting progressivity"
    );

    match run(&cfg).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "{}", err.context());
            ExitCode::FAILURE
        }
    }
}

async fn run(cfg: &AppConfig) -> Result<(), AppError> {
    let dependencies = Dependencies::connect(cfg).await?;

    let limits = ServerLimits::default();
    let server = match HttpServer::bind(&cfg.server.port, routes::router(), limits).await {
        Ok(server) => server,
        Err(err) => {
            dependencies.release().await;
            return Err(err);
        }
    };

    Lifecycle::new(server, dependencies, lifecycle::SHUTDOWN_DEADLINE)
        .run(lifecycle::shutdown_signal())
        .await
}
