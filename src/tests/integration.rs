use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use axum::{routing::get, Router};
use tokio::{
    net::TcpStream,
    sync::{oneshot, Notify},
    task::JoinHandle,
    time::sleep,
};

use crate::lifecycle::{Dependencies, Lifecycle, Signal, SHUTDOWN_DEADLINE};
use crate::routes;
use crate::server::{HttpServer, ServerLimits};
use crate::utils::error::AppError;

struct TestCtx {
    base: String,
    signal: oneshot::Sender<Signal>,
    lifecycle: JoinHandle<Result<(), AppError>>,
}

/// Health route plus `/slow`, which notifies `started` and then sleeps.
fn app_with_slow_route(delay: Duration, started: Arc<Notify>) -> Router {
    routes::router().route(
        "/slow",
        get(move || {
            let started = started.clone();
            async move {
                started.notify_one();
                sleep(delay).await;
                "done"
            }
        }),
    )
}

async fn start(app: Router, deadline: Duration) -> TestCtx {
    let server = HttpServer::bind_addr("127.0.0.1:0", app, ServerLimits::default())
        .await
        .expect("bind");
    let base = format!("http://{}", server.local_addr());

    let (tx, rx) = oneshot::channel();
    let lifecycle = Lifecycle::new(server, Dependencies::default(), deadline);
    let lifecycle = tokio::spawn(lifecycle.run(async move {
        rx.await.unwrap_or(Signal::Terminate)
    }));

    TestCtx {
        base,
        signal: tx,
        lifecycle,
    }
}

fn spawn_get(url: String) -> JoinHandle<reqwest::Result<(reqwest::StatusCode, String)>> {
    tokio::spawn(async move {
        let resp = reqwest::get(url).await?;
        let status = resp.status();
        Ok((status, resp.text().await?))
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_served_without_database() {
    let ctx = start(routes::router(), Duration::from_secs(10)).await;

    for _ in 0..3 {
        let resp = reqwest::get(format!("{}/api/v1/health", ctx.base)).await.unwrap();
        assert_eq!(resp.status(), reqwest::StatusCode::OK);
        assert_eq!(
            resp.headers()[reqwest::header::CONTENT_TYPE],
            "application/json"
        );
        assert_eq!(resp.text().await.unwrap(), r#"{"status":"ok"}"#);
    }

    ctx.signal.send(Signal::Terminate).unwrap();
    ctx.lifecycle.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_shutdown_finishes_well_before_deadline() {
    let ctx = start(routes::router(), Duration::from_secs(10)).await;
    let addr = ctx.base.trim_start_matches("http://").to_string();

    let began = Instant::now();
    ctx.signal.send(Signal::Interrupt).unwrap();
    let res = ctx.lifecycle.await.unwrap();

    assert!(res.is_ok(), "{res:?}");
    assert!(began.elapsed() < Duration::from_secs(2));
    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_flight_request_completes_during_shutdown() {
    let started = Arc::new(Notify::new());
    let app = app_with_slow_route(Duration::from_secs(3), started.clone());
    let ctx = start(app, Duration::from_secs(10)).await;
    let addr = ctx.base.trim_start_matches("http://").to_string();

    let request = spawn_get(format!("{}/slow", ctx.base));
    started.notified().await;
    ctx.signal.send(Signal::Terminate).unwrap();

    // listener goes away right away, the accepted request keeps running
    sleep(Duration::from_millis(200)).await;
    assert!(TcpStream::connect(addr).await.is_err());

    let (status, body) = request.await.unwrap().unwrap();
    assert_eq!(status, reqwest::StatusCode::OK);
    assert_eq!(body, "done");

    let res = ctx.lifecycle.await.unwrap();
    assert!(res.is_ok(), "{res:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn request_outliving_deadline_forces_shutdown() {
    let started = Arc::new(Notify::new());
    let app = app_with_slow_route(Duration::from_secs(15), started.clone());
    let deadline = Duration::from_millis(500);
    let ctx = start(app, deadline).await;

    let request = spawn_get(format!("{}/slow", ctx.base));
    started.notified().await;

    let began = Instant::now();
    ctx.signal.send(Signal::Terminate).unwrap();
    let res = ctx.lifecycle.await.unwrap();

    assert!(
        matches!(res, Err(AppError::ForcedShutdown(d)) if d == deadline),
        "{res:?}"
    );
    assert!(began.elapsed() >= deadline);
    assert!(began.elapsed() < Duration::from_secs(5));
    request.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn production_limits_leave_slow_request_to_the_deadline() {
    let started = Arc::new(Notify::new());
    let app = app_with_slow_route(Duration::from_secs(15), started.clone());
    let ctx = start(app, SHUTDOWN_DEADLINE).await;

    let request = spawn_get(format!("{}/slow", ctx.base));
    started.notified().await;

    let began = Instant::now();
    ctx.signal.send(Signal::Terminate).unwrap();
    let res = ctx.lifecycle.await.unwrap();

    assert!(
        matches!(res, Err(AppError::ForcedShutdown(d)) if d == SHUTDOWN_DEADLINE),
        "{res:?}"
    );
    assert!(began.elapsed() >= SHUTDOWN_DEADLINE);
    assert!(began.elapsed() < SHUTDOWN_DEADLINE + Duration::from_secs(3));

    // the connection was dropped, no response was ever produced
    let outcome = request.await.unwrap();
    assert!(outcome.is_err(), "{outcome:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_signal_source_still_shuts_down() {
    let ctx = start(routes::router(), Duration::from_secs(10)).await;

    drop(ctx.signal);
    let res = tokio::time::timeout(Duration::from_secs(5), ctx.lifecycle)
        .await
        .expect("lifecycle hung")
        .unwrap();
    assert!(res.is_ok(), "{res:?}");
}
