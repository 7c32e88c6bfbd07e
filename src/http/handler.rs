use http::{Method, Request, Response, StatusCode};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::RouteSettings;
use crate::http::request_id::next_request_id;
use crate::http::router::Router;
use crate::response::res::{text, SlowBody};
use crate::threshold::RouteOverride;
use crate::timing::{RequestTiming, TimingExt};

/// Routes served by the `rslow` binary.
pub fn demo_router<B: Send + 'static>() -> Router<B> {
    Router::new()
        .route(Method::GET, "/", RouteSettings::new(), hello)
        .route(Method::GET, "/slow", RouteSettings::new(), slow)
        .route(Method::GET, "/db", RouteSettings::new(), db)
        .route(
            Method::GET,
            "/quiet",
            RouteSettings::new().with_slow(RouteOverride::Disabled),
            slow,
        )
        .route(
            Method::GET,
            "/strict",
            RouteSettings::new().with_slow(RouteOverride::Millis(10)),
            strict,
        )
}

async fn hello<B>(_req: Request<B>) -> Result<Response<SlowBody>, anyhow::Error> {
    Ok(text(StatusCode::OK, "done!"))
}

async fn slow<B>(_req: Request<B>) -> Result<Response<SlowBody>, anyhow::Error> {
    sleep(Duration::from_millis(200)).await;
    Ok(text(StatusCode::OK, "done!"))
}

async fn strict<B>(_req: Request<B>) -> Result<Response<SlowBody>, anyhow::Error> {
    sleep(Duration::from_millis(50)).await;
    Ok(text(StatusCode::OK, "done!"))
}

async fn db<B>(req: Request<B>) -> Result<Response<SlowBody>, anyhow::Error> {
    let timing = req
        .timing()
        .cloned()
        .unwrap_or_else(|| RequestTiming::new(next_request_id(), false));
    timing.timing_start("call db");
    timing.timing_start("process data");

    sleep(Duration::from_millis(200)).await;
    let db_ms = timing.timing_end("call db").unwrap_or_default();

    let worker = timing.clone();
    let processed = tokio::spawn(async move {
        sleep(Duration::from_millis(300)).await;
        worker.timing_end("process data").unwrap_or_default()
    })
    .await?;

    let body = serde_json::json!({ "callDb": db_ms, "processData": processed });
    Ok(text(StatusCode::OK, body.to_string()))
}
