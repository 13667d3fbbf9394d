use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::convert::Infallible;
use warp::http::StatusCode;
use warp::{Filter, Reply};

use crate::control::SharedFlags;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub config_id: i64,
}

/// Control surface for the dashboard: start/stop/status over plain JSON.
/// Handlers only touch the shared flags; training picks the change up on
/// its next hook invocation.
pub async fn run_control_server(flags: SharedFlags, port: u16) {
    log::info!("control interface listening on port {}", port);
    warp::serve(routes(flags)).run(([0, 0, 0, 0], port)).await;
}

pub fn routes(
    flags: SharedFlags,
) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_headers(vec!["content-type"])
        .allow_methods(vec!["GET", "POST"]);

    let start = warp::path("start")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::body::json())
        .and(with_flags(flags.clone()))
        .and_then(handle_start);

    let stop = warp::path("stop")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_flags(flags.clone()))
        .and_then(handle_stop);

    let status = warp::path("status")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_flags(flags))
        .and_then(handle_status);

    start.or(stop).or(status).with(cors).recover(handle_rejection)
}

fn with_flags(
    flags: SharedFlags,
) -> impl Filter<Extract = (SharedFlags,), Error = Infallible> + Clone {
    warp::any().map(move || flags.clone())
}

async fn handle_start(
    request: StartRequest,
    flags: SharedFlags,
) -> Result<impl Reply, warp::Rejection> {
    log::info!("start signal received for config {}", request.config_id);
    flags.request_start(request.config_id);
    Ok(warp::reply::json(&json!({ "status": "starting" })))
}

async fn handle_stop(flags: SharedFlags) -> Result<impl Reply, warp::Rejection> {
    log::info!("stop signal received");
    flags.request_stop();
    Ok(warp::reply::json(&json!({ "status": "stopping" })))
}

async fn handle_status(flags: SharedFlags) -> Result<impl Reply, warp::Rejection> {
    let snapshot = flags.snapshot();
    Ok(warp::reply::json(&json!({
        "active": snapshot.active,
        "stop": snapshot.stop,
        "config_id": snapshot.config_id,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// Malformed requests get a JSON error ack instead of warp's default
/// body; no flag is mutated on the rejection path.
async fn handle_rejection(rejection: warp::Rejection) -> Result<impl Reply, Infallible> {
    let (code, message) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "not found")
    } else if rejection.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        (StatusCode::BAD_REQUEST, "malformed request body")
    } else {
        (StatusCode::BAD_REQUEST, "bad request")
    };
    Ok(warp::reply::with_status(
        warp::reply::json(&json!({ "error": message })),
        code,
    ))
}
