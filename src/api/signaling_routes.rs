use std::convert::Infallible;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use warp::http::StatusCode;
use warp::Filter;

use super::signaling_websocket;
use crate::config::IceConfig;
use crate::signaling::SignalingServer;

/// Every HTTP and WebSocket route the relay serves, with CORS for browser clients.
pub fn routes(
    server: Arc<SignalingServer>,
    ice: IceConfig,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let cors = warp::cors()
        .allow_any_origin()
        .allow_methods(vec!["GET", "POST"])
        .allow_headers(vec!["content-type"]);

    signaling_websocket_route(server.clone())
        .or(create_room(server.clone()))
        .or(room_status(server.clone()))
        .or(active_rooms(server.clone()))
        .or(health_check())
        .or(ice_config_endpoint(ice))
        .or(status(server))
        .with(cors)
}

pub fn signaling_websocket_route(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("signaling")
        .and(warp::path::end())
        .and(warp::ws())
        .and(with_server(server))
        .map(|ws: warp::ws::Ws, server: Arc<SignalingServer>| {
            ws.on_upgrade(move |websocket| signaling_websocket::handle_signaling_websocket(websocket, server))
        })
}

pub fn create_room(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("create-room")
        .and(warp::path::end())
        .and(warp::post())
        .and(with_server(server))
        .and_then(handle_create_room)
}

async fn handle_create_room(
    server: Arc<SignalingServer>,
) -> Result<warp::reply::WithStatus<warp::reply::Json>, Infallible> {
    match server.registry().create_room().await {
        Ok(room) => Ok(warp::reply::with_status(warp::reply::json(&room), StatusCode::OK)),
        Err(e) => {
            tracing::error!(error = %e, "Room creation failed");
            Ok(warp::reply::with_status(
                warp::reply::json(&serde_json::json!({ "error": e.to_string() })),
                StatusCode::INTERNAL_SERVER_ERROR,
            ))
        }
    }
}

pub fn room_status(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path!("room" / String)
        .and(warp::get())
        .and(with_server(server))
        .and_then(|code: String, server: Arc<SignalingServer>| async move {
            let status = server.registry().exists(&code).await;
            Ok::<_, Infallible>(warp::reply::json(&status))
        })
}

pub fn active_rooms(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("active-rooms")
        .and(warp::path::end())
        .and(warp::get())
        .and(with_server(server))
        .and_then(|server: Arc<SignalingServer>| async move {
            let rooms = server.registry().list_rooms().await;
            Ok::<_, Infallible>(warp::reply::json(&rooms))
        })
}

pub fn status(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path::end()
        .and(warp::get())
        .and(with_server(server))
        .and_then(|server: Arc<SignalingServer>| async move {
            let timestamp = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default();

            Ok::<_, Infallible>(warp::reply::json(&serde_json::json!({
                "message": "Classroom signaling server",
                "status": "online",
                "activeRooms": server.registry().room_count().await,
                "timestamp": timestamp
            })))
        })
}

pub fn health_check() -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    warp::path("health").and(warp::path::end()).and(warp::get()).map(|| {
        warp::reply::json(&serde_json::json!({
            "status": "healthy",
            "service": "Classroom Signaling Server",
            "version": env!("CARGO_PKG_VERSION")
        }))
    })
}

pub fn ice_config_endpoint(ice: IceConfig) -> impl Filter<Extract = impl warp::Reply, Error = warp::Rejection> + Clone {
    let body = serde_json::json!({ "iceServers": ice.browser_servers() });

    warp::path("config")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || warp::reply::json(&body))
}

fn with_server(
    server: Arc<SignalingServer>,
) -> impl Filter<Extract = (Arc<SignalingServer>,), Error = Infallible> + Clone {
    warp::any().map(move || server.clone())
}
