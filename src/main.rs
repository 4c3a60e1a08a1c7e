use std::sync::Arc;

use classroom_signaling::config::Config;
use classroom_signaling::signaling::SignalingServer;
use classroom_signaling::{api, Result, SignalingError};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.logging.json);

    let server = Arc::new(SignalingServer::new(config.rooms.clone()));
    let sweeper = server.clone().start_room_sweeper();

    let routes = api::routes(server, config.ice.clone());
    let (addr, serving) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(config.bind_address(), async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Could not listen for shutdown signal");
            }
        })
        .map_err(|e| SignalingError::InvalidConfiguration(format!("cannot bind {}: {}", config.server.host, e)))?;

    tracing::info!(
        address = %addr,
        max_idle_secs = config.rooms.max_idle.as_secs(),
        "Signaling server listening"
    );
    serving.await;

    sweeper.abort();
    tracing::info!("Signaling server stopped");
    Ok(())
}
