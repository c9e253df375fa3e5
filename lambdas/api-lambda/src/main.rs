use equip_track_shared::endpoints::Endpoint;
use equip_track_shared::AppState;
use lambda_http::{run, service_fn, tracing, Error, Request};
use std::sync::Arc;

mod http_handler;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing::init_default_subscriber();

    // Deployed one function per operation; unset serves the whole API
    let only = match std::env::var("EQUIP_TRACK_ENDPOINT") {
        Ok(name) => Some(Endpoint::from_name(&name)?),
        Err(_) => None,
    };
    if let Some(endpoint) = only {
        tracing::info!("Serving only {}", endpoint.name());
    }

    // Initialize AWS clients once at startup
    let config = aws_config::load_from_env().await;
    let state = AppState::from_env(&config).map_err(|e| format!("JWT_SECRET must be set: {}", e))?;

    run(service_fn(move |event: Request| {
        let state = Arc::clone(&state);
        async move { http_handler::function_handler(event, state, only).await }
    }))
    .await
}
