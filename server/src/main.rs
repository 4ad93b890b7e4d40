use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::env;
use std::net::SocketAddr;
use tokio::net::TcpListener;

mod membership;
mod protocol;
mod session;
mod state;
mod sync;
mod youtube;

use membership::JoinPolicy;
use session::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lockstep_server=debug,info".into()),
        )
        .init();

    let port = env::var("PORT")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or(3001);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let policy = env::var("LOCKSTEP_JOIN_POLICY")
        .ok()
        .map(|val| {
            val.parse::<JoinPolicy>()
                .unwrap_or_else(|e| panic!("LOCKSTEP_JOIN_POLICY: {}", e))
        })
        .unwrap_or_default();

    let app_state = AppState::new(policy);

    tokio::spawn(sync::run_sync_check_loop(app_state.clone()));

    let app = Router::new()
        .route("/healthz", get(health_check))
        .route("/ws", get(ws_endpoint))
        .with_state(app_state.clone());

    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        "Lockstep Server listening on {} (join policy: {:?})",
        addr,
        policy
    );
    axum::serve(listener, app).await?;
    Ok(())
}

async fn ws_endpoint(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| session::handle_connection(socket, state))
}

async fn health_check() -> &'static str {
    "ok"
}
