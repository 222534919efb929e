mod config;
mod db;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::AppConfig::from_env().expect("invalid configuration");
    let port = config.port;

    let state = match config.database_url.clone() {
        Some(database_url) => {
            let pool = db::init_pool(&database_url, config.db_max_connections)
                .await
                .expect("database init failed");
            state::AppState::postgres(pool, config)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, accounts and sessions are kept in memory");
            state::AppState::in_memory(config)
        }
    };

    // Spawn background sweeper for expired sessions and throttle keys.
    let _sweeper = services::session::spawn_session_sweeper(state.sessions.clone(), state.throttle.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "accounts listening");
    axum::serve(listener, app).await.expect("server failed");
}
