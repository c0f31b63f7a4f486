mod config;
mod error;
mod handlers;
mod server;
mod state;

use config::Config;
use coursegate_common::bot_shield::BanStore;
use error::ServeError;
use std::net::SocketAddr;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    if cfg.hide_public && cfg.bot_token.is_none() {
        tracing::error!(
            production = cfg.production,
            "HIDE_PUBLIC is enabled but TELEGRAM_BOT_TOKEN is not configured; every gated request will be rejected"
        );
    }

    let bans = BanStore::new();
    let app = server::build_app(&cfg, bans.clone());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], cfg.port)));
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(source) => {
            tracing::error!(error = %ServeError::Bind { addr, source }, "listener init failed");
            std::process::exit(2);
        }
    };
    tracing::info!(
        %addr,
        env = %cfg.env_name,
        base_url = %cfg.base_url,
        hide_public = cfg.hide_public,
        "starting gate_server"
    );

    server::serve(listener, app, shutdown_signal()).await;

    bans.clear();
    tracing::info!("ban store cleared");
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
