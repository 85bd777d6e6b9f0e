//! MCP server: the notes, weather and documentation tools behind the
//! authenticating gateway.
//!
//! Configuration comes from the environment (and `.env`); see
//! `GatewayConfig::from_env` for the variables.

mod mcp;
mod memory_store;
mod prompts;
mod tools;

use mcp::McpEngine;
use mcp_gate::{GatewayConfig, GatewayServer, ServiceHandle};
use memory_store::MemoryNoteStore;
use miette::{Context, IntoDiagnostic};
use std::net::SocketAddr;
use std::sync::Arc;
use tools::{Toolbox, weather::WeatherClient};

#[tokio::main]
async fn main() -> miette::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::filter::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "server=debug,mcp_gate=debug,info".into()),
        )
        .init();

    let config = GatewayConfig::from_env()
        .into_diagnostic()
        .wrap_err("invalid configuration")?;

    if config.auth.skip {
        if config.is_production {
            tracing::error!("AUTH_SKIP is enabled in production: every request runs as dev-user");
        } else {
            tracing::warn!("AUTH_SKIP is enabled: every request runs as dev-user");
        }
    }

    match &config.redis_url {
        Some(redis_url) => tracing::info!(
            "REDIS_URL is set ({}) but sessions are kept in memory",
            redact(redis_url)
        ),
        None => tracing::info!("sessions are kept in memory"),
    }

    let services = Arc::new(ServiceHandle::new());
    // Open-Meteo calls are not bound by the auth verification timeout
    let weather = WeatherClient::new(None)
        .map_err(|e| miette::miette!("{:#}", e))
        .wrap_err("failed to build weather client")?;
    let engine = Arc::new(McpEngine::new(
        &config,
        Toolbox::new(services.clone(), weather),
    ));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!(
        "{} v{} (production: {}, issuer: {})",
        config.server_name,
        config.server_version,
        config.is_production,
        config.auth.issuer
    );

    let server = GatewayServer::builder()
        .config(config)
        .engine(engine.clone())
        .services(services)
        .service_factory(|| Arc::new(MemoryNoteStore::new()))
        .build()
        .into_diagnostic()
        .wrap_err("failed to build gateway")?;

    let app = server.router();

    tracing::info!("MCP gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()
        .wrap_err("failed to bind to address")?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .into_diagnostic()
        .wrap_err("server error")?;

    tracing::info!(
        "shut down with {} open session(s)",
        engine.sessions().len().await
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

/// Connection string with any password removed.
fn redact(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("***"));
            }
            url.to_string()
        }
        Err(_) => "<unparseable>".to_string(),
    }
}
