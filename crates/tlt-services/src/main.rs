//! Hosts the five back-end services on their configured ports.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tlt_core::config::Config;
use tlt_core::logging;
use tlt_core::storage::{EventStateStore, UserStateStore};
use tlt_providers::{ModelClient, ModelClientConfig};
use tlt_services::photo::{PhotoPipeline, PhotoVibeCheckService};
use tlt_services::{
    EventManagerService, GuildManagerService, RsvpService, VibeCanvasService, event_manager,
    guild_manager, photo, rsvp, vibe_canvas,
};

#[tokio::main]
async fn main() {
    let config = match Config::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            std::process::exit(2);
        }
    };
    let _guard = logging::init(config.debug, None);
    if let Err(err) = run(config).await {
        tracing::error!(error = %format!("{err:#}"), "services failed to start");
        std::process::exit(1);
    }
}

async fn run(config: Config) -> Result<()> {
    let data_root = config.data_root.clone();
    let model = config
        .model
        .resolve_api_key()
        .ok()
        .map(|api_key| {
            Arc::new(ModelClient::new(ModelClientConfig {
                api_key,
                base_url: config.model.base_url.clone(),
                model: config.model.vision_model.clone(),
                max_tokens: config.model.max_tokens,
            }))
        });
    if model.is_none() {
        tracing::warn!("no model API key; vibe checks will degrade to zero scores");
    }

    let event_manager = Arc::new(EventManagerService::new(EventStateStore::new(&data_root)));
    let rsvp = Arc::new(RsvpService::new(
        EventStateStore::new(&data_root),
        UserStateStore::new(&data_root),
    ));
    let guild_manager = Arc::new(GuildManagerService::new(&data_root));
    let photo_service = Arc::new(PhotoVibeCheckService::new(
        &data_root,
        PhotoPipeline::new(&data_root, model),
        config.photo_rate_limit_hours,
    ));
    let vibe_canvas = Arc::new(VibeCanvasService::new(EventStateStore::new(&data_root)));

    let bindings = [
        ("event-manager", config.services.event_manager.clone(), event_manager::router(event_manager)),
        ("rsvp", config.services.rsvp.clone(), rsvp::router(rsvp)),
        ("guild-manager", config.services.guild_manager.clone(), guild_manager::router(guild_manager)),
        ("photo-vibe-check", config.services.photo_vibe_check.clone(), photo::router(photo_service)),
        ("vibe-canvas", config.services.vibe_canvas.clone(), vibe_canvas::router(vibe_canvas)),
    ];

    let mut servers = Vec::new();
    for (name, url, router) in bindings {
        let bind = bind_address(&url)
            .with_context(|| format!("no port in configured URL for {name}: {url}"))?;
        servers.push(serve(name, bind, router));
    }
    let joined = futures_join(servers);

    tokio::select! {
        result = joined => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down services");
            Ok(())
        }
    }
}

async fn serve(name: &'static str, bind: String, router: Router) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind {bind} for {name}"))?;
    tracing::info!(service = name, %bind, "service listening");
    axum::serve(listener, router)
        .await
        .with_context(|| format!("serve {name}"))
}

async fn futures_join(servers: Vec<impl std::future::Future<Output = Result<()>>>) -> Result<()> {
    for result in futures_util::future::join_all(servers).await {
        result?;
    }
    Ok(())
}

/// Extracts `host:port` from a configured service URL.
fn bind_address(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("http://")
        .or_else(|| url.strip_prefix("https://"))?;
    let authority = rest.split('/').next()?;
    let (_, port) = authority.rsplit_once(':')?;
    port.parse::<u16>().ok()?;
    Some(format!("0.0.0.0:{port}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_address_extracts_port() {
        assert_eq!(
            bind_address("http://localhost:8004"),
            Some("0.0.0.0:8004".to_string())
        );
        assert_eq!(
            bind_address("https://svc.internal:9001/rpc/"),
            Some("0.0.0.0:9001".to_string())
        );
        assert_eq!(bind_address("http://localhost"), None);
        assert_eq!(bind_address("localhost:8004"), None);
    }
}
