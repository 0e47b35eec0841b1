mod admin;
mod config;
mod dispatcher;
mod error;
mod handlers;
mod ingest;
mod lifecycle;
mod media;
mod platform;
mod registrar;
mod shutdown;
#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::admin::AdminChannel;
use crate::config::{Config, DeliveryMode};
use crate::dispatcher::{Dispatcher, HandlerContext};
use crate::lifecycle::{LifecycleSettings, Orchestrator};
use crate::media::MediaStore;
use crate::platform::telegram::TelegramTransport;
use crate::platform::webhook::{self, WebhookState};
use crate::platform::Transport;
use crate::shutdown::ShutdownSignal;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,castingbot=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    let token = config.bot_token()?;

    info!("Configuration loaded successfully");
    info!("  Mode: {}", config.telegram.mode);
    info!("  Admin chat: {:?}", config.telegram.admin_chat_id);
    info!("  Media directory: {}", config.media.directory.display());
    info!("  Listening on: {}", config.bind_address());

    let telegram = TelegramTransport::new(
        &config.telegram.api_base_url,
        token,
        config.polling.timeout(),
    )?;
    let identity = telegram.identity();
    let transport: Arc<dyn Transport> = Arc::new(telegram);
    let admin = AdminChannel::new(config.telegram.admin_chat_id, transport.clone());

    let media = MediaStore::new(&config.media.directory);
    if let Err(e) = media.ensure_root().await {
        warn!("{:#}", e);
    }

    let texts = Arc::new(config.texts.clone());
    let dispatcher = Arc::new(Dispatcher::new(
        handlers::default_table(texts.clone()),
        HandlerContext::new(transport.clone(), admin.clone()),
        media.clone(),
        handlers::fault_replies(&texts),
    ));

    let shutdown = ShutdownSignal::new();
    let orchestrator = Orchestrator::new(
        LifecycleSettings::from_config(&config, handlers::command_menu(&texts)),
        transport,
        dispatcher.clone(),
        admin,
        shutdown.clone(),
    );

    // Before start, so Ctrl-C also ends the wait for an unreachable platform.
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        crate::shutdown::os_signal().await;
        info!("Shutdown signal received");
        on_signal.trigger();
    });

    orchestrator.start().await.context("Failed to start the bot")?;

    let webhook_state = (config.telegram.mode == DeliveryMode::Webhook).then(|| WebhookState {
        dispatcher,
        secret: config.server.webhook_secret.clone(),
        identity,
    });
    let app = webhook::router(
        webhook_state.map(|state| (config.server.webhook_path.as_str(), state)),
        media,
    );

    let server_shutdown = shutdown.clone();
    if let Err(e) = webhook::serve(&config.bind_address(), app, async move {
        server_shutdown.wait().await
    })
    .await
    {
        // Polling keeps working without the HTTP surface.
        error!("{:#}", e);
        shutdown.wait().await;
    }

    orchestrator.shutdown().await;
    Ok(())
}
