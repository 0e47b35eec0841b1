//! Ordered startup and exactly-once shutdown for either delivery mode.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::admin::AdminChannel;
use crate::config::{Config, DeliveryMode};
use crate::dispatcher::Dispatcher;
use crate::error::BotError;
use crate::ingest::{IngestionLoop, LoopReport};
use crate::platform::{BotCommand, OutboundAction, Transport};
use crate::registrar::CommandRegistrar;
use crate::shutdown::ShutdownSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestionState {
    NotStarted,
    Running,
    Draining,
    Stopped,
}

/// Static inputs of the lifecycle, resolved from config and texts.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub mode: DeliveryMode,
    pub menu: Vec<BotCommand>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub backoff: Duration,
    pub started_notice: String,
    pub stopped_notice: String,
}

impl LifecycleSettings {
    pub fn from_config(config: &Config, menu: Vec<BotCommand>) -> Self {
        Self {
            mode: config.telegram.mode,
            menu,
            webhook_url: config.server.webhook_url.clone(),
            webhook_secret: config.server.webhook_secret.clone(),
            backoff: config.polling.backoff(),
            started_notice: config.texts.bot_started.clone(),
            stopped_notice: config.texts.bot_stopped.clone(),
        }
    }
}

struct Inner {
    state: IngestionState,
    ingestion: Option<JoinHandle<LoopReport>>,
}

pub struct Orchestrator {
    settings: LifecycleSettings,
    transport: Arc<dyn Transport>,
    dispatcher: Arc<Dispatcher>,
    registrar: Arc<CommandRegistrar>,
    admin: AdminChannel,
    shutdown: ShutdownSignal,
    inner: Mutex<Inner>,
}

impl Orchestrator {
    pub fn new(
        settings: LifecycleSettings,
        transport: Arc<dyn Transport>,
        dispatcher: Arc<Dispatcher>,
        admin: AdminChannel,
        shutdown: ShutdownSignal,
    ) -> Self {
        Self {
            settings,
            transport,
            dispatcher,
            registrar: Arc::new(CommandRegistrar::new()),
            admin,
            shutdown,
            inner: Mutex::new(Inner {
                state: IngestionState::NotStarted,
                ingestion: None,
            }),
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> IngestionState {
        self.inner.lock().await.state
    }

    #[cfg(test)]
    pub fn registrar(&self) -> &CommandRegistrar {
        &self.registrar
    }

    /// Bring the bot up. Only a rejected credential is fatal: an unreachable
    /// platform is retried until it answers or shutdown is requested, and
    /// every later step degrades with a warning.
    pub async fn start(&self) -> Result<(), BotError> {
        let mut inner = self.inner.lock().await;
        if inner.state != IngestionState::NotStarted {
            warn!("Start requested in state {:?}, ignoring", inner.state);
            return Ok(());
        }
        if self.shutdown.is_triggered() {
            info!("Shutdown already requested, not starting");
            return Ok(());
        }

        info!("Starting bot in {} mode", self.settings.mode);
        if !self.init_transport().await? {
            return Ok(());
        }

        self.registrar
            .ensure_registered(self.transport.as_ref(), &self.settings.menu)
            .await;

        // Drops a stale webhook and anything queued while we were down.
        self.best_effort(OutboundAction::ClearWebhook).await;

        match self.settings.mode {
            DeliveryMode::Webhook => match &self.settings.webhook_url {
                Some(url) => {
                    let registered = self
                        .best_effort(OutboundAction::SetWebhook {
                            url: url.clone(),
                            secret: self.settings.webhook_secret.clone(),
                        })
                        .await;
                    if registered {
                        info!("Webhook registered at {}", url);
                    }
                }
                None => warn!("Webhook mode without WEBHOOK_URL, no updates will arrive"),
            },
            DeliveryMode::Polling => {
                let ingestion = IngestionLoop::new(
                    self.transport.clone(),
                    self.dispatcher.clone(),
                    self.shutdown.clone(),
                    self.settings.backoff,
                );
                inner.ingestion = Some(tokio::spawn(ingestion.run()));
            }
        }

        inner.state = IngestionState::Running;
        drop(inner);

        self.admin.notify(&self.settings.started_notice).await;
        info!("Bot started");
        Ok(())
    }

    /// Stop the bot. Runs once; later calls (and calls before a successful
    /// start) are no-ops.
    pub async fn shutdown(&self) {
        // Before the lock: wakes a start() still waiting for the platform.
        self.shutdown.trigger();

        // Held for the whole sequence so concurrent callers wait, then see Stopped.
        let mut inner = self.inner.lock().await;
        if inner.state != IngestionState::Running {
            info!("Shutdown requested in state {:?}, nothing to do", inner.state);
            return;
        }

        inner.state = IngestionState::Draining;
        info!("Shutting down...");

        if let Some(handle) = inner.ingestion.take() {
            match handle.await {
                Ok(report) => info!(
                    "Ingestion drained after {} fetches ({} faults, {} events)",
                    report.fetches, report.faults, report.events
                ),
                Err(e) => error!("Ingestion task ended abnormally: {}", e),
            }
        }

        self.admin.notify(&self.settings.stopped_notice).await;

        if self.settings.mode == DeliveryMode::Webhook {
            self.best_effort(OutboundAction::ClearWebhook).await;
        }

        self.transport.release().await;
        inner.state = IngestionState::Stopped;
        info!("Bot stopped");
    }

    /// `getMe` with retries on network faults. `Ok(false)` means shutdown
    /// was requested before the platform answered.
    async fn init_transport(&self) -> Result<bool, BotError> {
        let mut attempts = 0u32;
        loop {
            match self.transport.init().await {
                Ok(()) => return Ok(true),
                Err(e @ BotError::Transport(_)) => {
                    attempts += 1;
                    warn!(
                        "Platform unreachable at startup (attempt {}): {}; retrying in {:?}",
                        attempts, e, self.settings.backoff
                    );
                    tokio::select! {
                        _ = self.shutdown.wait() => {
                            info!("Shutdown requested before the platform answered");
                            return Ok(false);
                        }
                        _ = tokio::time::sleep(self.settings.backoff) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn best_effort(&self, action: OutboundAction) -> bool {
        match self.transport.send(action).await {
            Ok(()) => true,
            Err(e) => {
                warn!("{}", e);
                false
            }
        }
    }
}
