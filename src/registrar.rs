use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::BotError;
use crate::platform::{BotCommand, OutboundAction, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationState {
    Unset,
    Set,
}

/// Pushes the command menu to the platform at most once per process.
pub struct CommandRegistrar {
    state: Mutex<RegistrationState>,
}

impl CommandRegistrar {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RegistrationState::Unset),
        }
    }

    #[cfg(test)]
    pub async fn state(&self) -> RegistrationState {
        *self.state.lock().await
    }

    /// Register `menu` unless that already happened. Never fails: a throttled
    /// or rejected push is logged and still counts as done, so restarts do not
    /// hammer the platform's flood control.
    pub async fn ensure_registered(&self, transport: &dyn Transport, menu: &[BotCommand]) {
        // Held across the push so concurrent callers cannot both register.
        let mut state = self.state.lock().await;
        if *state == RegistrationState::Set {
            return;
        }

        match transport.send(OutboundAction::SetCommands(menu.to_vec())).await {
            Ok(()) => info!("Bot commands set successfully ({} commands)", menu.len()),
            Err(e) => match e.retry_after() {
                Some(retry_after) => {
                    let throttled = BotError::RegistrationThrottled { retry_after };
                    warn!("{}; skipping command registration", throttled);
                }
                None => warn!("Failed to set bot commands: {}", e),
            },
        }

        *state = RegistrationState::Set;
    }
}

impl Default for CommandRegistrar {
    fn default() -> Self {
        Self::new()
    }
}
