use std::sync::Arc;

use tracing::{debug, warn};

use crate::platform::{OutboundAction, Transport};

/// Best-effort line to the administrator chat. Without a configured chat id
/// every call is a silent no-op.
#[derive(Clone)]
pub struct AdminChannel {
    chat_id: Option<i64>,
    transport: Arc<dyn Transport>,
}

impl AdminChannel {
    pub fn new(chat_id: Option<i64>, transport: Arc<dyn Transport>) -> Self {
        Self { chat_id, transport }
    }

    /// Send `text` to the admin. Returns whether it was delivered.
    pub async fn notify(&self, text: &str) -> bool {
        let Some(chat_id) = self.chat_id else {
            debug!("No admin chat configured, dropping notice: {}", text);
            return false;
        };
        self.deliver(OutboundAction::text(chat_id, text)).await
    }

    /// Forward a user's message to the admin.
    pub async fn forward(&self, from_chat: i64, message_id: i64) -> bool {
        let Some(to_chat) = self.chat_id else {
            return false;
        };
        self.deliver(OutboundAction::ForwardMessage {
            from_chat,
            message_id,
            to_chat,
        })
        .await
    }

    async fn deliver(&self, action: OutboundAction) -> bool {
        match self.transport.send(action).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Admin notification failed: {}", e);
                false
            }
        }
    }
}
