pub mod telegram;
pub mod webhook;

use async_trait::async_trait;

use crate::error::BotError;

/// The sender of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRef {
    pub id: i64,
    pub username: Option<String>,
}

impl UserRef {
    /// Human-facing identifier: the username when there is one, else the numeric id.
    pub fn identifier(&self) -> String {
        match &self.username {
            Some(name) if !name.is_empty() => name.clone(),
            _ => self.id.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Photo,
    Video,
}

impl MediaKind {
    /// Folder under the user's media directory.
    pub fn folder(self) -> &'static str {
        match self {
            MediaKind::Photo => "photos",
            MediaKind::Video => "videos",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            MediaKind::Photo => "jpg",
            MediaKind::Video => "mp4",
        }
    }
}

/// Platform-assigned reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    pub file_id: String,
}

/// A slash-command message, e.g. `/start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandEvent {
    pub name: String,
    pub args: Vec<String>,
    pub chat_id: i64,
    pub user: UserRef,
}

/// A photo or video upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaEvent {
    pub kind: MediaKind,
    pub chat_id: i64,
    pub message_id: i64,
    pub user: UserRef,
    pub media: MediaRef,
}

/// A tap on an inline button.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackEvent {
    /// Identifier used to acknowledge the tap.
    pub query_id: String,
    /// Callback data, e.g. `model_order_webcam`.
    pub action_id: String,
    pub chat_id: Option<i64>,
    pub message_id: Option<i64>,
    pub user: UserRef,
}

/// A decoded inbound event. Consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Command(CommandEvent),
    Media(MediaEvent),
    Callback(CallbackEvent),
}

impl InboundEvent {
    pub fn user(&self) -> &UserRef {
        match self {
            InboundEvent::Command(e) => &e.user,
            InboundEvent::Media(e) => &e.user,
            InboundEvent::Callback(e) => &e.user,
        }
    }

    /// Short label for logs.
    pub fn describe(&self) -> String {
        match self {
            InboundEvent::Command(e) if e.args.is_empty() => format!("command /{}", e.name),
            InboundEvent::Command(e) => format!("command /{} {}", e.name, e.args.join(" ")),
            InboundEvent::Media(e) => format!("{} upload (message {})", e.kind.folder(), e.message_id),
            InboundEvent::Callback(e) => match e.message_id {
                Some(id) => format!("callback {} on message {}", e.action_id, id),
                None => format!("callback {}", e.action_id),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

/// Rows of inline buttons attached to a text reply.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InlineKeyboard {
    pub rows: Vec<Vec<InlineButton>>,
}

impl InlineKeyboard {
    /// One button per row.
    pub fn column(buttons: &[(&str, &str)]) -> Self {
        Self {
            rows: buttons
                .iter()
                .map(|(text, data)| {
                    vec![InlineButton {
                        text: text.to_string(),
                        callback_data: data.to_string(),
                    }]
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BotCommand {
    pub command: String,
    pub description: String,
}

impl BotCommand {
    pub fn new(command: &str, description: &str) -> Self {
        Self {
            command: command.to_string(),
            description: description.to_string(),
        }
    }
}

/// Everything the bot can ask the platform to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundAction {
    SendText {
        chat_id: i64,
        text: String,
        keyboard: Option<InlineKeyboard>,
    },
    AnswerCallback {
        query_id: String,
    },
    SetCommands(Vec<BotCommand>),
    SetWebhook {
        url: String,
        secret: Option<String>,
    },
    ClearWebhook,
    ForwardMessage {
        from_chat: i64,
        message_id: i64,
        to_chat: i64,
    },
}

impl OutboundAction {
    pub fn text(chat_id: i64, text: impl Into<String>) -> Self {
        OutboundAction::SendText {
            chat_id,
            text: text.into(),
            keyboard: None,
        }
    }

    /// Bot API method name, used in logs and delivery errors.
    pub fn method(&self) -> &'static str {
        match self {
            OutboundAction::SendText { .. } => "sendMessage",
            OutboundAction::AnswerCallback { .. } => "answerCallbackQuery",
            OutboundAction::SetCommands(_) => "setMyCommands",
            OutboundAction::SetWebhook { .. } => "setWebhook",
            OutboundAction::ClearWebhook => "deleteWebhook",
            OutboundAction::ForwardMessage { .. } => "forwardMessage",
        }
    }
}

/// Connection to the chat platform.
///
/// `receive_batch` is only called by the ingestion loop (polling mode). It
/// fails with `BotError::Transport`; `send` and `download` fail with
/// `BotError::Delivery`. Implementations never retry internally.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Verify the credential and open the session.
    async fn init(&self) -> Result<(), BotError>;

    async fn receive_batch(&self) -> Result<Vec<InboundEvent>, BotError>;

    async fn send(&self, action: OutboundAction) -> Result<(), BotError>;

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, BotError>;

    /// Release the underlying session. Safe to call more than once.
    async fn release(&self);
}
