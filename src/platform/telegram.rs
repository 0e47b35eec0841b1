//! Telegram transport on top of `teloxide::Bot`: update decoding and the
//! long-polling [`Transport`] implementation.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{
    AllowedUpdate, CallbackQuery, CallbackQueryId, FileId, InlineKeyboardButton,
    InlineKeyboardMarkup, MessageId, Update, UpdateKind, User,
};
use tracing::{debug, info, warn};

use crate::error::{ApiError, BotError};
use crate::platform::{
    CallbackEvent, CommandEvent, InboundEvent, InlineKeyboard, MediaEvent, MediaKind, MediaRef,
    OutboundAction, Transport, UserRef,
};

/// Telegram rejects messages longer than this.
const MAX_MESSAGE_LEN: usize = 4096;

/// Slack on top of the long-poll window before the HTTP client gives up.
const CLIENT_TIMEOUT_MARGIN: Duration = Duration::from_secs(10);

fn allowed_updates() -> Vec<AllowedUpdate> {
    vec![AllowedUpdate::Message, AllowedUpdate::CallbackQuery]
}

/// The bot's own username, known once `getMe` succeeds. Shared with the
/// webhook endpoint so both ingestion paths filter `/cmd@otherbot` alike.
#[derive(Debug, Default)]
pub struct BotIdentity {
    username: OnceLock<String>,
}

impl BotIdentity {
    pub fn username(&self) -> Option<&str> {
        self.username.get().map(String::as_str)
    }

    pub fn set(&self, username: &str) {
        let _ = self.username.set(username.to_string());
    }
}

// ── Decoding ──────────────────────────────────────────────────────────────────

fn user_ref(user: &User) -> UserRef {
    UserRef {
        id: i64::try_from(user.id.0).unwrap_or(i64::MAX),
        username: user.username.clone(),
    }
}

/// Decode into the event the dispatcher understands. Updates the bot has no
/// use for (stickers, plain chatter, edits, commands for another bot) decode
/// to `None`.
pub fn decode_update(update: Update, bot_username: Option<&str>) -> Option<InboundEvent> {
    match update.kind {
        UpdateKind::CallbackQuery(query) => Some(decode_callback(query)),
        UpdateKind::Message(msg) => decode_message(&msg, bot_username),
        _ => None,
    }
}

fn decode_callback(query: CallbackQuery) -> InboundEvent {
    let (chat_id, message_id) = match &query.message {
        Some(msg) => (Some(msg.chat().id.0), Some(i64::from(msg.id().0))),
        None => (None, None),
    };
    InboundEvent::Callback(CallbackEvent {
        query_id: query.id.0,
        action_id: query.data.unwrap_or_default(),
        chat_id,
        message_id,
        user: user_ref(&query.from),
    })
}

fn decode_message(msg: &Message, bot_username: Option<&str>) -> Option<InboundEvent> {
    let chat_id = msg.chat.id.0;
    let message_id = i64::from(msg.id.0);
    let user = match &msg.from {
        Some(from) => user_ref(from),
        None => UserRef {
            id: chat_id,
            username: None,
        },
    };

    let upload = |kind, file_id: &FileId| {
        InboundEvent::Media(MediaEvent {
            kind,
            chat_id,
            message_id,
            user: user.clone(),
            media: MediaRef {
                file_id: file_id.0.clone(),
            },
        })
    };

    if let Some(photos) = msg.photo() {
        let largest = photos
            .iter()
            .max_by_key(|p| u64::from(p.width) * u64::from(p.height))?;
        return Some(upload(MediaKind::Photo, &largest.file.id));
    }

    if let Some(video) = msg.video() {
        return Some(upload(MediaKind::Video, &video.file.id));
    }

    let (name, args) = parse_command(msg.text()?, bot_username)?;
    Some(InboundEvent::Command(CommandEvent {
        name,
        args,
        chat_id,
        user,
    }))
}

/// Split `/name@bot arg1 arg2` into `("name", ["arg1", "arg2"])`. A command
/// addressed to a different bot is not ours and yields `None`.
pub fn parse_command(text: &str, bot_username: Option<&str>) -> Option<(String, Vec<String>)> {
    let rest = text.trim_start().strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let (name, addressee) = match head.split_once('@') {
        Some((name, addressee)) => (name, Some(addressee)),
        None => (head, None),
    };
    if name.is_empty() {
        return None;
    }
    if let (Some(addressee), Some(me)) = (addressee, bot_username) {
        if !addressee.eq_ignore_ascii_case(me) {
            debug!("Ignoring /{} addressed to @{}", name, addressee);
            return None;
        }
    }
    Some((name.to_string(), parts.map(str::to_string).collect()))
}

/// Split long messages for Telegram's 4096 char limit
fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0;

    while start < text.len() {
        let mut end = (start + max_len).min(text.len());
        // Walk back to a valid UTF-8 char boundary so slicing doesn't panic
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        let actual_end = if end < text.len() {
            text[start..end]
                .rfind('\n')
                .or_else(|| text[start..end].rfind(' '))
                .map(|pos| start + pos + 1)
                .unwrap_or(end)
        } else {
            end
        };

        chunks.push(text[start..actual_end].to_string());
        start = actual_end;
    }

    chunks
}

fn keyboard_markup(keyboard: &InlineKeyboard) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(keyboard.rows.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.text.clone(), b.callback_data.clone()))
            .collect::<Vec<_>>()
    }))
}

fn message_id(id: i64) -> Result<MessageId, ApiError> {
    i32::try_from(id)
        .map(MessageId)
        .map_err(|_| ApiError::Api(teloxide::ApiError::Unknown(format!("message id {} out of range", id))))
}

/// `getMe` rejections that mean the token itself is bad.
fn is_credential_rejection(e: &ApiError) -> bool {
    match e {
        ApiError::Api(teloxide::ApiError::InvalidToken) => true,
        ApiError::Api(teloxide::ApiError::Unknown(description)) => {
            description.contains("Unauthorized") || description.contains("Not Found")
        }
        _ => false,
    }
}

// ── Transport ─────────────────────────────────────────────────────────────────

pub struct TelegramTransport {
    bot: Bot,
    poll_timeout: Duration,
    /// Next update id to request; only moves past updates already returned.
    cursor: AtomicI32,
    released: AtomicBool,
    identity: Arc<BotIdentity>,
}

impl TelegramTransport {
    pub fn new(api_base_url: &str, token: &str, poll_timeout: Duration) -> Result<Self> {
        // teloxide's default client timeout is shorter than a long poll.
        let client = teloxide::net::default_reqwest_settings()
            .timeout(poll_timeout + CLIENT_TIMEOUT_MARGIN)
            .build()
            .context("Failed to build HTTP client")?;

        let bot = Bot::with_client(token, client);
        let bot = match reqwest::Url::parse(api_base_url) {
            Ok(url) => bot.set_api_url(url),
            Err(e) => {
                warn!("Invalid Bot API URL '{}' ({}), using default", api_base_url, e);
                bot
            }
        };

        Ok(Self {
            bot,
            poll_timeout,
            cursor: AtomicI32::new(0),
            released: AtomicBool::new(false),
            identity: Arc::new(BotIdentity::default()),
        })
    }

    pub fn identity(&self) -> Arc<BotIdentity> {
        self.identity.clone()
    }

    /// Decode a getUpdates result, returning the events and the new cursor.
    fn decode_batch(
        updates: Vec<Update>,
        cursor: i32,
        bot_username: Option<&str>,
    ) -> (Vec<InboundEvent>, i32) {
        let mut next = cursor;
        let mut events = Vec::with_capacity(updates.len());

        for update in updates {
            let update_id = update.id;
            next = next.max(update_id.as_offset());
            match decode_update(update, bot_username) {
                Some(event) => events.push(event),
                None => debug!("Skipping update {} with no handled content", update_id.0),
            }
        }

        (events, next)
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn init(&self) -> Result<(), BotError> {
        match self.bot.get_me().await.map_err(ApiError::from) {
            Ok(me) => {
                let username = me.user.username.clone().unwrap_or_default();
                info!("Authorized as @{} ({})", username, me.user.id.0);
                self.identity.set(&username);
                Ok(())
            }
            Err(e) if is_credential_rejection(&e) => {
                warn!("getMe rejected the token: {}", e);
                Err(BotError::CredentialMissing)
            }
            Err(e) => Err(BotError::Transport(e)),
        }
    }

    async fn receive_batch(&self) -> Result<Vec<InboundEvent>, BotError> {
        let cursor = self.cursor.load(Ordering::SeqCst);
        let timeout = u32::try_from(self.poll_timeout.as_secs()).unwrap_or(u32::MAX);

        let updates = self
            .bot
            .get_updates()
            .offset(cursor)
            .timeout(timeout)
            .allowed_updates(allowed_updates())
            .await
            .map_err(|e| BotError::Transport(e.into()))?;

        let (events, next) = Self::decode_batch(updates, cursor, self.identity.username());
        self.cursor.store(next, Ordering::SeqCst);
        Ok(events)
    }

    async fn send(&self, action: OutboundAction) -> Result<(), BotError> {
        let method = action.method();
        let delivery = |e: teloxide::RequestError| BotError::delivery(method, e.into());

        match action {
            OutboundAction::SendText {
                chat_id,
                text,
                keyboard,
            } => {
                let chunks = split_message(&text, MAX_MESSAGE_LEN);
                let last = chunks.len().saturating_sub(1);
                for (i, chunk) in chunks.into_iter().enumerate() {
                    let request = self.bot.send_message(ChatId(chat_id), chunk);
                    let sent = match (i == last, keyboard.as_ref()) {
                        (true, Some(kb)) => request.reply_markup(keyboard_markup(kb)).await,
                        _ => request.await,
                    };
                    sent.map_err(delivery)?;
                }
            }
            OutboundAction::AnswerCallback { query_id } => {
                self.bot
                    .answer_callback_query(CallbackQueryId(query_id))
                    .await
                    .map_err(delivery)?;
            }
            OutboundAction::SetCommands(commands) => {
                let commands: Vec<teloxide::types::BotCommand> = commands
                    .iter()
                    .map(|c| teloxide::types::BotCommand::new(c.command.clone(), c.description.clone()))
                    .collect();
                self.bot.set_my_commands(commands).await.map_err(delivery)?;
            }
            OutboundAction::SetWebhook { url, secret } => {
                let parsed = reqwest::Url::parse(&url).map_err(|e| {
                    BotError::delivery(
                        method,
                        ApiError::InvalidUrl {
                            url: url.clone(),
                            reason: e.to_string(),
                        },
                    )
                })?;
                let request = self
                    .bot
                    .set_webhook(parsed)
                    .allowed_updates(allowed_updates());
                let registered = match secret {
                    Some(secret) => request.secret_token(secret).await,
                    None => request.await,
                };
                registered.map_err(delivery)?;
            }
            OutboundAction::ClearWebhook => {
                self.bot
                    .delete_webhook()
                    .drop_pending_updates(true)
                    .await
                    .map_err(delivery)?;
            }
            OutboundAction::ForwardMessage {
                from_chat,
                message_id: id,
                to_chat,
            } => {
                let id = message_id(id).map_err(|e| BotError::delivery(method, e))?;
                self.bot
                    .forward_message(ChatId(to_chat), ChatId(from_chat), id)
                    .await
                    .map_err(delivery)?;
            }
        }
        Ok(())
    }

    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, BotError> {
        let file = self
            .bot
            .get_file(FileId(media.file_id.clone()))
            .await
            .map_err(|e| BotError::delivery("getFile", e.into()))?;

        let mut content = Vec::new();
        self.bot
            .download_file(&file.path, &mut content)
            .await
            .map_err(|e| BotError::delivery("getFile", e.into()))?;
        Ok(content)
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        info!(
            "Telegram session released (next offset {})",
            self.cursor.load(Ordering::SeqCst)
        );
    }
}
