//! Routes decoded events to handlers and contains their faults.
//!
//! Matching: commands by exact name, media by kind, callbacks by `action_id`
//! prefix. Whatever a handler does (error or panic), [`Dispatcher::dispatch`]
//! returns normally.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, error, warn};

use crate::admin::AdminChannel;
use crate::error::BotError;
use crate::media::{MediaSink, MediaStore};
use crate::platform::{
    CallbackEvent, CommandEvent, InboundEvent, MediaEvent, MediaKind, MediaRef, OutboundAction,
    Transport,
};

pub type HandlerResult = anyhow::Result<()>;

type CommandFn = Arc<dyn Fn(HandlerContext, CommandEvent) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type MediaFn =
    Arc<dyn Fn(HandlerContext, MediaEvent, MediaSink) -> BoxFuture<'static, HandlerResult> + Send + Sync>;
type CallbackFn =
    Arc<dyn Fn(HandlerContext, CallbackEvent, String) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// What a handler may touch: outbound actions, the admin channel and media
/// downloads. Filesystem access only comes through a [`MediaSink`].
#[derive(Clone)]
pub struct HandlerContext {
    transport: Arc<dyn Transport>,
    admin: AdminChannel,
}

impl HandlerContext {
    pub fn new(transport: Arc<dyn Transport>, admin: AdminChannel) -> Self {
        Self { transport, admin }
    }

    pub fn admin(&self) -> &AdminChannel {
        &self.admin
    }

    /// Fire-and-forget send: a delivery fault is logged, never escalated.
    pub async fn send(&self, action: OutboundAction) {
        if let Err(e) = self.transport.send(action).await {
            warn!("{}", e);
        }
    }

    pub async fn reply(&self, chat_id: i64, text: impl Into<String>) {
        self.send(OutboundAction::text(chat_id, text)).await;
    }

    pub async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, BotError> {
        self.transport.download(media).await
    }
}

/// Handlers keyed by event shape.
#[derive(Default, Clone)]
pub struct HandlerTable {
    commands: HashMap<String, CommandFn>,
    media: HashMap<MediaKind, MediaFn>,
    /// Checked in registration order; first matching prefix wins.
    callbacks: Vec<(String, CallbackFn)>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(HandlerContext, CommandEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.commands
            .insert(name.to_string(), Arc::new(move |ctx, event| handler(ctx, event).boxed()));
        self
    }

    pub fn media<F, Fut>(mut self, kind: MediaKind, handler: F) -> Self
    where
        F: Fn(HandlerContext, MediaEvent, MediaSink) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.media.insert(
            kind,
            Arc::new(move |ctx, event, sink| handler(ctx, event, sink).boxed()),
        );
        self
    }

    /// Register a callback family. The handler receives the part of
    /// `action_id` after `prefix` (e.g. `webcam` for `model_order_webcam`).
    pub fn callback<F, Fut>(mut self, prefix: &str, handler: F) -> Self
    where
        F: Fn(HandlerContext, CallbackEvent, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.callbacks.push((
            prefix.to_string(),
            Arc::new(move |ctx, event, variant| handler(ctx, event, variant).boxed()),
        ));
        self
    }

    #[cfg(test)]
    pub fn has_command(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }
}

/// Texts used when a handler fails.
#[derive(Debug, Clone)]
pub struct FaultReplies {
    /// Generic message for the user; never carries error detail.
    pub apology: String,
    /// Prefix of the admin alert; the error detail is appended.
    pub alert: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    /// No handler matched; nothing was sent.
    Dropped,
    /// The handler failed; the fault was contained.
    Failed,
}

pub struct Dispatcher {
    table: HandlerTable,
    ctx: HandlerContext,
    media: MediaStore,
    replies: FaultReplies,
}

impl Dispatcher {
    pub fn new(table: HandlerTable, ctx: HandlerContext, media: MediaStore, replies: FaultReplies) -> Self {
        Self {
            table,
            ctx,
            media,
            replies,
        }
    }

    /// Run the matching handler for `event`. Never fails and never panics
    /// outward, so one bad event cannot stop ingestion.
    pub async fn dispatch(&self, event: InboundEvent) -> DispatchOutcome {
        debug!("Dispatching {} from {}", event.describe(), event.user().identifier());

        match event {
            InboundEvent::Command(cmd) => {
                let Some(handler) = self.table.commands.get(&cmd.name) else {
                    debug!("Ignoring unknown command /{}", cmd.name);
                    return DispatchOutcome::Dropped;
                };
                let label = format!("/{}", cmd.name);
                let chat_id = Some(cmd.chat_id);
                let fut = handler(self.ctx.clone(), cmd);
                self.guarded(label, chat_id, fut).await
            }
            InboundEvent::Media(upload) => {
                let Some(handler) = self.table.media.get(&upload.kind) else {
                    debug!("No handler for {} uploads", upload.kind.folder());
                    return DispatchOutcome::Dropped;
                };
                let label = format!("{} upload", upload.kind.folder());
                let chat_id = Some(upload.chat_id);
                let sink = self.media.sink(&upload.user, upload.kind);
                let fut = handler(self.ctx.clone(), upload, sink);
                self.guarded(label, chat_id, fut).await
            }
            InboundEvent::Callback(callback) => {
                let query_id = callback.query_id.clone();
                let matched = self.table.callbacks.iter().find_map(|(prefix, handler)| {
                    callback
                        .action_id
                        .strip_prefix(prefix.as_str())
                        .map(|variant| (handler, variant.to_string()))
                });

                let outcome = match matched {
                    Some((handler, variant)) => {
                        let label = format!("callback {}", callback.action_id);
                        let chat_id = callback.chat_id;
                        let fut = handler(self.ctx.clone(), callback, variant);
                        self.guarded(label, chat_id, fut).await
                    }
                    None => {
                        debug!("Ignoring unknown callback '{}'", callback.action_id);
                        DispatchOutcome::Dropped
                    }
                };

                // Always acknowledge, or the button keeps spinning.
                self.ctx.send(OutboundAction::AnswerCallback { query_id }).await;
                outcome
            }
        }
    }

    /// The single fault boundary around every handler invocation.
    async fn guarded(
        &self,
        label: String,
        chat_id: Option<i64>,
        fut: BoxFuture<'static, HandlerResult>,
    ) -> DispatchOutcome {
        let reason = match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => return DispatchOutcome::Handled,
            Ok(Err(e)) => format!("{:#}", e),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        let fault = BotError::Handler {
            handler: label,
            reason,
        };
        error!("{}", fault);

        if let Some(chat_id) = chat_id {
            self.ctx.reply(chat_id, self.replies.apology.clone()).await;
        }
        self.ctx
            .admin
            .notify(&format!("{}: {}", self.replies.alert, fault))
            .await;

        DispatchOutcome::Failed
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::UserRef;
    use crate::testing::{callback, command, photo, StubTransport};
    use std::sync::Mutex;

    const ADMIN: i64 = 1000;

    fn replies() -> FaultReplies {
        FaultReplies {
            apology: "Something went wrong. Please try again later.".to_string(),
            alert: "Error".to_string(),
        }
    }

    async fn failing(_: HandlerContext, _: CommandEvent) -> HandlerResult {
        Err(anyhow::anyhow!("disk full at /secret/path"))
    }

    async fn panicking(_: HandlerContext, _: CommandEvent) -> HandlerResult {
        panic!("handler bug")
    }

    async fn failing_callback(_: HandlerContext, _: CallbackEvent, _: String) -> HandlerResult {
        Err(anyhow::anyhow!("boom"))
    }

    fn dispatcher(table: HandlerTable, transport: Arc<StubTransport>) -> Dispatcher {
        let admin = AdminChannel::new(Some(ADMIN), transport.clone());
        let ctx = HandlerContext::new(transport, admin);
        Dispatcher::new(table, ctx, MediaStore::new("media-test-unused"), replies())
    }

    /// A table whose handlers record which one ran.
    fn recording_table(log: Arc<Mutex<Vec<String>>>) -> HandlerTable {
        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log);
        HandlerTable::new()
            .command("start", move |_, _| {
                let log = a.clone();
                async move {
                    log.lock().unwrap().push("start".to_string());
                    Ok(())
                }
            })
            .media(MediaKind::Photo, move |_, _, _| {
                let log = b.clone();
                async move {
                    log.lock().unwrap().push("photo".to_string());
                    Ok(())
                }
            })
            .callback("model_order_", move |_, _, variant| {
                let log = c.clone();
                async move {
                    log.lock().unwrap().push(format!("order:{}", variant));
                    Ok(())
                }
            })
            .callback("model_experience_", move |_, _, variant| {
                let log = d.clone();
                async move {
                    log.lock().unwrap().push(format!("experience:{}", variant));
                    Ok(())
                }
            })
    }

    #[tokio::test]
    async fn test_matching_rules() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let transport = Arc::new(StubTransport::new());
        let dispatcher = dispatcher(recording_table(log.clone()), transport.clone());

        let video = InboundEvent::Media(MediaEvent {
            kind: MediaKind::Video,
            chat_id: 1,
            message_id: 2,
            user: UserRef {
                id: 1,
                username: None,
            },
            media: MediaRef {
                file_id: "v".to_string(),
            },
        });

        let cases = vec![
            (command("start"), DispatchOutcome::Handled, Some("start")),
            (command("unknown"), DispatchOutcome::Dropped, None),
            (photo(&["s", "l"]), DispatchOutcome::Handled, Some("photo")),
            (video, DispatchOutcome::Dropped, None),
            (callback("model_order_webcam"), DispatchOutcome::Handled, Some("order:webcam")),
            (callback("model_experience_no"), DispatchOutcome::Handled, Some("experience:no")),
            (callback("model_order_"), DispatchOutcome::Handled, Some("order:")),
            (callback("something_else"), DispatchOutcome::Dropped, None),
        ];

        for (event, expected, ran) in cases {
            log.lock().unwrap().clear();
            let label = event.describe();
            assert_eq!(dispatcher.dispatch(event).await, expected, "{}", label);
            let log = log.lock().unwrap().clone();
            assert_eq!(log, ran.map(|r| vec![r.to_string()]).unwrap_or_default(), "{}", label);
        }

        // Unknown commands get no reply at all.
        assert_eq!(transport.count_sent(|a| matches!(a, OutboundAction::SendText { .. })), 0);
    }

    #[tokio::test]
    async fn test_every_callback_is_answered() {
        let transport = Arc::new(StubTransport::new());
        let table = HandlerTable::new().callback("model_order_", failing_callback);
        let dispatcher = dispatcher(table, transport.clone());

        dispatcher.dispatch(callback("model_order_default")).await;
        dispatcher.dispatch(callback("nobody_handles_this")).await;

        assert_eq!(
            transport.count_sent(|a| matches!(a, OutboundAction::AnswerCallback { .. })),
            2
        );
    }

    #[tokio::test]
    async fn test_handler_error_is_contained() {
        let transport = Arc::new(StubTransport::new());
        let table = HandlerTable::new().command("start", failing);
        let dispatcher = dispatcher(table, transport.clone());

        let outcome = dispatcher.dispatch(command("start")).await;

        assert_eq!(outcome, DispatchOutcome::Failed);
        let sent = transport.sent();
        assert_eq!(sent[0], OutboundAction::text(42, replies().apology));
        match &sent[1] {
            OutboundAction::SendText { chat_id, text, .. } => {
                assert_eq!(*chat_id, ADMIN);
                assert!(text.contains("disk full"));
            }
            other => panic!("expected admin alert, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_is_contained() {
        let transport = Arc::new(StubTransport::new());
        let table = HandlerTable::new().command("help", panicking);
        let dispatcher = dispatcher(table, transport.clone());

        assert_eq!(dispatcher.dispatch(command("help")).await, DispatchOutcome::Failed);
        // Still usable afterwards.
        assert_eq!(dispatcher.dispatch(command("help")).await, DispatchOutcome::Failed);
        assert!(transport
            .sent()
            .iter()
            .any(|a| matches!(a, OutboundAction::SendText { text, .. } if text.contains("handler bug"))));
    }

    #[tokio::test]
    async fn test_failed_apology_does_not_escape() {
        let transport = Arc::new(StubTransport::new());
        transport.fail_sends(true);
        let table = HandlerTable::new().command("start", failing);
        let dispatcher = dispatcher(table, transport);

        assert_eq!(dispatcher.dispatch(command("start")).await, DispatchOutcome::Failed);
    }
}
