//! Default handler table: static text replies, media intake and the
//! `model_*` callback families.

pub mod texts;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::dispatcher::{FaultReplies, HandlerContext, HandlerResult, HandlerTable};
use crate::media::MediaSink;
use crate::platform::{
    BotCommand, CallbackEvent, InlineKeyboard, MediaEvent, MediaKind, OutboundAction,
};
use texts::{render, Texts};

pub const MODEL_ORDER_PREFIX: &str = "model_order_";
pub const MODEL_EXPERIENCE_PREFIX: &str = "model_experience_";

/// Commands that just answer with a fixed text.
fn text_commands(texts: &Texts) -> Vec<(&'static str, String)> {
    vec![
        ("start", texts.start.clone()),
        ("photographer", texts.photographer.clone()),
        ("makeup", texts.makeup.clone()),
        ("stylist", texts.stylist.clone()),
        ("about_platform", texts.about_platform.clone()),
        ("equipment", texts.equipment.clone()),
        ("privacy_rules", texts.privacy_rules.clone()),
        ("help", texts.help.clone()),
        ("portfolio", texts.portfolio.clone()),
        ("next_steps", texts.next_steps.clone()),
    ]
}

pub fn default_table(texts: Arc<Texts>) -> HandlerTable {
    let mut table = HandlerTable::new();

    for (name, reply) in text_commands(&texts) {
        table = table.command(name, move |ctx, cmd| {
            let reply = reply.clone();
            async move {
                ctx.reply(cmd.chat_id, reply).await;
                Ok(())
            }
        });
    }

    let t = texts.clone();
    table = table.command("model", move |ctx, cmd| {
        let texts = t.clone();
        async move {
            ctx.send(OutboundAction::SendText {
                chat_id: cmd.chat_id,
                text: texts.model_choice.clone(),
                keyboard: Some(model_keyboard(&texts)),
            })
            .await;
            Ok(())
        }
    });

    for kind in [MediaKind::Photo, MediaKind::Video] {
        let t = texts.clone();
        table = table.media(kind, move |ctx, upload, sink| {
            store_upload(ctx, upload, sink, t.clone())
        });
    }

    let t = texts.clone();
    table = table.callback(MODEL_ORDER_PREFIX, move |ctx, callback, variant| {
        let texts = t.clone();
        async move {
            let reply = match variant.as_str() {
                "default" => &texts.model_order_default,
                "webcam" => &texts.model_order_webcam,
                _ => &texts.callback_fallback,
            };
            answer_in_chat(&ctx, &callback, reply).await;
            Ok(())
        }
    });

    let t = texts;
    table.callback(MODEL_EXPERIENCE_PREFIX, move |ctx, callback, variant| {
        let texts = t.clone();
        async move {
            let reply = match variant.as_str() {
                "yes" => &texts.model_experience_yes,
                "no" => &texts.model_experience_no,
                _ => &texts.callback_fallback,
            };
            answer_in_chat(&ctx, &callback, reply).await;
            Ok(())
        }
    })
}

pub fn model_keyboard(texts: &Texts) -> InlineKeyboard {
    InlineKeyboard::column(&[
        (
            texts.model_choice_default_button.as_str(),
            "model_order_default",
        ),
        (
            texts.model_choice_webcam_button.as_str(),
            "model_order_webcam",
        ),
    ])
}

/// The menu pushed once at startup.
pub fn command_menu(texts: &Texts) -> Vec<BotCommand> {
    vec![
        BotCommand::new("start", &texts.menu_start),
        BotCommand::new("about_platform", &texts.menu_about_platform),
        BotCommand::new("privacy_rules", &texts.menu_privacy_rules),
    ]
}

pub fn fault_replies(texts: &Texts) -> FaultReplies {
    FaultReplies {
        apology: texts.error_reply.clone(),
        alert: texts.error_alert.clone(),
    }
}

async fn answer_in_chat(ctx: &HandlerContext, callback: &CallbackEvent, text: &str) {
    // Inline-mode callbacks carry no chat; the acknowledgement is all they get.
    if let Some(chat_id) = callback.chat_id {
        ctx.reply(chat_id, text).await;
    }
}

async fn store_upload(
    ctx: HandlerContext,
    upload: MediaEvent,
    sink: MediaSink,
    texts: Arc<Texts>,
) -> HandlerResult {
    let who = upload.user.identifier();

    let content = ctx
        .download(&upload.media)
        .await
        .with_context(|| format!("Failed to download {} from {}", upload.kind.folder(), who))?;
    let path = sink.store(&upload.media, content.as_slice()).await?;
    info!("New {} from {}: {}", upload.kind.folder(), who, path.display());

    let admin = ctx.admin();
    admin.forward(upload.chat_id, upload.message_id).await;
    admin.notify(&render(&texts.upload_notice, &who)).await;

    let template = match upload.kind {
        MediaKind::Photo => &texts.photo_added,
        MediaKind::Video => &texts.video_added,
    };
    ctx.reply(upload.chat_id, render(template, &who)).await;
    Ok(())
}
