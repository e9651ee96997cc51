//! Routing of one inbound update through the command registry.
//!
//! States: received, normalized, authorization checked, tokenized, routed, then
//! one terminal [`Disposition`].

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::{
    command::{extract_command, Outcome},
    domain::{Chat, Media, Message, Update, UpdateKind, User},
    errors::Error,
    runtime::{BotMaid, Connection},
    tokenizer::tokenize,
    utils::chat_log_line,
    words::{render, Phrases, Words},
    Result,
};

/// Why an update was dropped without running a handler to completion.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Not a message, or a message without a conversation to answer in.
    NoMessage,
    /// Timestamped before the process started.
    Stale,
    Banned,
    /// Unparseable chatter that was not addressed to us as a command.
    Unparseable,
    /// No descriptor reported the update handled.
    Unmatched,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Disposition {
    Handled { by: String },
    Dropped(DropReason),
    Errored(String),
}

/// Everything a handler may look at or act on for one update.
pub struct Context {
    pub bm: Arc<BotMaid>,
    pub conn: Arc<Connection>,
    /// The update as routed; its message carries the derived command and args.
    pub update: Update,
    pub message: Message,
    pub chat: Chat,
    /// The sender; default (id 0) when the platform did not supply one.
    pub user: User,
    pub is_master: bool,
}

impl Context {
    /// Command word without prefix; empty when the message is not a command.
    pub fn command(&self) -> &str {
        &self.message.command
    }

    /// Tokens, command token included.
    pub fn args(&self) -> &[String] {
        &self.message.args
    }

    pub fn words(&self) -> &Words {
        self.bm.words()
    }

    /// How to address the sender in a reply.
    pub fn mention_user(&self) -> String {
        self.conn.mention(&self.user)
    }

    /// Pick one of `phrases` and fill it in with the sender's mention.
    pub fn render(&self, phrases: &Phrases, name: &str, text: &str) -> String {
        render(phrases.pick(), &self.mention_user(), name, text)
    }

    /// Whether this non-command message addresses the bot.
    pub fn mentions_me(&self) -> bool {
        let msg = &self.message;
        msg.command.is_empty()
            && self
                .conn
                .mention_strings()
                .iter()
                .any(|m| !m.is_empty() && msg.text.contains(m.as_str()))
    }

    pub async fn reply_text(&self, text: impl Into<String>) -> Result<Update> {
        self.bm
            .reply(&self.conn, &self.chat, Message::text(text))
            .await
    }

    pub async fn reply_image(&self, location: impl Into<String>) -> Result<Update> {
        self.bm
            .reply(
                &self.conn,
                &self.chat,
                Message::media(Media::Image(location.into())),
            )
            .await
    }

    pub async fn reply_audio(&self, location: impl Into<String>) -> Result<Update> {
        self.bm
            .reply(
                &self.conn,
                &self.chat,
                Message::media(Media::Audio(location.into())),
            )
            .await
    }

    /// Delete a message in this conversation.
    pub async fn delete(&self, message_id: i64) -> Result<()> {
        self.conn
            .adapter
            .push(Update::deletion(self.chat.clone(), message_id))
            .await?;
        Ok(())
    }
}

/// Run one update to a terminal state. Never panics or propagates errors: the
/// outcome of a single update must not affect any other.
pub async fn dispatch(bm: Arc<BotMaid>, conn: Arc<Connection>, update: Update) -> Disposition {
    let update_id = update.id;
    let disposition = route(bm, conn.clone(), update).await;
    debug!(connection = %conn.id, update = update_id, ?disposition, "update processed");
    disposition
}

async fn route(bm: Arc<BotMaid>, conn: Arc<Connection>, mut update: Update) -> Disposition {
    if update.kind != UpdateKind::Message {
        return Disposition::Dropped(DropReason::NoMessage);
    }
    let Some(chat) = update.chat.clone() else {
        return Disposition::Dropped(DropReason::NoMessage);
    };
    let Some(mut message) = update.message.take() else {
        return Disposition::Dropped(DropReason::NoMessage);
    };
    if update.time < bm.started_at() {
        return Disposition::Dropped(DropReason::Stale);
    }
    let user = update.user.clone().unwrap_or_default();

    match is_blocked(&bm, &conn, &chat, &user).await {
        Ok(false) => {}
        Ok(true) => return Disposition::Dropped(DropReason::Banned),
        Err(e) => {
            error!(connection = %conn.id, error = %e, "ban lookup failed");
            return Disposition::Errored(e.to_string());
        }
    }

    if bm.config().log_messages {
        let shown = match &message.media {
            Some(media) if message.text.is_empty() => format!("<{}>", media.location()),
            _ => message.text.clone(),
        };
        info!(
            connection = %conn.id,
            chat = chat.id,
            "{}",
            chat_log_line(&chat.title, &user.nickname, &shown)
        );
    }

    if let Err(e) = bm.auth().remember_handle(&conn.id, &user).await {
        warn!(connection = %conn.id, error = %e, "failed to record handle");
    }

    let mentions = conn.mention_strings();
    let prefixes = &bm.config().command_prefixes;

    let tokens = match tokenize(&message.text) {
        Ok(tokens) => tokens,
        Err(e) => {
            let first = message.text.split_whitespace().next().unwrap_or_default();
            if extract_command(first, &mentions, prefixes).is_empty() {
                return Disposition::Dropped(DropReason::Unparseable);
            }
            update.message = Some(message.clone());
            let ctx = Context {
                bm: bm.clone(),
                conn: conn.clone(),
                update,
                message,
                chat,
                user,
                is_master: false,
            };
            let text = ctx.render(&ctx.words().malformed_input, "", &e.to_string());
            if let Err(send_err) = ctx.reply_text(text).await {
                warn!(connection = %conn.id, error = %send_err, "failed to report malformed input");
            }
            return Disposition::Errored(e.to_string());
        }
    };

    // The only place an update's command and args are ever written.
    message.command = tokens
        .first()
        .map(|t| extract_command(t, &mentions, prefixes))
        .unwrap_or_default();
    message.args = tokens;
    update.message = Some(message.clone());
    let arg_count = message.args.len();

    let is_master = if update.user.is_some() {
        match bm.auth().is_master(&conn.id, &user).await {
            Ok(v) => v,
            Err(e) => {
                error!(connection = %conn.id, error = %e, "master lookup failed");
                return Disposition::Errored(e.to_string());
            }
        }
    } else {
        false
    };

    let candidates = bm.registry().matching(&message.command, is_master, arg_count);
    let ctx = Arc::new(Context {
        bm: bm.clone(),
        conn: conn.clone(),
        update,
        message,
        chat,
        user,
        is_master,
    });

    for desc in candidates {
        match desc.handler().handle(ctx.clone()).await {
            Ok(Outcome::Handled) => {
                return Disposition::Handled {
                    by: desc.id.clone(),
                }
            }
            Ok(Outcome::NotHandled) => continue,
            Err(e) => return handler_failed(&ctx, &desc.id, e).await,
        }
    }

    Disposition::Dropped(DropReason::Unmatched)
}

async fn is_blocked(bm: &BotMaid, conn: &Connection, chat: &Chat, user: &User) -> Result<bool> {
    if bm.auth().is_conversation_banned(&conn.id, chat.id).await? {
        return Ok(true);
    }
    Ok(user.id != 0 && bm.auth().is_banned(&conn.id, user).await?)
}

async fn handler_failed(ctx: &Context, handler: &str, e: Error) -> Disposition {
    match e.user_message() {
        Some(text) => {
            if let Err(send_err) = ctx.reply_text(text).await {
                warn!(
                    connection = %ctx.conn.id,
                    handler,
                    error = %send_err,
                    "failed to report handler rejection"
                );
            }
        }
        None => error!(
            connection = %ctx.conn.id,
            chat = ctx.chat.id,
            handler,
            command = ctx.command(),
            error = %e,
            "command handler failed"
        ),
    }
    Disposition::Errored(e.to_string())
}
