//! Commands every bot gets.

use std::sync::Arc;

use tracing::info;

use crate::{
    auth::Toggle,
    command::{handler_fn, CommandDescriptor, HelpEntry, Outcome},
    dispatcher::Context,
    domain::{Chat, ChatKind, Message},
    errors::Error,
    help,
    runtime::{subscription_key, subscription_member, BotMaidBuilder},
    utils::list_to_string,
    version, Result,
};

pub const TRACE_PRIORITY: i32 = i32::MAX;
pub const HELP_PRIORITY: i32 = 10_000;
pub const RESPONDER_PRIORITY: i32 = -10_000;

pub fn register_all(b: &mut BotMaidBuilder) {
    b.register(
        CommandDescriptor::new("trace", handler_fn(trace)).priority(TRACE_PRIORITY),
    );
    b.register(
        CommandDescriptor::new("help", handler_fn(help::help_command))
            .names(["help"])
            .priority(HELP_PRIORITY)
            .args(1, 2)
            .help(
                HelpEntry::new("help", "Show commands, or the details of one")
                    .usage("help [<command>]"),
            ),
    );
    b.register(
        CommandDescriptor::new("help-responder", handler_fn(help::help_responder))
            .priority(RESPONDER_PRIORITY),
    );
    b.register(
        CommandDescriptor::new("master", handler_fn(master))
            .names(["master"])
            .master_only()
            .args(2, 2)
            .help(
                HelpEntry::new("master", "Grant or revoke master rights")
                    .usage("master <user>")
                    .detail("Toggles: a master becomes a normal user again."),
            ),
    );
    b.register(
        CommandDescriptor::new("ban", handler_fn(ban))
            .names(["ban"])
            .master_only()
            .args(2, 2)
            .help(
                HelpEntry::new("ban", "Ban or unban a user")
                    .usage("ban <user>")
                    .detail("Banned users are ignored. Run again to unban."),
            ),
    );
    b.register(
        CommandDescriptor::new("send", handler_fn(send))
            .names(["send"])
            .master_only()
            .args(2, 4)
            .help(
                HelpEntry::new("send", "Say something, here or elsewhere")
                    .usage("send <text> [<chat type> <chat id>]"),
            ),
    );
    b.register(
        CommandDescriptor::new("status", handler_fn(status))
            .names(["status"])
            .args(1, 1)
            .help(HelpEntry::new("status", "Check that the bot is alive").usage("status")),
    );
    b.register(
        CommandDescriptor::new("subscribe", handler_fn(subscribe))
            .names(["subscribe"])
            .master_only()
            .args(1, 2)
            .help(
                HelpEntry::new("subscribe", "Toggle this chat's subscription to a topic")
                    .usage("subscribe <topic>"),
            ),
    );
    b.register(
        CommandDescriptor::new("version-master", handler_fn(version::version_master_command))
            .names(["version"])
            .master_only()
            .priority(1)
            .args(2, 3)
            .help(
                HelpEntry::new("version", "Show or maintain the version and its change log")
                    .usage("version [log] | version set <version> | version log|logbm <entry> | version broadcast")
                    .detail("broadcast sends the change log to chats subscribed to \"log\"."),
            ),
    );
    b.register(
        CommandDescriptor::new("version", handler_fn(version::version_command))
            .names(["version"])
            .args(1, 2)
            .help(
                HelpEntry::new("version", "Show the version or its change log")
                    .usage("version [log]"),
            ),
    );
}

async fn trace(ctx: Arc<Context>) -> Result<Outcome> {
    if !ctx.command().is_empty() {
        info!(
            connection = %ctx.conn.id,
            chat = ctx.chat.id,
            user = ctx.user.id,
            command = ctx.command(),
            args = ctx.args().len(),
            "command received"
        );
    }
    Ok(Outcome::NotHandled)
}

async fn master(ctx: Arc<Context>) -> Result<Outcome> {
    let [_, target] = ctx.args() else {
        return Ok(Outcome::NotHandled);
    };
    let Some(id) = ctx.bm.resolve_user(&ctx.conn, target).await? else {
        return Err(Error::Validation(ctx.render(
            &ctx.words().invalid_user,
            target,
            "",
        )));
    };

    let words = ctx.words();
    let text = match ctx.bm.auth().toggle_master(&ctx.conn.id, &id.to_string()).await? {
        Toggle::Added => &words.master_registered,
        Toggle::Removed => &words.master_unregistered,
    };
    ctx.reply_text(ctx.render(text, target, "")).await?;
    Ok(Outcome::Handled)
}

async fn ban(ctx: Arc<Context>) -> Result<Outcome> {
    let [_, target] = ctx.args() else {
        return Ok(Outcome::NotHandled);
    };
    // Unresolvable names are banned verbatim and matched against handles.
    let member = match ctx.bm.resolve_user(&ctx.conn, target).await? {
        Some(id) => id.to_string(),
        None => target.clone(),
    };

    let words = ctx.words();
    let text = match ctx.bm.auth().toggle_ban(&ctx.conn.id, &member).await? {
        Toggle::Added => &words.banned,
        Toggle::Removed => &words.unbanned,
    };
    ctx.reply_text(ctx.render(text, target, "")).await?;
    Ok(Outcome::Handled)
}

async fn send(ctx: Arc<Context>) -> Result<Outcome> {
    match ctx.args() {
        [_, text] => {
            ctx.reply_text(text.clone()).await?;
        }
        [_, text, kind, id] => {
            let Ok(id) = id.parse::<i64>() else {
                return Err(Error::Validation(ctx.render(
                    &ctx.words().invalid_chat_id,
                    id,
                    "",
                )));
            };
            let chat = Chat::new(id, ChatKind::parse(kind));
            ctx.bm
                .reply(&ctx.conn, &chat, Message::text(text.clone()))
                .await?;
        }
        _ => return Ok(Outcome::NotHandled),
    }
    Ok(Outcome::Handled)
}

async fn status(ctx: Arc<Context>) -> Result<Outcome> {
    ctx.reply_text(ctx.words().status_ok.pick()).await?;
    Ok(Outcome::Handled)
}

async fn subscribe(ctx: Arc<Context>) -> Result<Outcome> {
    let words = ctx.words();
    let topics = &ctx.bm.config().subscription_topics;

    let topic = match ctx.args() {
        [_, topic] if topics.iter().any(|t| t == topic) => topic,
        _ => {
            let list = list_to_string(
                topics.as_slice(),
                &words.topic_format,
                &words.topic_separator,
                &words.topic_and,
            );
            ctx.reply_text(ctx.render(&words.subscription_topics, "", &list))
                .await?;
            return Ok(Outcome::Handled);
        }
    };

    let store = ctx.bm.auth().store();
    let key = subscription_key(topic);
    let member = subscription_member(&ctx.conn.id, &ctx.chat);
    let text = if store.set_remove(&key, &member).await? {
        &words.unsubscribed
    } else {
        store.set_add(&key, &member).await?;
        &words.subscribed
    };
    ctx.reply_text(ctx.render(text, topic, "")).await?;
    Ok(Outcome::Handled)
}
