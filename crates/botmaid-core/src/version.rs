//! Bot version and per-version change logs.
//!
//! The current version lives in the `botmaid` hash; entries for version `v` are
//! appended to the lists `log_<v>` (bot changes) and `logbm_<v>` (framework changes).

use std::sync::Arc;

use crate::{
    command::Outcome,
    dispatcher::Context,
    domain::Message,
    errors::Error,
    store::KeyValueStore,
    words::{render, Words},
    Result,
};

/// Subscription topic that receives `version broadcast`.
pub const LOG_TOPIC: &str = "log";

const META_KEY: &str = "botmaid";
const VERSION_FIELD: &str = "version";

pub fn log_key(version: &str) -> String {
    format!("log_{version}")
}

pub fn framework_log_key(version: &str) -> String {
    format!("logbm_{version}")
}

pub async fn current_version(store: &dyn KeyValueStore) -> Result<Option<String>> {
    store.hash_get(META_KEY, VERSION_FIELD).await
}

fn numbered(items: &[String]) -> String {
    items
        .iter()
        .enumerate()
        .map(|(i, item)| format!("\n{}. {item}", i + 1))
        .collect()
}

/// Rendered change log of `version`.
pub async fn change_log(store: &dyn KeyValueStore, words: &Words, version: &str) -> Result<String> {
    let mut text = numbered(&store.list_items(&log_key(version)).await?);
    let framework = store.list_items(&framework_log_key(version)).await?;
    if !framework.is_empty() {
        text.push('\n');
        text.push_str(words.framework_changes.pick());
        text.push_str(&numbered(&framework));
    }
    Ok(render(words.change_log.pick(), "", version, &text))
}

async fn require_version(ctx: &Context, store: &dyn KeyValueStore) -> Result<String> {
    current_version(store)
        .await?
        .ok_or_else(|| Error::Validation(ctx.render(&ctx.words().version_unset, "", "")))
}

/// `version` and `version log`.
pub async fn version_command(ctx: Arc<Context>) -> Result<Outcome> {
    let store = &**ctx.bm.auth().store();
    let words = ctx.words();
    let text = match ctx.args() {
        [_] => match current_version(store).await? {
            Some(v) => ctx.render(&words.version_current, &v, ""),
            None => ctx.render(&words.version_unset, "", ""),
        },
        [_, sub] if sub == "log" => {
            let v = require_version(&ctx, store).await?;
            change_log(store, words, &v).await?
        }
        _ => return Ok(Outcome::NotHandled),
    };
    ctx.reply_text(text).await?;
    Ok(Outcome::Handled)
}

/// `version set <v>`, `version log <entry>`, `version logbm <entry>` and
/// `version broadcast`.
pub async fn version_master_command(ctx: Arc<Context>) -> Result<Outcome> {
    let store = &**ctx.bm.auth().store();
    let words = ctx.words();
    let text = match ctx.args() {
        [_, sub, v] if sub == "set" => {
            store.hash_set(META_KEY, VERSION_FIELD, v).await?;
            ctx.render(&words.version_set, v, "")
        }
        [_, sub, entry] if sub == "log" => {
            let v = require_version(&ctx, store).await?;
            store.list_push(&log_key(&v), entry).await?;
            ctx.render(&words.log_added, &v, "")
        }
        [_, sub, entry] if sub == "logbm" => {
            let v = require_version(&ctx, store).await?;
            store.list_push(&framework_log_key(&v), entry).await?;
            ctx.render(&words.framework_log_added, &v, "")
        }
        [_, sub] if sub == "broadcast" => {
            let v = require_version(&ctx, store).await?;
            let log = change_log(store, words, &v).await?;
            let sent = ctx.bm.broadcast(LOG_TOPIC, Message::text(log)).await?;
            ctx.render(&words.log_broadcast, &v, &sent.to_string())
        }
        _ => return Ok(Outcome::NotHandled),
    };
    ctx.reply_text(text).await?;
    Ok(Outcome::Handled)
}
