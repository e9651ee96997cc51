//! Telegram adapter (teloxide).
//!
//! This crate implements the `botmaid-core` PlatformAdapter over the Telegram Bot API.

use std::{
    sync::{
        atomic::{AtomicI32, Ordering},
        OnceLock,
    },
    time::Duration,
};

use async_trait::async_trait;
use regex::Regex;
use teloxide::{
    prelude::*,
    types::{InputFile, MessageEntityKind, ParseMode},
};
use tokio::time::sleep;
use tracing::debug;

use botmaid_core::{
    domain::{Chat, ChatKind, Media, Mention, Message, Update, UpdateKind, User},
    errors::Error,
    platform::{PlatformAdapter, PullConfig},
    tokenizer::quote,
    Result,
};

/// Slack on top of the long-poll timeout before the HTTP client gives up.
const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

pub struct TelegramAdapter {
    bot: Bot,
    /// Next `getUpdates` offset; only the connection's poller advances it.
    offset: AtomicI32,
}

impl TelegramAdapter {
    pub fn new(bot: Bot) -> Self {
        Self {
            bot,
            offset: AtomicI32::new(0),
        }
    }

    /// Bot whose HTTP client outlives a long poll of `pull_timeout`.
    pub fn from_token(token: impl Into<String>, pull_timeout: Duration) -> Result<Self> {
        let client = teloxide::net::default_reqwest_settings()
            .timeout(pull_timeout + HTTP_TIMEOUT_SLACK)
            .build()
            .map_err(|e| Error::Config(format!("failed to build telegram client: {e}")))?;
        Ok(Self::new(Bot::with_client(token, client)))
    }

    pub fn bot(&self) -> Bot {
        self.bot.clone()
    }

    fn tg_chat(chat: &Chat) -> teloxide::types::ChatId {
        teloxide::types::ChatId(chat.id)
    }

    fn map_err(e: teloxide::RequestError) -> Error {
        Error::Transport(format!("telegram error: {e}"))
    }

    async fn with_retry<T, Fut>(&self, mut op: impl FnMut() -> Fut) -> Result<T>
    where
        Fut: std::future::IntoFuture<Output = std::result::Result<T, teloxide::RequestError>>,
        Fut::IntoFuture: Send,
    {
        const MAX_RETRIES: usize = 1;
        let mut attempts = 0usize;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) => match e {
                    teloxide::RequestError::RetryAfter(d) if attempts < MAX_RETRIES => {
                        attempts += 1;
                        sleep(d).await;
                        continue;
                    }
                    other => return Err(Self::map_err(other)),
                },
            }
        }
    }

    fn input_file(location: &str) -> Result<InputFile> {
        if location.starts_with("http://") || location.starts_with("https://") {
            let url = reqwest::Url::parse(location)
                .map_err(|e| Error::Validation(format!("invalid media url {location}: {e}")))?;
            Ok(InputFile::url(url))
        } else {
            Ok(InputFile::file(location))
        }
    }

    async fn send(&self, chat: &Chat, message: &Message) -> Result<teloxide::types::Message> {
        let to = Self::tg_chat(chat);
        match &message.media {
            Some(Media::Image(loc)) if loc.ends_with(".gif") => {
                let file = Self::input_file(loc)?;
                self.with_retry(|| self.bot.send_animation(to, file.clone()))
                    .await
            }
            Some(Media::Image(loc)) => {
                let file = Self::input_file(loc)?;
                self.with_retry(|| self.bot.send_photo(to, file.clone()))
                    .await
            }
            Some(Media::Audio(loc)) => {
                let file = Self::input_file(loc)?;
                self.with_retry(|| self.bot.send_voice(to, file.clone()))
                    .await
            }
            None => {
                let text = message.text.trim().to_string();
                self.with_retry(|| {
                    self.bot
                        .send_message(to, text.clone())
                        .parse_mode(ParseMode::Html)
                })
                .await
            }
        }
    }
}

#[async_trait]
impl PlatformAdapter for TelegramAdapter {
    fn platform_name(&self) -> &str {
        "Telegram"
    }

    fn mention_strings(&self, user: &User) -> Vec<String> {
        let mut out = vec![user_link(user.id, &user.nickname)];
        if !user.username.is_empty() {
            out.push(format!("@{}", user.username));
        }
        out
    }

    fn parse_mention(&self, text: &str) -> Mention {
        parse_mention(text)
    }

    async fn me(&self) -> Result<User> {
        let me = self.with_retry(|| self.bot.get_me()).await?;
        Ok(to_user(&me.user))
    }

    async fn pull(&self, cfg: &PullConfig) -> Result<Vec<Update>> {
        let offset = self.offset.load(Ordering::SeqCst);
        let limit = cfg.limit.clamp(1, 100) as u8;
        let timeout = u32::try_from(cfg.timeout.as_secs()).unwrap_or(u32::MAX);

        let raw = self
            .bot
            .get_updates()
            .offset(offset)
            .limit(limit)
            .timeout(timeout)
            .await
            .map_err(Self::map_err)?;

        let mut out = Vec::with_capacity(raw.len());
        for u in raw {
            if u.id < offset {
                continue;
            }
            self.offset.fetch_max(u.id + 1, Ordering::SeqCst);
            match normalize(&u) {
                Some(update) => out.push(update),
                None => debug!(update = u.id, "skipping non-message telegram update"),
            }
        }
        Ok(out)
    }

    async fn push(&self, mut update: Update) -> Result<Update> {
        let Some(chat) = update.chat.clone() else {
            return Err(Error::Validation("outbound update has no chat".to_string()));
        };

        if update.kind == UpdateKind::Delete {
            let id = i32::try_from(update.id)
                .map_err(|_| Error::Validation(format!("invalid message id {}", update.id)))?;
            self.with_retry(|| {
                self.bot
                    .delete_message(Self::tg_chat(&chat), teloxide::types::MessageId(id))
            })
            .await?;
            return Ok(update);
        }

        let Some(message) = update.message.as_mut() else {
            return Err(Error::Validation("outbound update has no message".to_string()));
        };
        let sent = self.send(&chat, message).await?;
        message.id = i64::from(sent.id.0);
        update.id = message.id;
        update.time = sent.date;
        Ok(update)
    }
}

fn user_link(id: i64, nickname: &str) -> String {
    format!("<a href=\"tg://user?id={id}\">{nickname}</a>")
}

fn parse_mention(text: &str) -> Mention {
    static LINK: OnceLock<Regex> = OnceLock::new();
    static HANDLE: OnceLock<Regex> = OnceLock::new();

    let text = text.trim();
    let link = LINK.get_or_init(|| {
        Regex::new(r#"^<a href="tg://user\?id=(\d+)">.*</a>$"#).expect("valid regex")
    });
    if let Some(id) = link
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        return Mention::Id(id);
    }

    let handle = HANDLE.get_or_init(|| Regex::new(r"^@(\w{1,64})$").expect("valid regex"));
    match handle.captures(text).and_then(|c| c.get(1)) {
        Some(m) => Mention::Handle(m.as_str().to_string()),
        None => Mention::None,
    }
}

fn to_user(u: &teloxide::types::User) -> User {
    User {
        id: u.id.0 as i64,
        username: u.username.clone().unwrap_or_default(),
        nickname: u.full_name(),
    }
}

fn chat_kind(chat: &teloxide::types::Chat) -> ChatKind {
    if chat.is_private() {
        ChatKind::Private
    } else if chat.is_group() || chat.is_supergroup() {
        ChatKind::Group
    } else if chat.is_channel() {
        ChatKind::Channel
    } else {
        ChatKind::Other("unknown".to_string())
    }
}

/// A `text_mention` entity: UTF-16 offset/length plus the referenced user.
struct TextMention {
    offset: usize,
    length: usize,
    id: i64,
    nickname: String,
}

/// Replace each text mention with a quoted user link, so the link survives
/// tokenization as one argument. Offsets are in UTF-16 code units.
fn expand_text_mentions(text: &str, mentions: &[TextMention]) -> String {
    if mentions.is_empty() {
        return text.to_string();
    }

    let mut units: Vec<u16> = text.encode_utf16().collect();
    let mut sorted: Vec<&TextMention> = mentions.iter().collect();
    sorted.sort_by_key(|m| std::cmp::Reverse(m.offset));

    for m in sorted {
        let end = m.offset.saturating_add(m.length);
        if end > units.len() {
            continue;
        }
        let link = quote(&user_link(m.id, &m.nickname));
        units.splice(m.offset..end, link.encode_utf16());
    }
    String::from_utf16_lossy(&units)
}

fn normalize(u: &teloxide::types::Update) -> Option<Update> {
    let teloxide::types::UpdateKind::Message(msg) = &u.kind else {
        return None;
    };

    let mut text = msg.text().unwrap_or_default().to_string();
    if !text.is_empty() {
        let mentions: Vec<TextMention> = msg
            .entities()
            .unwrap_or_default()
            .iter()
            .filter_map(|e| match &e.kind {
                MessageEntityKind::TextMention { user } => Some(TextMention {
                    offset: e.offset,
                    length: e.length,
                    id: user.id.0 as i64,
                    nickname: user.full_name(),
                }),
                _ => None,
            })
            .collect();
        text = expand_text_mentions(&text, &mentions);

        // Replying to someone reads as addressing them.
        if let Some(author) = msg
            .reply_to_message()
            .and_then(|r| r.from())
            .and_then(|f| f.username.as_deref())
        {
            text = format!("@{author} {text}");
        }
    }
    if let Some(emoji) = msg.sticker().and_then(|s| s.emoji.as_deref()) {
        text = emoji.to_string();
    }

    Some(Update {
        id: i64::from(u.id),
        kind: UpdateKind::Message,
        time: msg.date,
        chat: Some(Chat {
            id: msg.chat.id.0,
            kind: chat_kind(&msg.chat),
            title: msg.chat.title().unwrap_or_default().to_string(),
        }),
        user: msg.from().map(to_user),
        message: Some(Message {
            id: i64::from(msg.id.0),
            text,
            ..Message::default()
        }),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use botmaid_core::tokenizer::tokenize;

    #[test]
    fn mentions_parse_both_spellings() {
        assert_eq!(
            parse_mention(r#"<a href="tg://user?id=42">Jane Roe</a>"#),
            Mention::Id(42)
        );
        assert_eq!(parse_mention("@jane_roe"), Mention::Handle("jane_roe".into()));
        assert_eq!(parse_mention("jane"), Mention::None);
        assert_eq!(parse_mention("@"), Mention::None);
    }

    #[test]
    fn mention_strings_link_first_then_handle() {
        let adapter = TelegramAdapter::new(Bot::new("0:test"));
        let user = User {
            id: 7,
            username: "maid".into(),
            nickname: "Maid".into(),
        };
        assert_eq!(
            adapter.mention_strings(&user),
            vec![
                r#"<a href="tg://user?id=7">Maid</a>"#.to_string(),
                "@maid".to_string()
            ]
        );
        let anonymous = User {
            username: String::new(),
            ..user
        };
        assert_eq!(adapter.mention_strings(&anonymous).len(), 1);
    }

    #[test]
    fn text_mentions_expand_into_one_token() {
        // "🎉" is two UTF-16 units, so "Jane Roe" starts at unit 10.
        let text = "/ban 🎉 x Jane Roe";
        let out = expand_text_mentions(
            text,
            &[TextMention {
                offset: 10,
                length: 8,
                id: 42,
                nickname: "Jane Roe".into(),
            }],
        );
        let tokens = tokenize(&out).unwrap();
        assert_eq!(tokens.len(), 4);
        assert_eq!(tokens[3], r#"<a href="tg://user?id=42">Jane Roe</a>"#);
        assert_eq!(parse_mention(&tokens[3]), Mention::Id(42));
    }

    #[test]
    fn out_of_range_entities_are_ignored() {
        let out = expand_text_mentions(
            "hi",
            &[TextMention {
                offset: 1,
                length: 5,
                id: 1,
                nickname: "x".into(),
            }],
        );
        assert_eq!(out, "hi");
    }
}
