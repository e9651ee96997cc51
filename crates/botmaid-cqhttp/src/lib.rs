//! QQ adapter speaking the CQHTTP JSON-over-HTTP API.
//!
//! Every action is a `POST {endpoint}/{action}` with a JSON body; responses
//! carry `status`, `retcode` and `data`.

use std::{
    collections::HashMap,
    sync::{OnceLock, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use botmaid_core::{
    domain::{Chat, ChatKind, Media, Mention, Message, Update, UpdateKind, User},
    errors::Error,
    platform::{PlatformAdapter, PullConfig},
    Result,
};

const HTTP_TIMEOUT_SLACK: Duration = Duration::from_secs(15);

pub struct CqhttpAdapter {
    endpoint: String,
    access_token: Option<String>,
    http: reqwest::Client,
    /// group id -> group name, refreshed from `get_group_list` on a miss.
    group_titles: RwLock<HashMap<i64, String>>,
}

impl CqhttpAdapter {
    pub fn new(
        endpoint: impl Into<String>,
        access_token: Option<String>,
        pull_timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(pull_timeout + HTTP_TIMEOUT_SLACK)
            .build()
            .map_err(|e| Error::Config(format!("failed to build cqhttp client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            access_token: access_token.filter(|t| !t.is_empty()),
            http,
            group_titles: RwLock::new(HashMap::new()),
        })
    }

    async fn call(&self, action: &str, body: Value) -> Result<Value> {
        let mut req = self
            .http
            .post(format!("{}/{action}", self.endpoint))
            .json(&body);
        if let Some(token) = &self.access_token {
            req = req.bearer_auth(token);
        }

        let resp = req
            .send()
            .await
            .map_err(|e| Error::Transport(format!("cqhttp {action}: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transport(format!(
                "cqhttp {action}: {status} {}",
                body.chars().take(200).collect::<String>()
            )));
        }

        let v: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("cqhttp {action}: {e}")))?;
        parse_response(action, v)
    }

    fn cached_title(&self, group_id: i64) -> Option<String> {
        self.group_titles
            .read()
            .ok()
            .and_then(|titles| titles.get(&group_id).cloned())
    }

    async fn refresh_group_titles(&self) -> Result<()> {
        let data = self.call("get_group_list", json!({})).await?;
        let groups: Vec<GroupInfo> = serde_json::from_value(data)?;
        if let Ok(mut titles) = self.group_titles.write() {
            titles.clear();
            titles.extend(groups.into_iter().map(|g| (g.group_id, g.group_name)));
        }
        Ok(())
    }
}

#[async_trait]
impl PlatformAdapter for CqhttpAdapter {
    fn platform_name(&self) -> &str {
        "QQ"
    }

    fn mention_strings(&self, user: &User) -> Vec<String> {
        vec![at_code(user.id)]
    }

    fn parse_mention(&self, text: &str) -> Mention {
        parse_mention(text)
    }

    async fn me(&self) -> Result<User> {
        let data = self.call("get_login_info", json!({})).await?;
        let info: LoginInfo = serde_json::from_value(data)?;
        Ok(User {
            id: info.user_id,
            username: info.user_id.to_string(),
            nickname: info.nickname,
        })
    }

    async fn pull(&self, cfg: &PullConfig) -> Result<Vec<Update>> {
        let data = self
            .call(
                "get_updates",
                json!({ "limit": cfg.limit, "timeout": cfg.timeout.as_secs() }),
            )
            .await?;
        let raw: Vec<Value> = serde_json::from_value(data)?;

        let mut events = Vec::with_capacity(raw.len());
        for v in raw {
            match serde_json::from_value::<Event>(v) {
                Ok(e) if e.post_type == "message" => events.push(e),
                Ok(e) => debug!(post_type = %e.post_type, "skipping non-message cqhttp event"),
                Err(e) => debug!(error = %e, "skipping unreadable cqhttp event"),
            }
        }

        let missing_title = events.iter().any(|e| {
            e.message_type == "group"
                && e.group_id.is_some_and(|id| self.cached_title(id).is_none())
        });
        if missing_title {
            if let Err(e) = self.refresh_group_titles().await {
                warn!(error = %e, "failed to refresh cqhttp group list");
            }
        }

        Ok(events
            .iter()
            .filter_map(|e| normalize(e, |id| self.cached_title(id)))
            .collect())
    }

    async fn push(&self, mut update: Update) -> Result<Update> {
        if update.kind == UpdateKind::Delete {
            self.call("delete_msg", json!({ "message_id": update.id }))
                .await?;
            return Ok(update);
        }

        let Some(chat) = update.chat.clone() else {
            return Err(Error::Validation("outbound update has no chat".to_string()));
        };
        let Some(message) = update.message.as_mut() else {
            return Err(Error::Validation("outbound update has no message".to_string()));
        };

        let mut body = target(&chat)?;
        body["message"] = Value::String(outbound_text(message).await?);

        let data = self.call("send_msg", body).await?;
        let sent: SentMessage = serde_json::from_value(data)?;
        message.id = sent.message_id;
        update.id = sent.message_id;
        update.time = Utc::now();
        Ok(update)
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: Option<String>,
    #[serde(default)]
    retcode: i64,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct LoginInfo {
    user_id: i64,
    #[serde(default)]
    nickname: String,
}

#[derive(Debug, Deserialize)]
struct GroupInfo {
    group_id: i64,
    #[serde(default)]
    group_name: String,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Default, Deserialize)]
struct Sender {
    #[serde(default)]
    nickname: String,
    #[serde(default)]
    card: String,
}

#[derive(Debug, Deserialize)]
struct Event {
    post_type: String,
    #[serde(default)]
    message_type: String,
    #[serde(default)]
    message_id: i64,
    #[serde(default)]
    time: i64,
    #[serde(default)]
    user_id: i64,
    group_id: Option<i64>,
    discuss_id: Option<i64>,
    #[serde(default)]
    raw_message: String,
    #[serde(default)]
    sender: Sender,
}

fn retcode_description(code: i64) -> Option<&'static str> {
    Some(match code {
        0 => "succeeded",
        1 => "entered asynchronous execution",
        100 => "missing or invalid parameters",
        102 => "invalid return data",
        103 => "operation failed",
        104 => "invalid credentials",
        201 => "worker thread pool is not initialized",
        10100 => "terminated by a conflicting request",
        _ => return None,
    })
}

/// Unwrap `data` from a CQHTTP response envelope.
fn parse_response(action: &str, v: Value) -> Result<Value> {
    let resp: ApiResponse = serde_json::from_value(v)
        .map_err(|e| Error::Transport(format!("cqhttp {action}: {e}")))?;
    match resp.status.as_deref() {
        None => Err(Error::Transport(format!(
            "cqhttp {action}: unsuccessful request"
        ))),
        Some("failed") => {
            let reason = retcode_description(resp.retcode)
                .map(str::to_string)
                .unwrap_or_else(|| format!("retcode {}", resp.retcode));
            Err(Error::Transport(format!("cqhttp {action}: {reason}")))
        }
        Some(_) => Ok(resp.data),
    }
}

fn at_code(id: i64) -> String {
    format!("[CQ:at,qq={id}]")
}

fn parse_mention(text: &str) -> Mention {
    static AT: OnceLock<Regex> = OnceLock::new();
    static HANDLE: OnceLock<Regex> = OnceLock::new();
    let at = AT.get_or_init(|| Regex::new(r"^\[CQ:at,qq=(\d+)\]$").expect("valid regex"));
    let handle = HANDLE.get_or_init(|| Regex::new(r"^@(\w+)$").expect("valid regex"));

    let text = text.trim();
    if let Some(id) = at
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<i64>().ok())
    {
        return Mention::Id(id);
    }
    if let Some(c) = handle.captures(text) {
        return Mention::Handle(c[1].to_string());
    }
    Mention::None
}

fn normalize(e: &Event, title_of: impl Fn(i64) -> Option<String>) -> Option<Update> {
    let (kind, chat_id) = match e.message_type.as_str() {
        "private" => (ChatKind::Private, e.user_id),
        "group" => (ChatKind::Group, e.group_id?),
        "discuss" => (ChatKind::Other("discuss".to_string()), e.discuss_id?),
        other => {
            debug!(message_type = other, "skipping unknown cqhttp message type");
            return None;
        }
    };

    let title = if kind == ChatKind::Group {
        title_of(chat_id).unwrap_or_default()
    } else {
        String::new()
    };

    let nickname = if kind == ChatKind::Group && !e.sender.card.is_empty() {
        e.sender.card.clone()
    } else {
        e.sender.nickname.clone()
    };

    Some(Update {
        id: e.message_id,
        kind: UpdateKind::Message,
        time: DateTime::<Utc>::from_timestamp(e.time, 0).unwrap_or_else(Utc::now),
        chat: Some(Chat {
            id: chat_id,
            kind,
            title,
        }),
        user: Some(User {
            id: e.user_id,
            username: e.user_id.to_string(),
            nickname,
        }),
        message: Some(Message {
            id: e.message_id,
            text: e.raw_message.clone(),
            ..Message::default()
        }),
    })
}

/// `send_msg` addressing fields for `chat`.
fn target(chat: &Chat) -> Result<Value> {
    let id_field = match chat.kind.as_str() {
        "private" => "user_id",
        "group" => "group_id",
        "discuss" => "discuss_id",
        other => {
            return Err(Error::Validation(format!(
                "cqhttp cannot send to {other} chats"
            )))
        }
    };
    let mut body = json!({ "message_type": chat.kind.as_str() });
    body[id_field] = json!(chat.id);
    Ok(body)
}

async fn outbound_text(message: &Message) -> Result<String> {
    let Some(media) = &message.media else {
        return Ok(message.text.clone());
    };
    let file = if media.is_remote() {
        media.location().to_string()
    } else {
        let path = tokio::fs::canonicalize(media.location()).await?;
        format!("file://{}", path.display())
    };
    Ok(match media {
        Media::Image(_) => format!("[CQ:image,file={file}]"),
        Media::Audio(_) => format!("[CQ:record,file={file}]"),
    })
}
