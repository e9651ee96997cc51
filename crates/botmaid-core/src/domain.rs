use chrono::{DateTime, Utc};

/// What kind of event an [`Update`] carries.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UpdateKind {
    Message,
    Delete,
    Other(String),
}

/// Platform-specific conversation type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ChatKind {
    Private,
    Group,
    Channel,
    Other(String),
}

impl ChatKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChatKind::Private => "private",
            ChatKind::Group => "group",
            ChatKind::Channel => "channel",
            ChatKind::Other(s) => s,
        }
    }

    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "private" => ChatKind::Private,
            "group" | "supergroup" => ChatKind::Group,
            "channel" => ChatKind::Channel,
            other => ChatKind::Other(other.to_string()),
        }
    }
}

/// Where a reply must be sent.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub kind: ChatKind,
    pub title: String,
}

impl Chat {
    pub fn new(id: i64, kind: ChatKind) -> Self {
        Self {
            id,
            kind,
            title: String::new(),
        }
    }
}

/// The actor behind an update.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    /// Platform handle without the leading `@` (may be empty).
    pub username: String,
    pub nickname: String,
}

/// Outbound or inbound media reference: a local path or a URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Media {
    Image(String),
    Audio(String),
}

impl Media {
    pub fn location(&self) -> &str {
        match self {
            Media::Image(s) | Media::Audio(s) => s,
        }
    }

    pub fn is_remote(&self) -> bool {
        let loc = self.location();
        loc.starts_with("http://") || loc.starts_with("https://")
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    pub id: i64,
    pub text: String,
    pub media: Option<Media>,
    /// Command word without prefix or mention; empty when the text is not a command.
    pub command: String,
    /// Tokenized text, command token included.
    pub args: Vec<String>,
}

impl Message {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn media(media: Media) -> Self {
        Self {
            media: Some(media),
            ..Self::default()
        }
    }
}

/// One normalized inbound (or outbound) event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub id: i64,
    pub kind: UpdateKind,
    pub time: DateTime<Utc>,
    pub chat: Option<Chat>,
    pub user: Option<User>,
    pub message: Option<Message>,
}

impl Update {
    /// Outbound message addressed to `chat`.
    pub fn outgoing(chat: Chat, message: Message) -> Self {
        Self {
            id: 0,
            kind: UpdateKind::Message,
            time: Utc::now(),
            chat: Some(chat),
            user: None,
            message: Some(message),
        }
    }

    /// Outbound deletion of message `message_id` in `chat`.
    pub fn deletion(chat: Chat, message_id: i64) -> Self {
        Self {
            id: message_id,
            kind: UpdateKind::Delete,
            time: Utc::now(),
            chat: Some(chat),
            user: None,
            message: None,
        }
    }
}

/// A parsed user reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mention {
    Id(i64),
    /// Handle without the leading `@`.
    Handle(String),
    None,
}

/// Key of per-conversation state (reply history, locks).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub connection: String,
    pub chat_id: i64,
}

impl ConversationKey {
    pub fn new(connection: impl Into<String>, chat_id: i64) -> Self {
        Self {
            connection: connection.into(),
            chat_id,
        }
    }
}
