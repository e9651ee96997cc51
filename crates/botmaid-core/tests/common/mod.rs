#![allow(dead_code)]

use std::{
    collections::VecDeque,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use async_trait::async_trait;
use chrono::Utc;

use botmaid_core::{
    builtins,
    config::Config,
    domain::{Chat, ChatKind, Mention, Message, Update, UpdateKind, User},
    platform::{PlatformAdapter, PullConfig},
    store::MemoryStore,
    BotMaid, BotMaidBuilder, Connection, Error, Result,
};

pub const CONN: &str = "tg";
pub const MASTER: i64 = 1;
pub const GROUP: i64 = 100;

/// Adapter double: scripted pulls, recorded pushes.
#[derive(Default)]
pub struct FakeAdapter {
    script: Mutex<VecDeque<Result<Vec<Update>>>>,
    pulls: AtomicUsize,
    served: AtomicUsize,
    pushes: Mutex<Vec<Update>>,
}

impl FakeAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn script(&self, step: Result<Vec<Update>>) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }

    /// Pulls answered from the script (idle long polls excluded).
    pub fn served(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    pub fn pushes(&self) -> Vec<Update> {
        self.pushes.lock().unwrap().clone()
    }

    pub fn pushed_texts(&self) -> Vec<String> {
        self.pushes()
            .into_iter()
            .filter_map(|u| u.message.map(|m| m.text))
            .collect()
    }
}

#[async_trait]
impl PlatformAdapter for FakeAdapter {
    fn platform_name(&self) -> &str {
        "fake"
    }

    fn mention_strings(&self, user: &User) -> Vec<String> {
        if user.username.is_empty() {
            Vec::new()
        } else {
            vec![format!("@{}", user.username)]
        }
    }

    fn parse_mention(&self, text: &str) -> Mention {
        match text.strip_prefix('@') {
            Some(handle) if !handle.is_empty() => Mention::Handle(handle.to_string()),
            _ => Mention::None,
        }
    }

    async fn me(&self) -> Result<User> {
        Ok(bot_user())
    }

    async fn pull(&self, cfg: &PullConfig) -> Result<Vec<Update>> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(step) => {
                self.served.fetch_add(1, Ordering::SeqCst);
                step
            }
            None => {
                // Nothing queued: behave like an idle long poll.
                tokio::time::sleep(cfg.timeout).await;
                Ok(Vec::new())
            }
        }
    }

    async fn push(&self, mut update: Update) -> Result<Update> {
        let mut pushes = self.pushes.lock().unwrap();
        if let Some(msg) = update.message.as_mut() {
            msg.id = pushes.len() as i64 + 1;
        }
        pushes.push(update.clone());
        Ok(update)
    }
}

pub fn bot_user() -> User {
    User {
        id: 999,
        username: "maid".to_string(),
        nickname: "Maid".to_string(),
    }
}

pub fn user(id: i64, username: &str) -> User {
    User {
        id,
        username: username.to_string(),
        nickname: username.to_string(),
    }
}

pub fn group() -> Chat {
    Chat {
        id: GROUP,
        kind: ChatKind::Group,
        title: "lounge".to_string(),
    }
}

pub fn message_from(from: User, chat: Chat, text: &str) -> Update {
    Update {
        id: 1,
        kind: UpdateKind::Message,
        time: Utc::now(),
        chat: Some(chat),
        user: Some(from),
        message: Some(Message::text(text)),
    }
}

pub fn from_master(text: &str) -> Update {
    message_from(user(MASTER, "boss"), group(), text)
}

pub fn from_guest(text: &str) -> Update {
    message_from(user(2, "guest"), group(), text)
}

pub fn transport_error() -> Error {
    Error::Transport("connection reset".to_string())
}

/// Builder with the built-in commands and `MASTER` seeded on `CONN`.
pub async fn builder(config: Config, adapter: Arc<FakeAdapter>) -> BotMaidBuilder {
    let mut b = BotMaid::builder(config, Arc::new(MemoryStore::new()));
    b.auth().seed_masters(CONN, &[MASTER]).await.unwrap();
    b.add_connection(Connection::new(CONN, adapter, bot_user()));
    builtins::register_all(&mut b);
    b
}

pub async fn bot(adapter: Arc<FakeAdapter>) -> (Arc<BotMaid>, Arc<Connection>) {
    let bm = builder(Config::default(), adapter).await.build();
    let conn = bm.connection(CONN).unwrap().clone();
    (bm, conn)
}
