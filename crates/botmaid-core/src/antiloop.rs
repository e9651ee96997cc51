//! Anti-reply-loop guard: bans a conversation that makes the bot reply too often.

use std::{collections::HashMap, collections::VecDeque, sync::Arc, time::Duration};

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::warn;

use crate::{
    auth::AuthGate,
    domain::{Chat, ConversationKey},
    Result,
};

#[derive(Clone, Copy, Debug)]
pub struct FloodConfig {
    /// Replies inside one window that trigger the ban.
    pub threshold: usize,
    pub window: Duration,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            threshold: 5,
            window: Duration::from_secs(1),
        }
    }
}

/// Reply timestamps of one conversation.
#[derive(Debug, Default)]
pub struct ReplyHistory {
    stamps: VecDeque<Instant>,
}

impl ReplyHistory {
    /// Evict stamps older than `window`, append `now`, return the resulting count.
    ///
    /// The queue never holds more than `cap` stamps.
    pub fn record(&mut self, now: Instant, window: Duration, cap: usize) -> usize {
        while let Some(&front) = self.stamps.front() {
            if now.saturating_duration_since(front) > window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
        self.stamps.push_back(now);
        while self.stamps.len() > cap.max(1) {
            self.stamps.pop_front();
        }
        self.stamps.len()
    }

    pub fn len(&self) -> usize {
        self.stamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stamps.is_empty()
    }

    /// No stamp falls inside the window ending at `now`.
    pub fn is_expired(&self, now: Instant, window: Duration) -> bool {
        self.stamps
            .back()
            .map_or(true, |&last| now.saturating_duration_since(last) > window)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Verdict {
    pub count: usize,
    pub flooded: bool,
}

pub struct ReplyLimiter {
    cfg: FloodConfig,
    histories: Mutex<HashMap<ConversationKey, Arc<Mutex<ReplyHistory>>>>,
}

impl ReplyLimiter {
    pub fn new(cfg: FloodConfig) -> Self {
        Self {
            cfg,
            histories: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> FloodConfig {
        self.cfg
    }

    /// Number of conversations with a tracked history.
    pub async fn tracked(&self) -> usize {
        self.histories.lock().await.len()
    }

    /// History of `key`. Idle histories of other conversations are dropped on the way.
    async fn history_for(&self, key: &ConversationKey, now: Instant) -> Arc<Mutex<ReplyHistory>> {
        let window = self.cfg.window;
        let mut map = self.histories.lock().await;
        map.retain(|k, h| {
            k == key
                || Arc::strong_count(h) > 1
                || h.try_lock().map_or(true, |g| !g.is_expired(now, window))
        });
        map.entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ReplyHistory::default())))
            .clone()
    }

    /// Record an outbound reply to `chat` at `now`; ban the conversation on flood.
    ///
    /// The conversation's history lock is held until the ban is written, so two
    /// concurrent replies cannot both observe a sub-threshold count.
    pub async fn before_reply_at(
        &self,
        auth: &AuthGate,
        connection: &str,
        chat: &Chat,
        now: Instant,
    ) -> Result<Verdict> {
        let key = ConversationKey::new(connection, chat.id);
        let history = self.history_for(&key, now).await;
        let mut guard = history.lock().await;

        let count = guard.record(now, self.cfg.window, self.cfg.threshold);
        let flooded = count >= self.cfg.threshold;
        if flooded && auth.ban_conversation(connection, chat).await? {
            warn!(
                connection,
                chat = chat.id,
                title = %chat.title,
                "reply flood detected, conversation banned"
            );
        }

        Ok(Verdict { count, flooded })
    }

    pub async fn before_reply(
        &self,
        auth: &AuthGate,
        connection: &str,
        chat: &Chat,
    ) -> Result<Verdict> {
        self.before_reply_at(auth, connection, chat, Instant::now())
            .await
    }
}
