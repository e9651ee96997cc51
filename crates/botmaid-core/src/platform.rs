use std::time::Duration;

use async_trait::async_trait;

use crate::{
    domain::{Mention, Update, User},
    Result,
};

/// Long-polling parameters handed to [`PlatformAdapter::pull`].
#[derive(Clone, Copy, Debug)]
pub struct PullConfig {
    pub limit: u32,
    pub timeout: Duration,
}

impl Default for PullConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            timeout: Duration::from_secs(60),
        }
    }
}

/// Port implemented once per chat backend (Telegram, CQHTTP, ...).
///
/// The dispatcher and help subsystem only ever see this capability set; they
/// never branch on the concrete platform.
#[async_trait]
pub trait PlatformAdapter: Send + Sync {
    fn platform_name(&self) -> &str;

    /// Every spelling that references `user` in message text. The first one is
    /// the preferred way to address the user in replies.
    fn mention_strings(&self, user: &User) -> Vec<String>;

    /// Parse a user reference typed in a message.
    fn parse_mention(&self, text: &str) -> Mention;

    /// Identify the bot account behind this connection.
    async fn me(&self) -> Result<User>;

    /// Fetch new updates. Errors are transport errors; the caller retries.
    async fn pull(&self, cfg: &PullConfig) -> Result<Vec<Update>>;

    /// Send a message or deletion, echoing back server-assigned ids.
    async fn push(&self, update: Update) -> Result<Update>;
}
