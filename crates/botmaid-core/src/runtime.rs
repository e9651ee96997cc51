//! The `BotMaid` context object: registry, authorization, limiter, words and
//! connections, assembled once at startup and shared read-only afterwards.

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    antiloop::ReplyLimiter,
    auth::AuthGate,
    command::{CommandDescriptor, CommandRegistry},
    config::Config,
    domain::{Chat, ChatKind, Mention, Message, Update, User},
    platform::PlatformAdapter,
    poller,
    store::KeyValueStore,
    timer::{Timer, TimerSet},
    words::Words,
    Result,
};

/// One platform connection: an adapter plus the bot account it logs in as.
pub struct Connection {
    pub id: String,
    pub adapter: Arc<dyn PlatformAdapter>,
    pub me: User,
}

impl Connection {
    pub fn new(id: impl Into<String>, adapter: Arc<dyn PlatformAdapter>, me: User) -> Self {
        Self {
            id: id.into(),
            adapter,
            me,
        }
    }

    /// Ask the adapter who we are, retrying every `retry` until it answers.
    pub async fn identify(
        id: impl Into<String>,
        adapter: Arc<dyn PlatformAdapter>,
        retry: Duration,
    ) -> Self {
        let id = id.into();
        loop {
            match adapter.me().await {
                Ok(me) => {
                    info!(
                        connection = %id,
                        platform = adapter.platform_name(),
                        bot = %me.username,
                        "identified bot account"
                    );
                    return Self::new(id, adapter, me);
                }
                Err(e) => {
                    warn!(connection = %id, error = %e, "failed to identify bot account, retrying");
                    sleep(retry).await;
                }
            }
        }
    }

    /// Spellings that address this bot in message text.
    pub fn mention_strings(&self) -> Vec<String> {
        self.adapter.mention_strings(&self.me)
    }

    /// Preferred way to address `user` in a reply.
    pub fn mention(&self, user: &User) -> String {
        self.adapter
            .mention_strings(user)
            .into_iter()
            .next()
            .unwrap_or_else(|| user.nickname.clone())
    }
}

pub fn subscription_key(topic: &str) -> String {
    format!("subscribe_{topic}")
}

/// Subscription member: `<connection>|<chat kind>|<chat id>`.
pub fn subscription_member(connection: &str, chat: &Chat) -> String {
    format!("{connection}|{}|{}", chat.kind.as_str(), chat.id)
}

fn parse_subscription_member(member: &str) -> Option<(&str, Chat)> {
    let mut parts = member.splitn(3, '|');
    let connection = parts.next()?;
    let kind = ChatKind::parse(parts.next()?);
    let id = parts.next()?.parse::<i64>().ok()?;
    Some((connection, Chat::new(id, kind)))
}

pub struct BotMaidBuilder {
    config: Config,
    auth: AuthGate,
    words: Words,
    registry: CommandRegistry,
    connections: Vec<Arc<Connection>>,
    timers: Vec<Timer>,
}

impl BotMaidBuilder {
    pub fn words(mut self, words: Words) -> Self {
        self.words = words;
        self
    }

    pub fn register(&mut self, desc: CommandDescriptor) -> &mut Self {
        self.registry.register(desc);
        self
    }

    pub fn add_connection(&mut self, conn: Connection) -> &mut Self {
        self.connections.push(Arc::new(conn));
        self
    }

    pub fn add_timer(&mut self, timer: Timer) -> &mut Self {
        self.timers.push(timer);
        self
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Freeze the registry. Updates timestamped before this moment are dropped.
    pub fn build(self) -> Arc<BotMaid> {
        let limiter = ReplyLimiter::new(self.config.flood_config());
        Arc::new(BotMaid {
            config: self.config,
            registry: self.registry,
            auth: self.auth,
            limiter,
            words: self.words,
            connections: self.connections,
            timers: self.timers,
            started_at: Utc::now(),
        })
    }
}

pub struct BotMaid {
    config: Config,
    registry: CommandRegistry,
    auth: AuthGate,
    limiter: ReplyLimiter,
    words: Words,
    connections: Vec<Arc<Connection>>,
    timers: Vec<Timer>,
    started_at: DateTime<Utc>,
}

impl BotMaid {
    pub fn builder(config: Config, store: Arc<dyn KeyValueStore>) -> BotMaidBuilder {
        BotMaidBuilder {
            config,
            auth: AuthGate::new(store),
            words: Words::default(),
            registry: CommandRegistry::new(),
            connections: Vec::new(),
            timers: Vec::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    pub fn words(&self) -> &Words {
        &self.words
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn connections(&self) -> &[Arc<Connection>] {
        &self.connections
    }

    pub fn connection(&self, id: &str) -> Option<&Arc<Connection>> {
        self.connections.iter().find(|c| c.id == id)
    }

    /// Spawn one poller per connection and start the timers.
    ///
    /// Everything stops once `shutdown` is cancelled.
    pub fn start(self: &Arc<Self>, shutdown: CancellationToken) -> Running {
        let pollers = self
            .connections
            .iter()
            .map(|conn| {
                let bm = self.clone();
                let conn = conn.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move { poller::run(bm, conn, shutdown).await })
            })
            .collect();

        let timers = TimerSet::start(self.clone(), self.timers.clone(), shutdown.child_token());
        info!(
            connections = self.connections.len(),
            commands = self.registry.len(),
            timers = self.timers.len(),
            "botmaid started"
        );

        Running { pollers, timers }
    }

    /// Send `message` to `chat` as a reply, subject to the anti-reply-loop limiter.
    pub async fn reply(&self, conn: &Connection, chat: &Chat, message: Message) -> Result<Update> {
        self.limiter.before_reply(&self.auth, &conn.id, chat).await?;
        conn.adapter
            .push(Update::outgoing(chat.clone(), message))
            .await
    }

    /// Resolve a typed user reference (mention, `@handle` or bare id) to an actor id.
    pub async fn resolve_user(&self, conn: &Connection, text: &str) -> Result<Option<i64>> {
        match conn.adapter.parse_mention(text) {
            Mention::Id(id) => Ok(Some(id)),
            Mention::Handle(handle) => self.auth.lookup_handle(&conn.id, &handle).await,
            Mention::None => Ok(text.trim().parse::<i64>().ok()),
        }
    }

    /// Push `message` to every conversation subscribed to `topic`; returns how many got it.
    pub async fn broadcast(&self, topic: &str, message: Message) -> Result<usize> {
        let members = self
            .auth
            .store()
            .set_members(&subscription_key(topic))
            .await?;

        let mut delivered = 0;
        for member in members {
            let Some((conn_id, chat)) = parse_subscription_member(&member) else {
                warn!(topic, member = %member, "skipping malformed subscription");
                continue;
            };
            let Some(conn) = self.connection(conn_id) else {
                warn!(topic, connection = conn_id, "subscription for unknown connection");
                continue;
            };
            match conn
                .adapter
                .push(Update::outgoing(chat.clone(), message.clone()))
                .await
            {
                Ok(_) => delivered += 1,
                Err(e) => warn!(topic, connection = conn_id, chat = chat.id, error = %e, "broadcast failed"),
            }
        }
        Ok(delivered)
    }
}

/// Handles of the tasks spawned by [`BotMaid::start`].
pub struct Running {
    pollers: Vec<JoinHandle<()>>,
    timers: TimerSet,
}

impl Running {
    /// Wait for the pollers to exit (after shutdown) and stop the timers.
    pub async fn join(self) {
        for handle in self.pollers {
            let _ = handle.await;
        }
        self.timers.stop().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAdapter {
        pushes: Mutex<Vec<Update>>,
        fail_chat: Option<i64>,
    }

    #[async_trait]
    impl PlatformAdapter for FakeAdapter {
        fn platform_name(&self) -> &str {
            "fake"
        }

        fn mention_strings(&self, user: &User) -> Vec<String> {
            vec![format!("@{}", user.username)]
        }

        fn parse_mention(&self, text: &str) -> Mention {
            match text.strip_prefix('@') {
                Some(h) => Mention::Handle(h.to_string()),
                None => Mention::None,
            }
        }

        async fn me(&self) -> Result<User> {
            Ok(User::default())
        }

        async fn pull(&self, _cfg: &crate::platform::PullConfig) -> Result<Vec<Update>> {
            Ok(Vec::new())
        }

        async fn push(&self, update: Update) -> Result<Update> {
            if update.chat.as_ref().map(|c| c.id) == self.fail_chat {
                return Err(crate::Error::Transport("boom".into()));
            }
            self.pushes.lock().unwrap().push(update.clone());
            Ok(update)
        }
    }

    fn botmaid(adapter: Arc<FakeAdapter>) -> Arc<BotMaid> {
        let mut b = BotMaid::builder(Config::default(), Arc::new(MemoryStore::new()));
        b.add_connection(Connection::new("tg", adapter, User::default()));
        b.build()
    }

    #[tokio::test]
    async fn resolve_user_accepts_ids_and_known_handles() {
        let bm = botmaid(Arc::new(FakeAdapter::default()));
        let conn = bm.connection("tg").unwrap().clone();
        let alice = User {
            id: 42,
            username: "alice".into(),
            nickname: "Alice".into(),
        };
        bm.auth().remember_handle("tg", &alice).await.unwrap();

        assert_eq!(bm.resolve_user(&conn, "@Alice").await.unwrap(), Some(42));
        assert_eq!(bm.resolve_user(&conn, "@nobody").await.unwrap(), None);
        assert_eq!(bm.resolve_user(&conn, " 7 ").await.unwrap(), Some(7));
        assert_eq!(bm.resolve_user(&conn, "John Doe").await.unwrap(), None);
    }

    #[tokio::test]
    async fn broadcast_skips_failed_and_unknown_targets() {
        let adapter = Arc::new(FakeAdapter {
            fail_chat: Some(2),
            ..Default::default()
        });
        let bm = botmaid(adapter.clone());
        let store = bm.auth().store();
        let key = subscription_key("news");
        for chat in [1, 2] {
            store
                .set_add(&key, &subscription_member("tg", &Chat::new(chat, ChatKind::Group)))
                .await
                .unwrap();
        }
        store.set_add(&key, "qq|private|3").await.unwrap();
        store.set_add(&key, "garbage").await.unwrap();

        let n = bm.broadcast("news", Message::text("hi")).await.unwrap();
        assert_eq!(n, 1);
        let pushes = adapter.pushes.lock().unwrap();
        assert_eq!(pushes.len(), 1);
        assert_eq!(pushes[0].chat.as_ref().unwrap().id, 1);
    }

    #[test]
    fn subscription_members_round_trip() {
        let chat = Chat::new(-100, ChatKind::Channel);
        let member = subscription_member("tg", &chat);
        assert_eq!(member, "tg|channel|-100");
        let (conn, parsed) = parse_subscription_member(&member).unwrap();
        assert_eq!(conn, "tg");
        assert_eq!(parsed, chat);
    }
}
