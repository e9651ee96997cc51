use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use botmaid_core::{
    builtins,
    config::{Config, ConnectionConfig, PlatformKind},
    platform::PlatformAdapter,
    store::{KeyValueStore, MemoryStore},
    words::Words,
    BotMaid, Connection,
};
use botmaid_cqhttp::CqhttpAdapter;
use botmaid_telegram::TelegramAdapter;

fn build_adapter(cfg: &Config, conn: &ConnectionConfig) -> anyhow::Result<Arc<dyn PlatformAdapter>> {
    Ok(match conn.kind {
        PlatformKind::Telegram => {
            let token = conn
                .token
                .clone()
                .with_context(|| format!("connection {} has no token", conn.id))?;
            Arc::new(TelegramAdapter::from_token(token, cfg.pull_timeout)?)
        }
        PlatformKind::Qq => {
            let endpoint = conn
                .api_endpoint
                .clone()
                .with_context(|| format!("connection {} has no api endpoint", conn.id))?;
            Arc::new(CqhttpAdapter::new(
                endpoint,
                conn.access_token.clone(),
                cfg.pull_timeout,
            )?)
        }
    })
}

async fn run(cfg: Config, shutdown: CancellationToken) -> anyhow::Result<()> {
    let store: Arc<dyn KeyValueStore> = match &cfg.store_file {
        Some(path) => Arc::new(
            MemoryStore::open(path)
                .with_context(|| format!("failed to open store {}", path.display()))?,
        ),
        None => Arc::new(MemoryStore::new()),
    };
    let words = match &cfg.words_file {
        Some(path) => Words::load(path)
            .with_context(|| format!("failed to load words {}", path.display()))?,
        None => Words::default(),
    };

    let retry = cfg.retry_interval;
    let conn_cfgs = cfg.connections.clone();
    let mut builder = BotMaid::builder(cfg.clone(), store).words(words);

    for conn_cfg in &conn_cfgs {
        let adapter = build_adapter(&cfg, conn_cfg)?;
        let conn = tokio::select! {
            _ = shutdown.cancelled() => return Ok(()),
            conn = Connection::identify(conn_cfg.id.clone(), adapter, retry) => conn,
        };
        builder
            .auth()
            .seed_masters(&conn.id, &conn_cfg.masters)
            .await?;
        builder.add_connection(conn);
    }

    builtins::register_all(&mut builder);
    let bm = builder.build();

    let running = bm.start(shutdown.clone());
    shutdown.cancelled().await;
    running.join().await;
    info!("botmaid stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    botmaid_core::logging::init("botmaid")?;

    let cfg = Config::load()?;

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received ctrl-c, shutting down");
                signal.cancel();
            }
            Err(e) => warn!(error = %e, "ctrl-c handler unavailable"),
        }
    });

    run(cfg, shutdown).await
}
