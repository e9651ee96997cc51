//! Per-connection pull loop and the task-per-update fan-out.

use std::sync::Arc;

use tokio::{
    sync::{mpsc, Semaphore},
    time::sleep,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::dispatch,
    domain::Update,
    runtime::{BotMaid, Connection},
};

/// Pull updates from `conn` forever (until `shutdown`), dispatching each one in
/// its own task.
///
/// Pull errors are logged and retried after the configured fixed interval; they
/// never end the loop. At most `max_in_flight` updates are processed at once
/// (0 means no bound); when all slots are busy the pull loop is back-pressured.
pub async fn run(bm: Arc<BotMaid>, conn: Arc<Connection>, shutdown: CancellationToken) {
    let capacity = (bm.config().pull_limit as usize).max(1);
    let (tx, mut rx) = mpsc::channel::<Update>(capacity);

    let pull = tokio::spawn(pull_loop(bm.clone(), conn.clone(), tx, shutdown.clone()));

    let max_in_flight = bm.config().max_in_flight;
    let slots = (max_in_flight > 0).then(|| Arc::new(Semaphore::new(max_in_flight)));

    while let Some(update) = rx.recv().await {
        let permit = match &slots {
            Some(slots) => match slots.clone().acquire_owned().await {
                Ok(p) => Some(p),
                Err(_) => break, // semaphore closed
            },
            None => None,
        };

        let bm = bm.clone();
        let conn = conn.clone();
        tokio::spawn(async move {
            let _permit = permit;
            dispatch(bm, conn, update).await;
        });
    }

    let _ = pull.await;
    info!(connection = %conn.id, "poller stopped");
}

async fn pull_loop(
    bm: Arc<BotMaid>,
    conn: Arc<Connection>,
    tx: mpsc::Sender<Update>,
    shutdown: CancellationToken,
) {
    let cfg = bm.config().pull_config();
    let retry = bm.config().retry_interval;

    loop {
        let pulled = tokio::select! {
            _ = shutdown.cancelled() => return,
            r = conn.adapter.pull(&cfg) => r,
        };

        match pulled {
            Ok(updates) => {
                if !updates.is_empty() {
                    debug!(connection = %conn.id, count = updates.len(), "pulled updates");
                }
                for update in updates {
                    if tx.send(update).await.is_err() {
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(
                    connection = %conn.id,
                    error = %e,
                    retry_in_ms = retry.as_millis() as u64,
                    "pull failed, retrying"
                );
                tokio::select! {
                    _ = shutdown.cancelled() => return,
                    _ = sleep(retry) => {}
                }
            }
        }
    }
}
