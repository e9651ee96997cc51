//! Periodic jobs registered on the bot before start.

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{runtime::BotMaid, Result};

#[async_trait]
pub trait TimerJob: Send + Sync {
    async fn run(&self, bm: Arc<BotMaid>) -> Result<()>;
}

pub struct FnJob<F>(F);

pub fn job_fn<F, Fut>(f: F) -> FnJob<F>
where
    F: Fn(Arc<BotMaid>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    FnJob(f)
}

#[async_trait]
impl<F, Fut> TimerJob for FnJob<F>
where
    F: Fn(Arc<BotMaid>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn run(&self, bm: Arc<BotMaid>) -> Result<()> {
        (self.0)(bm).await
    }
}

/// Fires at `start`, then every `every` until `end`.
///
/// Without `every` (or with a zero interval) the timer is one-shot.
#[derive(Clone)]
pub struct Timer {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: Option<DateTime<Utc>>,
    pub every: Option<Duration>,
    job: Arc<dyn TimerJob>,
}

impl Timer {
    pub fn once(name: impl Into<String>, at: DateTime<Utc>, job: impl TimerJob + 'static) -> Self {
        Self {
            name: name.into(),
            start: at,
            end: None,
            every: None,
            job: Arc::new(job),
        }
    }

    pub fn every(
        name: impl Into<String>,
        start: DateTime<Utc>,
        every: Duration,
        job: impl TimerJob + 'static,
    ) -> Self {
        Self {
            every: Some(every),
            ..Self::once(name, start, job)
        }
    }

    pub fn until(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }

    /// Earliest firing time at or after `now`, if any remain.
    pub fn first_fire(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let at = if now <= self.start {
            self.start
        } else {
            let every = self
                .every
                .filter(|d| !d.is_zero())
                .and_then(|d| chrono::Duration::from_std(d).ok())?;
            let step = every.num_nanoseconds()?;
            let behind = (now - self.start).num_nanoseconds()?;
            let n = (behind + step - 1) / step;
            self.start + chrono::Duration::nanoseconds(n.checked_mul(step)?)
        };

        match self.end {
            Some(end) if at > end => None,
            _ => Some(at),
        }
    }

    async fn run_loop(self, bm: Arc<BotMaid>, cancel: CancellationToken) {
        let mut from = Utc::now();
        loop {
            let Some(at) = self.first_fire(from) else {
                debug!(timer = %self.name, "timer has no further runs");
                break;
            };
            let wait = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(wait) => {
                    if let Err(e) = self.job.run(bm.clone()).await {
                        warn!(timer = %self.name, error = %e, "timer job failed");
                    }
                }
            }

            from = (at + chrono::Duration::nanoseconds(1)).max(Utc::now());
        }
    }
}

impl std::fmt::Debug for Timer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Timer")
            .field("name", &self.name)
            .field("start", &self.start)
            .field("end", &self.end)
            .field("every", &self.every)
            .finish_non_exhaustive()
    }
}

/// Running timers; one task each.
pub struct TimerSet {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl TimerSet {
    pub fn start(bm: Arc<BotMaid>, timers: Vec<Timer>, cancel: CancellationToken) -> Self {
        let handles = timers
            .into_iter()
            .map(|timer| {
                let bm = bm.clone();
                let cancel = cancel.clone();
                tokio::spawn(timer.run_loop(bm, cancel))
            })
            .collect();
        Self { cancel, handles }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub async fn stop(self) {
        self.cancel.cancel();
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, store::MemoryStore};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn noop() -> impl TimerJob {
        job_fn(|_bm| async { Ok(()) })
    }

    #[test]
    fn one_shot_fires_once_and_is_skipped_when_past() {
        let timer = Timer::once("x", t(10), noop());
        assert_eq!(timer.first_fire(t(0)), Some(t(10)));
        assert_eq!(timer.first_fire(t(10)), Some(t(10)));
        assert_eq!(timer.first_fire(t(11)), None);
    }

    #[test]
    fn periodic_lands_on_the_grid_and_respects_end() {
        let timer = Timer::every("x", t(0), Duration::from_secs(60), noop()).until(t(150));
        assert_eq!(timer.first_fire(t(-5)), Some(t(0)));
        assert_eq!(timer.first_fire(t(1)), Some(t(60)));
        assert_eq!(timer.first_fire(t(120)), Some(t(120)));
        assert_eq!(timer.first_fire(t(121)), None);
    }

    #[test]
    fn zero_interval_behaves_as_one_shot() {
        let timer = Timer::every("x", t(0), Duration::ZERO, noop());
        assert_eq!(timer.first_fire(t(1)), None);
    }

    #[tokio::test]
    async fn timers_run_until_stopped() {
        let bm = BotMaid::builder(Config::default(), Arc::new(MemoryStore::new())).build();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let timer = Timer::every(
            "tick",
            Utc::now(),
            Duration::from_millis(20),
            job_fn(move |_bm| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
        );

        let set = TimerSet::start(bm, vec![timer], CancellationToken::new());
        assert_eq!(set.len(), 1);
        tokio::time::sleep(Duration::from_millis(110)).await;
        set.stop().await;

        let seen = hits.load(Ordering::SeqCst);
        assert!(seen >= 2, "only {seen} runs");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), seen);
    }
}
