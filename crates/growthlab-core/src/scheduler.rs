//! Background generation: a fixed-interval heartbeat that keeps the insight feed fresh.
//!
//! Each tick consults the quota breaker first. When autonomous traffic is suspended the tick
//! is a no-op; otherwise one primary item (an [`Article`]) is generated through the governor
//! and prepended to a bounded feed. Only after that succeeds, and with probability
//! `secondary_probability`, one secondary item (a [`Trend`]) is generated and appended to its
//! own bounded list.

use async_trait::async_trait;
use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SchedulerSettings;
use crate::content::{Article, Trend};
use crate::error::ServiceResult;
use crate::governor::{InferenceRequest, Origin, RequestGovernor};

const ORIGIN: Origin = Origin::Autonomous;

/// Producer of background items. Implemented by the REST client; tests use fakes.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate_primary(&self) -> ServiceResult<Article>;
    async fn generate_secondary(&self) -> ServiceResult<Trend>;
}

/// What a single tick did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Breaker open; nothing dispatched.
    Suspended,
    Dispatched {
        primary_ok: bool,
        /// `None` when the coin flip skipped the secondary item.
        secondary_ok: Option<bool>,
    },
}

/// Bounded rolling collections. Primary is newest-first, secondary is oldest-first.
#[derive(Debug)]
struct Feed {
    primary: VecDeque<Article>,
    secondary: VecDeque<Trend>,
    primary_capacity: usize,
    secondary_capacity: usize,
}

impl Feed {
    fn push_primary(&mut self, item: Article) {
        self.primary.push_front(item);
        self.primary.truncate(self.primary_capacity);
    }

    fn push_secondary(&mut self, item: Trend) {
        self.secondary.push_back(item);
        while self.secondary.len() > self.secondary_capacity {
            self.secondary.pop_front();
        }
    }
}

pub struct BackgroundGenerationScheduler {
    governor: RequestGovernor,
    generator: Arc<dyn ContentGenerator>,
    settings: SchedulerSettings,
    feed: Arc<Mutex<Feed>>,
}

impl BackgroundGenerationScheduler {
    pub fn new(
        governor: RequestGovernor,
        generator: Arc<dyn ContentGenerator>,
        settings: SchedulerSettings,
    ) -> Self {
        let feed = Feed {
            primary: VecDeque::with_capacity(settings.primary_capacity),
            secondary: VecDeque::with_capacity(settings.secondary_capacity),
            primary_capacity: settings.primary_capacity,
            secondary_capacity: settings.secondary_capacity,
        };
        Self {
            governor,
            generator,
            settings,
            feed: Arc::new(Mutex::new(feed)),
        }
    }

    /// Snapshot of the primary feed, newest first.
    pub fn primary_items(&self) -> Vec<Article> {
        self.lock_feed().primary.iter().cloned().collect()
    }

    /// Snapshot of the secondary list, oldest first.
    pub fn secondary_items(&self) -> Vec<Trend> {
        self.lock_feed().secondary.iter().cloned().collect()
    }

    fn lock_feed(&self) -> std::sync::MutexGuard<'_, Feed> {
        self.feed.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn roll_secondary(&self) -> bool {
        let p = self.settings.secondary_probability.clamp(0.0, 1.0);
        rand::thread_rng().gen_bool(p)
    }

    fn suspended(&self) -> bool {
        ORIGIN.respects_breaker() && self.governor.breaker().is_suspended()
    }

    /// Run one tick now.
    pub async fn tick(&self) -> TickOutcome {
        if self.suspended() {
            debug!(
                target: "growthlab::scheduler",
                remaining_secs = self.governor.breaker().remaining_cooldown().as_secs(),
                "breaker suspended; skipping tick"
            );
            return TickOutcome::Suspended;
        }

        let generator = Arc::clone(&self.generator);
        let primary = self
            .governor
            .execute_request(InferenceRequest::new("primary item", ORIGIN), || {
                generator.generate_primary()
            })
            .await;
        let primary_ok = match primary {
            Ok(article) => {
                info!(target: "growthlab::scheduler", title = %article.title, "generated primary item");
                self.lock_feed().push_primary(article);
                true
            }
            Err(e) => {
                warn!(target: "growthlab::scheduler", error = %e, "primary generation failed");
                false
            }
        };

        // A failed primary ends the tick; a quota failure has just suspended the breaker.
        let secondary_ok = if primary_ok && !self.suspended() && self.roll_secondary() {
            let secondary = self
                .governor
                .execute_request(InferenceRequest::new("secondary item", ORIGIN), || {
                    generator.generate_secondary()
                })
                .await;
            Some(match secondary {
                Ok(trend) => {
                    info!(target: "growthlab::scheduler", topic = %trend.topic, "generated secondary item");
                    self.lock_feed().push_secondary(trend);
                    true
                }
                Err(e) => {
                    warn!(target: "growthlab::scheduler", error = %e, "secondary generation failed");
                    false
                }
            })
        } else {
            None
        };

        TickOutcome::Dispatched {
            primary_ok,
            secondary_ok,
        }
    }

    /// Start ticking every `interval_secs` (first tick one full period from now).
    /// Dropping the returned handle also stops the loop.
    pub fn spawn(self) -> SchedulerHandle {
        let scheduler = Arc::new(self);
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let period = scheduler.settings.interval();
        let looped = Arc::clone(&scheduler);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                target: "growthlab::scheduler",
                interval_secs = period.as_secs(),
                "background generation started"
            );

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = ticker.tick() => {}
                }
                // An in-flight tick always runs to completion; stop only prevents the next one.
                let outcome = looped.tick().await;
                debug!(target: "growthlab::scheduler", ?outcome, "tick finished");
            }

            info!(target: "growthlab::scheduler", "background generation stopped");
        });

        SchedulerHandle {
            scheduler,
            stop_tx,
            task: Mutex::new(Some(task)),
        }
    }
}

/// Handle to a running scheduler loop.
pub struct SchedulerHandle {
    scheduler: Arc<BackgroundGenerationScheduler>,
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerHandle {
    pub fn scheduler(&self) -> &BackgroundGenerationScheduler {
        &self.scheduler
    }

    /// Cancel future ticks. Safe to call any number of times.
    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Stop and wait for the loop (including any in-flight tick) to finish.
    pub async fn shutdown(&self) {
        self.stop();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(target: "growthlab::scheduler", error = %e, "scheduler task ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breaker::QuotaCircuitBreaker;
    use crate::config::GovernorSettings;
    use crate::content::Source;
    use crate::error::ServiceError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Numbered {
        primary: AtomicU32,
        secondary: AtomicU32,
    }

    #[async_trait]
    impl ContentGenerator for Numbered {
        async fn generate_primary(&self) -> ServiceResult<Article> {
            let n = self.primary.fetch_add(1, Ordering::SeqCst);
            Ok(Article {
                id: n.to_string(),
                title: format!("article {}", n),
                excerpt: String::new(),
                content: String::new(),
                author: String::new(),
                date: String::new(),
                category: "test".to_string(),
                read_time: String::new(),
            })
        }

        async fn generate_secondary(&self) -> ServiceResult<Trend> {
            let n = self.secondary.fetch_add(1, Ordering::SeqCst);
            Ok(Trend {
                topic: format!("trend {}", n),
                description: String::new(),
                relevance_score: 50,
                sources: vec![Source {
                    title: "s".to_string(),
                    uri: "#".to_string(),
                }],
            })
        }
    }

    fn scheduler(
        generator: Arc<Numbered>,
        settings: SchedulerSettings,
    ) -> BackgroundGenerationScheduler {
        let governor =
            RequestGovernor::new(GovernorSettings::default(), QuotaCircuitBreaker::default());
        BackgroundGenerationScheduler::new(governor, generator, settings)
    }

    #[tokio::test]
    async fn test_primary_feed_is_newest_first_and_bounded() {
        let generator = Arc::new(Numbered::default());
        let s = scheduler(
            Arc::clone(&generator),
            SchedulerSettings {
                primary_capacity: 3,
                secondary_probability: 0.0,
                ..SchedulerSettings::default()
            },
        );

        for _ in 0..5 {
            s.tick().await;
        }

        let titles: Vec<String> = s.primary_items().into_iter().map(|a| a.title).collect();
        assert_eq!(titles, vec!["article 4", "article 3", "article 2"]);
        assert!(s.secondary_items().is_empty());
        assert_eq!(generator.secondary.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_secondary_list_appends_and_evicts_oldest() {
        let generator = Arc::new(Numbered::default());
        let s = scheduler(
            Arc::clone(&generator),
            SchedulerSettings {
                secondary_capacity: 2,
                secondary_probability: 1.0,
                ..SchedulerSettings::default()
            },
        );

        for _ in 0..3 {
            let outcome = s.tick().await;
            assert_eq!(
                outcome,
                TickOutcome::Dispatched {
                    primary_ok: true,
                    secondary_ok: Some(true)
                }
            );
        }

        let topics: Vec<String> = s.secondary_items().into_iter().map(|t| t.topic).collect();
        assert_eq!(topics, vec!["trend 1", "trend 2"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_suspended_breaker_skips_tick() {
        let generator = Arc::new(Numbered::default());
        let s = scheduler(Arc::clone(&generator), SchedulerSettings::default());
        s.governor.breaker().report_quota_exhausted();

        assert_eq!(s.tick().await, TickOutcome::Suspended);
        assert_eq!(generator.primary.load(Ordering::SeqCst), 0);
    }

    struct AlwaysFatal;

    #[async_trait]
    impl ContentGenerator for AlwaysFatal {
        async fn generate_primary(&self) -> ServiceResult<Article> {
            Err(ServiceError::fatal("schema mismatch"))
        }
        async fn generate_secondary(&self) -> ServiceResult<Trend> {
            Err(ServiceError::fatal("schema mismatch"))
        }
    }

    #[tokio::test]
    async fn test_failed_generation_leaves_feed_untouched() {
        let governor =
            RequestGovernor::new(GovernorSettings::default(), QuotaCircuitBreaker::default());
        let s = BackgroundGenerationScheduler::new(
            governor,
            Arc::new(AlwaysFatal),
            SchedulerSettings {
                secondary_probability: 1.0,
                ..SchedulerSettings::default()
            },
        );
        assert_eq!(
            s.tick().await,
            TickOutcome::Dispatched {
                primary_ok: false,
                secondary_ok: None
            }
        );
        assert!(s.primary_items().is_empty());
        assert!(s.secondary_items().is_empty());
    }

    #[derive(Default)]
    struct QuotaExhausted {
        primary: AtomicU32,
        secondary: AtomicU32,
    }

    #[async_trait]
    impl ContentGenerator for QuotaExhausted {
        async fn generate_primary(&self) -> ServiceResult<Article> {
            self.primary.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::quota("429 RESOURCE_EXHAUSTED"))
        }
        async fn generate_secondary(&self) -> ServiceResult<Trend> {
            self.secondary.fetch_add(1, Ordering::SeqCst);
            Err(ServiceError::quota("429 RESOURCE_EXHAUSTED"))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_quota_exhausted_primary_skips_secondary() {
        let generator = Arc::new(QuotaExhausted::default());
        let governor =
            RequestGovernor::new(GovernorSettings::default(), QuotaCircuitBreaker::default());
        let s = BackgroundGenerationScheduler::new(
            governor,
            Arc::clone(&generator) as Arc<dyn ContentGenerator>,
            SchedulerSettings {
                secondary_probability: 1.0,
                ..SchedulerSettings::default()
            },
        );

        assert_eq!(
            s.tick().await,
            TickOutcome::Dispatched {
                primary_ok: false,
                secondary_ok: None
            }
        );
        assert_eq!(generator.primary.load(Ordering::SeqCst), 4);
        assert!(s.governor.breaker().is_suspended());
        assert_eq!(generator.secondary.load(Ordering::SeqCst), 0);

        // next tick is gated entirely
        assert_eq!(s.tick().await, TickOutcome::Suspended);
        assert_eq!(generator.primary.load(Ordering::SeqCst), 4);
    }
}
