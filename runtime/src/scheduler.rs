//! The poll loop: feed → catalog → notifier, forever.
//!
//! ```text
//! Idle ──sleep──▶ Polling ──ok──▶ Notifying ──▶ Idle
//!                    │                │
//!                    └──err──▶ Backoff ◀──err──┘
//! ```
//!
//! A successful cycle sleeps until the shop says the offer ends. A failed
//! cycle, whatever the cause, is logged and retried after the backoff delay.
//! Nothing inside a cycle can stop the loop.

use crate::acquisition::{FeedSource, MenuSource};
use crate::catalog::CatalogCache;
use crate::feed::{self, CurrentOffer, PollError};
use crate::notify::{Notifier, NotifierError, ParseMode};
use crate::reconcile::{NotificationPayload, ReconcileEngine, ReconcileError};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF_SECS: u64 = 60;
const DEFAULT_NO_OFFER_BACKOFF_SECS: u64 = 60;
const DEFAULT_MIN_INTERVAL_SECS: u64 = 10;

/// Delays between cycles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// After any failed cycle except "no active offer".
    pub error: Duration,
    /// After the feed reports that no offer is running.
    pub no_offer: Duration,
    /// Shortest sleep after a successful cycle.
    pub min_interval: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            error: Duration::from_secs(DEFAULT_BACKOFF_SECS),
            no_offer: Duration::from_secs(DEFAULT_NO_OFFER_BACKOFF_SECS),
            min_interval: Duration::from_secs(DEFAULT_MIN_INTERVAL_SECS),
        }
    }
}

impl BackoffPolicy {
    /// Sleep until the offer is due to end.
    pub fn after_success(&self, offer: &CurrentOffer) -> Duration {
        Duration::from_secs(u64::from(offer.remaining_seconds)).max(self.min_interval)
    }

    pub fn after_error(&self, error: &CycleError) -> Duration {
        match error {
            CycleError::Poll(PollError::NoActiveOffer) => self.no_offer,
            CycleError::Poll(
                PollError::Transport(_)
                | PollError::Remote { .. }
                | PollError::MalformedResponse(_)
                | PollError::InvalidOffer { .. },
            )
            | CycleError::Reconcile(_)
            | CycleError::Notify(_) => self.error,
        }
    }
}

/// Anything that can fail one cycle.
#[derive(Error, Debug)]
pub enum CycleError {
    #[error(transparent)]
    Poll(#[from] PollError),
    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
    #[error("notification failed: {0}")]
    Notify(#[from] NotifierError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleState {
    Idle,
    Polling,
    Notifying,
    Backoff,
}

/// Result of one cycle and how long to wait before the next.
#[derive(Debug)]
pub enum CycleOutcome {
    /// A new offer was announced.
    Notified {
        offer: CurrentOffer,
        payload: NotificationPayload,
        next: Duration,
    },
    /// The offer was already announced; nothing was sent.
    Unchanged { offer: CurrentOffer, next: Duration },
    Backoff { error: CycleError, next: Duration },
}

impl CycleOutcome {
    pub fn next_sleep(&self) -> Duration {
        match self {
            Self::Notified { next, .. } | Self::Unchanged { next, .. } | Self::Backoff { next, .. } => {
                *next
            }
        }
    }
}

/// The last offer that was sent and when its announcement goes stale.
#[derive(Debug, Clone, Copy)]
struct SentOffer {
    id: u16,
    discounted_price: u16,
    /// End of the offer's window plus `min_interval`.
    until: Instant,
}

impl SentOffer {
    fn covers(&self, offer: &CurrentOffer, now: Instant) -> bool {
        self.id == offer.id && self.discounted_price == offer.discounted_price && now < self.until
    }
}

/// Drives the poll loop and owns the catalog cache.
pub struct PollScheduler<F, M, N> {
    feed: F,
    engine: ReconcileEngine<M>,
    notifier: N,
    channel: String,
    backoff: BackoffPolicy,
    cache: CatalogCache,
    state: CycleState,
    last_sent: Option<SentOffer>,
}

impl<F, M, N> PollScheduler<F, M, N>
where
    F: FeedSource,
    M: MenuSource,
    N: Notifier,
{
    pub fn new(
        feed: F,
        engine: ReconcileEngine<M>,
        notifier: N,
        channel: impl Into<String>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            feed,
            engine,
            notifier,
            channel: channel.into(),
            backoff,
            cache: CatalogCache::new(),
            state: CycleState::Idle,
            last_sent: None,
        }
    }

    pub fn state(&self) -> CycleState {
        self.state
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    fn transition(&mut self, next: CycleState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "scheduler state");
            self.state = next;
        }
    }

    /// Validate the notifier credential, then poll until the process ends.
    ///
    /// Returns only if validation fails; the loop itself never exits.
    pub async fn run(&mut self) -> Result<(), NotifierError> {
        let account = self.notifier.verify().await?;
        info!(account = %account, channel = %self.channel, "notifier credential accepted");

        loop {
            let next = self.run_cycle().await.next_sleep();
            self.transition(CycleState::Idle);
            debug!(secs = next.as_secs(), "sleeping until next cycle");
            tokio::time::sleep(next).await;
        }
    }

    /// Run one cycle and choose the delay before the next one.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        self.transition(CycleState::Polling);

        match self.try_cycle().await {
            Ok(outcome) => outcome,
            Err(error) => {
                self.transition(CycleState::Backoff);
                let next = self.backoff.after_error(&error);
                match &error {
                    CycleError::Poll(PollError::NoActiveOffer) => {
                        // The next offer is a new promotion even if it repeats the last one.
                        self.last_sent = None;
                        info!(retry_secs = next.as_secs(), "no active offer")
                    }
                    _ => warn!(error = %error, retry_secs = next.as_secs(), "cycle failed"),
                }
                CycleOutcome::Backoff { error, next }
            }
        }
    }

    async fn try_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        let offer = feed::poll(&self.feed).await?;
        debug!(
            id = offer.id,
            price = offer.discounted_price,
            left = offer.remaining_seconds,
            "current offer"
        );

        let payload = self.engine.resolve(&mut self.cache, &offer).await?;
        let next = self.backoff.after_success(&offer);

        if self
            .last_sent
            .is_some_and(|sent| sent.covers(&offer, Instant::now()))
        {
            info!(id = offer.id, "offer already announced");
            return Ok(CycleOutcome::Unchanged { offer, next });
        }

        self.transition(CycleState::Notifying);
        self.notifier
            .send_photo(
                &self.channel,
                &payload.image_link,
                &payload.caption,
                ParseMode::Markdown,
            )
            .await?;
        self.last_sent = Some(SentOffer {
            id: offer.id,
            discounted_price: offer.discounted_price,
            until: Instant::now()
                + Duration::from_secs(u64::from(offer.remaining_seconds))
                + self.backoff.min_interval,
        });
        info!(
            id = offer.id,
            next_poll_secs = next.as_secs(),
            "sent info about current offer"
        );

        Ok(CycleOutcome::Notified {
            offer,
            payload,
            next,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::TransportError;
    use crate::catalog::extract::tests::{card, entry, menu_page, ORIGIN};
    use crate::catalog::Extractor;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use url::Url;

    fn feed_body(result: bool, id: u16, price: u16, left: u16) -> Vec<u8> {
        json!({
            "Response": { "Result": { "code": 200, "errorCode": 0, "message": "" } },
            "ResponseBody": {
                "result": result,
                "items": {
                    "current": {
                        "id": id.to_string(),
                        "price": price.to_string(),
                        "time": { "left": left }
                    }
                }
            }
        })
        .to_string()
        .into_bytes()
    }

    /// Serves queued feed bodies in order, repeating the last one.
    #[derive(Clone, Default)]
    struct ScriptedFeed {
        bodies: Arc<Mutex<VecDeque<Vec<u8>>>>,
        calls: Arc<AtomicUsize>,
    }

    impl ScriptedFeed {
        fn new(bodies: Vec<Vec<u8>>) -> Self {
            Self {
                bodies: Arc::new(Mutex::new(bodies.into())),
                calls: Arc::default(),
            }
        }
    }

    #[async_trait]
    impl FeedSource for ScriptedFeed {
        async fn fetch_feed(&self) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut bodies = self.bodies.lock().unwrap();
            let body = if bodies.len() > 1 {
                bodies.pop_front()
            } else {
                bodies.front().cloned()
            };
            body.ok_or(TransportError::Status {
                status: 503,
                url: format!("{ORIGIN}/api/"),
            })
        }
    }

    #[derive(Clone)]
    struct CountingMenu {
        page: Vec<u8>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl MenuSource for CountingMenu {
        async fn fetch_menu(&self) -> Result<Vec<u8>, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.page.clone())
        }
    }

    #[derive(Clone, Default)]
    struct RecordingNotifier {
        sent: Arc<Mutex<Vec<(String, String, String)>>>,
        fail_sends: Arc<AtomicUsize>,
        reject_token: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn verify(&self) -> Result<String, NotifierError> {
            if self.reject_token {
                return Err(NotifierError::Unauthorized("Unauthorized".into()));
            }
            Ok("test_bot".into())
        }

        async fn send_photo(
            &self,
            channel: &str,
            image_url: &str,
            caption: &str,
            mode: ParseMode,
        ) -> Result<(), NotifierError> {
            assert_eq!(mode, ParseMode::Markdown);
            if self.fail_sends.load(Ordering::SeqCst) > 0 {
                self.fail_sends.fetch_sub(1, Ordering::SeqCst);
                return Err(NotifierError::Rejected {
                    code: Some(429),
                    description: "Too Many Requests".into(),
                });
            }
            self.sent
                .lock()
                .unwrap()
                .push((channel.into(), image_url.into(), caption.into()));
            Ok(())
        }
    }

    struct Harness {
        scheduler: PollScheduler<ScriptedFeed, CountingMenu, RecordingNotifier>,
        feed_calls: Arc<AtomicUsize>,
        menu_calls: Arc<AtomicUsize>,
        notifier: RecordingNotifier,
    }

    fn harness(feed: Vec<Vec<u8>>, menu: Vec<u8>, policy: BackoffPolicy) -> Harness {
        let feed = ScriptedFeed::new(feed);
        let feed_calls = Arc::clone(&feed.calls);
        let menu = CountingMenu {
            page: menu,
            calls: Arc::default(),
        };
        let menu_calls = Arc::clone(&menu.calls);
        let notifier = RecordingNotifier::default();
        let engine = ReconcileEngine::new(menu, Extractor::new(Url::parse(ORIGIN).unwrap()));
        Harness {
            scheduler: PollScheduler::new(feed, engine, notifier.clone(), "@offers", policy),
            feed_calls,
            menu_calls,
            notifier,
        }
    }

    fn default_menu() -> Vec<u8> {
        menu_page(json!({ "500": entry(199, "X") }), &[card(500, Some("/L"))])
    }

    #[tokio::test]
    async fn test_successful_cycle_sleeps_for_remaining_window() {
        let mut h = harness(
            vec![feed_body(true, 500, 99, 120)],
            default_menu(),
            BackoffPolicy::default(),
        );

        match h.scheduler.run_cycle().await {
            CycleOutcome::Notified {
                offer,
                payload,
                next,
            } => {
                assert_eq!(offer.id, 500);
                assert_eq!(next, Duration::from_secs(120));
                assert!(payload.caption.starts_with("X\n"));
                assert!(payload.caption.contains("199₽"));
                assert!(payload.caption.contains("Цена по акции: 99₽"));
                assert!(payload.caption.contains("(https://www.tanuki.ru/L)"));
            }
            other => panic!("expected notification, got {other:?}"),
        }

        let sent = h.notifier.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, "@offers");
        assert_eq!(sent[0].1, "https://cdn.tanuki.ru/X.jpg");
        assert_eq!(h.scheduler.state(), CycleState::Notifying);
    }

    #[tokio::test]
    async fn test_unchanged_offer_hits_cache_and_is_not_resent() {
        let mut h = harness(
            vec![feed_body(true, 500, 99, 120), feed_body(true, 500, 99, 60)],
            default_menu(),
            BackoffPolicy::default(),
        );

        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { .. }
        ));
        match h.scheduler.run_cycle().await {
            CycleOutcome::Unchanged { offer, next } => {
                assert_eq!(offer.id, 500);
                assert_eq!(next, Duration::from_secs(60));
            }
            other => panic!("expected unchanged, got {other:?}"),
        }

        assert_eq!(h.menu_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_new_offer_is_announced() {
        let menu = menu_page(
            json!({ "500": entry(199, "X"), "501": entry(300, "Y") }),
            &[card(500, Some("/x")), card(501, Some("/y"))],
        );
        let mut h = harness(
            vec![feed_body(true, 500, 99, 120), feed_body(true, 501, 150, 120)],
            menu,
            BackoffPolicy::default(),
        );

        h.scheduler.run_cycle().await;
        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { offer: CurrentOffer { id: 501, .. }, .. }
        ));
        assert_eq!(h.menu_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_no_active_offer_uses_its_own_backoff() {
        let policy = BackoffPolicy {
            error: Duration::from_secs(60),
            no_offer: Duration::from_secs(15),
            min_interval: Duration::from_secs(10),
        };
        let mut h = harness(vec![feed_body(false, 500, 99, 120)], default_menu(), policy);

        match h.scheduler.run_cycle().await {
            CycleOutcome::Backoff { error, next } => {
                assert!(matches!(error, CycleError::Poll(PollError::NoActiveOffer)));
                assert_eq!(next, Duration::from_secs(15));
            }
            other => panic!("expected backoff, got {other:?}"),
        }
        assert_eq!(h.scheduler.state(), CycleState::Backoff);
        assert_eq!(h.menu_calls.load(Ordering::SeqCst), 0);
        assert!(h.notifier.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_backs_off() {
        let mut h = harness(vec![], default_menu(), BackoffPolicy::default());
        let outcome = h.scheduler.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Backoff {
                error: CycleError::Poll(PollError::Transport(_)),
                ..
            }
        ));
        assert_eq!(outcome.next_sleep(), Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_unknown_product_backs_off() {
        let mut h = harness(
            vec![feed_body(true, 777, 99, 120)],
            default_menu(),
            BackoffPolicy::default(),
        );
        let outcome = h.scheduler.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Backoff {
                error: CycleError::Reconcile(ReconcileError::ProductNotInCatalog { id: 777 }),
                ..
            }
        ));
        assert!(h.scheduler.cache().is_populated());
    }

    #[tokio::test]
    async fn test_failed_send_is_retried_next_cycle() {
        let mut h = harness(
            vec![feed_body(true, 500, 99, 120)],
            default_menu(),
            BackoffPolicy::default(),
        );
        h.notifier.fail_sends.store(1, Ordering::SeqCst);

        let outcome = h.scheduler.run_cycle().await;
        assert!(matches!(
            outcome,
            CycleOutcome::Backoff {
                error: CycleError::Notify(_),
                ..
            }
        ));
        assert_eq!(outcome.next_sleep(), Duration::from_secs(60));

        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { .. }
        ));
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 1);
        assert_eq!(h.menu_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_offer_after_gap_is_announced_again() {
        let mut h = harness(
            vec![
                feed_body(true, 500, 99, 120),
                feed_body(false, 500, 99, 120),
                feed_body(true, 500, 99, 3600),
            ],
            default_menu(),
            BackoffPolicy::default(),
        );

        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { .. }
        ));
        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Backoff {
                error: CycleError::Poll(PollError::NoActiveOffer),
                ..
            }
        ));
        match h.scheduler.run_cycle().await {
            CycleOutcome::Notified { offer, next, .. } => {
                assert_eq!(offer.remaining_seconds, 3600);
                assert_eq!(next, Duration::from_secs(3600));
            }
            other => panic!("expected a fresh announcement, got {other:?}"),
        }
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
        assert_eq!(h.menu_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_same_offer_after_window_is_announced_again() {
        let policy = BackoffPolicy {
            min_interval: Duration::ZERO,
            ..BackoffPolicy::default()
        };
        let mut h = harness(vec![feed_body(true, 500, 99, 0)], default_menu(), policy);

        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { .. }
        ));
        assert!(matches!(
            h.scheduler.run_cycle().await,
            CycleOutcome::Notified { .. }
        ));
        assert_eq!(h.notifier.sent.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_short_window_is_floored() {
        let mut h = harness(
            vec![feed_body(true, 500, 99, 0)],
            default_menu(),
            BackoffPolicy::default(),
        );
        assert_eq!(
            h.scheduler.run_cycle().await.next_sleep(),
            Duration::from_secs(10)
        );
    }

    #[tokio::test]
    async fn test_rejected_credential_never_polls() {
        let feed = ScriptedFeed::new(vec![feed_body(true, 500, 99, 120)]);
        let feed_calls = Arc::clone(&feed.calls);
        let menu = CountingMenu {
            page: default_menu(),
            calls: Arc::default(),
        };
        let notifier = RecordingNotifier {
            reject_token: true,
            ..Default::default()
        };
        let engine = ReconcileEngine::new(menu, Extractor::new(Url::parse(ORIGIN).unwrap()));
        let mut scheduler =
            PollScheduler::new(feed, engine, notifier, "@offers", BackoffPolicy::default());

        let err = scheduler.run().await.unwrap_err();
        assert!(matches!(err, NotifierError::Unauthorized(_)));
        assert_eq!(feed_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_backoff_classification() {
        let policy = BackoffPolicy {
            error: Duration::from_secs(60),
            no_offer: Duration::from_secs(5),
            min_interval: Duration::from_secs(10),
        };
        let no_offer = CycleError::Poll(PollError::NoActiveOffer);
        let remote = CycleError::Poll(PollError::Remote {
            code: 200,
            error_code: 3,
            message: "no offer".into(),
        });
        let missing = CycleError::Reconcile(ReconcileError::ProductNotInCatalog { id: 1 });
        assert_eq!(policy.after_error(&no_offer), Duration::from_secs(5));
        assert_eq!(policy.after_error(&remote), Duration::from_secs(60));
        assert_eq!(policy.after_error(&missing), Duration::from_secs(60));
    }
}
