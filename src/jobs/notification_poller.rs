use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

use crate::app::notifications::NotificationService;
use crate::domain::notification::{NavigationTarget, Notification};
use crate::domain::session::Session;

/// Latest published result of the poll loop.
#[derive(Debug, Clone, Default)]
pub struct NotificationFeed {
    /// Generation of the refresh that produced `notifications`; 0 before the
    /// first refresh completes.
    pub generation: u64,
    pub notifications: Vec<Notification>,
    pub refreshed_at: Option<OffsetDateTime>,
}

pub struct NotificationPoller {
    service: NotificationService,
    session: Session,
    interval: Duration,
}

struct Shared {
    service: NotificationService,
    session: Session,
    feed: watch::Sender<NotificationFeed>,
    issued: AtomicU64,
    stopped: AtomicBool,
}

/// Owns a running poll loop. Dropping the handle stops the loop.
pub struct PollerHandle {
    shared: Arc<Shared>,
    task: JoinHandle<()>,
}

impl NotificationPoller {
    pub fn new(service: NotificationService, session: Session, interval: Duration) -> Self {
        Self {
            service,
            session,
            interval,
        }
    }

    /// Refreshes immediately, then once per interval until stopped.
    pub fn spawn(self) -> PollerHandle {
        let (feed, _) = watch::channel(NotificationFeed::default());
        let shared = Arc::new(Shared {
            service: self.service,
            session: self.session,
            feed,
            issued: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        });

        let interval = self.interval;
        let worker = shared.clone();
        let task = tokio::spawn(async move {
            info!(
                uid = worker.session.uid,
                interval_secs = interval.as_secs(),
                "notification poller started"
            );
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                worker.refresh().await;
            }
        });

        PollerHandle { shared, task }
    }
}

impl Shared {
    async fn refresh(&self) {
        let generation = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        let notifications = self.service.fetch(&self.session).await;
        self.publish(generation, notifications);
    }

    fn publish(&self, generation: u64, notifications: Vec<Notification>) -> bool {
        if self.stopped.load(Ordering::SeqCst) {
            debug!(generation, "poller stopped, dropping refresh result");
            return false;
        }
        self.feed.send_if_modified(|feed| {
            if generation <= feed.generation {
                debug!(generation, current = feed.generation, "dropping stale refresh result");
                return false;
            }
            feed.generation = generation;
            feed.notifications = notifications;
            feed.refreshed_at = Some(OffsetDateTime::now_utc());
            true
        })
    }
}

impl PollerHandle {
    pub fn subscribe(&self) -> watch::Receiver<NotificationFeed> {
        self.shared.feed.subscribe()
    }

    pub fn snapshot(&self) -> NotificationFeed {
        self.shared.feed.borrow().clone()
    }

    /// Runs one refresh outside the timer, e.g. after the user acts.
    pub async fn refresh_now(&self) {
        self.shared.refresh().await;
    }

    pub async fn mark_read(&self, id: &str) {
        let shared = &self.shared;
        shared.service.read_state().mark_read(&shared.session, id).await;
        shared.feed.send_if_modified(|feed| {
            let mut changed = false;
            for notification in feed.notifications.iter_mut().filter(|n| n.id == id && !n.read) {
                notification.read = true;
                changed = true;
            }
            changed
        });
    }

    pub async fn mark_all_read(&self) {
        let shared = &self.shared;
        let ids: Vec<String> = shared
            .feed
            .borrow()
            .notifications
            .iter()
            .map(|n| n.id.clone())
            .collect();
        shared
            .service
            .read_state()
            .mark_all_read(&shared.session, ids)
            .await;
        shared.feed.send_if_modified(|feed| {
            let mut changed = false;
            for notification in feed.notifications.iter_mut().filter(|n| !n.read) {
                notification.read = true;
                changed = true;
            }
            changed
        });
    }

    pub async fn open(&self, id: &str) -> Option<NavigationTarget> {
        let (was_read, target) = {
            let feed = self.shared.feed.borrow();
            let notification = feed.notifications.iter().find(|n| n.id == id)?;
            (notification.read, notification.target())
        };
        if !was_read {
            self.mark_read(id).await;
        }
        Some(target)
    }

    /// Stops the loop; a refresh still in flight is discarded.
    pub fn stop(&self) {
        if !self.shared.stopped.swap(true, Ordering::SeqCst) {
            self.task.abort();
            info!(uid = self.shared.session.uid, "notification poller stopped");
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
