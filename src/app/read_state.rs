use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use anyhow::Result;
use time::{Date, Duration, OffsetDateTime};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::domain::notification::ATTENDANCE_MISSING_PREFIX;
use crate::domain::records::parse_date;
use crate::domain::session::Session;
use crate::infra::kv::KeyValueStore;

/// Durable set of notification ids a user has dismissed.
///
/// Reads fail open (an unreadable set is treated as empty) and writes are
/// best effort: failures are logged and never returned to the caller. A
/// write whose stored set cannot be loaded is skipped rather than risk
/// overwriting ids that were already read.
#[derive(Clone)]
pub struct ReadStateStore {
    kv: Arc<dyn KeyValueStore>,
    namespace: String,
    database: String,
    retention_days: Option<u32>,
    write_lock: Arc<Mutex<()>>,
}

impl ReadStateStore {
    pub fn new(
        kv: Arc<dyn KeyValueStore>,
        namespace: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            kv,
            namespace: namespace.into(),
            database: database.into(),
            retention_days: None,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn with_retention(mut self, retention_days: Option<u32>) -> Self {
        self.retention_days = retention_days;
        self
    }

    pub fn key_for(&self, session: &Session) -> String {
        format!("{}:{}:{}", self.namespace, self.database, session.uid)
    }

    pub async fn read_ids(&self, session: &Session) -> HashSet<String> {
        let key = self.key_for(session);
        match self.load(&key).await {
            Ok(ids) => ids,
            Err(err) => {
                warn!(error = ?err, key = %key, "failed to load read notifications");
                HashSet::new()
            }
        }
    }

    /// Absent or malformed data loads as empty; only storage errors fail.
    async fn load(&self, key: &str) -> Result<HashSet<String>> {
        let stored = match self.kv.get(key).await? {
            Some(stored) => stored,
            None => return Ok(HashSet::new()),
        };

        match serde_json::from_str::<Vec<String>>(&stored) {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(err) => {
                warn!(error = %err, key = %key, "discarding malformed read notifications");
                Ok(HashSet::new())
            }
        }
    }

    pub async fn mark_read(&self, session: &Session, id: &str) {
        self.mark_all_read(session, std::iter::once(id)).await;
    }

    pub async fn mark_all_read<I, S>(&self, session: &Session, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let key = self.key_for(session);
        let _guard = self.write_lock.lock().await;
        let mut read_ids = match self.load(&key).await {
            Ok(read_ids) => read_ids,
            Err(err) => {
                error!(
                    error = ?err,
                    key = %key,
                    "failed to load read notifications, skipping save"
                );
                return;
            }
        };
        read_ids.extend(ids.into_iter().map(Into::into));

        if let Some(days) = self.retention_days {
            let today = OffsetDateTime::now_utc().date();
            prune_expired(&mut read_ids, today, days);
        }

        let sorted: BTreeSet<String> = read_ids.into_iter().collect();
        let value = match serde_json::to_string(&sorted) {
            Ok(value) => value,
            Err(err) => {
                error!(error = %err, key = %key, "failed to encode read notifications");
                return;
            }
        };

        if let Err(err) = self.kv.set(&key, &value).await {
            error!(error = ?err, key = %key, "failed to save read notifications");
            return;
        }
        debug!(key = %key, count = sorted.len(), "saved read notifications");
    }
}

/// Drops day-stable ids whose embedded date falls outside the retention
/// window. Ids without a date never expire.
fn prune_expired(ids: &mut HashSet<String>, today: Date, retention_days: u32) {
    let cutoff = today - Duration::days(i64::from(retention_days));
    ids.retain(|id| {
        match id
            .strip_prefix(ATTENDANCE_MISSING_PREFIX)
            .and_then(|day| parse_date(day).ok())
        {
            Some(day) => day >= cutoff,
            None => true,
        }
    });
}
