//! Notification outbox.
//!
//! Lifecycle writes enqueue a [`Notification`] keyed by its idempotency key;
//! enqueueing the same key twice is a no-op. [`OutboxDispatcher`] drains
//! pending entries to every registered [`NotificationSink`] and marks an
//! entry delivered only once all sinks accepted it, so delivery is
//! at-least-once and a sink may see the same entry again after a failure.

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use attest_schemas::Notification;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEntry {
    pub id: i64,
    pub idempotency_key: String,
    pub notification: Notification,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait Outbox: Send + Sync {
    /// Returns `false` when the idempotency key is already present.
    async fn enqueue(&self, notification: &Notification) -> Result<bool>;

    /// Undelivered entries, fewest attempts first, then oldest. A stuck entry
    /// sinks behind fresh ones instead of holding the head of every batch.
    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>>;

    async fn mark_delivered(&self, id: i64) -> Result<bool>;

    async fn record_failure(&self, id: i64, error: &str) -> Result<()>;
}

/// Downstream consumer of delivered notifications.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    fn name(&self) -> &str;

    async fn deliver(&self, entry: &OutboxEntry) -> Result<()>;
}

#[derive(Debug, Default)]
struct MemoryInner {
    next_id: i64,
    entries: Vec<(OutboxEntry, bool)>,
}

#[derive(Debug, Default)]
pub struct MemoryOutbox {
    inner: Mutex<MemoryInner>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("memory outbox lock poisoned"))
    }

    /// Every entry ever enqueued, delivered or not.
    pub fn all(&self) -> Vec<OutboxEntry> {
        self.lock()
            .map(|g| g.entries.iter().map(|(e, _)| e.clone()).collect())
            .unwrap_or_default()
    }

    pub fn delivered_count(&self) -> usize {
        self.lock()
            .map(|g| g.entries.iter().filter(|(_, d)| *d).count())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn enqueue(&self, notification: &Notification) -> Result<bool> {
        let key = notification.idempotency_key();
        let mut g = self.lock()?;
        if g.entries.iter().any(|(e, _)| e.idempotency_key == key) {
            return Ok(false);
        }
        g.next_id += 1;
        let entry = OutboxEntry {
            id: g.next_id,
            idempotency_key: key,
            notification: notification.clone(),
            attempts: 0,
            last_error: None,
            created_at: Utc::now(),
        };
        g.entries.push((entry, false));
        Ok(true)
    }

    async fn pending(&self, limit: usize) -> Result<Vec<OutboxEntry>> {
        let g = self.lock()?;
        let mut pending: Vec<OutboxEntry> = g
            .entries
            .iter()
            .filter(|(_, delivered)| !delivered)
            .map(|(e, _)| e.clone())
            .collect();
        pending.sort_by_key(|e| (e.attempts, e.id));
        pending.truncate(limit);
        Ok(pending)
    }

    async fn mark_delivered(&self, id: i64) -> Result<bool> {
        let mut g = self.lock()?;
        match g.entries.iter_mut().find(|(e, d)| e.id == id && !*d) {
            Some((_, delivered)) => {
                *delivered = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn record_failure(&self, id: i64, error: &str) -> Result<()> {
        let mut g = self.lock()?;
        if let Some((e, _)) = g.entries.iter_mut().find(|(e, _)| e.id == id) {
            e.attempts += 1;
            e.last_error = Some(error.to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

/// Drains the outbox into sinks.
pub struct OutboxDispatcher {
    outbox: Arc<dyn Outbox>,
    sinks: Vec<Arc<dyn NotificationSink>>,
    batch_size: usize,
}

impl OutboxDispatcher {
    pub fn new(outbox: Arc<dyn Outbox>, batch_size: usize) -> Self {
        Self {
            outbox,
            sinks: Vec::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Deliver one batch of pending entries.
    pub async fn run_once(&self) -> Result<DispatchReport> {
        let mut report = DispatchReport::default();
        for entry in self.outbox.pending(self.batch_size).await? {
            let mut failure: Option<String> = None;
            for sink in &self.sinks {
                if let Err(e) = sink.deliver(&entry).await {
                    tracing::warn!(
                        outbox_id = entry.id,
                        sink = sink.name(),
                        error = %e,
                        "notification delivery failed"
                    );
                    failure = Some(format!("{}: {e:#}", sink.name()));
                    break;
                }
            }

            match failure {
                None => {
                    self.outbox.mark_delivered(entry.id).await?;
                    report.delivered += 1;
                }
                Some(err) => {
                    self.outbox.record_failure(entry.id, &err).await?;
                    report.failed += 1;
                }
            }
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attest_schemas::Address;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Fails every entry for one order, accepts the rest.
    struct PoisonSink {
        poisoned: i64,
        delivered: Mutex<Vec<i64>>,
    }

    #[async_trait]
    impl NotificationSink for PoisonSink {
        fn name(&self) -> &str {
            "poison"
        }

        async fn deliver(&self, entry: &OutboxEntry) -> Result<()> {
            match entry.notification {
                Notification::AddressBound {
                    order_id: Some(id), ..
                } if id == self.poisoned => Err(anyhow!("rejected")),
                Notification::AddressBound {
                    order_id: Some(id), ..
                } => {
                    self.delivered.lock().unwrap().push(id);
                    Ok(())
                }
                _ => Ok(()),
            }
        }
    }

    struct FlakySink {
        fail: AtomicBool,
        seen: AtomicUsize,
    }

    #[async_trait]
    impl NotificationSink for FlakySink {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, _entry: &OutboxEntry) -> Result<()> {
            self.seen.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(anyhow!("sink down"));
            }
            Ok(())
        }
    }

    fn bound(order_id: i64) -> Notification {
        Notification::AddressBound {
            order_id: Some(order_id),
            device: None,
            address: Address::from_public_key(&[3u8; 32]),
            bound_at: chrono::DateTime::<chrono::Utc>::default(),
        }
    }

    #[tokio::test]
    async fn enqueue_dedupes_on_idempotency_key() {
        let outbox = MemoryOutbox::new();
        assert!(outbox.enqueue(&bound(1)).await.unwrap());
        assert!(!outbox.enqueue(&bound(1)).await.unwrap());
        assert!(outbox.enqueue(&bound(2)).await.unwrap());
        assert_eq!(outbox.pending(10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn failed_delivery_stays_pending_and_is_retried() {
        let outbox = Arc::new(MemoryOutbox::new());
        outbox.enqueue(&bound(1)).await.unwrap();

        let sink = Arc::new(FlakySink {
            fail: AtomicBool::new(true),
            seen: AtomicUsize::new(0),
        });
        let dispatcher = OutboxDispatcher::new(outbox.clone(), 16).with_sink(sink.clone());

        let r = dispatcher.run_once().await.unwrap();
        assert_eq!(r, DispatchReport { delivered: 0, failed: 1 });
        let pending = outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempts, 1);
        assert!(pending[0].last_error.as_deref().unwrap().contains("sink down"));

        sink.fail.store(false, Ordering::SeqCst);
        let r = dispatcher.run_once().await.unwrap();
        assert_eq!(r, DispatchReport { delivered: 1, failed: 0 });
        assert!(outbox.pending(10).await.unwrap().is_empty());
        assert_eq!(sink.seen.load(Ordering::SeqCst), 2);

        // Nothing left to deliver.
        let r = dispatcher.run_once().await.unwrap();
        assert_eq!(r, DispatchReport::default());
    }

    #[tokio::test]
    async fn repeatedly_failing_entry_does_not_block_newer_ones() {
        let outbox = Arc::new(MemoryOutbox::new());
        for id in 1..=3 {
            outbox.enqueue(&bound(id)).await.unwrap();
        }
        let sink = Arc::new(PoisonSink {
            poisoned: 1,
            delivered: Mutex::new(Vec::new()),
        });
        let dispatcher = OutboxDispatcher::new(outbox.clone(), 1).with_sink(sink.clone());

        for _ in 0..3 {
            dispatcher.run_once().await.unwrap();
        }
        assert_eq!(*sink.delivered.lock().unwrap(), vec![2, 3]);

        let pending = outbox.pending(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, 1);
        assert_eq!(pending[0].attempts, 1);
    }
}
