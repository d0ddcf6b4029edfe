//! Fire-and-forget activity sink. Events land in a bounded in-process
//! queue drained by a background worker that batches inserts; nothing on
//! the request path ever waits on the database.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{self as tokio_time, MissedTickBehavior};

use crate::storage::{NewActivityEvent, Storage};

#[derive(Debug, Clone)]
pub struct ActivityLoggerConfig {
    pub queue_capacity: usize,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub retry_delay: Duration,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 4096,
            batch_size: 64,
            flush_interval: Duration::from_secs(2),
            retry_delay: Duration::from_millis(500),
        }
    }
}

struct LoggerShared {
    queue: Mutex<VecDeque<NewActivityEvent>>,
    notify: Notify,
    dropped: AtomicU64,
    capacity: usize,
}

#[derive(Clone)]
pub struct ActivityLogger {
    shared: Arc<LoggerShared>,
}

impl ActivityLogger {
    /// Start the drain worker. The returned handle is aborted at
    /// shutdown; in-flight batches finish first.
    pub fn spawn(
        storage: Arc<dyn Storage>,
        config: ActivityLoggerConfig,
    ) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(LoggerShared {
            queue: Mutex::new(VecDeque::with_capacity(config.queue_capacity)),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            capacity: config.queue_capacity.max(1),
        });
        let worker = tokio::spawn(drain_loop(shared.clone(), storage, config));
        (Self { shared }, worker)
    }

    /// Enqueue one event. Never blocks and never fails; when the queue is
    /// full the oldest event is dropped and counted.
    pub fn log(&self, event: NewActivityEvent) {
        {
            let mut queue = self.shared.queue.lock().expect("activity queue poisoned");
            if queue.len() >= self.shared.capacity {
                queue.pop_front();
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    pub fn dropped_events(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.shared.queue.lock().expect("activity queue poisoned").len()
    }
}

async fn drain_loop(
    shared: Arc<LoggerShared>,
    storage: Arc<dyn Storage>,
    config: ActivityLoggerConfig,
) {
    let mut ticker = tokio_time::interval(config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shared.notify.notified() => {}
            _ = ticker.tick() => {}
        }
        loop {
            let batch: Vec<NewActivityEvent> = {
                let mut queue = shared.queue.lock().expect("activity queue poisoned");
                let take = queue.len().min(config.batch_size);
                queue.drain(..take).collect()
            };
            if batch.is_empty() {
                break;
            }
            if let Err(err) = storage.insert_activity_events(batch.clone()).await {
                tracing::warn!(error = %err, "failed to log activity");
                tokio_time::sleep(config.retry_delay).await;
                if let Err(err) = storage.insert_activity_events(batch).await {
                    // Give up on this batch; the request path must not
                    // observe sink failures.
                    tracing::warn!(error = %err, "failed to log activity, dropping batch");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStorage;
    use time::OffsetDateTime;

    fn event(user_id: i64) -> NewActivityEvent {
        NewActivityEvent {
            user_id,
            at: OffsetDateTime::now_utc(),
            model: "openai/gpt-4".into(),
            provider: "openrouter".into(),
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
            cost_usd: 0.001,
            latency_ms: 42,
            finish_reason: Some("stop".into()),
            endpoint: "/v1/chat/completions".into(),
            session_id: None,
            metadata: None,
        }
    }

    #[tokio::test]
    async fn worker_drains_queue_to_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let (logger, worker) = ActivityLogger::spawn(
            storage.clone(),
            ActivityLoggerConfig {
                flush_interval: Duration::from_millis(10),
                ..Default::default()
            },
        );
        for i in 0..5 {
            logger.log(event(i));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(storage.activity_events().len(), 5);
        assert_eq!(logger.dropped_events(), 0);
        worker.abort();
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_counts() {
        let storage = Arc::new(MemoryStorage::new());
        let (logger, worker) = ActivityLogger::spawn(
            storage,
            ActivityLoggerConfig {
                queue_capacity: 2,
                // Long interval so the worker does not drain under us.
                flush_interval: Duration::from_secs(3600),
                ..Default::default()
            },
        );
        logger.log(event(1));
        logger.log(event(2));
        logger.log(event(3));
        assert_eq!(logger.pending(), 2);
        assert_eq!(logger.dropped_events(), 1);
        worker.abort();
    }
}
