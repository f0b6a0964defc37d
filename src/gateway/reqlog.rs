//! Non-blocking, batched request logging.
//!
//! Entries go into a bounded channel and are flushed in batches by a
//! background task, so logging never blocks the proxy hot path. When the
//! channel is full new entries are dropped and counted.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CHANNEL_BUFFER: usize = 10_000;
const BATCH_SIZE: usize = 100;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// One completed proxy request. Written once, consumed once.
#[derive(Clone, Debug)]
pub struct RequestLogEntry {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: u16,
    pub status: u16,
    pub cached: bool,
    pub created_at: OffsetDateTime,
}

/// Clamps a duration to the u16 millisecond range of the log field.
pub fn clamp_latency_ms(latency: Duration) -> u16 {
    latency.as_millis().min(u128::from(u16::MAX)) as u16
}

pub struct RequestLogger {
    tx: mpsc::Sender<RequestLogEntry>,
    dropped: Arc<AtomicU64>,
    shutdown: CancellationToken,
    worker: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl RequestLogger {
    /// Creates the logger and spawns the background batcher. Must be
    /// called from within a tokio runtime.
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_BUFFER)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let worker = tokio::spawn(run(rx, shutdown.clone()));
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            shutdown,
            worker: tokio::sync::Mutex::new(Some(worker)),
        }
    }

    /// Enqueues an entry. Never blocks: a full queue drops the entry and
    /// bumps the dropped counter.
    pub fn log(&self, entry: RequestLogEntry) {
        if self.tx.try_send(entry).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Drains queued entries, flushes, and stops the batcher. Idempotent.
    pub async fn close(&self) {
        self.shutdown.cancel();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Default for RequestLogger {
    fn default() -> Self {
        Self::new()
    }
}

async fn run(mut rx: mpsc::Receiver<RequestLogEntry>, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(FLUSH_INTERVAL);
    interval.tick().await;
    let mut batch: Vec<RequestLogEntry> = Vec::with_capacity(BATCH_SIZE);

    loop {
        tokio::select! {
            entry = rx.recv() => {
                match entry {
                    Some(entry) => {
                        batch.push(entry);
                        if batch.len() >= BATCH_SIZE {
                            flush(&mut batch);
                        }
                    }
                    None => {
                        flush(&mut batch);
                        return;
                    }
                }
            }
            _ = interval.tick() => flush(&mut batch),
            _ = shutdown.cancelled() => {
                // Deterministic drain: everything enqueued before the
                // shutdown signal is still written out.
                loop {
                    match rx.try_recv() {
                        Ok(entry) => {
                            batch.push(entry);
                            if batch.len() >= BATCH_SIZE {
                                flush(&mut batch);
                            }
                        }
                        Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
                    }
                }
                flush(&mut batch);
                return;
            }
        }
    }
}

fn flush(batch: &mut Vec<RequestLogEntry>) {
    for entry in batch.drain(..) {
        tracing::info!(
            target: "request_log",
            id = %entry.id,
            provider = %entry.provider,
            model = %entry.model,
            input_tokens = entry.input_tokens,
            output_tokens = entry.output_tokens,
            latency_ms = entry.latency_ms,
            status = entry.status,
            cached = entry.cached,
            created_at = ?entry.created_at,
            "request"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> RequestLogEntry {
        RequestLogEntry {
            id: Uuid::new_v4(),
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            input_tokens: 1,
            output_tokens: 2,
            latency_ms: 3,
            status: 200,
            cached: false,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    // Runs on the current-thread runtime: the batcher task cannot make
    // progress while the test body stays synchronous, so the channel
    // really saturates.
    #[tokio::test]
    async fn overflow_drops_exactly_the_excess() {
        let logger = RequestLogger::with_capacity(8);
        for _ in 0..20 {
            logger.log(entry());
        }
        assert_eq!(logger.dropped(), 12);
        logger.close().await;
    }

    #[tokio::test]
    async fn close_drains_and_is_idempotent() {
        let logger = RequestLogger::with_capacity(100);
        for _ in 0..5 {
            logger.log(entry());
        }
        logger.close().await;
        logger.close().await;
        assert_eq!(logger.dropped(), 0);
    }

    #[test]
    fn latency_is_clamped_to_u16() {
        assert_eq!(clamp_latency_ms(Duration::from_millis(12)), 12);
        assert_eq!(clamp_latency_ms(Duration::from_secs(120)), u16::MAX);
    }
}
