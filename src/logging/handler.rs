use std::mem;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, error, warn};

use super::record::LogRecord;
use super::store::{DocumentStore, JsonlFileStore, StoreError};
use crate::config::RemoteLogSettings;

/// Target used for the handler's own diagnostics. The remote layer skips it
/// so a failing store cannot feed records back into itself.
pub const DIAGNOSTIC_TARGET: &str = "acdn::remote_log";

enum Command {
    Write(Vec<LogRecord>),
    Flush {
        batch: Vec<LogRecord>,
        done: oneshot::Sender<()>,
    },
}

impl Command {
    fn len(&self) -> usize {
        match self {
            Command::Write(batch) | Command::Flush { batch, .. } => batch.len(),
        }
    }
}

struct State {
    buffer: Vec<LogRecord>,
    sender: Option<mpsc::Sender<Command>>,
}

#[derive(Debug, Default)]
pub struct HandlerStats {
    delivered_batches: AtomicU64,
    fallback_batches: AtomicU64,
    dropped_records: AtomicU64,
}

impl HandlerStats {
    pub fn delivered_batches(&self) -> u64 {
        self.delivered_batches.load(Ordering::Relaxed)
    }

    pub fn fallback_batches(&self) -> u64 {
        self.fallback_batches.load(Ordering::Relaxed)
    }

    pub fn dropped_records(&self) -> u64 {
        self.dropped_records.load(Ordering::Relaxed)
    }
}

/// Buffers log records and ships them to a [`DocumentStore`] in batches.
///
/// `emit` is synchronous and never blocks on the store: once the buffer
/// reaches `batch_size` it is swapped out under the lock and handed to a
/// background worker, which performs the write with a timeout and a bounded
/// number of retries. At most `max_pending_batches` full batches wait for
/// the worker; further batches are dropped and counted. Batches that still
/// fail go to the fallback file, if any, or are dropped. Nothing here ever
/// returns an error to the caller.
///
/// Without a store (or outside a tokio runtime) the handler is inert.
/// Call [`shutdown`](Self::shutdown) before exit; it gives up after
/// `shutdown_timeout_ms`. Records still buffered when the handler is
/// dropped are lost.
pub struct RemoteLogHandler {
    state: Mutex<State>,
    batch_size: usize,
    shutdown_timeout: Duration,
    worker: Mutex<Option<JoinHandle<()>>>,
    stats: Arc<HandlerStats>,
}

impl RemoteLogHandler {
    pub fn start(
        store: Option<Arc<dyn DocumentStore>>,
        settings: RemoteLogSettings,
        fallback: Option<JsonlFileStore>,
    ) -> Self {
        let batch_size = settings.batch_size.max(1);
        let shutdown_timeout = settings.shutdown_timeout();
        let stats = Arc::new(HandlerStats::default());

        let (sender, worker) = match (store, tokio::runtime::Handle::try_current()) {
            (Some(store), Ok(runtime)) => {
                let (tx, rx) = mpsc::channel(settings.max_pending_batches.max(1));
                let worker = Worker {
                    store,
                    settings,
                    fallback,
                    stats: stats.clone(),
                };
                (Some(tx), Some(runtime.spawn(worker.run(rx))))
            }
            (Some(_), Err(_)) => {
                warn!(
                    target: DIAGNOSTIC_TARGET,
                    "No tokio runtime available; remote logging disabled"
                );
                (None, None)
            }
            (None, _) => (None, None),
        };

        Self {
            state: Mutex::new(State {
                buffer: Vec::with_capacity(if sender.is_some() { batch_size } else { 0 }),
                sender,
            }),
            batch_size,
            shutdown_timeout,
            worker: Mutex::new(worker),
            stats,
        }
    }

    /// A handler with no store. Every call is a no-op.
    pub fn disabled() -> Self {
        Self::start(None, RemoteLogSettings::default(), None)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock_state().sender.is_some()
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Records waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.lock_state().buffer.len()
    }

    pub fn stats(&self) -> &HandlerStats {
        &self.stats
    }

    pub fn emit(&self, record: LogRecord) {
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let Some(sender) = state.sender.as_ref() else {
            return;
        };

        state.buffer.push(record);
        if state.buffer.len() >= self.batch_size {
            let batch = mem::replace(&mut state.buffer, Vec::with_capacity(self.batch_size));
            // Queued while locked so batches reach the worker in emit order.
            match sender.try_send(Command::Write(batch)) {
                Ok(()) => {}
                Err(TrySendError::Full(lost) | TrySendError::Closed(lost)) => {
                    self.record_dropped(&lost)
                }
            }
        }
    }

    /// Send whatever is buffered, however small, and wait until the worker
    /// has processed it along with every batch queued before it.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        let (sender, batch) = {
            let mut guard = self.lock_state();
            let state = &mut *guard;
            let Some(sender) = state.sender.clone() else {
                return;
            };
            (sender, mem::take(&mut state.buffer))
        };

        let command = Command::Flush {
            batch,
            done: done_tx,
        };
        if let Err(mpsc::error::SendError(lost)) = sender.send(command).await {
            self.record_dropped(&lost);
            return;
        }
        let _ = done_rx.await;
    }

    /// Flush, stop accepting records, and wait for the worker to exit, all
    /// within `shutdown_timeout_ms`. A worker still busy at the deadline is
    /// aborted along with whatever it had queued.
    pub async fn shutdown(&self) {
        let deadline = Instant::now() + self.shutdown_timeout;

        if timeout_at(deadline, self.flush()).await.is_err() {
            warn!(
                target: DIAGNOSTIC_TARGET,
                "Final flush did not complete before the shutdown deadline"
            );
        }
        self.lock_state().sender = None;

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut worker) = worker {
            match timeout_at(deadline, &mut worker).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(target: DIAGNOSTIC_TARGET, "Remote log worker failed: {}", e)
                }
                Err(_) => {
                    worker.abort();
                    warn!(
                        target: DIAGNOSTIC_TARGET,
                        "Remote log worker aborted at shutdown; pending batches lost"
                    );
                }
            }
        }
    }

    fn record_dropped(&self, command: &Command) {
        self.stats
            .dropped_records
            .fetch_add(command.len() as u64, Ordering::Relaxed);
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Worker {
    store: Arc<dyn DocumentStore>,
    settings: RemoteLogSettings,
    fallback: Option<JsonlFileStore>,
    stats: Arc<HandlerStats>,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Write(batch) => self.deliver(batch).await,
                Command::Flush { batch, done } => {
                    if !batch.is_empty() {
                        self.deliver(batch).await;
                    }
                    let _ = done.send(());
                }
            }
        }
        debug!(target: DIAGNOSTIC_TARGET, "Remote log worker stopped");
    }

    async fn deliver(&self, batch: Vec<LogRecord>) {
        let attempts = self.settings.max_retries.saturating_add(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                tokio::time::sleep(self.settings.backoff(attempt)).await;
            }

            match self.write_with_timeout(&batch).await {
                Ok(()) => {
                    self.stats.delivered_batches.fetch_add(1, Ordering::Relaxed);
                    debug!(
                        target: DIAGNOSTIC_TARGET,
                        records = batch.len(),
                        "Log batch delivered"
                    );
                    return;
                }
                Err(e) => warn!(
                    target: DIAGNOSTIC_TARGET,
                    attempt = attempt + 1,
                    of = attempts,
                    "Log batch write failed: {}",
                    e
                ),
            }
        }

        self.give_up(batch).await;
    }

    async fn write_with_timeout(&self, batch: &[LogRecord]) -> Result<(), StoreError> {
        tokio::time::timeout(self.settings.flush_timeout(), self.store.write_batch(batch))
            .await
            .unwrap_or(Err(StoreError::Timeout(self.settings.flush_timeout_ms)))
    }

    async fn give_up(&self, batch: Vec<LogRecord>) {
        if let Some(fallback) = &self.fallback {
            match fallback.write_batch(&batch).await {
                Ok(()) => {
                    self.stats.fallback_batches.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        target: DIAGNOSTIC_TARGET,
                        records = batch.len(),
                        path = %fallback.path().display(),
                        "Log batch written to fallback file"
                    );
                    return;
                }
                Err(e) => error!(
                    target: DIAGNOSTIC_TARGET,
                    "Fallback write failed: {}",
                    e
                ),
            }
        }

        self.stats
            .dropped_records
            .fetch_add(batch.len() as u64, Ordering::Relaxed);
        error!(
            target: DIAGNOSTIC_TARGET,
            records = batch.len(),
            "Log batch dropped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::store::MockDocumentStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use tracing::Level;

    #[derive(Default)]
    struct RecordingStore {
        batches: Mutex<Vec<Vec<LogRecord>>>,
    }

    impl RecordingStore {
        fn batches(&self) -> Vec<Vec<LogRecord>> {
            self.batches.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DocumentStore for RecordingStore {
        async fn write_batch(&self, records: &[LogRecord]) -> Result<(), StoreError> {
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(())
        }
    }

    struct SlowStore;

    #[async_trait]
    impl DocumentStore for SlowStore {
        async fn write_batch(&self, _records: &[LogRecord]) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        }
    }

    struct HungStore;

    #[async_trait]
    impl DocumentStore for HungStore {
        async fn write_batch(&self, _records: &[LogRecord]) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    fn settings(batch_size: usize) -> RemoteLogSettings {
        RemoteLogSettings {
            batch_size,
            flush_timeout_ms: 1_000,
            max_retries: 2,
            retry_backoff_ms: 0,
            fallback_to_file: false,
            max_pending_batches: 8,
            shutdown_timeout_ms: 5_000,
        }
    }

    fn record(i: usize) -> LogRecord {
        LogRecord::new(Level::INFO, "acdn::test", format!("record {i}"))
    }

    #[tokio::test]
    async fn test_below_batch_size_does_not_transmit() {
        let store = Arc::new(RecordingStore::default());
        let handler = RemoteLogHandler::start(Some(store.clone()), settings(5), None);

        for i in 0..4 {
            handler.emit(record(i));
        }
        tokio::task::yield_now().await;

        assert_eq!(handler.buffered(), 4);
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_full_batch_transmits_once() {
        let store = Arc::new(RecordingStore::default());
        let handler = RemoteLogHandler::start(Some(store.clone()), settings(5), None);

        for i in 0..5 {
            handler.emit(record(i));
        }
        assert_eq!(handler.buffered(), 0);

        // Empty flush only waits for the queued batch.
        handler.flush().await;

        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 5);
        assert_eq!(batches[0][0].message, "record 0");
        assert_eq!(handler.stats().delivered_batches(), 1);
    }

    #[tokio::test]
    async fn test_forced_flush_sends_partial_batch() {
        let store = Arc::new(RecordingStore::default());
        let handler = RemoteLogHandler::start(Some(store.clone()), settings(100), None);

        handler.emit(record(1));
        handler.emit(record(2));
        handler.flush().await;

        assert_eq!(handler.buffered(), 0);
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 2);
    }

    #[tokio::test]
    async fn test_empty_flush_does_not_transmit() {
        let mut store = MockDocumentStore::new();
        store.expect_write_batch().never();

        let handler = RemoteLogHandler::start(Some(Arc::new(store)), settings(10), None);
        handler.flush().await;
        handler.shutdown().await;
    }

    #[tokio::test]
    async fn test_without_store_is_inert() {
        let handler = RemoteLogHandler::disabled();

        for i in 0..1_000 {
            handler.emit(record(i));
        }
        handler.flush().await;

        assert!(!handler.is_enabled());
        assert_eq!(handler.buffered(), 0);
    }

    #[test]
    fn test_outside_runtime_is_inert() {
        let store = Arc::new(RecordingStore::default());
        let handler = RemoteLogHandler::start(Some(store.clone()), settings(1), None);

        handler.emit(record(0));

        assert!(!handler.is_enabled());
        assert!(store.batches().is_empty());
    }

    #[tokio::test]
    async fn test_failed_batch_retried_then_written_to_fallback() {
        let tmp = tempfile::tempdir().unwrap();
        let fallback = JsonlFileStore::new(tmp.path().join("fallback.jsonl"));

        let mut store = MockDocumentStore::new();
        store
            .expect_write_batch()
            .times(3)
            .returning(|_| Err(StoreError::Unavailable("firestore down".to_string())));

        let handler =
            RemoteLogHandler::start(Some(Arc::new(store)), settings(2), Some(fallback.clone()));
        handler.emit(record(1));
        handler.emit(record(2));
        handler.shutdown().await;

        assert_eq!(handler.stats().fallback_batches(), 1);
        assert_eq!(handler.stats().dropped_records(), 0);
        let contents = std::fs::read_to_string(fallback.path()).unwrap();
        assert_eq!(contents.lines().count(), 2);
    }

    #[tokio::test]
    async fn test_retry_recovers_after_transient_failure() {
        let mut store = MockDocumentStore::new();
        let mut seq = mockall::Sequence::new();
        store
            .expect_write_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(StoreError::Rejected("busy".to_string())));
        store
            .expect_write_batch()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(()));

        let handler = RemoteLogHandler::start(Some(Arc::new(store)), settings(10), None);
        handler.emit(record(1));
        handler.shutdown().await;

        assert_eq!(handler.stats().delivered_batches(), 1);
        assert_eq!(handler.stats().dropped_records(), 0);
    }

    #[tokio::test]
    async fn test_slow_store_times_out_and_drops() {
        let mut config = settings(10);
        config.flush_timeout_ms = 20;
        config.max_retries = 0;

        let handler = RemoteLogHandler::start(Some(Arc::new(SlowStore)), config, None);
        handler.emit(record(1));
        handler.emit(record(2));
        handler.flush().await;

        assert_eq!(handler.stats().dropped_records(), 2);
        assert_eq!(handler.stats().delivered_batches(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_flushes_and_stops_accepting() {
        let store = Arc::new(RecordingStore::default());
        let handler = RemoteLogHandler::start(Some(store.clone()), settings(50), None);

        handler.emit(record(1));
        handler.shutdown().await;
        handler.emit(record(2));
        handler.flush().await;

        assert!(!handler.is_enabled());
        assert_eq!(handler.buffered(), 0);
        let batches = store.batches();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0][0].message, "record 1");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_emitters_lose_nothing() {
        let store = Arc::new(RecordingStore::default());
        let mut config = settings(64);
        config.max_pending_batches = 64;
        let handler = Arc::new(RemoteLogHandler::start(Some(store.clone()), config, None));

        let threads: Vec<_> = (0..8)
            .map(|t| {
                let handler = handler.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        handler.emit(record(t * 1_000 + i));
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        handler.flush().await;

        let messages: Vec<String> = store
            .batches()
            .into_iter()
            .flatten()
            .map(|r| r.message)
            .collect();
        let unique: HashSet<&String> = messages.iter().collect();

        assert_eq!(messages.len(), 2_000);
        assert_eq!(unique.len(), 2_000);
        assert!(store.batches().iter().all(|b| b.len() <= 64));
    }

    #[tokio::test]
    async fn test_hung_store_bounds_backlog_and_shutdown() {
        let config = RemoteLogSettings {
            batch_size: 10,
            flush_timeout_ms: 50,
            max_retries: 0,
            retry_backoff_ms: 0,
            fallback_to_file: false,
            max_pending_batches: 2,
            shutdown_timeout_ms: 300,
        };
        let handler = RemoteLogHandler::start(Some(Arc::new(HungStore)), config, None);

        for i in 0..200_000 {
            handler.emit(record(i));
        }

        // Only the queued batches (plus one in flight) are kept.
        assert_eq!(handler.buffered(), 0);
        assert!(handler.stats().dropped_records() >= 200_000 - 3 * 10);

        let started = std::time::Instant::now();
        handler.shutdown().await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!handler.is_enabled());
        assert_eq!(handler.stats().delivered_batches(), 0);
    }

    #[tokio::test]
    async fn test_full_queue_drops_instead_of_growing() {
        let mut config = settings(1);
        config.max_pending_batches = 1;
        let handler = RemoteLogHandler::start(Some(Arc::new(HungStore)), config, None);

        // No await in between, so the worker never drains the queue.
        for i in 0..5 {
            handler.emit(record(i));
        }

        assert_eq!(handler.stats().dropped_records(), 4);
    }
}
