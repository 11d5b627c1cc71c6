use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::message::EngineMessage;
use super::message::Waiter;
use super::state::StatusRecord;
use crate::error::Error;
use crate::error::Result;
use crate::transport::Method;
use crate::transport::Transport;

/// How the engine learns about state changes made outside of this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum Mode {
    /// Refresh on a timer after every fetch.
    Polling,

    /// The device pings the notification listener; never refresh on a timer.
    Push,
}

/// Tuning for the status engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Delay between background refreshes, and the maximum age of a cached
    /// record served to unforced reads.
    pub refresh_interval: Duration,

    /// How long a failed switch command is held before the error is returned.
    pub write_failure_delay: Duration,

    pub mode: Mode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            write_failure_delay: Duration::from_secs(3),
            mode: Mode::Polling,
        }
    }
}

/// Handle to the status cache engine.
///
/// The cache, waiter queue and refresh timer live in a single background task;
/// handles are cheap to clone and only send it messages. The task stops once
/// every handle has been dropped.
#[derive(Clone)]
pub struct Engine {
    tx: mpsc::UnboundedSender<EngineMessage>,
    published: watch::Receiver<Option<StatusRecord>>,
    pub(super) transport: Arc<dyn Transport>,
    pub(super) device: Device,
    pub(super) write_failure_delay: Duration,
    mode: Mode,
}

impl Engine {
    /// Start the engine task. Must be called from within a tokio runtime.
    ///
    /// Nothing is fetched until the first status request.
    pub fn spawn(device: Device, transport: Arc<dyn Transport>, config: EngineConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (published_tx, published_rx) = watch::channel(None);

        let cache = StatusCache {
            device: device.clone(),
            transport: transport.clone(),
            refresh_interval: config.refresh_interval,
            mode: config.mode,
            entry: None,
            waiters: Vec::new(),
            force_next: false,
            timer: None,
            timer_generation: 0,
            tx: tx.downgrade(),
            published: published_tx,
        };
        tokio::spawn(cache.run(rx));

        Self {
            tx,
            published: published_rx,
            transport,
            device,
            write_failure_delay: config.write_failure_delay,
            mode: config.mode,
        }
    }

    /// Get the device status.
    ///
    /// Served from cache when the record is fresh and `forced` is false.
    /// Joins the in-flight fetch if there is one, whatever `forced` says.
    pub async fn get_status(&self, forced: bool) -> Result<StatusRecord> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineMessage::GetStatus {
            forced,
            waiter: Some(reply_tx),
        })?;

        reply_rx.await.map_err(|_| Error::EngineStopped)?
    }

    /// Request a status update without waiting for it.
    ///
    /// The outcome reaches subscribers through [`Engine::subscribe`].
    pub fn refresh(&self, forced: bool) {
        let msg = EngineMessage::GetStatus {
            forced,
            waiter: None,
        };
        if let Err(e) = self.send(msg) {
            warn!("Failed to request status refresh: {}", e);
        }
    }

    /// Make the next status request bypass the cache.
    ///
    /// Lazy: nothing is fetched until someone asks for the status.
    pub fn invalidate(&self) {
        if let Err(e) = self.send(EngineMessage::Invalidate) {
            warn!("Failed to invalidate status cache: {}", e);
        }
    }

    /// Watch every record the engine stores, starting with `None`.
    pub fn subscribe(&self) -> watch::Receiver<Option<StatusRecord>> {
        self.published.clone()
    }

    /// Last record stored by the engine, without any I/O.
    pub fn cached(&self) -> Option<StatusRecord> {
        self.published.borrow().clone()
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub(super) fn adopt(&self, record: StatusRecord) {
        if let Err(e) = self.send(EngineMessage::Adopt { record }) {
            warn!("Failed to store switch response: {}", e);
        }
    }

    fn send(&self, msg: EngineMessage) -> Result<()> {
        self.tx.send(msg).map_err(|_| Error::EngineStopped)
    }
}

/// State owned by the engine task.
///
/// `waiters` doubles as the fetch lock: it is non-empty exactly while one
/// fetch is in flight.
struct StatusCache {
    device: Device,
    transport: Arc<dyn Transport>,
    refresh_interval: Duration,
    mode: Mode,

    /// Last good record and when it was stored
    entry: Option<(StatusRecord, Instant)>,

    /// Callers waiting on the in-flight fetch, in arrival order
    waiters: Vec<Waiter>,

    /// Set by an invalidation, consumed by the next fetch
    force_next: bool,

    /// Pending background refresh
    timer: Option<JoinHandle<()>>,

    /// Identifies the current timer so firings of cancelled ones are dropped
    timer_generation: u64,

    /// Weak, so fetches and timers do not keep the engine alive
    tx: mpsc::WeakUnboundedSender<EngineMessage>,

    published: watch::Sender<Option<StatusRecord>>,
}

impl StatusCache {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<EngineMessage>) {
        info!(
            "Status engine starting for {} ({} mode)",
            self.device.ip(),
            self.mode
        );

        while let Some(msg) = rx.recv().await {
            self.handle_message(msg);
        }

        self.cancel_timer();
        info!("Status engine shutting down");
    }

    fn handle_message(&mut self, msg: EngineMessage) {
        match msg {
            EngineMessage::GetStatus { forced, waiter } => self.get_status(forced, waiter),
            EngineMessage::Invalidate => {
                debug!("Status cache invalidated");
                self.force_next = true;
            }
            EngineMessage::Adopt { record } => {
                debug!("Adopting status echoed by switch command");
                self.store(record);
            }
            EngineMessage::FetchCompleted { result } => self.complete_fetch(result),
            EngineMessage::TimerFired { generation } => {
                if self.timer.is_none() || generation != self.timer_generation {
                    debug!("Ignoring cancelled refresh timer {}", generation);
                    return;
                }
                self.timer = None;
                debug!("Scheduled refresh due");
                self.get_status(true, None);
            }
        }
    }

    fn get_status(&mut self, forced: bool, waiter: Waiter) {
        if !self.waiters.is_empty() {
            debug!(
                "Fetch in flight, queueing status request ({} already waiting)",
                self.waiters.len()
            );
            self.waiters.push(waiter);
            return;
        }

        let forced = forced || self.force_next;
        if !forced {
            if let Some((record, fetched_at)) = &self.entry {
                if fetched_at.elapsed() < self.refresh_interval {
                    debug!("Returning cached status");
                    if let Some(waiter) = waiter {
                        let _ = waiter.send(Ok(record.clone()));
                    }
                    return;
                }
            }
        }

        self.start_fetch(forced, waiter);
    }

    fn start_fetch(&mut self, forced: bool, waiter: Waiter) {
        self.cancel_timer();
        self.force_next = false;
        self.waiters.push(waiter);

        let Some(tx) = self.tx.upgrade() else {
            // Every handle is gone; nobody can observe a fetch anymore.
            self.resolve_waiters(Err(Error::EngineStopped));
            return;
        };

        debug!("Fetching device status, forced: {}", forced);
        let transport = self.transport.clone();
        let url = self.device.status_url();
        tokio::spawn(async move {
            let result = match transport.send(Method::Get, &url, None).await {
                Ok(Some(record)) => Ok(record),
                Ok(None) => Err(Error::Decode(
                    "device returned an empty status response".to_string(),
                )),
                Err(e) => Err(e),
            };
            let _ = tx.send(EngineMessage::FetchCompleted { result });
        });
    }

    fn complete_fetch(&mut self, result: Result<StatusRecord>) {
        match &result {
            Ok(record) => {
                debug!("Done fetching status, resolving {} waiters", self.waiters.len());
                self.store(record.clone());
            }
            Err(e) => error!("Failed to fetch device status: {}", e),
        }

        self.resolve_waiters(result);
        self.schedule_refresh();
    }

    fn resolve_waiters(&mut self, result: Result<StatusRecord>) {
        for waiter in std::mem::take(&mut self.waiters).into_iter().flatten() {
            // The caller may have given up waiting
            let _ = waiter.send(result.clone());
        }
    }

    fn store(&mut self, record: StatusRecord) {
        self.entry = Some((record.clone(), Instant::now()));
        self.published.send_replace(Some(record));
    }

    fn schedule_refresh(&mut self) {
        if self.mode == Mode::Push {
            return;
        }

        self.cancel_timer();
        self.timer_generation += 1;

        let generation = self.timer_generation;
        let interval = self.refresh_interval;
        let tx = self.tx.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(tx) = tx.upgrade() {
                let _ = tx.send(EngineMessage::TimerFired { generation });
            }
        }));
    }

    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::transport::MockTransport;

    fn spawn_engine(transport: &Arc<MockTransport>, mode: Mode) -> Engine {
        let config = EngineConfig {
            mode,
            ..EngineConfig::default()
        };
        Engine::spawn(Device::new("10.0.0.5"), transport.clone(), config)
    }

    /// Let every spawned task run until it blocks.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_reads_share_one_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MockTransport::with_states([false, true]).gated(gate.clone()));
        let engine = spawn_engine(&transport, Mode::Push);

        let handles: Vec<_> = (0..5)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.get_status(false).await })
            })
            .collect();
        settle().await;
        assert_eq!(transport.request_count(), 1);

        gate.add_permits(1);
        for handle in handles {
            let record = handle.await.unwrap().unwrap();
            assert_eq!(record, StatusRecord::from_states([false, true]));
        }
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fresh_cache_is_served_without_fetch() {
        let transport = Arc::new(MockTransport::with_states([true, false]));
        let engine = spawn_engine(&transport, Mode::Polling);

        let first = engine.get_status(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(59)).await;
        let second = engine.get_status(false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            transport.requests(),
            vec![(Method::Get, "http://10.0.0.5/api/relay/state".to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_cache_is_refetched() {
        let transport = Arc::new(MockTransport::with_states([true, false]));
        let engine = spawn_engine(&transport, Mode::Push);

        engine.get_status(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        engine.get_status(false).await.unwrap();

        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_read_bypasses_cache() {
        let transport = Arc::new(MockTransport::with_states([true, false]));
        transport.push_response(Ok(Some(StatusRecord::from_states([false, false]))));
        let engine = spawn_engine(&transport, Mode::Push);

        let first = engine.get_status(false).await.unwrap();
        let forced = engine.get_status(true).await.unwrap();

        assert_eq!(first, StatusRecord::from_states([false, false]));
        assert_eq!(forced, StatusRecord::from_states([true, false]));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_forced_read_joins_in_flight_fetch() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(MockTransport::with_states([true, true]).gated(gate.clone()));
        let engine = spawn_engine(&transport, Mode::Push);

        let unforced = tokio::spawn({
            let engine = engine.clone();
            async move { engine.get_status(false).await }
        });
        settle().await;
        let forced = tokio::spawn({
            let engine = engine.clone();
            async move { engine.get_status(true).await }
        });
        settle().await;
        assert_eq!(transport.request_count(), 1);

        gate.add_permits(1);
        assert!(unforced.await.unwrap().is_ok());
        assert!(forced.await.unwrap().is_ok());
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidate_forces_next_read() {
        let transport = Arc::new(MockTransport::with_states([true, false]));
        let engine = spawn_engine(&transport, Mode::Push);

        engine.get_status(false).await.unwrap();
        engine.invalidate();
        engine.get_status(false).await.unwrap();
        assert_eq!(transport.request_count(), 2);

        // Only the first read after an invalidation bypasses the cache
        engine.get_status(false).await.unwrap();
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_cached_record() {
        let transport = Arc::new(MockTransport::with_states([true, false]));
        let engine = spawn_engine(&transport, Mode::Push);

        let cached = engine.get_status(false).await.unwrap();

        transport.push_response(Err(Error::Transport("connection reset".to_string())));
        let err = engine.get_status(true).await.unwrap_err();
        assert_eq!(err, Error::Transport("connection reset".to_string()));

        assert_eq!(engine.get_status(false).await.unwrap(), cached);
        assert_eq!(engine.cached(), Some(cached));
        assert_eq!(transport.request_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_reaches_every_waiter() {
        let gate = Arc::new(Semaphore::new(0));
        let transport = Arc::new(
            MockTransport::new(Err(Error::Decode("bad json".to_string()))).gated(gate.clone()),
        );
        let engine = spawn_engine(&transport, Mode::Push);

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move { engine.get_status(false).await })
            })
            .collect();
        settle().await;
        gate.add_permits(1);

        for handle in handles {
            assert_eq!(
                handle.await.unwrap(),
                Err(Error::Decode("bad json".to_string()))
            );
        }
        assert_eq!(transport.request_count(), 1);
        assert_eq!(engine.cached(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_status_response_is_decode_error() {
        let transport = Arc::new(MockTransport::new(Ok(None)));
        let engine = spawn_engine(&transport, Mode::Push);

        let err = engine.get_status(false).await.unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_refreshes_in_background() {
        let transport = Arc::new(MockTransport::with_states([false, false]));
        let engine = spawn_engine(&transport, Mode::Polling);

        engine.get_status(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(transport.request_count(), 2);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_continues_after_failure() {
        let transport = Arc::new(MockTransport::with_states([false, false]));
        transport.push_response(Err(Error::Transport("timed out".to_string())));
        let engine = spawn_engine(&transport, Mode::Polling);

        assert!(engine.get_status(false).await.is_err());
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert_eq!(transport.request_count(), 2);
        assert_eq!(engine.cached(), Some(StatusRecord::from_states([false, false])));
    }

    #[tokio::test(start_paused = true)]
    async fn test_push_mode_never_polls() {
        let transport = Arc::new(MockTransport::with_states([false, false]));
        let engine = spawn_engine(&transport, Mode::Push);

        engine.get_status(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(300)).await;

        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_fetch_reschedules_timer() {
        let transport = Arc::new(MockTransport::with_states([false, false]));
        let engine = spawn_engine(&transport, Mode::Polling);

        engine.get_status(false).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        engine.get_status(true).await.unwrap();

        // The timer from the first fetch would have fired at 60s
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(transport.request_count(), 2);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(transport.request_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_publishes_to_subscribers() {
        let transport = Arc::new(MockTransport::with_states([true, true]));
        let engine = spawn_engine(&transport, Mode::Push);
        let mut updates = engine.subscribe();
        assert_eq!(*updates.borrow(), None);

        engine.refresh(true);
        updates.changed().await.unwrap();

        assert_eq!(
            *updates.borrow_and_update(),
            Some(StatusRecord::from_states([true, true]))
        );
        assert_eq!(transport.request_count(), 1);
    }
}
