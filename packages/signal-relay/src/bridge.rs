// Bridge - one reconnecting subscription to a remote variable
//
// Lifecycle:
//   Disconnected -> Connecting -> Connected -> (error | EOF) -> Disconnected(backoff) -> ...
//
// The listen loop runs as its own tokio task. Every suspension point (connect,
// read, pacing sleep, backoff sleep) races the bridge's CancellationToken, so
// `stop()` interrupts it wherever it is and then waits for the task to unwind.

use crate::backoff::Backoff;
use crate::connector::{Frame, FrameStream, SourceConnector};
use crate::error::RelayError;
use crate::queue::BoundedQueue;
use crate::types::{BridgeState, ConnectionStatus, Sample, Variable};
use futures_util::StreamExt;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Pause after a dropped message, as a multiple of the pacing interval
const FULL_QUEUE_PAUSE_FACTOR: u32 = 10;

/// Message decoded from a remote source
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeMessage {
    Sample(Sample),
    /// Binary payload, passed through undecoded
    Binary(Vec<u8>),
}

/// Queue a bridge delivers into and the scheduler drains
pub type BridgeQueue = BoundedQueue<BridgeMessage>;

/// Per-bridge tuning
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Pacing after each accepted message
    pub interval: Duration,
    pub queue_size: usize,
    /// Use `wss://` for non-loopback sources
    pub secure: bool,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(20),
            queue_size: 100,
            secure: false,
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    /// Cancelled by the listen task once it has unwound
    done: CancellationToken,
    handle: JoinHandle<()>,
}

/// Managed connection to one remote variable
pub struct Bridge {
    variable: Variable,
    url: String,
    settings: BridgeSettings,
    connector: Arc<dyn SourceConnector>,
    queue: Arc<BridgeQueue>,
    state: Arc<RwLock<BridgeState>>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<Worker>>,
}

impl Bridge {
    pub fn new(
        variable: Variable,
        settings: BridgeSettings,
        connector: Arc<dyn SourceConnector>,
    ) -> Self {
        let url = variable.fetch_url(settings.secure);
        let queue = Arc::new(BridgeQueue::new(settings.queue_size));

        Self {
            variable,
            url,
            settings,
            connector,
            queue,
            state: Arc::new(RwLock::new(BridgeState::default())),
            running: Arc::new(AtomicBool::new(false)),
            worker: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.variable.name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Output queue; the same instance across restarts
    pub fn queue(&self) -> Arc<BridgeQueue> {
        Arc::clone(&self.queue)
    }

    /// Snapshot of the connection state
    pub fn status(&self) -> BridgeState {
        self.state.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Launch the listen loop if it is not already running.
    ///
    /// Never blocks and never fails; connection problems are handled by the loop.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Arc<BridgeQueue> {
        let mut worker = self.worker.lock();
        if worker.is_none() {
            self.running.store(true, Ordering::Release);
            self.state.write().running = true;

            let cancel = CancellationToken::new();
            let listener = Listener {
                name: self.variable.name.clone(),
                url: self.url.clone(),
                interval: self.settings.interval,
                connector: Arc::clone(&self.connector),
                queue: Arc::clone(&self.queue),
                state: Arc::clone(&self.state),
                running: Arc::clone(&self.running),
            };
            let done = CancellationToken::new();
            let exit_guard = done.clone().drop_guard();
            let run = listener.run(cancel.clone());
            let handle = tokio::spawn(async move {
                let _exit = exit_guard;
                run.await;
            });
            *worker = Some(Worker {
                cancel,
                done,
                handle,
            });

            debug!("[{}] Bridge started", self.name());
        }

        Arc::clone(&self.queue)
    }

    /// Stop the listen loop and wait until it has fully unwound.
    ///
    /// Concurrent callers all wait for the same listener to exit.
    pub async fn stop(&self) {
        self.running.store(false, Ordering::Release);

        let tokens = self
            .worker
            .lock()
            .as_ref()
            .map(|worker| (worker.cancel.clone(), worker.done.clone()));

        if let Some((cancel, done)) = tokens {
            cancel.cancel();
            done.cancelled().await;

            // Whoever gets here first reaps the task; a worker started since is left alone
            let finished = {
                let mut worker = self.worker.lock();
                if worker.as_ref().is_some_and(|w| w.done.is_cancelled()) {
                    worker.take()
                } else {
                    None
                }
            };
            if let Some(worker) = finished {
                if let Err(e) = worker.handle.await {
                    if !e.is_cancelled() {
                        error!("[{}] Listener task failed: {}", self.name(), e);
                    }
                }
            }
        }

        let mut state = self.state.write();
        state.running = false;
        state.connection_status = ConnectionStatus::Disconnected;
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        // Never leave an orphaned listener behind
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

enum PumpExit {
    Cancelled,
    Closed,
    Failed(RelayError),
}

/// State moved into the listen task
struct Listener {
    name: String,
    url: String,
    interval: Duration,
    connector: Arc<dyn SourceConnector>,
    queue: Arc<BridgeQueue>,
    state: Arc<RwLock<BridgeState>>,
    running: Arc<AtomicBool>,
}

impl Listener {
    async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new();

        while self.running.load(Ordering::Acquire) {
            self.set_status(ConnectionStatus::Connecting, backoff.current());
            info!("[{}] Connecting to {}", self.name, self.url);

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(frames) => {
                    info!("[{}] Connected", self.name);
                    backoff.reset();
                    self.set_status(ConnectionStatus::Connected, backoff.current());

                    match self.pump(frames, &cancel).await {
                        PumpExit::Cancelled => break,
                        PumpExit::Closed => info!("[{}] Connection closed by source", self.name),
                        PumpExit::Failed(e) => warn!("[{}] Connection lost: {}", self.name, e),
                    }
                }
                Err(e) => warn!("[{}] Connect failed: {}", self.name, e),
            }

            if !self.running.load(Ordering::Acquire) {
                break;
            }

            let delay = backoff.next_delay();
            self.set_status(ConnectionStatus::Disconnected, delay);
            info!(
                "[{}] Reconnecting in {}s",
                self.name,
                delay.as_secs_f64()
            );
            if !sleep_or_cancel(delay, &cancel).await {
                break;
            }
        }

        self.set_status(ConnectionStatus::Disconnected, backoff.current());
        info!("[{}] Listener stopped", self.name);
    }

    /// Move frames into the queue until the connection ends or the bridge stops.
    /// The connection is closed when `frames` is dropped on return.
    async fn pump(&self, mut frames: FrameStream, cancel: &CancellationToken) -> PumpExit {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => return PumpExit::Cancelled,
                frame = frames.next() => frame,
            };

            let message = match frame {
                None => return PumpExit::Closed,
                Some(Err(e)) => return PumpExit::Failed(e),
                Some(Ok(Frame::Text(text))) => match serde_json::from_str::<Sample>(&text) {
                    Ok(sample) => BridgeMessage::Sample(sample),
                    Err(e) => {
                        warn!("[{}] Skipping undecodable message: {}", self.name, e);
                        continue;
                    }
                },
                Some(Ok(Frame::Binary(data))) => BridgeMessage::Binary(data),
            };

            let pause = match self.queue.try_push(message) {
                Ok(()) => self.interval,
                Err(_) => {
                    debug!("[{}] Queue full, message dropped", self.name);
                    self.interval * FULL_QUEUE_PAUSE_FACTOR
                }
            };

            if !pause.is_zero() && !sleep_or_cancel(pause, cancel).await {
                return PumpExit::Cancelled;
            }
        }
    }

    fn set_status(&self, status: ConnectionStatus, backoff: Duration) {
        let mut state = self.state.write();
        state.connection_status = status;
        state.backoff_seconds = backoff.as_secs_f64();
    }
}

/// Returns false if cancelled before the delay elapsed
async fn sleep_or_cancel(delay: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}
