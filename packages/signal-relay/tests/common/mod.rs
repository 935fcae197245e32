#![allow(dead_code)]

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use parking_lot::Mutex;
use signal_relay::{
    Frame, FrameStream, HostPlatform, RelayError, RelayResult, Sample, SourceConnector,
    StreamProducer, VariableRegistrar,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// One connection served by [`ScriptedConnector`]
pub struct Script {
    pub frames: Vec<Frame>,
    /// Keep the connection open after the frames instead of closing it
    pub hold_open: bool,
}

impl Script {
    pub fn open(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            hold_open: true,
        }
    }

    pub fn closing(frames: Vec<Frame>) -> Self {
        Self {
            frames,
            hold_open: false,
        }
    }
}

/// Serves scripted connections in order, then refuses
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<Script>>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn connects(&self) -> usize {
        self.urls.lock().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().clone()
    }
}

#[async_trait]
impl SourceConnector for ScriptedConnector {
    async fn connect(&self, url: &str) -> RelayResult<FrameStream> {
        self.urls.lock().push(url.to_string());

        let Some(script) = self.scripts.lock().pop_front() else {
            return Err(RelayError::Connection("no more scripts".into()));
        };

        let frames = stream::iter(script.frames.into_iter().map(Ok));
        if script.hold_open {
            Ok(Box::pin(frames.chain(stream::pending())))
        } else {
            Ok(Box::pin(frames))
        }
    }
}

/// Refuses every connection and records when each attempt happened
#[derive(Default)]
pub struct FailingConnector {
    attempts: Mutex<Vec<Instant>>,
}

impl FailingConnector {
    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }
}

#[async_trait]
impl SourceConnector for FailingConnector {
    async fn connect(&self, _url: &str) -> RelayResult<FrameStream> {
        self.attempts.lock().push(Instant::now());
        Err(RelayError::Connection("connection refused".into()))
    }
}

/// Sets its flag when dropped
struct ReleaseFlag(Arc<AtomicBool>);

impl Drop for ReleaseFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Accepts every connection and keeps it open, remembering whether the
/// last one has been released
#[derive(Default)]
pub struct HoldingConnector {
    released: Arc<AtomicBool>,
}

impl HoldingConnector {
    pub fn released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceConnector for HoldingConnector {
    async fn connect(&self, _url: &str) -> RelayResult<FrameStream> {
        self.released.store(false, Ordering::SeqCst);
        let flag = ReleaseFlag(Arc::clone(&self.released));
        let frames = stream::pending::<RelayResult<Frame>>().map(move |frame| {
            let _held = &flag;
            frame
        });
        Ok(Box::pin(frames))
    }
}

/// Producer that remembers what it was given
#[derive(Default)]
pub struct RecordingProducer {
    samples: Mutex<Vec<Sample>>,
    failures: AtomicUsize,
}

impl RecordingProducer {
    /// Fails the next `n` produce calls
    pub fn failing(n: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            failures: AtomicUsize::new(n),
        }
    }

    pub fn samples(&self) -> Vec<Sample> {
        self.samples.lock().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.samples.lock().iter().map(|s| s.key.clone()).collect()
    }
}

#[async_trait]
impl StreamProducer for RecordingProducer {
    async fn produce(&self, sample: &Sample) -> RelayResult<()> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(RelayError::Platform {
                status: 503,
                message: "stream unavailable".into(),
            });
        }

        self.samples.lock().push(sample.clone());
        Ok(())
    }
}

/// In-memory host platform
#[derive(Default)]
pub struct RecordingPlatform {
    pub producer: Arc<RecordingProducer>,
    declared: Mutex<Vec<(String, String)>>,
    opened: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    pub fn declared(&self) -> Vec<(String, String)> {
        self.declared.lock().clone()
    }

    pub fn opened(&self) -> Vec<String> {
        self.opened.lock().clone()
    }
}

#[async_trait]
impl VariableRegistrar for RecordingPlatform {
    async fn declare_variable(&self, name: &str, description: &str) -> RelayResult<()> {
        self.declared
            .lock()
            .push((name.to_string(), description.to_string()));
        Ok(())
    }
}

#[async_trait]
impl HostPlatform for RecordingPlatform {
    async fn open_stream(&self, name: &str) -> RelayResult<Arc<dyn StreamProducer>> {
        self.opened.lock().push(name.to_string());
        let producer: Arc<dyn StreamProducer> = self.producer.clone();
        Ok(producer)
    }
}

pub fn text(sample: &Sample) -> Frame {
    Frame::Text(serde_json::to_string(sample).unwrap())
}

/// Poll `check` until it holds, failing the test after `timeout`
pub async fn wait_until<F>(timeout: Duration, mut check: F)
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while !check() {
        assert!(Instant::now() < deadline, "condition not met in {:?}", timeout);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
