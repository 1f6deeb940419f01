//! Voice-capture session state machine.
//!
//! One capture session at a time per controller: `idle → recording →
//! processing → completion`, with every error path landing back in `idle`
//! and the message retained until the next attempt. The controller owns its
//! timers (the 1 Hz duration ticker and the 30 s processing watchdog) and
//! clears them on every exit transition, and it owns the recorder
//! exclusively, releasing the capture device on every exit path.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use nestling_schema::TimelineEvent;

/// Hard cap on waiting for the processing pipeline; prevents the session
/// from hanging indefinitely on a stalled network call.
pub const PROCESSING_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording,
    Processing,
    Completion,
}

/// Assembled audio from one capture session.
#[derive(Debug, Clone)]
pub struct AudioClip {
    pub bytes: Bytes,
    pub content_type: String,
}

impl AudioClip {
    pub fn webm(bytes: impl Into<Bytes>) -> Self {
        Self {
            bytes: bytes.into(),
            content_type: "audio/webm".to_string(),
        }
    }
}

/// Capture-device seam. Implementations own the underlying device stream;
/// `release` must stop it and is safe to call on every exit path, including
/// after `stop`.
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Acquire the capture device and start accumulating audio.
    async fn start(&mut self) -> Result<()>;
    /// Stop capture and assemble the accumulated audio into one clip.
    async fn stop(&mut self) -> Result<AudioClip>;
    /// Release the capture device without producing a clip.
    fn release(&mut self);
}

/// What the processing pipeline produced for one clip.
#[derive(Debug, Clone, Default)]
pub struct CaptureOutcome {
    pub event_ids: Vec<String>,
    pub events: Vec<TimelineEvent>,
    pub transcription: Option<String>,
}

/// Upload/transcription pipeline seam; the gateway implements this.
#[async_trait]
pub trait ProcessPipeline: Send + Sync {
    async fn process(&self, clip: AudioClip, duration_secs: u64) -> Result<CaptureOutcome>;
}

struct Inner {
    state: RecordingState,
    duration_secs: u64,
    processing_error: Option<String>,
    last_event_id: Option<String>,
    last_events: Vec<TimelineEvent>,
    ticker: Option<JoinHandle<()>>,
}

impl Inner {
    fn clear_ticker(&mut self) {
        if let Some(handle) = self.ticker.take() {
            handle.abort();
        }
    }
}

/// Single-flow capture controller. Cloning shares the session.
#[derive(Clone)]
pub struct RecordingController {
    inner: Arc<Mutex<Inner>>,
    recorder: Arc<Mutex<Box<dyn Recorder>>>,
    pipeline: Arc<dyn ProcessPipeline>,
    timeout: Duration,
}

impl RecordingController {
    pub fn new(recorder: Box<dyn Recorder>, pipeline: Arc<dyn ProcessPipeline>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: RecordingState::Idle,
                duration_secs: 0,
                processing_error: None,
                last_event_id: None,
                last_events: Vec::new(),
                ticker: None,
            })),
            recorder: Arc::new(Mutex::new(recorder)),
            pipeline,
            timeout: PROCESSING_TIMEOUT,
        }
    }

    pub async fn state(&self) -> RecordingState {
        self.inner.lock().await.state
    }

    /// Elapsed recording time in whole seconds, for display.
    pub async fn duration_secs(&self) -> u64 {
        self.inner.lock().await.duration_secs
    }

    /// Override the elapsed counter. For recorders that replay a source of
    /// known length instead of capturing in real time.
    pub async fn set_duration_secs(&self, secs: u64) {
        self.inner.lock().await.duration_secs = secs;
    }

    /// Error from the last attempt; retained until the next `start`.
    pub async fn processing_error(&self) -> Option<String> {
        self.inner.lock().await.processing_error.clone()
    }

    pub async fn last_event_id(&self) -> Option<String> {
        self.inner.lock().await.last_event_id.clone()
    }

    /// Events produced by the last completed capture.
    pub async fn last_events(&self) -> Vec<TimelineEvent> {
        self.inner.lock().await.last_events.clone()
    }

    /// Begin a capture session. Starting while a session is already
    /// recording or processing is not a valid transition and is ignored:
    /// the duration counter and the device stream are left untouched.
    /// Device failures surface through `processing_error` and leave the
    /// machine in `idle`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock().await;
            if matches!(
                inner.state,
                RecordingState::Recording | RecordingState::Processing
            ) {
                tracing::warn!(state = ?inner.state, "capture already in flight, ignoring start");
                return Ok(());
            }
            inner.processing_error = None;
            inner.last_event_id = None;
            inner.last_events.clear();
            inner.duration_secs = 0;
            inner.state = RecordingState::Recording;
            inner.clear_ticker();
        }

        {
            let mut recorder = self.recorder.lock().await;
            if let Err(e) = recorder.start().await {
                recorder.release();
                let mut inner = self.inner.lock().await;
                inner.state = RecordingState::Idle;
                inner.processing_error = Some(format!("Could not access microphone: {e}"));
                tracing::error!(error = %e, "failed to start capture device");
                return Ok(());
            }
        }

        // Created here, not in the task, so the tick schedule is anchored
        // to the start transition rather than the task's first poll.
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        let inner_arc = Arc::clone(&self.inner);
        let ticker = tokio::spawn(async move {
            // The first tick of an interval completes immediately.
            tick.tick().await;
            loop {
                tick.tick().await;
                let mut inner = inner_arc.lock().await;
                if inner.state != RecordingState::Recording {
                    break;
                }
                inner.duration_secs += 1;
            }
        });
        self.inner.lock().await.ticker = Some(ticker);
        Ok(())
    }

    /// Stop capture and run the clip through the pipeline, waiting at most
    /// [`PROCESSING_TIMEOUT`]. On timeout the wait is abandoned (any
    /// underlying call may still complete and is then ignored) and the
    /// machine returns to `idle` with a surfaced timeout message.
    pub async fn stop(&self) -> Result<()> {
        let duration_secs = {
            let mut inner = self.inner.lock().await;
            if inner.state != RecordingState::Recording {
                tracing::warn!(state = ?inner.state, "stop without active recording ignored");
                return Ok(());
            }
            inner.state = RecordingState::Processing;
            inner.clear_ticker();
            inner.duration_secs
        };

        let clip = {
            let mut recorder = self.recorder.lock().await;
            let result = recorder.stop().await;
            recorder.release();
            result
        };
        let clip = match clip {
            Ok(clip) => clip,
            Err(e) => {
                let mut inner = self.inner.lock().await;
                inner.state = RecordingState::Idle;
                inner.duration_secs = 0;
                inner.processing_error = Some(format!("Failed to capture audio: {e}"));
                return Ok(());
            }
        };

        let outcome =
            tokio::time::timeout(self.timeout, self.pipeline.process(clip, duration_secs)).await;

        let mut inner = self.inner.lock().await;
        if inner.state != RecordingState::Processing {
            // Reset during processing: the session moved on, drop the result.
            tracing::warn!("processing result arrived after state changed, ignoring");
            return Ok(());
        }
        inner.duration_secs = 0;
        match outcome {
            Err(_elapsed) => {
                tracing::error!("processing timeout, falling back to idle");
                inner.state = RecordingState::Idle;
                inner.processing_error = Some("Processing timeout - please try again".to_string());
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "failed to process recording");
                inner.state = RecordingState::Idle;
                inner.processing_error = Some(e.to_string());
            }
            Ok(Ok(outcome)) if outcome.event_ids.is_empty() => {
                inner.state = RecordingState::Idle;
                inner.processing_error = Some("Failed to process recording".to_string());
            }
            Ok(Ok(outcome)) => {
                inner.state = RecordingState::Completion;
                inner.last_event_id = outcome.event_ids.first().cloned();
                inner.last_events = outcome.events;
            }
        }
        Ok(())
    }

    /// Return to `idle`, clearing counters, errors, timers and the device.
    pub async fn reset(&self) {
        {
            let mut inner = self.inner.lock().await;
            inner.state = RecordingState::Idle;
            inner.duration_secs = 0;
            inner.last_event_id = None;
            inner.last_events.clear();
            inner.processing_error = None;
            inner.clear_ticker();
        }
        self.recorder.lock().await.release();
    }
}

/// Format an elapsed duration as `MM:SS` for display.
pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// In-memory recorder producing a fixed clip; the test/dev stand-in for a
/// real capture device.
#[derive(Clone)]
pub struct StubRecorder {
    clip: Bytes,
    started: Arc<AtomicBool>,
    start_calls: Arc<AtomicUsize>,
    releases: Arc<AtomicUsize>,
}

impl StubRecorder {
    pub fn new(clip: impl Into<Bytes>) -> Self {
        Self {
            clip: clip.into(),
            started: Arc::new(AtomicBool::new(false)),
            start_calls: Arc::new(AtomicUsize::new(0)),
            releases: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }
}

impl Default for StubRecorder {
    fn default() -> Self {
        Self::new(Bytes::from_static(b"\x1aE\xdf\xa3stub-audio"))
    }
}

#[async_trait]
impl Recorder for StubRecorder {
    async fn start(&mut self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            bail!("recorder already started");
        }
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&mut self) -> Result<AudioClip> {
        if !self.started.swap(false, Ordering::SeqCst) {
            bail!("recorder not started");
        }
        Ok(AudioClip::webm(self.clip.clone()))
    }

    fn release(&mut self) {
        self.started.store(false, Ordering::SeqCst);
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
