//! Session control and the per-frame fan-out.

use std::{
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    thread,
    time::{Duration, Instant, SystemTime, UNIX_EPOCH},
};

use crossbeam_channel::{Receiver, Sender, bounded, select};
use uuid::Uuid;

use crate::{
    config::PipelineConfig,
    delivery::{BrokerConnector, DeliveryProducer, DeliveryWorker, PublishFailure},
    error::{LogError, SessionError},
    frame_log::LogStore,
    pipeline::{
        FrameRenderer, LiveCapture, Normalizer, Recorder, ReplayHandle, ReplayLog, SourceEvent,
        SourceKind, SourceMessage, spawn_replay,
    },
    state::{SessionState, SharedState},
    types::Frame,
};

const EVENT_QUEUE_DEPTH: usize = 64;

/// Status changes surfaced to the control surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    SubjectLost,
    SubjectFound,
    PublishFailed {
        subject_id: String,
        captured_at_millis: u64,
        reason: String,
    },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_rendered: u64,
    pub frames_recorded: u64,
    pub frames_published: u64,
    pub publish_failures: u64,
    pub delivery_dropped: u64,
    /// Frames from a source that was not active when they arrived.
    pub frames_discarded: u64,
}

#[derive(Debug, Default)]
struct StatsCounters {
    frames_rendered: AtomicU64,
    frames_recorded: AtomicU64,
    frames_published: AtomicU64,
    publish_failures: AtomicU64,
    delivery_dropped: AtomicU64,
    frames_discarded: AtomicU64,
}

impl StatsCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> SessionStats {
        SessionStats {
            frames_rendered: self.frames_rendered.load(Ordering::Relaxed),
            frames_recorded: self.frames_recorded.load(Ordering::Relaxed),
            frames_published: self.frames_published.load(Ordering::Relaxed),
            publish_failures: self.publish_failures.load(Ordering::Relaxed),
            delivery_dropped: self.delivery_dropped.load(Ordering::Relaxed),
            frames_discarded: self.frames_discarded.load(Ordering::Relaxed),
        }
    }
}

/// Everything the pump thread needs to route one frame.
struct FanOut {
    state: SharedState,
    normalizer: Normalizer,
    renderer: Arc<dyn FrameRenderer>,
    recorder: Arc<Recorder>,
    delivery: DeliveryWorker,
    delivery_wait: Duration,
    stats: Arc<StatsCounters>,
    event_tx: Sender<SessionEvent>,
}

impl FanOut {
    fn handle(&self, message: SourceMessage) {
        let snapshot = self.state.snapshot();
        if !is_active(message.kind, &snapshot) {
            if matches!(message.event, SourceEvent::Frame(_)) {
                StatsCounters::bump(&self.stats.frames_discarded);
            }
            return;
        }

        match message.event {
            SourceEvent::SubjectLost => {
                let _ = self.event_tx.try_send(SessionEvent::SubjectLost);
            }
            SourceEvent::SubjectFound => {
                let _ = self.event_tx.try_send(SessionEvent::SubjectFound);
            }
            SourceEvent::Frame(captured) => {
                let normalized = self
                    .normalizer
                    .normalize(&captured.frame, captured.orientation);

                self.renderer.render(&normalized, snapshot.render_scale);
                StatsCounters::bump(&self.stats.frames_rendered);

                if snapshot.is_recording && self.recorder.append(normalized.clone()) {
                    StatsCounters::bump(&self.stats.frames_recorded);
                }

                if snapshot.should_deliver() && !self.delivery.enqueue(normalized, self.delivery_wait)
                {
                    StatsCounters::bump(&self.stats.delivery_dropped);
                }
            }
        }
    }
}

fn is_active(kind: SourceKind, state: &SessionState) -> bool {
    match kind {
        SourceKind::Live => !state.is_replaying,
        SourceKind::Replay(generation) => {
            state.is_replaying && generation == state.replay_generation
        }
    }
}

/// Owns the session state and the worker threads behind it.
///
/// Control methods are meant to be called from one control thread; the
/// capture callback and replay loop only ever read state snapshots.
pub struct SessionController {
    config: PipelineConfig,
    state: SharedState,
    recorder: Arc<Recorder>,
    producer: Arc<DeliveryProducer>,
    log_store: LogStore,
    source_tx: Sender<SourceMessage>,
    replay: Mutex<Option<ReplayHandle>>,
    stats: Arc<StatsCounters>,
    event_rx: Receiver<SessionEvent>,
    shutdown_tx: Option<Sender<()>>,
    pump: Option<thread::JoinHandle<()>>,
}

impl SessionController {
    pub fn start(
        config: PipelineConfig,
        connector: Box<dyn BrokerConnector>,
        renderer: Arc<dyn FrameRenderer>,
    ) -> Self {
        let state = SharedState::new(SessionState::new(generate_subject_id()));
        let recorder = Arc::new(Recorder::new());
        let producer = Arc::new(DeliveryProducer::new(connector, config.topic.clone()));
        let stats = Arc::new(StatsCounters::default());
        let (event_tx, event_rx) = bounded(EVENT_QUEUE_DEPTH);
        let (source_tx, source_rx) = bounded(config.capture_queue_depth.max(1));
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let delivery = {
            let stats = stats.clone();
            let event_tx = event_tx.clone();
            DeliveryWorker::start(
                producer.clone(),
                config.delivery_queue_depth,
                move |result: Result<(), PublishFailure>| match result {
                    Ok(()) => StatsCounters::bump(&stats.frames_published),
                    Err(failure) => {
                        let _ = event_tx.try_send(SessionEvent::PublishFailed {
                            subject_id: failure.subject_id,
                            captured_at_millis: failure.captured_at_millis,
                            reason: failure.error.to_string(),
                        });
                        StatsCounters::bump(&stats.publish_failures);
                    }
                },
            )
        };

        let fan_out = FanOut {
            state: state.clone(),
            normalizer: Normalizer::new(config.normalizer),
            renderer,
            recorder: recorder.clone(),
            delivery,
            delivery_wait: config.replay.frame_interval,
            stats: stats.clone(),
            event_tx,
        };

        let pump = thread::spawn(move || run_pump(fan_out, source_rx, shutdown_rx));

        Self {
            log_store: LogStore::new(config.log_dir.clone()),
            config,
            state,
            recorder,
            producer,
            source_tx,
            replay: Mutex::new(None),
            stats,
            event_rx,
            shutdown_tx: Some(shutdown_tx),
            pump: Some(pump),
        }
    }

    /// Frame source to hand to the acquisition callback.
    pub fn live_capture(&self) -> LiveCapture {
        LiveCapture::new(self.state.clone(), self.source_tx.clone())
    }

    pub fn snapshot(&self) -> SessionState {
        self.state.snapshot()
    }

    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    pub fn events(&self) -> Receiver<SessionEvent> {
        self.event_rx.clone()
    }

    pub fn available_logs(&self) -> Result<Vec<String>, LogError> {
        self.log_store.list()
    }

    /// Switches to a new subject, generating an id when none is given.
    pub fn new_subject(&self, subject_id: Option<String>) -> String {
        let subject_id = subject_id.unwrap_or_else(generate_subject_id);
        self.state.update(|state| {
            state.subject_id = subject_id.clone();
            state.subject_started_at = Instant::now();
        });
        log::info!("new subject {subject_id}");
        subject_id
    }

    pub fn start_recording(&self) -> Result<(), SessionError> {
        if self.state.snapshot().is_recording {
            return Err(SessionError::AlreadyRecording);
        }
        self.recorder.start();
        self.state.update(|state| state.is_recording = true);
        log::info!("recording started");
        Ok(())
    }

    /// Stops recording and stores the buffer as a new log, returning its
    /// name. If storing fails the frames stay buffered and a later call
    /// retries.
    pub fn stop_recording(&self) -> Result<Option<String>, SessionError> {
        let was_recording = self
            .state
            .update(|state| std::mem::replace(&mut state.is_recording, false));
        let frames = self.recorder.stop();

        if frames.is_empty() {
            if !was_recording {
                return Err(SessionError::NotRecording);
            }
            log::info!("recording stopped, nothing captured");
            return Ok(None);
        }

        match self.log_store.save_new(&recording_name(&frames[0]), &frames) {
            Ok(name) => {
                log::info!("recording stopped, {} frames stored as {name}", frames.len());
                Ok(Some(name))
            }
            Err(err) => {
                log::warn!("failed to store recording of {} frames: {err}", frames.len());
                self.recorder.restore(frames);
                Err(SessionError::Persistence(err))
            }
        }
    }

    fn replay_slot(&self) -> MutexGuard<'_, Option<ReplayHandle>> {
        self.replay
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loads `name` and replays it in place of live capture. On failure the
    /// session keeps whatever it was doing.
    pub fn start_replay(&self, name: &str) -> Result<(), SessionError> {
        let frames = self.log_store.load(name).map_err(SessionError::ReplayLoad)?;
        let replay_log = ReplayLog::load(frames).map_err(SessionError::ReplayLoad)?;
        replay_log.window(self.config.replay)?;

        let mut slot = self.replay_slot();
        if let Some(previous) = slot.take() {
            previous.stop();
        }

        let generation = self.state.update(|state| {
            state.replay_generation += 1;
            state.is_replaying = true;
            state.replay_generation
        });

        match spawn_replay(
            &replay_log,
            self.config.replay,
            generation,
            self.source_tx.clone(),
        ) {
            Ok(handle) => {
                *slot = Some(handle);
                log::info!("replaying {name} ({} frames)", replay_log.len());
                Ok(())
            }
            Err(err) => {
                self.state.update(|state| state.is_replaying = false);
                Err(err.into())
            }
        }
    }

    /// Returns whether a replay was running.
    pub fn stop_replay(&self) -> bool {
        let mut slot = self.replay_slot();
        self.state.update(|state| state.is_replaying = false);
        match slot.take() {
            Some(handle) => {
                handle.stop();
                log::info!("replay stopped, back to live capture");
                true
            }
            None => false,
        }
    }

    /// Enables or disables delivery. Ignored unless connected.
    pub fn set_delivery_enabled(&self, enabled: bool) -> bool {
        let applied = self.state.update(|state| {
            if state.delivery_connected {
                state.delivery_enabled = enabled;
                true
            } else {
                false
            }
        });
        if applied {
            log::info!("delivery {}", if enabled { "enabled" } else { "disabled" });
        } else {
            log::debug!("delivery toggle ignored, broker not connected");
        }
        applied
    }

    pub fn connect_delivery(&self) -> bool {
        let connected = match self.producer.connect(&self.config.broker_url) {
            Ok(()) => true,
            Err(err) => {
                log::warn!("{err}");
                false
            }
        };
        self.state
            .update(|state| state.delivery_connected = connected);
        connected
    }

    pub fn set_render_scale(&self, scale: f64) -> bool {
        if !scale.is_finite() || scale <= 0.0 {
            return false;
        }
        self.state.update(|state| state.render_scale = scale);
        true
    }

    /// Stops replay and the pump; queued deliveries are flushed first.
    pub fn shutdown(&mut self) {
        self.stop_replay();
        self.shutdown_tx.take();
        if let Some(pump) = self.pump.take() {
            let _ = pump.join();
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_pump(fan_out: FanOut, source_rx: Receiver<SourceMessage>, shutdown_rx: Receiver<()>) {
    loop {
        select! {
            recv(source_rx) -> message => match message {
                Ok(message) => fan_out.handle(message),
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
    log::debug!("session pump stopped");
}

fn generate_subject_id() -> String {
    Uuid::new_v4().to_string()
}

fn recording_name(first: &Frame) -> String {
    let subject: String = first
        .subject_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    let stamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    format!("{subject}-{stamp}")
}
