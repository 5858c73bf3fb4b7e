//! **DuplexSessionClient**: one real-time voice session at a time.
//!
//! Idle → Connecting → Open → Closed. Closed is terminal for the client instance; a new
//! conversation uses a new client. Remote errors, remote close, and `stop()` all funnel
//! through the same idempotent teardown.

use async_trait::async_trait;
use growthlab_core::LiveSettings;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::capture::{AudioCaptureEncoder, CaptureConfig, CaptureTrack, FrameQueue, MediaCapture};
use crate::error::{LiveError, LiveResult};
use crate::frame::AudioFrame;
use crate::message::{InboundMessage, SessionEventKind};
use crate::playback::{BufferId, PlaybackClock, PlaybackScheduler, PlaybackSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Open,
    Closed,
}

/// Short user-facing indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Disconnected,
    MicAccessDenied,
}

impl SessionStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Listening => "listening",
            SessionStatus::Speaking => "speaking",
            SessionStatus::Disconnected => "disconnected",
            SessionStatus::MicAccessDenied => "mic access denied",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle callbacks of the remote session, delivered in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    Open,
    Message(InboundMessage),
    Error(String),
    Closed,
}

/// Opens the remote duplex endpoint. Events for the new link go to `events`.
#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, events: mpsc::UnboundedSender<LinkEvent>) -> LiveResult<Arc<dyn LiveLink>>;
}

/// The outbound half of an open session.
#[async_trait]
pub trait LiveLink: Send + Sync {
    async fn send_audio(&self, frame: &AudioFrame) -> LiveResult<()>;
    async fn close(&self);
}

struct Session {
    state: SessionState,
    track: Option<Box<dyn CaptureTrack>>,
    chunks: Option<mpsc::UnboundedReceiver<Vec<f32>>>,
    queue: Option<Arc<FrameQueue>>,
    playback: Option<PlaybackScheduler>,
    link: Option<Arc<dyn LiveLink>>,
    workers: Vec<JoinHandle<()>>,
    event_loop: Option<JoinHandle<()>>,
    shutdown: Option<watch::Sender<bool>>,
}

impl Session {
    fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            track: None,
            chunks: None,
            queue: None,
            playback: None,
            link: None,
            workers: Vec::new(),
            event_loop: None,
            shutdown: None,
        }
    }
}

struct ClientInner {
    connector: Arc<dyn LiveConnector>,
    media: Arc<dyn MediaCapture>,
    sink: Arc<dyn PlaybackSink>,
    clock: Arc<dyn PlaybackClock>,
    settings: LiveSettings,
    session: Mutex<Session>,
    status: watch::Sender<SessionStatus>,
}

#[derive(Clone)]
pub struct DuplexSessionClient {
    inner: Arc<ClientInner>,
}

impl DuplexSessionClient {
    pub fn new(
        connector: Arc<dyn LiveConnector>,
        media: Arc<dyn MediaCapture>,
        sink: Arc<dyn PlaybackSink>,
        clock: Arc<dyn PlaybackClock>,
        settings: LiveSettings,
    ) -> Self {
        let (status, _) = watch::channel(SessionStatus::Idle);
        Self {
            inner: Arc::new(ClientInner {
                connector,
                media,
                sink,
                clock,
                settings,
                session: Mutex::new(Session::idle()),
                status,
            }),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.inner.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_status(&self, status: SessionStatus) {
        let previous = self.inner.status.send_replace(status);
        if previous != status {
            debug!(target: "growthlab::live", from = %previous, to = %status, "session status");
        }
    }

    pub fn state(&self) -> SessionState {
        self.session().state
    }

    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Receiver that observes every status change.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Buffers currently scheduled for playback.
    pub fn active_playback(&self) -> usize {
        self.session()
            .playback
            .as_ref()
            .map(|p| p.active_count())
            .unwrap_or(0)
    }

    /// Acquire the microphone, then connect. A no-op while Connecting or Open.
    pub async fn start(&self) -> LiveResult<()> {
        {
            let mut session = self.session();
            match session.state {
                SessionState::Connecting | SessionState::Open => {
                    debug!(target: "growthlab::live", "start ignored: session already active");
                    return Ok(());
                }
                SessionState::Closed => return Err(LiveError::SessionClosed),
                SessionState::Idle => {}
            }

            let config = CaptureConfig {
                sample_rate: self.inner.settings.input_rate,
                channels: 1,
            };
            match self.inner.media.open(config) {
                Ok(capture) => {
                    session.track = Some(capture.track);
                    session.chunks = Some(capture.chunks);
                    session.state = SessionState::Connecting;
                }
                Err(e) => {
                    session.state = SessionState::Closed;
                    drop(session);
                    warn!(target: "growthlab::live", error = %e, "microphone unavailable");
                    self.set_status(SessionStatus::MicAccessDenied);
                    return Err(e);
                }
            }
        }
        self.set_status(SessionStatus::Connecting);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let link = match self.inner.connector.connect(events_tx).await {
            Ok(link) => link,
            Err(e) => {
                self.teardown(&format!("connect failed: {}", e)).await;
                return Err(e);
            }
        };

        let (playback, done_rx) =
            PlaybackScheduler::new(Arc::clone(&self.inner.sink), Arc::clone(&self.inner.clock));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let orphaned = {
            let mut session = self.session();
            if session.state == SessionState::Closed {
                // stopped while the connection was being established
                Some(link)
            } else {
                session.link = Some(link);
                session.playback = Some(playback);
                session.shutdown = Some(shutdown_tx);
                let client = self.clone();
                session.event_loop = Some(tokio::spawn(async move {
                    client.run_events(events_rx, done_rx, shutdown_rx).await;
                }));
                None
            }
        };
        if let Some(link) = orphaned {
            link.close().await;
            return Err(LiveError::SessionClosed);
        }
        info!(target: "growthlab::live", "session connecting");
        Ok(())
    }

    /// Caller-initiated teardown. No effect from Idle or once Closed.
    pub async fn stop(&self) {
        if self.state() == SessionState::Idle {
            return;
        }
        self.teardown("stopped by caller").await;
    }

    async fn run_events(
        self,
        mut events: mpsc::UnboundedReceiver<LinkEvent>,
        mut done: mpsc::UnboundedReceiver<BufferId>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(LinkEvent::Open) => self.on_open(),
                    Some(LinkEvent::Message(message)) => self.on_message(message),
                    Some(LinkEvent::Error(reason)) => {
                        self.teardown(&format!("remote error: {}", reason)).await;
                        break;
                    }
                    Some(LinkEvent::Closed) | None => {
                        self.teardown("remote closed").await;
                        break;
                    }
                },
                Some(id) = done.recv() => self.on_playback_done(id),
            }
        }
    }

    fn on_open(&self) {
        let mut session = self.session();
        if session.state != SessionState::Connecting {
            return;
        }
        let (Some(chunks), Some(link)) = (session.chunks.take(), session.link.clone()) else {
            return;
        };
        session.state = SessionState::Open;

        let settings = &self.inner.settings;
        let queue = Arc::new(FrameQueue::new(settings.send_queue));
        let encoder = AudioCaptureEncoder::new(chunks, settings.block_size, settings.input_rate);

        let encoder_queue = Arc::clone(&queue);
        session.workers.push(tokio::spawn(async move {
            encoder.run(&encoder_queue).await;
            encoder_queue.close();
        }));

        let sender_queue = Arc::clone(&queue);
        session.workers.push(tokio::spawn(async move {
            while let Some(frame) = sender_queue.pop().await {
                if let Err(e) = link.send_audio(&frame).await {
                    warn!(target: "growthlab::live", error = %e, "outbound audio send failed");
                    break;
                }
            }
        }));
        session.queue = Some(queue);
        // audio that arrived ahead of the open event may still be playing
        let speaking = session
            .playback
            .as_ref()
            .map(|p| p.is_playing())
            .unwrap_or(false);
        drop(session);

        info!(target: "growthlab::live", "session open; streaming microphone");
        self.set_status(if speaking {
            SessionStatus::Speaking
        } else {
            SessionStatus::Listening
        });
    }

    fn on_message(&self, message: InboundMessage) {
        match message {
            InboundMessage::AudioChunk(frame) => {
                let mut session = self.session();
                if session.state == SessionState::Closed {
                    return;
                }
                let Some(playback) = session.playback.as_mut() else {
                    return;
                };
                match playback.enqueue(&frame) {
                    Ok(_) => {
                        drop(session);
                        self.set_status(SessionStatus::Speaking);
                    }
                    Err(e) => {
                        warn!(target: "growthlab::live", error = %e, "dropping inbound audio");
                    }
                }
            }
            InboundMessage::SessionEvent(SessionEventKind::GoAway) => {
                info!(target: "growthlab::live", "server announced disconnect");
            }
            other => {
                debug!(target: "growthlab::live", message = ?other, "ignoring non-audio message");
            }
        }
    }

    fn on_playback_done(&self, id: BufferId) {
        let mut session = self.session();
        let state = session.state;
        let emptied = session
            .playback
            .as_mut()
            .map(|p| p.complete(id))
            .unwrap_or(false);
        drop(session);
        if !emptied {
            return;
        }
        match state {
            SessionState::Open => self.set_status(SessionStatus::Listening),
            SessionState::Connecting => self.set_status(SessionStatus::Connecting),
            _ => {}
        }
    }

    /// Release everything the session owns. Runs its body once per session.
    async fn teardown(&self, reason: &str) {
        let (link, workers, stopped) = {
            let mut session = self.session();
            if session.state == SessionState::Closed {
                return;
            }
            session.state = SessionState::Closed;

            if let Some(mut track) = session.track.take() {
                track.stop();
            }
            session.chunks = None;
            if let Some(queue) = session.queue.take() {
                queue.close();
            }
            let stopped = session
                .playback
                .as_mut()
                .map(|p| p.stop_all())
                .unwrap_or(0);
            // the event loop may be the caller; it exits on this signal instead of an abort
            if let Some(shutdown) = session.shutdown.take() {
                shutdown.send_replace(true);
            }
            session.event_loop = None;
            (
                session.link.take(),
                std::mem::take(&mut session.workers),
                stopped,
            )
        };

        self.set_status(SessionStatus::Disconnected);
        info!(target: "growthlab::live", reason, stopped_buffers = stopped, "session closed");

        for worker in workers {
            worker.abort();
        }
        if let Some(link) = link {
            link.close().await;
        }
    }
}
