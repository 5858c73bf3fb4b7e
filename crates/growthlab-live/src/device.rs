//! Local audio devices: cpal microphone capture and rodio output.
//!
//! Both device handles are `!Send` on some platforms, so each lives on a dedicated thread
//! for as long as it is needed; the async side only sees channels and an `Arc<Sink>`.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, SampleRate, StreamConfig};
use rodio::buffer::SamplesBuffer;
use rodio::source::EmptyCallback;
use rodio::{OutputStream, Sink, Source};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc as std_mpsc, Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::capture::{CaptureConfig, CaptureStream, CaptureTrack, MediaCapture};
use crate::error::{LiveError, LiveResult};
use crate::playback::{BufferId, PlaybackBuffer, PlaybackClock, PlaybackDone, PlaybackSink};

/// How often a playing buffer checks whether it was stopped.
const STOP_POLL: Duration = Duration::from_millis(5);

// ---------------------------------------------------------------------------
// Capture
// ---------------------------------------------------------------------------

/// Default input device. The device must accept the requested rate and channel count as-is;
/// no resampling happens here.
#[derive(Debug, Default, Clone, Copy)]
pub struct CpalCapture;

impl CpalCapture {
    pub fn new() -> Self {
        Self
    }

    /// Names of the input devices on the default host.
    pub fn input_devices() -> LiveResult<Vec<String>> {
        let host = cpal::default_host();
        Ok(host
            .input_devices()?
            .filter_map(|d| d.name().ok())
            .collect())
    }
}

fn build_input_stream(
    config: CaptureConfig,
    chunks: mpsc::UnboundedSender<Vec<f32>>,
) -> LiveResult<cpal::Stream> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| LiveError::MediaAccessDenied("no input device available".to_string()))?;
    if let Ok(name) = device.name() {
        debug!(device = %name, rate = config.sample_rate, "opening input device");
    }

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: SampleRate(config.sample_rate),
        buffer_size: BufferSize::Default,
    };
    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            // receiver dropped means the session is gone; the stream is about to be dropped too
            let _ = chunks.send(data.to_vec());
        },
        |err| warn!("capture stream error: {}", err),
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

impl MediaCapture for CpalCapture {
    fn open(&self, config: CaptureConfig) -> LiveResult<CaptureStream> {
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = std_mpsc::channel::<LiveResult<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("growthlab-capture".to_string())
            .spawn(move || {
                let stream = match build_input_stream(config, chunk_tx) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));
                // park until the track is stopped or dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("capture stream released");
            })
            .map_err(|e| LiveError::AudioDevice(e.to_string()))?;

        ready_rx
            .recv()
            .map_err(|_| LiveError::AudioDevice("capture thread exited early".to_string()))??;
        info!(rate = config.sample_rate, "microphone capture started");

        Ok(CaptureStream {
            chunks: chunk_rx,
            track: Box::new(CpalTrack {
                stop: Some(stop_tx),
            }),
        })
    }
}

struct CpalTrack {
    stop: Option<std_mpsc::Sender<()>>,
}

impl CaptureTrack for CpalTrack {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Playback
// ---------------------------------------------------------------------------

#[derive(Default)]
struct SinkState {
    /// Playback clock offset at which everything appended so far finishes.
    queued_until: Duration,
    stops: HashMap<BufferId, Arc<AtomicBool>>,
}

/// Default output device. Buffers are appended to one rodio `Sink` in schedule order; a
/// leading delay fills any gap between the end of the queue and the buffer's start.
pub struct RodioSink {
    sink: Arc<Sink>,
    clock: Arc<dyn PlaybackClock>,
    state: Arc<Mutex<SinkState>>,
    _keepalive: std_mpsc::Sender<()>,
}

impl RodioSink {
    pub fn open(clock: Arc<dyn PlaybackClock>) -> LiveResult<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<LiveResult<Arc<Sink>>>();
        let (keepalive_tx, keepalive_rx) = std_mpsc::channel::<()>();

        thread::Builder::new()
            .name("growthlab-playback".to_string())
            .spawn(move || {
                let (stream, handle) = match OutputStream::try_default() {
                    Ok(pair) => pair,
                    Err(e) => {
                        let _ = ready_tx.send(Err(LiveError::Playback(e.to_string())));
                        return;
                    }
                };
                let sink = match Sink::try_new(&handle) {
                    Ok(sink) => Arc::new(sink),
                    Err(e) => {
                        let _ = ready_tx.send(Err(LiveError::Playback(e.to_string())));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(Arc::clone(&sink)));
                // returns once the owning RodioSink is dropped
                let _ = keepalive_rx.recv();
                sink.stop();
                drop(stream);
            })
            .map_err(|e| LiveError::AudioDevice(e.to_string()))?;

        let sink = ready_rx
            .recv()
            .map_err(|_| LiveError::Playback("playback thread exited early".to_string()))??;
        info!("output sink ready");

        Ok(Self {
            sink,
            clock,
            state: Arc::new(Mutex::new(SinkState::default())),
            _keepalive: keepalive_tx,
        })
    }
}

impl PlaybackSink for RodioSink {
    fn start(&self, buffer: &PlaybackBuffer, done: PlaybackDone) -> LiveResult<()> {
        let stopped = Arc::new(AtomicBool::new(false));
        let gap = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            let tail = state.queued_until.max(self.clock.now());
            let gap = buffer.scheduled_start.saturating_sub(tail);
            state.queued_until = tail + gap + buffer.duration;
            state.stops.insert(buffer.id, Arc::clone(&stopped));
            gap
        };

        let source = SamplesBuffer::new(1, buffer.sample_rate, buffer.samples.clone())
            .delay(gap)
            .stoppable()
            .periodic_access(STOP_POLL, move |src| {
                if stopped.load(Ordering::Relaxed) {
                    src.stop();
                }
            });
        self.sink.append(source);

        let id = buffer.id;
        let finished = Arc::clone(&self.state);
        self.sink.append(EmptyCallback::<f32>::new(Box::new(move || {
            // a stopped buffer was already removed; only natural ends are reported
            let was_live = finished
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .stops
                .remove(&id)
                .is_some();
            if was_live {
                done.notify();
            }
        })));
        Ok(())
    }

    fn stop(&self, id: BufferId) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(flag) = state.stops.remove(&id) {
            flag.store(true, Ordering::Relaxed);
        }
        if state.stops.is_empty() {
            state.queued_until = Duration::ZERO;
        }
    }
}
