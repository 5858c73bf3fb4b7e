//! Gapless playback of inbound model audio.
//!
//! Every inbound frame becomes one [`PlaybackBuffer`] scheduled at
//! `start = max(next_start, clock.now())`, after which the cursor moves to `start + duration`.
//! Buffers therefore play in arrival order, back to back when frames arrive early enough and
//! never overlapping when they arrive in a burst.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::LiveResult;
use crate::frame::{samples_duration, AudioFrame};

pub type BufferId = u64;

/// Decoded audio plus its slot on the playback timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    pub id: BufferId,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub duration: Duration,
    /// Offset on the playback clock at which this buffer begins.
    pub scheduled_start: Duration,
}

impl PlaybackBuffer {
    pub fn scheduled_end(&self) -> Duration {
        self.scheduled_start + self.duration
    }
}

/// Time base of the output device, as an offset from stream start.
pub trait PlaybackClock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Clock anchored at construction. Follows tokio time, so paused-clock tests see exact values.
#[derive(Debug, Clone)]
pub struct StreamClock {
    origin: Instant,
}

impl StreamClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for StreamClock {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackClock for StreamClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Completion token handed to the sink with each buffer. Call `notify` when the buffer
/// finishes playing on its own.
#[derive(Debug, Clone)]
pub struct PlaybackDone {
    id: BufferId,
    tx: mpsc::UnboundedSender<BufferId>,
}

impl PlaybackDone {
    pub fn id(&self) -> BufferId {
        self.id
    }

    pub fn notify(&self) {
        // receiver gone means the session is already torn down
        let _ = self.tx.send(self.id);
    }
}

/// Output device seam.
pub trait PlaybackSink: Send + Sync {
    /// Begin `buffer` at its scheduled start.
    fn start(&self, buffer: &PlaybackBuffer, done: PlaybackDone) -> LiveResult<()>;
    /// Stop a buffer immediately, whether or not it has started.
    fn stop(&self, id: BufferId);
}

pub struct PlaybackScheduler {
    sink: Arc<dyn PlaybackSink>,
    clock: Arc<dyn PlaybackClock>,
    next_start: Duration,
    next_id: BufferId,
    active: BTreeSet<BufferId>,
    done_tx: mpsc::UnboundedSender<BufferId>,
}

impl PlaybackScheduler {
    /// Returns the scheduler and the receiver on which natural completions arrive.
    pub fn new(
        sink: Arc<dyn PlaybackSink>,
        clock: Arc<dyn PlaybackClock>,
    ) -> (Self, mpsc::UnboundedReceiver<BufferId>) {
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            sink,
            clock,
            next_start: Duration::ZERO,
            next_id: 1,
            active: BTreeSet::new(),
            done_tx,
        };
        (scheduler, done_rx)
    }

    /// Decode `frame` and schedule it directly after everything already scheduled.
    pub fn enqueue(&mut self, frame: &AudioFrame) -> LiveResult<PlaybackBuffer> {
        let samples = frame.to_f32();
        let duration = samples_duration(samples.len(), frame.sample_rate());
        let start = self.next_start.max(self.clock.now());

        let buffer = PlaybackBuffer {
            id: self.next_id,
            samples,
            sample_rate: frame.sample_rate(),
            duration,
            scheduled_start: start,
        };
        let done = PlaybackDone {
            id: buffer.id,
            tx: self.done_tx.clone(),
        };
        self.sink.start(&buffer, done)?;

        self.next_id += 1;
        self.next_start = buffer.scheduled_end();
        self.active.insert(buffer.id);
        debug!(
            id = buffer.id,
            start_ms = start.as_millis() as u64,
            duration_ms = duration.as_millis() as u64,
            active = self.active.len(),
            "scheduled playback buffer"
        );
        Ok(buffer)
    }

    /// Record a natural completion. Returns `true` when this emptied the active set.
    pub fn complete(&mut self, id: BufferId) -> bool {
        self.active.remove(&id) && self.active.is_empty()
    }

    /// Force-stop every scheduled buffer and clear the set. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let stopped = self.active.len();
        for id in std::mem::take(&mut self.active) {
            self.sink.stop(id);
        }
        if stopped > 0 {
            warn!(stopped, "stopped scheduled playback");
        }
        stopped
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    pub fn is_playing(&self) -> bool {
        !self.active.is_empty()
    }

    /// Start offset the next buffer would get if it arrived now.
    pub fn next_start(&self) -> Duration {
        self.next_start.max(self.clock.now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LiveError;
    use crate::frame::{Direction, OUTPUT_SAMPLE_RATE};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ManualClock(Mutex<Duration>);

    impl ManualClock {
        fn set(&self, t: Duration) {
            *self.0.lock().unwrap() = t;
        }
    }

    impl PlaybackClock for ManualClock {
        fn now(&self) -> Duration {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        started: Mutex<Vec<(BufferId, Duration)>>,
        stopped: Mutex<Vec<BufferId>>,
        refuse: bool,
    }

    impl PlaybackSink for RecordingSink {
        fn start(&self, buffer: &PlaybackBuffer, _done: PlaybackDone) -> LiveResult<()> {
            if self.refuse {
                return Err(LiveError::Playback("device gone".to_string()));
            }
            self.started
                .lock()
                .unwrap()
                .push((buffer.id, buffer.scheduled_start));
            Ok(())
        }

        fn stop(&self, id: BufferId) {
            self.stopped.lock().unwrap().push(id);
        }
    }

    fn inbound_ms(ms: usize) -> AudioFrame {
        let samples = OUTPUT_SAMPLE_RATE as usize * ms / 1000;
        AudioFrame::from_pcm(vec![0; samples * 2], OUTPUT_SAMPLE_RATE, Direction::Inbound).unwrap()
    }

    fn scheduler() -> (PlaybackScheduler, Arc<RecordingSink>, Arc<ManualClock>) {
        let sink = Arc::new(RecordingSink::default());
        let clock = Arc::new(ManualClock::default());
        let (s, _rx) = PlaybackScheduler::new(sink.clone(), clock.clone());
        (s, sink, clock)
    }

    #[test]
    fn test_back_to_back_buffers_are_gapless() {
        let (mut s, _sink, _clock) = scheduler();
        let first = s.enqueue(&inbound_ms(200)).unwrap();
        let second = s.enqueue(&inbound_ms(150)).unwrap();

        assert_eq!(first.scheduled_start, Duration::ZERO);
        assert_eq!(second.scheduled_start, Duration::from_millis(200));
        assert_eq!(second.scheduled_end(), Duration::from_millis(350));
    }

    #[test]
    fn test_late_frame_starts_at_clock() {
        let (mut s, _sink, clock) = scheduler();
        s.enqueue(&inbound_ms(100)).unwrap();
        clock.set(Duration::from_millis(500));
        let late = s.enqueue(&inbound_ms(100)).unwrap();
        assert_eq!(late.scheduled_start, Duration::from_millis(500));
    }

    #[test]
    fn test_burst_never_overlaps() {
        let (mut s, sink, clock) = scheduler();
        clock.set(Duration::from_millis(40));
        for ms in [60, 20, 100, 80] {
            s.enqueue(&inbound_ms(ms)).unwrap();
        }
        let starts: Vec<Duration> = sink.started.lock().unwrap().iter().map(|(_, t)| *t).collect();
        assert_eq!(
            starts,
            vec![
                Duration::from_millis(40),
                Duration::from_millis(100),
                Duration::from_millis(120),
                Duration::from_millis(220),
            ]
        );
    }

    #[test]
    fn test_completion_and_teardown() {
        let (mut s, sink, _clock) = scheduler();
        let a = s.enqueue(&inbound_ms(10)).unwrap();
        let b = s.enqueue(&inbound_ms(10)).unwrap();
        s.enqueue(&inbound_ms(10)).unwrap();

        assert!(!s.complete(a.id));
        // a second completion for the same buffer changes nothing
        assert!(!s.complete(a.id));
        assert_eq!(s.active_count(), 2);

        assert_eq!(s.stop_all(), 2);
        assert_eq!(s.active_count(), 0);
        assert!(sink.stopped.lock().unwrap().contains(&b.id));
        assert_eq!(s.stop_all(), 0);
    }

    #[test]
    fn test_last_completion_reports_empty() {
        let (mut s, _sink, _clock) = scheduler();
        let only = s.enqueue(&inbound_ms(10)).unwrap();
        assert!(s.is_playing());
        assert!(s.complete(only.id));
        assert!(!s.is_playing());
    }

    #[test]
    fn test_sink_failure_leaves_cursor_untouched() {
        let sink = Arc::new(RecordingSink {
            refuse: true,
            ..RecordingSink::default()
        });
        let (mut s, _rx) = PlaybackScheduler::new(sink, Arc::new(ManualClock::default()));
        assert!(s.enqueue(&inbound_ms(100)).is_err());
        assert_eq!(s.active_count(), 0);
        assert_eq!(s.next_start(), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_done_token_reaches_receiver() {
        let sink = Arc::new(RecordingSink::default());
        let (s, mut rx) = PlaybackScheduler::new(sink, Arc::new(ManualClock::default()));
        let done = PlaybackDone {
            id: 7,
            tx: s.done_tx.clone(),
        };
        assert_eq!(done.id(), 7);
        done.notify();
        assert_eq!(rx.recv().await, Some(7));
    }
}
