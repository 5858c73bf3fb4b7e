//! Outbound audio: capture provider seam, block encoder, and the drop-oldest send queue.
//!
//! The capture provider delivers raw callback chunks of any length. The encoder re-blocks
//! them into fixed `block_size` blocks, quantizes each block to PCM16 and hands it to the
//! [`FrameQueue`] immediately, one frame per block. When the network send path falls behind,
//! the queue drops the oldest frame rather than stalling the microphone.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tokio::sync::{mpsc, Notify};
use tracing::{debug, warn};

use crate::error::LiveResult;
use crate::frame::AudioFrame;

/// Capture parameters requested from the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: crate::frame::INPUT_SAMPLE_RATE,
            channels: 1,
        }
    }
}

/// A live input track. Stopping it ends the chunk stream.
pub trait CaptureTrack: Send {
    fn stop(&mut self);
}

/// A granted capture: the chunk receiver plus the track that controls it.
pub struct CaptureStream {
    pub chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    pub track: Box<dyn CaptureTrack>,
}

/// Environment API that yields a live audio stream on permission grant.
pub trait MediaCapture: Send + Sync {
    /// Request access. Refusal or a missing device is `LiveError::MediaAccessDenied`.
    fn open(&self, config: CaptureConfig) -> LiveResult<CaptureStream>;
}

/// Re-blocks captured chunks into fixed-size PCM16 frames. Not restartable: once the
/// capture stream ends, `next_frame` keeps returning `None`.
pub struct AudioCaptureEncoder {
    chunks: mpsc::UnboundedReceiver<Vec<f32>>,
    pending: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
    finished: bool,
}

impl AudioCaptureEncoder {
    pub fn new(chunks: mpsc::UnboundedReceiver<Vec<f32>>, block_size: usize, sample_rate: u32) -> Self {
        let block_size = block_size.max(1);
        Self {
            chunks,
            pending: Vec::with_capacity(block_size * 2),
            block_size,
            sample_rate,
            finished: false,
        }
    }

    /// Next full block as an outbound frame, or `None` once capture has stopped.
    /// A partial trailing block is discarded.
    pub async fn next_frame(&mut self) -> Option<AudioFrame> {
        while !self.finished {
            if self.pending.len() >= self.block_size {
                let block: Vec<f32> = self.pending.drain(..self.block_size).collect();
                return Some(AudioFrame::encode(&block, self.sample_rate));
            }
            match self.chunks.recv().await {
                Some(chunk) => self.pending.extend_from_slice(&chunk),
                None => {
                    self.finished = true;
                    self.pending.clear();
                }
            }
        }
        None
    }

    /// Push every block into `queue` until capture stops; returns frames produced.
    pub async fn run(mut self, queue: &FrameQueue) -> u64 {
        let mut produced = 0u64;
        while let Some(frame) = self.next_frame().await {
            produced += 1;
            queue.push(frame);
        }
        debug!(produced, dropped = queue.dropped(), "capture encoder finished");
        produced
    }
}

/// Bounded frame queue between the encoder and the send path. Overflow drops the oldest.
pub struct FrameQueue {
    frames: Mutex<VecDeque<AudioFrame>>,
    capacity: usize,
    closed: Mutex<bool>,
    notify: Notify,
    dropped: AtomicU64,
}

impl FrameQueue {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            closed: Mutex::new(false),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
        }
    }

    /// Enqueue a frame. Returns `false` when the queue is closed.
    pub fn push(&self, frame: AudioFrame) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut frames = self.frames.lock().unwrap_or_else(|e| e.into_inner());
            if frames.len() >= self.capacity {
                frames.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(dropped, capacity = self.capacity, "send path saturated; dropped oldest audio frame");
            }
            frames.push_back(frame);
        }
        self.notify.notify_one();
        true
    }

    /// Wait for the next frame. `None` once closed and drained.
    pub async fn pop(&self) -> Option<AudioFrame> {
        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self
                .frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
            {
                return Some(frame);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Close the queue and discard anything still buffered.
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
        self.frames
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::INPUT_SAMPLE_RATE;

    #[tokio::test]
    async fn test_encoder_reblocks_uneven_chunks() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut encoder = AudioCaptureEncoder::new(rx, 4, INPUT_SAMPLE_RATE);

        tx.send(vec![0.5; 3]).unwrap();
        tx.send(vec![0.5; 3]).unwrap();
        tx.send(vec![-0.5; 2]).unwrap();
        tx.send(vec![0.0; 1]).unwrap();
        drop(tx);

        let first = encoder.next_frame().await.unwrap();
        assert_eq!(first.sample_count(), 4);
        assert!(first.samples_i16().all(|s| s == 16384));

        let second = encoder.next_frame().await.unwrap();
        assert_eq!(
            second.samples_i16().collect::<Vec<_>>(),
            vec![16384, 16384, -16384, -16384]
        );

        // one leftover sample is not a full block
        assert!(encoder.next_frame().await.is_none());
        assert!(encoder.next_frame().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_drops_oldest_when_full() {
        let queue = FrameQueue::new(2);
        for v in [0.1f32, 0.2, 0.3] {
            queue.push(AudioFrame::encode(&[v], INPUT_SAMPLE_RATE));
        }
        assert_eq!(queue.dropped(), 1);
        assert_eq!(queue.len(), 2);

        let next = queue.pop().await.unwrap();
        assert_eq!(next, AudioFrame::encode(&[0.2], INPUT_SAMPLE_RATE));
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = std::sync::Arc::new(FrameQueue::new(4));
        let waiter = {
            let queue = std::sync::Arc::clone(&queue);
            tokio::spawn(async move { queue.pop().await })
        };
        tokio::task::yield_now().await;
        queue.close();
        assert!(waiter.await.unwrap().is_none());
        assert!(!queue.push(AudioFrame::encode(&[0.0], INPUT_SAMPLE_RATE)));
    }

    #[tokio::test]
    async fn test_run_pushes_one_frame_per_block() {
        let (tx, rx) = mpsc::unbounded_channel();
        let encoder = AudioCaptureEncoder::new(rx, 2, INPUT_SAMPLE_RATE);
        let queue = FrameQueue::new(16);
        tx.send(vec![0.0; 7]).unwrap();
        drop(tx);
        assert_eq!(encoder.run(&queue).await, 3);
        assert_eq!(queue.len(), 3);
    }
}
