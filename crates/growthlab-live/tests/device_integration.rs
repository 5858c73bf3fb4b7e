//! Device and network tests.
//!
//! Note: these need a microphone, speakers, or a live API key and are ignored by default.

use growthlab_core::{GeminiSettings, LiveSettings};
use growthlab_live::{
    AudioCaptureEncoder, AudioFrame, CaptureConfig, CpalCapture, DuplexSessionClient,
    GeminiLiveConnector, MediaCapture, PlaybackScheduler, RodioSink, SessionStatus, StreamClock,
    INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test]
#[ignore] // Requires audio hardware
async fn test_microphone_produces_blocks() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let mut capture = CpalCapture::new()
        .open(CaptureConfig::default())
        .expect("Failed to open microphone");
    let mut encoder = AudioCaptureEncoder::new(capture.chunks, 4096, INPUT_SAMPLE_RATE);

    let frame = timeout(Duration::from_secs(3), encoder.next_frame())
        .await
        .expect("No block within 3s")
        .expect("Capture ended early");
    assert_eq!(frame.sample_count(), 4096);

    capture.track.stop();
    let ended = timeout(Duration::from_secs(2), async {
        while encoder.next_frame().await.is_some() {}
    })
    .await;
    assert!(ended.is_ok(), "encoder kept running after the track stopped");
}

#[tokio::test]
#[ignore] // Requires audio hardware
async fn test_tone_plays_and_completes() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let clock = Arc::new(StreamClock::new());
    let sink = Arc::new(RodioSink::open(clock.clone()).expect("Failed to open output"));
    let (mut scheduler, mut done) = PlaybackScheduler::new(sink, clock);

    // 250ms of a 440Hz tone
    let tone: Vec<f32> = (0..OUTPUT_SAMPLE_RATE / 4)
        .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / OUTPUT_SAMPLE_RATE as f32).sin() * 0.2)
        .collect();
    let frame = AudioFrame::encode(&tone, OUTPUT_SAMPLE_RATE);

    let buffer = scheduler.enqueue(&frame).expect("Failed to schedule tone");
    let id = timeout(Duration::from_secs(2), done.recv())
        .await
        .expect("Tone never completed")
        .expect("completion channel closed");
    assert_eq!(id, buffer.id);
    assert!(scheduler.complete(id));
}

#[tokio::test]
#[ignore] // Requires GEMINI_API_KEY, a microphone, and speakers
async fn test_live_session_opens() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();

    let settings = GeminiSettings::default();
    let connector = GeminiLiveConnector::from_env(&settings).expect("API key not set");
    let clock = Arc::new(StreamClock::new());
    let sink = Arc::new(RodioSink::open(clock.clone()).expect("Failed to open output"));
    let client = DuplexSessionClient::new(
        Arc::new(connector),
        Arc::new(CpalCapture::new()),
        sink,
        clock,
        LiveSettings::default(),
    );

    client.start().await.expect("Failed to start session");
    let mut status = client.subscribe();
    let opened = timeout(Duration::from_secs(10), async {
        while *status.borrow_and_update() != SessionStatus::Listening {
            if status.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    assert!(opened.is_ok(), "session never opened");

    client.stop().await;
    assert_eq!(client.status(), SessionStatus::Disconnected);
}
