//! growthlab-live: a duplex voice session with the live model endpoint.
//!
//! Microphone chunks are re-blocked and quantized to PCM16 frames and streamed out while the
//! session is open; model audio coming back is decoded and scheduled for gapless playback.
//!
//! ```text
//!  MediaCapture ─► AudioCaptureEncoder ─► FrameQueue ─► LiveLink ══► endpoint
//!                                                                      ║
//!  PlaybackSink ◄── PlaybackScheduler ◄── DuplexSessionClient ◄── LinkEvent
//! ```
//!
//! Device adapters (`CpalCapture`, `RodioSink`) and the WebSocket transport
//! (`GeminiLiveConnector`) are the production implementations of the seams; tests substitute
//! their own.

mod capture;
mod device;
mod error;
mod frame;
mod message;
mod playback;
mod session;
mod transport;

pub use capture::{
    AudioCaptureEncoder, CaptureConfig, CaptureStream, CaptureTrack, FrameQueue, MediaCapture,
};
pub use device::{CpalCapture, RodioSink};
pub use error::{LiveError, LiveResult};
pub use frame::{
    quantize, samples_duration, AudioFrame, Direction, INPUT_SAMPLE_RATE, OUTPUT_SAMPLE_RATE,
};
pub use message::{
    parse_server_message, realtime_audio_message, setup_message, InboundMessage, SessionEventKind,
};
pub use playback::{
    BufferId, PlaybackBuffer, PlaybackClock, PlaybackDone, PlaybackScheduler, PlaybackSink,
    StreamClock,
};
pub use session::{
    DuplexSessionClient, LinkEvent, LiveConnector, LiveLink, SessionState, SessionStatus,
};
pub use transport::{GeminiLiveConnector, WebSocketLink};
