//! # tonestream-core
//!
//! Double-buffered test-tone streamer.
//!
//! ## Architecture
//!
//! ```text
//!                     filled queue (slot k, generation g)
//! WaveformGenerator ─────────────────────────────────► Transmitter ──► AudioSink
//!   (generator thread)                                 (transmitter thread)
//!         ▲                                                  │
//!         │     free queue (slot k, after send(k) returns)   │
//!         └──────────────────────────────────────────────────┤
//!         └───────────── HandoffSignal (one permit) ◄────────┘
//! ```
//!
//! Two sample blocks ping-pong between the workers. A block moves by value,
//! so whichever thread holds it is its only writer or reader. Generating one
//! block must finish within one block's playback time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod audio;
pub mod buffering;
pub mod engine;
pub mod error;
pub mod events;
pub mod handoff;
pub mod synth;

// Convenience re-exports for downstream crates
pub use audio::{
    create_ring_sink, AudioSink, BitDepth, ChannelLayout, RingDrain, RingSink, SinkFormat, WavSink,
};
pub use buffering::{BufferSet, SampleBlock};
pub use engine::{
    pipeline::{DiagnosticsSnapshot, StreamDiagnostics},
    EngineConfig, ToneEngine,
};
pub use error::{SinkError, StreamFault, ToneError};
pub use events::{EngineStatus, EngineStatusEvent, StreamEvent, StreamEventKind};
pub use handoff::HandoffSignal;
pub use synth::{OscillatorState, OutputWaveform, WaveformGenerator};

#[cfg(feature = "audio-cpal")]
pub use audio::DeviceOutput;
