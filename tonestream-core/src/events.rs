//! Event types broadcast by [`ToneEngine`](crate::ToneEngine).
//!
//! | Event | Subscribe with |
//! |-------|----------------|
//! | `StreamEvent` | `ToneEngine::subscribe_events` |
//! | `EngineStatusEvent` | `ToneEngine::subscribe_status` |
//!
//! Both are `Serialize` so a host can forward them as JSON unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stream events
// ---------------------------------------------------------------------------

/// One observable step of the ping-pong cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamEvent {
    /// Monotonically increasing sequence number shared by both workers.
    pub seq: u64,
    pub kind: StreamEventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum StreamEventKind {
    /// The generator finished writing a slot.
    BlockFilled {
        index: u8,
        generation: u64,
        /// Time spent synthesizing the block, in microseconds.
        #[serde(rename = "elapsedUs")]
        elapsed_us: u64,
    },
    /// The transmitter handed a slot to the sink.
    BlockSent {
        index: u8,
        generation: u64,
        requested: usize,
        written: usize,
    },
    /// No prepared block was ready; silence went out instead.
    SilenceSent { requested: usize, written: usize },
    /// A recoverable fault, already counted in the diagnostics.
    Fault { message: String },
}

// ---------------------------------------------------------------------------
// Engine status events
// ---------------------------------------------------------------------------

/// Emitted when the engine state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatusEvent {
    pub status: EngineStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineStatus {
    /// Created, never started.
    Idle,
    /// Generating the two initial blocks.
    Priming,
    /// Both workers running.
    Streaming,
    /// Stopped by the caller.
    Stopped,
    /// Failed to start.
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_event_serializes_with_tagged_kind() {
        let ev = StreamEvent {
            seq: 3,
            kind: StreamEventKind::BlockSent {
                index: 1,
                generation: 7,
                requested: 3840,
                written: 3840,
            },
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["seq"], 3);
        assert_eq!(json["kind"]["type"], "blockSent");
        assert_eq!(json["kind"]["generation"], 7);

        let back: StreamEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, ev);
    }

    #[test]
    fn status_serializes_camel_case() {
        let ev = EngineStatusEvent {
            status: EngineStatus::Streaming,
            detail: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert_eq!(json, r#"{"status":"streaming","detail":null}"#);
    }
}
