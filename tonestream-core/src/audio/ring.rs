//! Bounded software transfer queue in front of a playback clock.
//!
//! `RingSink` plays the part of an I2S driver's DMA descriptor chain: `send`
//! copies whole frames into a lock-free SPSC ring (`ringbuf::HeapRb<i32>`) and
//! waits for room up to the caller's deadline. The matching [`RingDrain`] is
//! pulled by whatever owns the output clock: a cpal callback, or a test.

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use tracing::trace;

use super::{decode_containers_into, AudioSink, SinkFormat, CHANNELS};
use crate::error::SinkError;

/// How long `send` sleeps between attempts when the queue is full.
const RETRY_INTERVAL: Duration = Duration::from_micros(500);

/// Producer half, owned by the transmitter.
pub struct RingSink {
    producer: HeapProd<i32>,
    format: SinkFormat,
    scratch: Vec<i32>,
}

/// Consumer half, owned by the playback clock.
pub struct RingDrain {
    consumer: HeapCons<i32>,
    format: SinkFormat,
    underrun_samples: Arc<AtomicUsize>,
}

/// Create a matched sink/drain pair with room for `queue_frames` frames.
pub fn create_ring_sink(format: SinkFormat, queue_frames: usize) -> (RingSink, RingDrain) {
    let (producer, consumer) = HeapRb::<i32>::new(queue_frames.max(1) * CHANNELS).split();
    (
        RingSink {
            producer,
            format,
            scratch: Vec::new(),
        },
        RingDrain {
            consumer,
            format,
            underrun_samples: Arc::new(AtomicUsize::new(0)),
        },
    )
}

impl RingSink {
    /// Frames currently queued and not yet played.
    pub fn queued_frames(&self) -> usize {
        self.producer.occupied_len() / CHANNELS
    }

    /// Frames that can be queued without waiting.
    pub fn free_frames(&self) -> usize {
        self.producer.vacant_len() / CHANNELS
    }
}

impl AudioSink for RingSink {
    fn format(&self) -> SinkFormat {
        self.format
    }

    fn send(&mut self, bytes: &[u8], timeout: Duration) -> Result<usize, SinkError> {
        decode_containers_into(bytes, &mut self.scratch)?;
        let total = self.scratch.len();
        if total == 0 {
            return Ok(0);
        }

        let deadline = Instant::now() + timeout;
        let mut pushed = 0usize;
        loop {
            // Only whole frames go in so the drain never sees a torn frame.
            let room = self.producer.vacant_len() / CHANNELS * CHANNELS;
            let take = room.min(total - pushed);
            if take > 0 {
                pushed += self.producer.push_slice(&self.scratch[pushed..pushed + take]);
            }
            if pushed == total || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(RETRY_INTERVAL);
        }

        trace!(pushed, total, "ring sink send");
        if pushed == 0 {
            return Err(SinkError::Timeout(timeout));
        }
        Ok(pushed * super::BYTES_PER_SAMPLE)
    }
}

impl RingDrain {
    pub fn format(&self) -> SinkFormat {
        self.format
    }

    /// Fill `out` with interleaved containers, padding with silence when the
    /// queue runs dry. Returns the number of samples that came from the queue.
    pub fn pull(&mut self, out: &mut [i32]) -> usize {
        let got = self.consumer.pop_slice(out);
        if got < out.len() {
            out[got..].fill(0);
            self.underrun_samples
                .fetch_add(out.len() - got, Ordering::Relaxed);
        }
        got
    }

    /// Frames available to play.
    pub fn queued_frames(&self) -> usize {
        self.consumer.occupied_len() / CHANNELS
    }

    /// Total samples padded with silence since creation.
    pub fn underrun_samples(&self) -> usize {
        self.underrun_samples.load(Ordering::Relaxed)
    }

    /// Shared handle to the underrun counter, for reading after the drain has
    /// moved into an output callback.
    pub fn underrun_counter(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.underrun_samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{BitDepth, ChannelLayout, BYTES_PER_FRAME};

    fn format() -> SinkFormat {
        SinkFormat {
            sample_rate: 48_000,
            bits_per_sample: BitDepth::Bits16,
            layout: ChannelLayout::RightLeft,
        }
    }

    fn frames_as_bytes(frames: usize, value: i32) -> Vec<u8> {
        (0..frames * CHANNELS)
            .flat_map(|_| value.to_le_bytes())
            .collect()
    }

    #[test]
    fn send_accepts_everything_when_room() {
        let (mut sink, mut drain) = create_ring_sink(format(), 16);
        let bytes = frames_as_bytes(8, 7 << 16);

        let written = sink.send(&bytes, Duration::from_millis(10)).unwrap();
        assert_eq!(written, bytes.len());
        assert_eq!(sink.queued_frames(), 8);

        let mut out = vec![0i32; 16];
        assert_eq!(drain.pull(&mut out), 16);
        assert!(out.iter().all(|&s| s == 7 << 16));
        assert_eq!(drain.underrun_samples(), 0);
    }

    #[test]
    fn send_reports_short_transfer_at_deadline() {
        let (mut sink, _drain) = create_ring_sink(format(), 4);
        let bytes = frames_as_bytes(10, 1);

        let written = sink.send(&bytes, Duration::from_millis(5)).unwrap();
        assert_eq!(written, 4 * BYTES_PER_FRAME);
        assert_eq!(sink.free_frames(), 0);
    }

    #[test]
    fn send_times_out_when_queue_stays_full() {
        let (mut sink, _drain) = create_ring_sink(format(), 2);
        sink.send(&frames_as_bytes(2, 1), Duration::from_millis(5))
            .unwrap();

        let start = Instant::now();
        let err = sink
            .send(&frames_as_bytes(1, 1), Duration::from_millis(20))
            .unwrap_err();
        assert!(matches!(err, SinkError::Timeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn send_completes_once_drain_makes_room() {
        let (mut sink, mut drain) = create_ring_sink(format(), 4);
        sink.send(&frames_as_bytes(4, 1), Duration::from_millis(5))
            .unwrap();

        let puller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            let mut out = vec![0i32; 8];
            drain.pull(&mut out);
            drain
        });

        let written = sink
            .send(&frames_as_bytes(4, 2), Duration::from_secs(2))
            .unwrap();
        assert_eq!(written, 4 * BYTES_PER_FRAME);
        puller.join().expect("puller panicked");
    }

    #[test]
    fn pull_pads_with_silence_and_counts_underrun() {
        let (mut sink, mut drain) = create_ring_sink(format(), 8);
        sink.send(&frames_as_bytes(1, 9), Duration::from_millis(5))
            .unwrap();

        let mut out = vec![-1i32; 6];
        assert_eq!(drain.pull(&mut out), 2);
        assert_eq!(out, vec![9, 9, 0, 0, 0, 0]);
        assert_eq!(drain.underrun_samples(), 4);
    }

    #[test]
    fn repeated_sends_reuse_the_decode_buffer() {
        let (mut sink, mut drain) = create_ring_sink(format(), 64);
        let mut out = vec![0i32; 32 * CHANNELS];

        sink.send(&frames_as_bytes(32, 3), Duration::from_millis(5))
            .unwrap();
        let buffer = sink.scratch.as_ptr();
        let capacity = sink.scratch.capacity();

        for value in 4..20 {
            drain.pull(&mut out);
            sink.send(&frames_as_bytes(32, value), Duration::from_millis(5))
                .unwrap();
            assert_eq!(sink.scratch.as_ptr(), buffer);
            assert_eq!(sink.scratch.capacity(), capacity);
        }
        drain.pull(&mut out);
        assert!(out.iter().all(|&s| s == 19));
    }

    #[test]
    fn misaligned_bytes_are_rejected() {
        let (mut sink, _drain) = create_ring_sink(format(), 8);
        let err = sink.send(&[0u8; 12], Duration::from_millis(5)).unwrap_err();
        assert!(matches!(err, SinkError::Misaligned { len: 12 }));
    }
}
