//! Playback stage (device output stream).
//!
//! [`DeviceSink`] owns the output stream and the ring buffer feeding it. The
//! realtime callback:
//! - zeroes the output buffer (silence on underrun)
//! - drains the ring without blocking
//! - advances the playback position counter
//! - flips the sink to `AtEnd` once the ring drains after the source ran out
//!
//! The callback never allocates, never locks and never calls back into the
//! decoder.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use cpal::traits::{DeviceTrait, StreamTrait};

use crate::errors::{Error, Result};
use crate::ringbuf::RingBuffer;
use crate::source::{AudioSourceInfo, SampleFormat};

/// Ring capacity exponent: 2^16 frames.
const RING_POWER: u32 = 16;

/// Playback state of a sink.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum SinkState {
    /// Paused, or not yet started.
    Stopped = 0,
    /// The device is pulling from the ring.
    Playing = 1,
    /// The ring drained after the source ran out; playback is over.
    AtEnd = 2,
}

impl SinkState {
    fn from_u8(raw: u8) -> SinkState {
        match raw {
            0 => SinkState::Stopped,
            1 => SinkState::Playing,
            2 => SinkState::AtEnd,
            _ => unreachable!("corrupt sink state"),
        }
    }
}

/// An output sink fed decoded bytes by the audio pipe.
pub trait AudioSink {
    /// Unpauses the device. No-op unless currently [`SinkState::Stopped`].
    fn start(&mut self);

    /// Pauses the device. No-op if already [`SinkState::Stopped`].
    fn stop(&mut self);

    fn state(&self) -> SinkState;

    /// Records that the decoder has nothing more to give; once the ring
    /// drains, the callback will flip the sink to [`SinkState::AtEnd`].
    fn source_out(&mut self);

    /// Current playback position in frames.
    fn position(&self) -> u64;

    /// Rewrites the playback position after a seek. Clears the end-of-stream
    /// condition and drops any stale frames still queued in the ring.
    fn set_position(&mut self, frames: u64);

    /// Offers decoded bytes (a whole number of frames) to the ring. Returns
    /// the number of bytes accepted, always a whole number of frames.
    fn transfer(&mut self, bytes: &[u8]) -> usize;
}

/// State shared between the update thread and the device callback.
///
/// These three atomics plus the ring buffer are the entire concurrency
/// surface; everything else on the sink is touched only by the update thread.
struct SinkShared {
    state: AtomicU8,
    source_out: AtomicBool,
    position_frames: AtomicU64,
}

impl SinkShared {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(SinkState::Stopped as u8),
            source_out: AtomicBool::new(false),
            position_frames: AtomicU64::new(0),
        }
    }

    fn state(&self) -> SinkState {
        SinkState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: SinkState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

/// Sink backed by a cpal output device.
pub struct DeviceSink {
    // Declared before `ring` so the stream (and with it the callback) is
    // torn down before the ring it reads from.
    stream: cpal::Stream,
    ring: Arc<RingBuffer>,
    shared: Arc<SinkShared>,
    bytes_per_frame: usize,
}

impl DeviceSink {
    /// Opens `device` for `info`'s rate, channel count and sample format.
    ///
    /// The device starts paused; call [`AudioSink::start`] to make sound.
    pub fn open(info: &AudioSourceInfo, device: &cpal::Device) -> Result<Self> {
        let bytes_per_frame = info.bytes_per_frame();
        let ring = Arc::new(RingBuffer::new(RING_POWER, bytes_per_frame));
        let shared = Arc::new(SinkShared::new());

        let sample_format = cpal_sample_format(info.format);
        let rate = cpal::SampleRate(info.sample_rate);
        let supported = device
            .supported_output_configs()
            .map_err(|e| Error::Config(format!("couldn't query output configs: {e}")))?
            .filter(|range| {
                range.channels() == info.channel_count as u16
                    && range.sample_format() == sample_format
            })
            .find(|range| range.min_sample_rate() <= rate && rate <= range.max_sample_rate())
            .ok_or_else(|| {
                Error::Config(format!(
                    "no output config for {}ch {} Hz {:?}",
                    info.channel_count, info.sample_rate, info.format
                ))
            })?;
        let config = supported.with_sample_rate(rate).config();

        let stream = match sample_format {
            cpal::SampleFormat::U8 => build_stream::<u8>(device, &config, &ring, &shared, bytes_per_frame),
            cpal::SampleFormat::I8 => build_stream::<i8>(device, &config, &ring, &shared, bytes_per_frame),
            cpal::SampleFormat::I16 => build_stream::<i16>(device, &config, &ring, &shared, bytes_per_frame),
            cpal::SampleFormat::I32 => build_stream::<i32>(device, &config, &ring, &shared, bytes_per_frame),
            cpal::SampleFormat::F32 => build_stream::<f32>(device, &config, &ring, &shared, bytes_per_frame),
            other => unreachable!("unmapped sample format {other:?}"),
        }?;

        // Some hosts hand back a running stream.
        let _ = stream.pause();

        Ok(Self {
            stream,
            ring,
            shared,
            bytes_per_frame,
        })
    }
}

impl AudioSink for DeviceSink {
    fn start(&mut self) {
        if self.shared.state() != SinkState::Stopped {
            return;
        }
        if let Err(e) = self.stream.play() {
            tracing::warn!("couldn't start stream: {e}");
            return;
        }
        self.shared.set_state(SinkState::Playing);
    }

    fn stop(&mut self) {
        if self.shared.state() == SinkState::Stopped {
            return;
        }
        if let Err(e) = self.stream.pause() {
            tracing::warn!("couldn't pause stream: {e}");
        }
        self.shared.set_state(SinkState::Stopped);
    }

    fn state(&self) -> SinkState {
        self.shared.state()
    }

    fn source_out(&mut self) {
        // The sink can only have reached the end if the source ran out
        // first.
        assert!(
            self.shared.source_out.load(Ordering::Acquire)
                || self.shared.state() != SinkState::AtEnd,
            "sink hit end of stream before the source ran out"
        );
        self.shared.source_out.store(true, Ordering::Release);
    }

    fn position(&self) -> u64 {
        self.shared.position_frames.load(Ordering::Relaxed)
    }

    fn set_position(&mut self, frames: u64) {
        // Leaving AtEnd goes through a stop so the device is paused (and
        // the callback quiesced) before the ring is flushed.
        if self.shared.state() == SinkState::AtEnd {
            self.stop();
        }
        self.shared.position_frames.store(frames, Ordering::Relaxed);
        self.shared.source_out.store(false, Ordering::Release);
        self.ring.flush();
    }

    fn transfer(&mut self, bytes: &[u8]) -> usize {
        if bytes.is_empty() {
            return 0;
        }
        assert!(
            bytes.len() % self.bytes_per_frame == 0,
            "transfer of partial frames"
        );
        self.ring.write(bytes) * self.bytes_per_frame
    }
}

impl Drop for DeviceSink {
    fn drop(&mut self) {
        // Quiesce the callback before the stream handle goes away.
        let _ = self.stream.pause();
    }
}

/// Maps a source sample format onto the cpal equivalent.
fn cpal_sample_format(format: SampleFormat) -> cpal::SampleFormat {
    match format {
        SampleFormat::U8 => cpal::SampleFormat::U8,
        SampleFormat::S8 => cpal::SampleFormat::I8,
        SampleFormat::S16 => cpal::SampleFormat::I16,
        SampleFormat::S32 => cpal::SampleFormat::I32,
        SampleFormat::F32 => cpal::SampleFormat::F32,
    }
}

/// Type-specialised stream builder.
///
/// The source decodes into the same packed layout the device consumes, so
/// the callback views the typed output buffer as raw bytes and copies frames
/// straight out of the ring.
fn build_stream<T: cpal::SizedSample>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    ring: &Arc<RingBuffer>,
    shared: &Arc<SinkShared>,
    bytes_per_frame: usize,
) -> Result<cpal::Stream> {
    let ring = ring.clone();
    let shared = shared.clone();

    let err_fn = |err| tracing::warn!("stream error: {err}");

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [T], _| {
                // SAFETY: T is one of the packed little primitive sample
                // types, so its buffer is plain bytes with no padding or
                // invalid bit patterns.
                let out = unsafe {
                    std::slice::from_raw_parts_mut(
                        data.as_mut_ptr().cast::<u8>(),
                        std::mem::size_of_val(data),
                    )
                };
                render(out, &ring, &shared, bytes_per_frame);
            },
            err_fn,
            None,
        )
        .map_err(|e| Error::Config(format!("couldn't open stream: {e}")))?;

    Ok(stream)
}

/// Realtime callback body, shared by every sample type.
fn render(out: &mut [u8], ring: &RingBuffer, shared: &SinkShared, bytes_per_frame: usize) {
    // Anything not filled with sound below stays silent.
    out.fill(0);

    if shared.state() != SinkState::Playing {
        return;
    }

    // The decoder may be adding frames concurrently, but it can only grow
    // this count, so reading `avail` frames below cannot underflow.
    let avail = ring.read_capacity();

    if avail == 0 {
        // Temporary underrun, or has the source genuinely played out?
        if shared.source_out.load(Ordering::Acquire) {
            shared.set_state(SinkState::AtEnd);
        }
        return;
    }

    let want = (out.len() / bytes_per_frame).min(avail);
    let read = ring.read(&mut out[..want * bytes_per_frame]);
    shared
        .position_frames
        .fetch_add(read as u64, Ordering::Relaxed);
}
