//! Audio decode stage.
//!
//! [`AudioSource`] abstracts one loaded file: each `decode` call yields up to
//! one packet's worth of interleaved bytes, and `seek` repositions the
//! underlying stream by frame count. The concrete backend uses Symphonia to
//! probe the container and decode packets into interleaved `f32`.

use std::fs::File;
use std::path::{Path, PathBuf};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{CodecParameters, Decoder, DecoderOptions};
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use crate::errors::{Error, Result};

pub const MICROS_PER_SEC: u64 = 1_000_000;

/// Packed sample formats a source may decode into.
///
/// Samples are interleaved across channels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleFormat {
    U8,
    S8,
    S16,
    S32,
    F32,
}

impl SampleFormat {
    /// Width of one mono sample in bytes.
    pub fn width(self) -> usize {
        match self {
            SampleFormat::U8 | SampleFormat::S8 => 1,
            SampleFormat::S16 => 2,
            SampleFormat::S32 | SampleFormat::F32 => 4,
        }
    }
}

/// Immutable per-load metadata describing a source's output.
#[derive(Clone, Debug)]
pub struct AudioSourceInfo {
    pub path: PathBuf,
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    pub channel_count: u8,
    pub format: SampleFormat,
    /// Total length in frames, when the container reports one.
    pub total_frames: Option<u64>,
}

impl AudioSourceInfo {
    /// Size in bytes of one frame (one sample for every channel).
    pub fn bytes_per_frame(&self) -> usize {
        self.format.width() * self.channel_count as usize
    }
}

/// State the decoder is left in after a decode round.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DecodeState {
    /// The decoder produced nothing this round but has not run out.
    WaitingForFrame,
    /// The decoder produced bytes.
    Decoding,
    /// The decoder has run out of things to decode.
    EndOfFile,
}

/// One loaded, decodable audio file.
///
/// A "frame" here is the smallest unit of data for *all* channels; some
/// decoders call the per-channel unit a sample, so there are exactly
/// `channel_count` of their samples to one of our frames.
pub trait AudioSource {
    /// Performs one decode round.
    ///
    /// The returned buffer's length is always a whole number of frames, and
    /// may be empty if the round did not finish a packet. Once this returns
    /// [`DecodeState::EndOfFile`], further calls are harmless and keep
    /// returning `EndOfFile` with no bytes.
    fn decode(&mut self) -> (DecodeState, Vec<u8>);

    /// Repositions the stream to `frames`, returning the frame position
    /// actually set. Clears any end-of-file condition.
    fn seek(&mut self, frames: u64) -> Result<u64>;

    /// Per-load metadata, stable for the lifetime of the source.
    fn info(&self) -> &AudioSourceInfo;

    /// Converts a position in microseconds to an elapsed frame count.
    fn frames_from_micros(&self, micros: u64) -> u64 {
        // Multiply before dividing to keep integer precision.
        (micros * self.info().sample_rate as u64) / MICROS_PER_SEC
    }

    /// Converts an elapsed frame count to a position in microseconds.
    fn micros_from_frames(&self, frames: u64) -> u64 {
        (frames * MICROS_PER_SEC) / self.info().sample_rate as u64
    }
}

/// Symphonia-backed source decoding any probe-supported container/codec into
/// interleaved `f32`.
pub struct SymphoniaSource {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    info: AudioSourceInfo,
    state: DecodeState,
}

impl SymphoniaSource {
    pub fn open(path: &Path) -> Result<Self> {
        let (format, decoder, track_id, params) = open_file(path)?;

        let channels = params
            .channels
            .ok_or_else(|| Error::File(format!("{}: unknown channel layout", path.display())))?
            .count();
        let channel_count = u8::try_from(channels)
            .ok()
            .filter(|&c| c > 0)
            .ok_or_else(|| Error::File(format!("{}: unplayable channel count", path.display())))?;

        let sample_rate = params
            .sample_rate
            .filter(|&r| r > 0 && r <= i32::MAX as u32)
            .ok_or_else(|| Error::File(format!("{}: unusable sample rate", path.display())))?;

        Ok(Self {
            format,
            decoder,
            track_id,
            info: AudioSourceInfo {
                path: path.to_path_buf(),
                sample_rate,
                channel_count,
                format: SampleFormat::F32,
                total_frames: params.n_frames,
            },
            state: DecodeState::WaitingForFrame,
        })
    }
}

impl AudioSource for SymphoniaSource {
    fn decode(&mut self) -> (DecodeState, Vec<u8>) {
        if self.state == DecodeState::EndOfFile {
            return (DecodeState::EndOfFile, Vec::new());
        }

        let packet = match self.format.next_packet() {
            Ok(p) => p,
            Err(_) => {
                // EOF
                self.state = DecodeState::EndOfFile;
                return (DecodeState::EndOfFile, Vec::new());
            }
        };

        if packet.track_id() != self.track_id {
            self.state = DecodeState::WaitingForFrame;
            return (DecodeState::WaitingForFrame, Vec::new());
        }

        match self.decoder.decode(&packet) {
            Ok(decoded) if decoded.frames() > 0 => {
                let mut sample_buf =
                    SampleBuffer::<f32>::new(decoded.frames() as u64, *decoded.spec());
                sample_buf.copy_interleaved_ref(decoded);

                let mut bytes = Vec::with_capacity(sample_buf.samples().len() * 4);
                for sample in sample_buf.samples() {
                    bytes.extend_from_slice(&sample.to_ne_bytes());
                }

                self.state = DecodeState::Decoding;
                (DecodeState::Decoding, bytes)
            }
            // Skip empty or undecodable packets; the next round tries again.
            _ => {
                self.state = DecodeState::WaitingForFrame;
                (DecodeState::WaitingForFrame, Vec::new())
            }
        }
    }

    fn seek(&mut self, frames: u64) -> Result<u64> {
        if let Some(total) = self.info.total_frames {
            if frames > total {
                return Err(Error::Seek("seek past end of file".to_string()));
            }
        }

        // Format readers dislike seeking a stream they have already run off
        // the end of; reopen the file first.
        if self.state == DecodeState::EndOfFile {
            let (format, decoder, track_id, _) =
                open_file(&self.info.path).map_err(|e| Error::Seek(e.to_string()))?;
            self.format = format;
            self.decoder = decoder;
            self.track_id = track_id;
        }

        let micros = self.micros_from_frames(frames);
        let time = Time::new(
            micros / MICROS_PER_SEC,
            (micros % MICROS_PER_SEC) as f64 / MICROS_PER_SEC as f64,
        );
        let seeked = self
            .format
            .seek(
                SeekMode::Accurate,
                SeekTo::Time {
                    time,
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| Error::Seek(format!("seek failed: {e}")))?;

        self.decoder.reset();
        self.state = DecodeState::Decoding;

        Ok(seeked.actual_ts)
    }

    fn info(&self) -> &AudioSourceInfo {
        &self.info
    }
}

/// Opens and probes `path`, returning the format reader, decoder, selected
/// track id and its codec parameters.
fn open_file(
    path: &Path,
) -> Result<(Box<dyn FormatReader>, Box<dyn Decoder>, u32, CodecParameters)> {
    let file = File::open(path)
        .map_err(|e| Error::File(format!("couldn't open {}: {e}", path.display())))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| Error::File(format!("couldn't read {}: {e}", path.display())))?;

    let format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| Error::File(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| Error::File(format!("{}: unsupported codec: {e}", path.display())))?;

    Ok((format, decoder, track_id, params))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubSource {
        info: AudioSourceInfo,
    }

    impl StubSource {
        fn at_rate(sample_rate: u32) -> Self {
            Self {
                info: AudioSourceInfo {
                    path: PathBuf::from("stub.wav"),
                    sample_rate,
                    channel_count: 2,
                    format: SampleFormat::S16,
                    total_frames: None,
                },
            }
        }
    }

    impl AudioSource for StubSource {
        fn decode(&mut self) -> (DecodeState, Vec<u8>) {
            (DecodeState::EndOfFile, Vec::new())
        }

        fn seek(&mut self, frames: u64) -> Result<u64> {
            Ok(frames)
        }

        fn info(&self) -> &AudioSourceInfo {
            &self.info
        }
    }

    #[test]
    fn mono_sample_widths() {
        assert_eq!(SampleFormat::U8.width(), 1);
        assert_eq!(SampleFormat::S8.width(), 1);
        assert_eq!(SampleFormat::S16.width(), 2);
        assert_eq!(SampleFormat::S32.width(), 4);
        assert_eq!(SampleFormat::F32.width(), 4);
    }

    #[test]
    fn frame_width_includes_channels() {
        let info = AudioSourceInfo {
            path: PathBuf::from("x"),
            sample_rate: 44_100,
            channel_count: 6,
            format: SampleFormat::S32,
            total_frames: None,
        };
        assert_eq!(info.bytes_per_frame(), 24);
    }

    #[test]
    fn conversions_round_trip() {
        // 8 kHz divides a second of microseconds evenly, so every frame
        // count has an exact microsecond position.
        let src = StubSource::at_rate(8_000);
        for frames in [0u64, 1, 7_999, 8_000, 8_001, 10_000_000] {
            let micros = src.micros_from_frames(frames);
            assert_eq!(src.frames_from_micros(micros), frames);
        }

        // At 44.1 kHz only multiples of 441 frames land on whole
        // microseconds; those must still round trip exactly.
        let src = StubSource::at_rate(44_100);
        for frames in [0u64, 441, 44_100, 441_000_000] {
            let micros = src.micros_from_frames(frames);
            assert_eq!(src.frames_from_micros(micros), frames);
        }
    }

    #[test]
    fn one_second_is_one_rate_worth_of_frames() {
        let src = StubSource::at_rate(48_000);
        assert_eq!(src.frames_from_micros(MICROS_PER_SEC), 48_000);
        assert_eq!(src.micros_from_frames(48_000), MICROS_PER_SEC);
    }

    #[test]
    fn sub_frame_positions_round_down() {
        let src = StubSource::at_rate(48_000);
        // One microsecond is less than one frame at 48 kHz.
        assert_eq!(src.frames_from_micros(1), 0);
        assert_eq!(src.frames_from_micros(21), 1);
    }
}
