//! An audio item: one source piped into one sink.
//!
//! [`Audio`] is what the player holds at all times. While nothing is loaded
//! it is the [`Audio::Null`] variant, which refuses control operations with
//! [`Error::NoAudio`]; after a successful load it is a [`PipeAudio`], which
//! shifts decoded bytes from its source into its sink one cooperative tick
//! at a time.

use std::collections::HashMap;
use std::path::Path;

use crate::errors::{Error, Result};
use crate::response::{ClientId, Code, Response, ResponseSink, BROADCAST};
use crate::sink::{AudioSink, DeviceSink, SinkState};
use crate::source::{AudioSource, DecodeState, SymphoniaSource, MICROS_PER_SEC};

/// Playback state as seen through an [`Audio`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AudioState {
    /// There is no audio.
    None,
    Stopped,
    Playing,
    /// The audio ended and can't play again without a seek.
    AtEnd,
}

impl From<SinkState> for AudioState {
    fn from(state: SinkState) -> AudioState {
        match state {
            SinkState::Stopped => AudioState::Stopped,
            SinkState::Playing => AudioState::Playing,
            SinkState::AtEnd => AudioState::AtEnd,
        }
    }
}

/// The player's current audio, loaded or not.
pub enum Audio {
    /// Nothing loaded.
    Null,
    Pipe(PipeAudio),
}

impl Audio {
    /// Performs one update cycle, returning the state afterwards.
    pub fn update(&mut self) -> AudioState {
        match self {
            Audio::Null => AudioState::None,
            Audio::Pipe(pipe) => pipe.update(),
        }
    }

    pub fn set_playing(&mut self, playing: bool) -> Result<()> {
        match self {
            Audio::Null => Err(Error::NoAudio),
            Audio::Pipe(pipe) => {
                pipe.set_playing(playing);
                Ok(())
            }
        }
    }

    /// Seeks to `micros` from the start of the file.
    pub fn seek(&mut self, micros: u64) -> Result<()> {
        match self {
            Audio::Null => Err(Error::NoAudio),
            Audio::Pipe(pipe) => pipe.seek(micros),
        }
    }

    /// Emits the response for `code`, if it is one an audio item answers.
    ///
    /// With nothing loaded, only `STATE` gets an answer ("Ejected"); every
    /// other code is ignored.
    pub fn emit(&mut self, code: Code, rs: &dyn ResponseSink, id: ClientId) {
        match self {
            Audio::Null => {
                if code == Code::State {
                    rs.respond(&Response::new(Code::State).arg("Ejected"), id);
                }
            }
            Audio::Pipe(pipe) => pipe.emit(code, rs, id),
        }
    }

    /// Drops a disconnected listener's announce bookkeeping.
    pub fn forget_listener(&mut self, id: ClientId) {
        if let Audio::Pipe(pipe) = self {
            pipe.last_announced.remove(&id);
        }
    }
}

/// A source piped into a sink, with one in-flight decoded chunk between.
pub struct PipeAudio {
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,

    /// The current decoded chunk, always a whole number of frames.
    chunk: Vec<u8>,
    /// How far into `chunk` the sink has accepted, in bytes.
    cursor: usize,

    /// Last whole second announced per listener, for TIME throttling.
    last_announced: HashMap<ClientId, u64>,
}

impl PipeAudio {
    pub fn new(source: Box<dyn AudioSource>, sink: Box<dyn AudioSink>) -> Self {
        Self {
            source,
            sink,
            chunk: Vec::new(),
            cursor: 0,
            last_announced: HashMap::new(),
        }
    }

    /// One cooperative tick: decode if the chunk is spent, then offer what
    /// remains of it to the sink.
    pub fn update(&mut self) -> AudioState {
        // Between ticks the chunk is either empty or unfinished; a spent
        // chunk is cleared before update returns.
        if self.chunk_finished() {
            let (state, bytes) = self.source.decode();
            if state == DecodeState::EndOfFile {
                self.sink.source_out();
            } else {
                self.chunk = bytes;
                self.cursor = 0;
            }
        }

        if !self.chunk_finished() {
            let written = self.sink.transfer(&self.chunk[self.cursor..]);
            self.cursor += written;
            if self.chunk_finished() {
                self.clear_chunk();
            }
        }

        self.sink.state().into()
    }

    pub fn set_playing(&mut self, playing: bool) {
        if playing {
            self.sink.start();
        } else {
            self.sink.stop();
        }
    }

    pub fn seek(&mut self, micros: u64) -> Result<()> {
        let frames = self.source.frames_from_micros(micros);
        let actual = self.source.seek(frames)?;
        self.sink.set_position(actual);

        // The jump must reach every listener, whatever was announced before.
        self.last_announced.clear();

        // The chunk may still hold bytes decoded at the old position.
        self.clear_chunk();

        Ok(())
    }

    pub fn emit(&mut self, code: Code, rs: &dyn ResponseSink, id: ClientId) {
        match code {
            Code::State => {
                let name = match self.sink.state() {
                    SinkState::Stopped => "Stopped",
                    SinkState::Playing => "Playing",
                    SinkState::AtEnd => "AtEnd",
                };
                rs.respond(&Response::new(Code::State).arg(name), id);
            }
            Code::File => {
                let path = self.source.info().path.display().to_string();
                rs.respond(&Response::new(Code::File).arg(path), id);
            }
            Code::Time => {
                let micros = self.position_micros();
                // Broadcasts are throttled to one per whole second; unicasts
                // always go out.
                if id == BROADCAST && !self.can_announce_time(micros) {
                    return;
                }
                self.last_announced.insert(id, micros / MICROS_PER_SEC);
                rs.respond(&Response::new(Code::Time).arg(micros.to_string()), id);
            }
            _ => {}
        }
    }

    fn position_micros(&self) -> u64 {
        self.source.micros_from_frames(self.sink.position())
    }

    fn can_announce_time(&self, micros: u64) -> bool {
        let secs = micros / MICROS_PER_SEC;
        match self.last_announced.get(&BROADCAST) {
            Some(&last) => last < secs,
            None => true,
        }
    }

    fn chunk_finished(&self) -> bool {
        self.chunk.len() <= self.cursor
    }

    fn clear_chunk(&mut self) {
        self.chunk.clear();
        self.cursor = 0;
    }
}

/// Builds [`Audio`] values: the null one, and loaded pipes.
///
/// The player goes through this seam so tests can hand it mock pipes.
pub trait AudioSystem {
    fn null(&self) -> Audio {
        Audio::Null
    }

    /// Loads `path`, building a source and a matching device sink.
    fn load(&self, path: &Path) -> Result<Audio>;
}

/// The real audio stack: Symphonia sources played out through one output
/// device.
pub struct DeviceAudioSystem {
    device: cpal::Device,
}

impl DeviceAudioSystem {
    pub fn new(device: cpal::Device) -> Self {
        Self { device }
    }
}

impl AudioSystem for DeviceAudioSystem {
    fn load(&self, path: &Path) -> Result<Audio> {
        let source = SymphoniaSource::open(path)?;
        let sink = DeviceSink::open(source.info(), &self.device)?;
        Ok(Audio::Pipe(PipeAudio::new(Box::new(source), Box::new(sink))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{AudioSourceInfo, SampleFormat};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const BPF: usize = 4;

    #[derive(Default)]
    struct MockSourceState {
        script: VecDeque<(DecodeState, Vec<u8>)>,
        decode_calls: usize,
        seeks: Vec<u64>,
        seek_result: Option<u64>,
    }

    struct MockSource {
        state: Arc<Mutex<MockSourceState>>,
        info: AudioSourceInfo,
    }

    impl MockSource {
        fn new(state: Arc<Mutex<MockSourceState>>) -> Self {
            Self {
                state,
                info: AudioSourceInfo {
                    path: PathBuf::from("/music/a.wav"),
                    sample_rate: 8_000,
                    channel_count: 2,
                    format: SampleFormat::S16,
                    total_frames: Some(80_000),
                },
            }
        }
    }

    impl AudioSource for MockSource {
        fn decode(&mut self) -> (DecodeState, Vec<u8>) {
            let mut st = self.state.lock().unwrap();
            st.decode_calls += 1;
            st.script
                .pop_front()
                .unwrap_or((DecodeState::EndOfFile, Vec::new()))
        }

        fn seek(&mut self, frames: u64) -> Result<u64> {
            let mut st = self.state.lock().unwrap();
            st.seeks.push(frames);
            Ok(st.seek_result.unwrap_or(frames))
        }

        fn info(&self) -> &AudioSourceInfo {
            &self.info
        }
    }

    struct MockSinkState {
        state: SinkState,
        accept_frames: usize,
        transfers: Vec<usize>,
        source_out: bool,
        position: u64,
        set_positions: Vec<u64>,
        starts: usize,
        stops: usize,
    }

    impl Default for MockSinkState {
        fn default() -> Self {
            Self {
                state: SinkState::Stopped,
                accept_frames: usize::MAX,
                transfers: Vec::new(),
                source_out: false,
                position: 0,
                set_positions: Vec::new(),
                starts: 0,
                stops: 0,
            }
        }
    }

    struct MockSink(Arc<Mutex<MockSinkState>>);

    impl AudioSink for MockSink {
        fn start(&mut self) {
            let mut st = self.0.lock().unwrap();
            st.starts += 1;
            st.state = SinkState::Playing;
        }

        fn stop(&mut self) {
            let mut st = self.0.lock().unwrap();
            st.stops += 1;
            st.state = SinkState::Stopped;
        }

        fn state(&self) -> SinkState {
            self.0.lock().unwrap().state
        }

        fn source_out(&mut self) {
            self.0.lock().unwrap().source_out = true;
        }

        fn position(&self) -> u64 {
            self.0.lock().unwrap().position
        }

        fn set_position(&mut self, frames: u64) {
            let mut st = self.0.lock().unwrap();
            st.set_positions.push(frames);
            st.position = frames;
            st.source_out = false;
        }

        fn transfer(&mut self, bytes: &[u8]) -> usize {
            let mut st = self.0.lock().unwrap();
            let frames = (bytes.len() / BPF).min(st.accept_frames);
            st.transfers.push(frames);
            frames * BPF
        }
    }

    #[derive(Default)]
    struct CollectSink(Mutex<Vec<(String, ClientId)>>);

    impl ResponseSink for CollectSink {
        fn respond(&self, response: &Response, id: ClientId) {
            self.0.lock().unwrap().push((response.pack(), id));
        }
    }

    fn pipe(
        script: Vec<(DecodeState, Vec<u8>)>,
    ) -> (PipeAudio, Arc<Mutex<MockSourceState>>, Arc<Mutex<MockSinkState>>) {
        let source_state = Arc::new(Mutex::new(MockSourceState {
            script: script.into(),
            ..Default::default()
        }));
        let sink_state = Arc::new(Mutex::new(MockSinkState::default()));
        let pipe = PipeAudio::new(
            Box::new(MockSource::new(source_state.clone())),
            Box::new(MockSink(sink_state.clone())),
        );
        (pipe, source_state, sink_state)
    }

    fn frames(n: usize) -> Vec<u8> {
        vec![0u8; n * BPF]
    }

    #[test]
    fn update_decodes_and_transfers_whole_chunk() {
        let (mut pipe, source, sink) = pipe(vec![(DecodeState::Decoding, frames(4))]);

        pipe.update();

        assert_eq!(source.lock().unwrap().decode_calls, 1);
        assert_eq!(sink.lock().unwrap().transfers, vec![4]);
        // The spent chunk is cleared, not retained.
        assert!(pipe.chunk.is_empty());
        assert_eq!(pipe.cursor, 0);
    }

    #[test]
    fn partial_transfer_keeps_the_chunk_without_redecoding() {
        let (mut pipe, source, sink) = pipe(vec![(DecodeState::Decoding, frames(3))]);
        sink.lock().unwrap().accept_frames = 1;

        pipe.update();
        assert_eq!(pipe.chunk.len(), 3 * BPF);
        assert_eq!(pipe.cursor, BPF);

        pipe.update();
        pipe.update();

        // One decode fed all three transfers.
        assert_eq!(source.lock().unwrap().decode_calls, 1);
        assert_eq!(sink.lock().unwrap().transfers, vec![1, 1, 1]);
        assert!(pipe.chunk.is_empty());
    }

    #[test]
    fn full_ring_leaves_chunk_untouched() {
        let (mut pipe, _source, sink) = pipe(vec![(DecodeState::Decoding, frames(2))]);
        sink.lock().unwrap().accept_frames = 0;

        pipe.update();

        assert_eq!(pipe.chunk.len(), 2 * BPF);
        assert_eq!(pipe.cursor, 0);
    }

    #[test]
    fn end_of_file_marks_source_out() {
        let (mut pipe, _source, sink) = pipe(vec![]);

        pipe.update();

        assert!(sink.lock().unwrap().source_out);
        assert!(pipe.chunk.is_empty());
    }

    #[test]
    fn empty_decode_round_is_not_source_out() {
        let (mut pipe, _source, sink) =
            pipe(vec![(DecodeState::WaitingForFrame, Vec::new())]);

        pipe.update();

        assert!(!sink.lock().unwrap().source_out);
    }

    #[test]
    fn update_reports_sink_state() {
        let (mut pipe, _source, sink) = pipe(vec![]);

        sink.lock().unwrap().state = SinkState::Playing;
        assert_eq!(pipe.update(), AudioState::Playing);

        sink.lock().unwrap().state = SinkState::AtEnd;
        assert_eq!(pipe.update(), AudioState::AtEnd);
    }

    #[test]
    fn set_playing_delegates_to_sink() {
        let (mut pipe, _source, sink) = pipe(vec![]);

        pipe.set_playing(true);
        pipe.set_playing(false);

        let st = sink.lock().unwrap();
        assert_eq!(st.starts, 1);
        assert_eq!(st.stops, 1);
    }

    #[test]
    fn seek_repositions_sink_and_drops_chunk() {
        let (mut pipe, source, sink) = pipe(vec![(DecodeState::Decoding, frames(3))]);
        sink.lock().unwrap().accept_frames = 1;
        pipe.update();
        assert!(!pipe.chunk.is_empty());

        source.lock().unwrap().seek_result = Some(7_900);
        pipe.seek(MICROS_PER_SEC).unwrap();

        // 1 s at 8 kHz, and the sink learns the position the source
        // actually managed.
        assert_eq!(source.lock().unwrap().seeks, vec![8_000]);
        assert_eq!(sink.lock().unwrap().set_positions, vec![7_900]);
        assert!(pipe.chunk.is_empty());
        assert_eq!(pipe.cursor, 0);
    }

    #[test]
    fn time_broadcasts_once_per_second() {
        let (mut pipe, _source, sink) = pipe(vec![]);
        let rs = CollectSink::default();

        sink.lock().unwrap().position = 4_000; // 0.5 s
        pipe.emit(Code::Time, &rs, BROADCAST);
        pipe.emit(Code::Time, &rs, BROADCAST);
        sink.lock().unwrap().position = 6_000; // 0.75 s, same whole second
        pipe.emit(Code::Time, &rs, BROADCAST);

        sink.lock().unwrap().position = 8_800; // 1.1 s
        pipe.emit(Code::Time, &rs, BROADCAST);

        let lines = rs.0.into_inner().unwrap();
        assert_eq!(
            lines,
            vec![
                ("TIME 500000".to_string(), BROADCAST),
                ("TIME 1100000".to_string(), BROADCAST),
            ]
        );
    }

    #[test]
    fn seek_resets_time_throttle() {
        let (mut pipe, _source, sink) = pipe(vec![]);
        let rs = CollectSink::default();

        sink.lock().unwrap().position = 4_000;
        pipe.emit(Code::Time, &rs, BROADCAST);
        pipe.emit(Code::Time, &rs, BROADCAST);
        assert_eq!(rs.0.lock().unwrap().len(), 1);

        pipe.seek(500_000).unwrap();
        sink.lock().unwrap().position = 4_000;
        pipe.emit(Code::Time, &rs, BROADCAST);

        // Same whole second as before the seek, announced anyway.
        assert_eq!(rs.0.lock().unwrap().len(), 2);
    }

    #[test]
    fn unicast_time_always_announces() {
        let (mut pipe, _source, sink) = pipe(vec![]);
        let rs = CollectSink::default();

        sink.lock().unwrap().position = 4_000;
        pipe.emit(Code::Time, &rs, 3);
        pipe.emit(Code::Time, &rs, 3);

        let lines = rs.0.into_inner().unwrap();
        assert_eq!(
            lines,
            vec![
                ("TIME 500000".to_string(), 3),
                ("TIME 500000".to_string(), 3),
            ]
        );
    }

    #[test]
    fn emit_state_names_the_sink_state() {
        let (mut pipe, _source, sink) = pipe(vec![]);
        let rs = CollectSink::default();

        pipe.emit(Code::State, &rs, 1);
        sink.lock().unwrap().state = SinkState::Playing;
        pipe.emit(Code::State, &rs, 1);
        sink.lock().unwrap().state = SinkState::AtEnd;
        pipe.emit(Code::State, &rs, 1);

        let lines = rs.0.into_inner().unwrap();
        assert_eq!(lines[0].0, "STATE Stopped");
        assert_eq!(lines[1].0, "STATE Playing");
        assert_eq!(lines[2].0, "STATE AtEnd");
    }

    #[test]
    fn emit_file_prints_the_path() {
        let (mut pipe, _source, _sink) = pipe(vec![]);
        let rs = CollectSink::default();

        pipe.emit(Code::File, &rs, BROADCAST);

        assert_eq!(rs.0.lock().unwrap()[0].0, "FILE /music/a.wav");
    }

    #[test]
    fn emit_ignores_codes_that_are_not_ours() {
        let (mut pipe, _source, _sink) = pipe(vec![]);
        let rs = CollectSink::default();

        pipe.emit(Code::Ohai, &rs, BROADCAST);
        pipe.emit(Code::End, &rs, BROADCAST);

        assert!(rs.0.lock().unwrap().is_empty());
    }

    #[test]
    fn null_audio_refuses_control() {
        let mut audio = Audio::Null;

        assert_eq!(audio.update(), AudioState::None);
        assert!(matches!(audio.set_playing(true), Err(Error::NoAudio)));
        assert!(matches!(audio.seek(0), Err(Error::NoAudio)));
    }

    #[test]
    fn null_audio_emits_only_ejected_state() {
        let mut audio = Audio::Null;
        let rs = CollectSink::default();

        audio.emit(Code::State, &rs, 2);
        audio.emit(Code::File, &rs, 2);
        audio.emit(Code::Time, &rs, 2);

        let lines = rs.0.into_inner().unwrap();
        assert_eq!(lines, vec![("STATE Ejected".to_string(), 2)]);
    }
}
