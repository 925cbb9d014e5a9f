//! Top-level player: state machine, command dispatch and the update loop.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::audio::{Audio, AudioState, AudioSystem};
use crate::errors::Error;
use crate::response::{Ack, ClientId, Code, Response, ResponseSink, BROADCAST};
use crate::time_parse;

/// Farewell broadcast when the daemon shuts down.
const FAREWELL: &str = "goodbye";

/// Anything the reactor can feed the player.
#[derive(Debug)]
pub enum Event {
    /// A client connected and should be told where things stand.
    Connected(ClientId),
    Disconnected(ClientId),
    /// One complete command line from a client.
    Line(ClientId, Vec<String>),
}

/// Player lifecycle states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// Pre-construction placeholder; never externally visible.
    #[allow(dead_code)]
    Void,
    /// No file loaded.
    Ejected,
    Stopped,
    Playing,
    /// Shutting down.
    Quit,
}

impl State {
    fn name(self) -> &'static str {
        match self {
            State::Void => "Void",
            State::Ejected => "Ejected",
            State::Stopped => "Stopped",
            State::Playing => "Playing",
            State::Quit => "Quit",
        }
    }
}

pub struct Player {
    system: Box<dyn AudioSystem>,
    rs: Arc<dyn ResponseSink>,
    events: Receiver<Event>,
    tick: Duration,
    state: State,
    audio: Audio,
}

impl Player {
    pub fn new(
        system: Box<dyn AudioSystem>,
        rs: Arc<dyn ResponseSink>,
        events: Receiver<Event>,
        tick: Duration,
    ) -> Self {
        let audio = system.null();
        Self {
            system,
            rs,
            events,
            tick,
            state: State::Ejected,
            audio,
        }
    }

    /// Runs the update loop until a `quit` arrives, then waves goodbye.
    ///
    /// Each tick drains pending events, gives the audio one decode round and
    /// announces position or end-of-file, then sleeps for the tick quantum.
    /// The quantum must stay short enough that the decoder keeps the sink's
    /// ring comfortably full.
    pub fn run(&mut self) {
        while self.state != State::Quit {
            self.step();
            std::thread::sleep(self.tick);
        }
        self.rs
            .respond(&Response::new(Code::Ttfn).arg(FAREWELL), BROADCAST);
    }

    fn step(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.handle_event(event);
            if self.state == State::Quit {
                return;
            }
        }

        let audio_state = self.audio.update();
        if self.state == State::Playing {
            if audio_state == AudioState::AtEnd {
                self.rs.respond(&Response::new(Code::End), BROADCAST);
                self.eject();
            } else {
                self.audio.emit(Code::Time, &*self.rs, BROADCAST);
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Connected(id) => {
                // The newcomer already got its greeting on the wire; bring
                // it up to speed on what is loaded and where.
                self.audio.emit(Code::State, &*self.rs, id);
                self.audio.emit(Code::File, &*self.rs, id);
                self.audio.emit(Code::Time, &*self.rs, id);
            }
            Event::Disconnected(id) => self.audio.forget_listener(id),
            Event::Line(id, words) => {
                if words.is_empty() {
                    return;
                }
                tracing::debug!(client = id, ?words, "command");
                let ack = self.dispatch(&words);
                self.rs.respond(&ack.into_response(&words), id);
            }
        }
    }

    fn dispatch(&mut self, words: &[String]) -> Ack {
        let verb = words[0].as_str();
        match (verb, words.len() - 1) {
            ("play", 0) => self.cmd_play(),
            ("stop", 0) => self.cmd_stop(),
            ("ejct", 0) | ("eject", 0) => self.cmd_eject(),
            ("quit", 0) => self.cmd_quit(),
            ("load", 1) => self.cmd_load(&words[1]),
            ("seek", 1) => self.cmd_seek(&words[1]),
            ("play" | "stop" | "ejct" | "eject" | "quit" | "load" | "seek", _) => {
                Ack::What("wrong number of arguments".to_string())
            }
            _ => Ack::What("unknown command".to_string()),
        }
    }

    fn cmd_play(&mut self) -> Ack {
        if let Some(what) = self.gate(&[State::Stopped]) {
            return what;
        }
        match self.audio.set_playing(true) {
            Ok(()) => {
                self.set_state(State::Playing);
                Ack::Ok
            }
            Err(e) => Ack::What(e.to_string()),
        }
    }

    fn cmd_stop(&mut self) -> Ack {
        if let Some(what) = self.gate(&[State::Playing]) {
            return what;
        }
        match self.audio.set_playing(false) {
            Ok(()) => {
                self.set_state(State::Stopped);
                Ack::Ok
            }
            Err(e) => Ack::What(e.to_string()),
        }
    }

    fn cmd_eject(&mut self) -> Ack {
        if let Some(what) = self.gate(&[State::Stopped, State::Playing]) {
            return what;
        }
        self.eject();
        Ack::Ok
    }

    fn cmd_quit(&mut self) -> Ack {
        if matches!(self.state, State::Stopped | State::Playing) {
            self.eject();
        }
        self.set_state(State::Quit);
        Ack::Ok
    }

    fn cmd_load(&mut self, path: &str) -> Ack {
        if matches!(self.state, State::Stopped | State::Playing) {
            self.eject();
        }
        match self.system.load(Path::new(path)) {
            Ok(audio) => {
                self.audio = audio;
                tracing::info!(path, "loaded");
                self.set_state(State::Stopped);
                self.audio.emit(Code::File, &*self.rs, BROADCAST);
                Ack::Ok
            }
            Err(e) => {
                // Ejected above (or never loaded); stay that way and say why.
                tracing::warn!(path, error = %e, "load failed");
                Ack::Fail(e.to_string())
            }
        }
    }

    fn cmd_seek(&mut self, time_str: &str) -> Ack {
        if let Some(what) = self.gate(&[State::Playing, State::Stopped]) {
            return what;
        }
        let micros = match time_parse::parse(time_str) {
            Ok(micros) => micros,
            Err(e) => return Ack::What(e.to_string()),
        };

        // The engine must be stopped while the stream repositions; resume
        // afterwards if we interrupted playback, successful or not.
        let was_playing = self.state == State::Playing;
        if was_playing {
            let _ = self.audio.set_playing(false);
        }
        let result = self.audio.seek(micros);
        if was_playing {
            let _ = self.audio.set_playing(true);
        }

        match result {
            Ok(()) => Ack::Ok,
            Err(e @ Error::NoAudio) => Ack::What(e.to_string()),
            Err(e) => Ack::Fail(e.to_string()),
        }
    }

    /// Checks the current state against the set a command allows.
    ///
    /// Commands outside their gate answer WHAT and change nothing.
    fn gate(&self, allowed: &[State]) -> Option<Ack> {
        if allowed.contains(&self.state) {
            None
        } else if self.state == State::Ejected {
            Some(Ack::What("nothing loaded".to_string()))
        } else {
            Some(Ack::What(format!(
                "command invalid while {}",
                self.state.name()
            )))
        }
    }

    /// Drops the current audio and returns to Ejected.
    fn eject(&mut self) {
        self.audio = self.system.null();
        self.set_state(State::Ejected);
    }

    /// Moves to `new` and announces the transition to everyone.
    fn set_state(&mut self, new: State) {
        let prev = std::mem::replace(&mut self.state, new);
        self.rs.respond(
            &Response::new(Code::State).arg(prev.name()).arg(new.name()),
            BROADCAST,
        );
    }
}
