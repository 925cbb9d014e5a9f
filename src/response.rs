//! Line-oriented responses sent back to control clients.
//!
//! Every response is one line, `CODE arg1 arg2 ...`, with arguments that
//! contain whitespace or quoting characters packed into single quotes.

/// Identifies one connected control client.
pub type ClientId = u64;

/// Pseudo client id addressing every connected client at once.
pub const BROADCAST: ClientId = 0;

/// Response codes understood by clients.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Code {
    /// Server hello, sent once per connection.
    Ohai,
    /// Server goodbye, sent when the daemon shuts down.
    Ttfn,
    /// State change or state dump.
    State,
    /// Playback position in microseconds.
    Time,
    /// Currently loaded path.
    File,
    /// The loaded file ended on its own.
    End,
    /// Command result.
    Ack,
}

impl Code {
    fn as_str(self) -> &'static str {
        match self {
            Code::Ohai => "OHAI",
            Code::Ttfn => "TTFN",
            Code::State => "STATE",
            Code::Time => "TIME",
            Code::File => "FILE",
            Code::End => "END",
            Code::Ack => "ACK",
        }
    }
}

/// One response line under construction.
#[derive(Clone, Debug)]
pub struct Response {
    code: Code,
    args: Vec<String>,
}

impl Response {
    pub fn new(code: Code) -> Self {
        Self {
            code,
            args: Vec::new(),
        }
    }

    /// Appends an unescaped argument, for chaining.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Packs the response into its wire form, sans newline.
    pub fn pack(&self) -> String {
        let mut line = String::from(self.code.as_str());
        for arg in &self.args {
            line.push(' ');
            line.push_str(&escape_arg(arg));
        }
        line
    }
}

/// Quotes an argument when the raw form would confuse the tokeniser on the
/// other end.
fn escape_arg(arg: &str) -> String {
    let needs_quoting = arg.is_empty()
        || arg
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '"' || c == '\\');
    if !needs_quoting {
        return arg.to_string();
    }

    let mut out = String::with_capacity(arg.len() + 2);
    out.push('\'');
    for c in arg.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

/// Anything that can deliver a response to clients.
///
/// `id` selects a single client, or [`BROADCAST`] for all of them.
pub trait ResponseSink: Send + Sync {
    fn respond(&self, response: &Response, id: ClientId);
}

/// Result of running one command, emitted as an `ACK` response.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    /// Command was valid and carried out.
    Ok,
    /// User error: bad command, bad argument, wrong state.
    What(String),
    /// Environment/IO error while carrying out a valid command.
    Fail(String),
}

impl Ack {
    /// Builds the `ACK` response for the command `words` that produced this
    /// result.
    pub fn into_response(self, words: &[String]) -> Response {
        let mut r = Response::new(Code::Ack);
        r = match self {
            Ack::Ok => r.arg("OK"),
            Ack::What(msg) => r.arg("WHAT").arg(msg),
            Ack::Fail(msg) => r.arg("FAIL").arg(msg),
        };
        for word in words {
            r = r.arg(word.clone());
        }
        r
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_code_and_args() {
        let r = Response::new(Code::State).arg("Ejected").arg("Stopped");
        assert_eq!(r.pack(), "STATE Ejected Stopped");
    }

    #[test]
    fn packs_bare_code() {
        assert_eq!(Response::new(Code::End).pack(), "END");
    }

    #[test]
    fn quotes_args_with_whitespace() {
        let r = Response::new(Code::File).arg("/music/two words.flac");
        assert_eq!(r.pack(), "FILE '/music/two words.flac'");
    }

    #[test]
    fn escapes_quotes_and_backslashes() {
        let r = Response::new(Code::File).arg(r"it's\here");
        assert_eq!(r.pack(), r"FILE 'it\'s\\here'");
    }

    #[test]
    fn quotes_empty_args() {
        let r = Response::new(Code::Ohai).arg("");
        assert_eq!(r.pack(), "OHAI ''");
    }

    #[test]
    fn ack_ok_appends_original_words() {
        let words = vec!["load".to_string(), "a.wav".to_string()];
        assert_eq!(Ack::Ok.into_response(&words).pack(), "ACK OK load a.wav");
    }

    #[test]
    fn ack_what_carries_message_first() {
        let words = vec!["play".to_string()];
        let r = Ack::What("nothing loaded".to_string()).into_response(&words);
        assert_eq!(r.pack(), "ACK WHAT 'nothing loaded' play");
    }

    #[test]
    fn ack_fail_carries_message_first() {
        let words = vec!["seek".to_string(), "99h".to_string()];
        let r = Ack::Fail("seek past end of file".to_string()).into_response(&words);
        assert_eq!(r.pack(), "ACK FAIL 'seek past end of file' seek 99h");
    }
}
