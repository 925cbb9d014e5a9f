//! Incremental tokeniser for the control protocol.
//!
//! Fed raw chunks from a client socket, emits completed lines as argument
//! vectors. Words are whitespace-separated; single quotes are fully literal,
//! double quotes honour backslash escapes, and a bare backslash escapes the
//! next character.

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum QuoteType {
    None,
    Single,
    Double,
}

#[derive(Debug)]
pub struct Tokeniser {
    escape_next: bool,
    quote_type: QuoteType,
    words: Vec<String>,
    current_word: Vec<u8>,
    /// Set once the current word has any substance, so that `''` still
    /// produces an (empty) argument.
    word_open: bool,
}

impl Default for Tokeniser {
    fn default() -> Self {
        Self::new()
    }
}

impl Tokeniser {
    pub fn new() -> Self {
        Self {
            escape_next: false,
            quote_type: QuoteType::None,
            words: Vec::new(),
            current_word: Vec::new(),
            word_open: false,
        }
    }

    /// Feeds a chunk of raw bytes, returning any lines completed by it.
    ///
    /// The chunk need not contain whole lines; state carries over between
    /// calls.
    pub fn feed(&mut self, raw: &[u8]) -> Vec<Vec<String>> {
        let mut lines = Vec::new();

        for &b in raw {
            if self.escape_next {
                self.push(b);
                continue;
            }

            match self.quote_type {
                QuoteType::Single => match b {
                    b'\'' => self.quote_type = QuoteType::None,
                    _ => self.push(b),
                },
                QuoteType::Double => match b {
                    b'"' => self.quote_type = QuoteType::None,
                    b'\\' => self.escape_next = true,
                    _ => self.push(b),
                },
                QuoteType::None => match b {
                    b'\n' => lines.push(self.emit()),
                    b'\'' => {
                        self.quote_type = QuoteType::Single;
                        self.word_open = true;
                    }
                    b'"' => {
                        self.quote_type = QuoteType::Double;
                        self.word_open = true;
                    }
                    b'\\' => self.escape_next = true,
                    _ if b.is_ascii_whitespace() => self.end_word(),
                    _ => self.push(b),
                },
            }
        }

        lines
    }

    /// Finishes the current line and resets all per-line state.
    fn emit(&mut self) -> Vec<String> {
        self.end_word();
        self.escape_next = false;
        self.quote_type = QuoteType::None;
        std::mem::take(&mut self.words)
    }

    fn end_word(&mut self) {
        if !self.word_open {
            return;
        }
        let word = std::mem::take(&mut self.current_word);
        self.words
            .push(String::from_utf8_lossy(&word).into_owned());
        self.word_open = false;
    }

    fn push(&mut self, b: u8) {
        self.escape_next = false;
        self.current_word.push(b);
        self.word_open = true;
    }
}
