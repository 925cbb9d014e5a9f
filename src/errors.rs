//! Error kinds shared across the daemon.
//!
//! Each variant maps to a distinct spot on the command surface: `Config` is
//! fatal at startup, `File` and `Seek` become `ACK FAIL`, `NoAudio` becomes
//! `ACK WHAT`. Invariant violations do not live here; those abort via panic.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Device or audio host setup failure.
    #[error("audio setup failed: {0}")]
    Config(String),

    /// Source open/probe/decode failure.
    #[error("{0}")]
    File(String),

    /// Seek rejected by the decoder or out of range.
    #[error("{0}")]
    Seek(String),

    /// Operation that needs a loaded file was invoked with none.
    #[error("nothing loaded")]
    NoAudio,
}

pub type Result<T> = std::result::Result<T, Error>;
