use std::io;

/// Crate-local result alias, matching the error taxonomy of §7.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised by the trace persistence engine.
///
/// Hot-path functions never return this to the probe — see `tracer::Tracer`,
/// which counts and suppresses these internally instead of propagating them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    /// A `rotrec` file is full; consumed internally by `rotdir` rotation.
    #[error("record file is full")]
    Full,

    /// The reader hit an incomplete frame; iteration ends cleanly.
    #[error("truncated frame")]
    Truncated,

    #[error("codepoint index {index} out of range (have {len})")]
    CodepointOutOfRange { index: u16, len: usize },

    #[error("tracer already active on this thread")]
    TracerAlreadyActive,

    #[error("requested size {requested} exceeds limit {limit}")]
    TooLarge { requested: usize, limit: usize },
}
