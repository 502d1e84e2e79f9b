//! Crate-wide error type and the logging-error-construction macros built on
//! top of it.

use std::fmt;
use std::io;

/// The single error type threaded through the whole crate. Every fallible
/// function in this crate returns `Result<T, ChatError>`.
#[derive(Debug)]
pub enum ChatError {
    /// Something the caller supplied was invalid (bad RPC field, malformed
    /// config value, ...).
    Invalid(String),
    /// The local store rejected a mutation (e.g. duplicate primary key) or
    /// failed to persist.
    Store(String),
    /// A peer or client RPC did not complete within its deadline.
    Timeout(String),
    /// Underlying I/O failure (socket, file).
    Io(String),
    /// (De)serialization failure on the wire or on disk.
    Codec(String),
    /// Configuration could not be loaded or parsed.
    Config(String),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Invalid(s) => write!(f, "invalid: {}", s),
            ChatError::Store(s) => write!(f, "store error: {}", s),
            ChatError::Timeout(s) => write!(f, "timed out: {}", s),
            ChatError::Io(s) => write!(f, "io error: {}", s),
            ChatError::Codec(s) => write!(f, "codec error: {}", s),
            ChatError::Config(s) => write!(f, "config error: {}", s),
        }
    }
}

impl std::error::Error for ChatError {}

impl From<io::Error> for ChatError {
    fn from(e: io::Error) -> Self {
        ChatError::Io(e.to_string())
    }
}

impl From<bincode::Error> for ChatError {
    fn from(e: bincode::Error) -> Self {
        ChatError::Codec(e.to_string())
    }
}

impl From<toml::de::Error> for ChatError {
    fn from(e: toml::de::Error) -> Self {
        ChatError::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for ChatError {
    fn from(e: tokio::time::error::Elapsed) -> Self {
        ChatError::Timeout(e.to_string())
    }
}

/// Error type for failures that can only happen during startup (bad config,
/// bind failure, ...), kept distinct from `ChatError` so `main()` can report
/// a clean message without pretending it's a runtime RPC failure.
#[derive(Debug)]
pub struct InitError(pub String);

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "initialization error: {}", self.0)
    }
}

impl std::error::Error for InitError {}

impl From<ChatError> for InitError {
    fn from(e: ChatError) -> Self {
        InitError(e.to_string())
    }
}

impl From<io::Error> for InitError {
    fn from(e: io::Error) -> Self {
        InitError(e.to_string())
    }
}

/// Builds a `ChatError::Invalid`, logs it at `error` level, and evaluates to
/// `Err(...)` -- meant to be used as `return logged_err!(...)` at call sites
/// that previously had to do both steps separately.
#[macro_export]
macro_rules! logged_err {
    ($($arg:tt)*) => {{
        let msg = format!($($arg)*);
        log::error!("{}", msg);
        Err($crate::ChatError::Invalid(msg))
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_variants() {
        assert_eq!(
            ChatError::Invalid("x".into()).to_string(),
            "invalid: x"
        );
        assert_eq!(ChatError::Timeout("y".into()).to_string(), "timed out: y");
    }

    #[test]
    fn logged_err_macro_builds_invalid() {
        fn fails() -> Result<(), ChatError> {
            logged_err!("bad value: {}", 42)
        }
        match fails() {
            Err(ChatError::Invalid(msg)) => assert!(msg.contains("42")),
            other => panic!("unexpected: {:?}", other),
        }
    }
}
