//! Error types shared across the bridge.

use std::fmt::{Display, Formatter};

/// Shared bridge result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Bridge error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Socket listener or connection failure.
    Ipc(String),
    /// Wire record could not be framed or parsed.
    Protocol(String),
    /// The engine failed to run or reported a fatal condition.
    Engine(String),
    /// Requested session does not exist.
    NotFound(String),
    /// A session with the requested identifier is already registered.
    AlreadyExists(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl AppError {
    /// Stable machine-readable code carried on outbound `error` events.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "config_error",
            Self::Ipc(_) => "ipc_error",
            Self::Protocol(_) => "malformed_message",
            Self::Engine(_) => "engine_error",
            Self::NotFound(_) => "session_not_found",
            Self::AlreadyExists(_) => "session_exists",
            Self::Io(_) => "io_error",
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Engine(msg) => write!(f, "engine: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
