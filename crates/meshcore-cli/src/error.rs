//! Error types for the command engine.

use meshcore_companion_protocol::{FirmwareErrorCode, ProtocolError};
use thiserror::Error;

/// Failure to establish a session with the radio.
#[derive(Error, Debug, Clone)]
pub enum ConnectError {
    /// Target string could not be understood.
    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    /// Transport kind not available in this build.
    #[error("{0}")]
    Unsupported(String),

    /// Socket or serial port could not be opened.
    #[error("cannot open {target}: {reason}")]
    Open {
        /// Description of the target.
        target: String,
        /// Underlying I/O error text.
        reason: String,
    },

    /// Link opened but the startup handshake did not complete.
    #[error("handshake with {target} failed: {reason}")]
    Handshake {
        /// Description of the target.
        target: String,
        /// What went wrong.
        reason: String,
    },
}

/// Failure to move bytes over an open link.
#[derive(Error, Debug, Clone)]
pub enum LinkError {
    /// The link is closed.
    #[error("link closed")]
    Closed,

    /// Write failed.
    #[error("write failed: {0}")]
    Write(String),
}

/// Contact lookup failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// Nothing matched.
    #[error("unknown contact '{0}'")]
    NotFound(String),

    /// More than one contact matched a prefix.
    #[error("ambiguous contact '{query}', matches: {}", .candidates.join(", "))]
    Ambiguous {
        /// The name or key prefix that was looked up.
        query: String,
        /// Names of every matching contact.
        candidates: Vec<String>,
    },
}

/// Any failure a command in the chain can report.
#[derive(Error, Debug, Clone)]
pub enum CliError {
    /// Could not connect.
    #[error("connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Send failed even after reconnecting.
    #[error("link error: {0}")]
    Link(#[from] LinkError),

    /// A wait ran out of time.
    #[error("timeout waiting for {0}")]
    Timeout(String),

    /// Bad command name or arguments.
    #[error("{0}")]
    Usage(String),

    /// Contact lookup failed.
    #[error(transparent)]
    Lookup(#[from] LookupError),

    /// The radio rejected the command.
    #[error("device error: {0} (code {code})", code = .0.code())]
    Device(FirmwareErrorCode),

    /// Reply did not decode or was not the expected kind.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Link lost while a command was waiting on it.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// Session torn down by the user.
    #[error("interrupted")]
    Interrupted,

    /// Configuration could not be loaded or saved.
    #[error("config error: {0}")]
    Config(String),
}

impl CliError {
    /// Whether this failure stops the rest of the command chain.
    pub fn is_chain_fatal(&self) -> bool {
        match self {
            CliError::Connect(_)
            | CliError::Link(_)
            | CliError::Usage(_)
            | CliError::Disconnected(_)
            | CliError::Interrupted => true,
            CliError::Timeout(_)
            | CliError::Lookup(_)
            | CliError::Device(_)
            | CliError::Protocol(_)
            | CliError::Config(_) => false,
        }
    }
}

impl From<ProtocolError> for CliError {
    fn from(err: ProtocolError) -> Self {
        CliError::Protocol(err.to_string())
    }
}

/// Result type used throughout the client.
pub type Result<T> = std::result::Result<T, CliError>;
