//! Error types for the node.
//!
//! `NodeError` covers failures at the boundary (malformed or out-of-range
//! requests) and in hardware backends. State-guard outcomes such as
//! "busy" are not errors; they are reported as a [`Rejection`] value.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, NodeError>;

#[derive(Debug, Error)]
pub enum NodeError {
    /// Mode token outside the accepted enumeration
    #[error("invalid mode: {0:?}")]
    InvalidMode(String),

    /// Sensitivity range outside [0, 1000]
    #[error("range out of bounds: {0} (expected 0-1000)")]
    RangeOutOfBounds(i64),

    /// Tone payload with values outside their domain
    #[error("invalid tone: {0}")]
    InvalidTone(String),

    /// Request body that is not the expected JSON schema
    #[error("malformed body: {0}")]
    MalformedBody(#[from] serde_json::Error),

    #[error("not found")]
    NotFound,

    #[error("method not allowed")]
    MethodNotAllowed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Actuator, sensor or link fault reported by a hardware backend
    #[error("hardware error: {0}")]
    Hardware(String),

    /// The control loop did not answer in time (or has shut down)
    #[error("node unavailable")]
    NodeUnavailable,
}

impl NodeError {
    /// HTTP status code used when this error reaches the network boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            NodeError::InvalidMode(_)
            | NodeError::RangeOutOfBounds(_)
            | NodeError::InvalidTone(_)
            | NodeError::MalformedBody(_) => 400,
            NodeError::NotFound => 404,
            NodeError::MethodNotAllowed => 405,
            NodeError::NodeUnavailable => 503,
            NodeError::Io(_) | NodeError::Hardware(_) => 500,
        }
    }
}

/// Why a control-plane operation was refused by the state machine.
/// Nothing is mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Operation requires Record & Play mode
    #[error("not in Record & Play mode")]
    WrongMode,
    /// Recording or playback already in progress
    #[error("busy")]
    Busy,
    /// Stop requested while not recording
    #[error("not recording")]
    NotRecording,
    /// Playback requested with an empty melody
    #[error("nothing to play")]
    NothingToPlay,
}

impl Rejection {
    /// Status string reported to clients.
    pub fn status(&self) -> &'static str {
        match self {
            Rejection::WrongMode | Rejection::NotRecording => "error",
            Rejection::Busy => "busy",
            Rejection::NothingToPlay => "nothing to play",
        }
    }
}
