//! Error taxonomy for the live client core

use std::time::Duration;
use things_live_shared::codec::CodecError;
use thiserror::Error;

/// Failures surfaced to callers of the live client
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LiveError {
    #[error("No handler registered for {0}")]
    NoHandlerFound(String),

    #[error("Handler failed: {0}")]
    HandlerError(String),

    #[error("No response for {correlation_id} within {after:?}")]
    Timeout {
        correlation_id: String,
        after: Duration,
    },

    #[error("Transport failure: {0}")]
    TransportFailure(String),

    #[error("Request {0} was cancelled")]
    Cancelled(String),

    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl LiveError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, LiveError::Timeout { .. })
    }
}

/// Failures at the transport boundary
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Transport closed")]
    Closed,

    #[error("No subscription acknowledgement within {0:?}")]
    AckTimeout(Duration),

    #[error("Broker rejected request: {0}")]
    Rejected(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for LiveError {
    fn from(err: TransportError) -> Self {
        LiveError::TransportFailure(err.to_string())
    }
}

/// A wire command that cannot be turned into a [`crate::Command`]
#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("Unknown command type {0}")]
    UnknownType(i32),

    #[error("Command has no entity id")]
    MissingEntity,

    #[error("{0} requires a feature id")]
    MissingFeature(&'static str),

    #[error("Invalid JSON value: {0}")]
    InvalidValue(String),
}

impl From<CommandError> for LiveError {
    fn from(err: CommandError) -> Self {
        LiveError::InvalidCommand(err.to_string())
    }
}
