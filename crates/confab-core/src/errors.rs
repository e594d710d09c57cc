use thiserror::Error;

/// Errors surfaced by the session layer.
///
/// Every variant carries a plain message so errors can be cloned into
/// [`SessionEvent::Error`](crate::events::SessionEvent::Error) and handed to
/// every listener.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("media engine error: {0}")]
    Engine(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("{operation} not allowed in state {state}")]
    InvalidState { operation: &'static str, state: String },
    #[error("session closed")]
    Closed,
}
