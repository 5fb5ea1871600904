use thiserror::Error;

/// Failure taxonomy for the messaging gateway.
///
/// Only `Unauthenticated` terminates a connection (reserved close code 4001
/// at handshake time). Everything else is caught at the frame boundary and
/// converted to an error frame for the offending sender; the connection and
/// the rest of the fan-out stay untouched.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing/invalid credential or malformed counterpart route segment.
    #[error("unauthenticated: {0}")]
    Unauthenticated(&'static str),

    /// Malformed or ill-addressed inbound frame. The frame is dropped; the
    /// connection stays open.
    #[error("invalid frame: {0}")]
    InvalidFrame(String),

    /// Message store failure. The message is considered not sent.
    #[error("persistence failure: {0}")]
    Persistence(#[source] anyhow::Error),
}

impl GatewayError {
    /// Stable code carried in the `error` field of an error frame.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated(_) => "unauthenticated",
            Self::InvalidFrame(_) => "invalid_frame",
            Self::Persistence(_) => "not_sent",
        }
    }
}
