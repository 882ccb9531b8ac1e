//! Error types for the chatsync wire protocol.

use thiserror::Error;

/// Errors that can occur while encoding or decoding socket frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Text is not a `{type, payload}` JSON envelope
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// A known frame type carried a payload of the wrong shape
    #[error("invalid payload for {kind}: {source}")]
    InvalidPayload {
        /// The frame type.
        kind: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// Frame type not valid in this direction
    #[error("unexpected frame type: {0}")]
    UnexpectedKind(String),

    /// JSON serialization failed
    #[error("encoding failed: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = FrameError::UnexpectedKind("pong".into());
        assert_eq!(err.to_string(), "unexpected frame type: pong");
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<FrameError>();
    }
}
