//! Client error types.

use tether_core::EnvelopeError;
use thiserror::Error;

/// Why a send did not reach the transport.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The client was closed before the envelope was flushed.
    #[error("client closed before the envelope was sent")]
    Closed,
    /// The envelope could not be encoded.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_error_is_transparent() {
        let err: ClientError = EnvelopeError::ReservedField("type".into()).into();
        assert!(err.to_string().contains("reserved"));
    }

    #[test]
    fn closed_display() {
        assert!(ClientError::Closed.to_string().contains("closed"));
    }
}
