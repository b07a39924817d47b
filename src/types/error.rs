//! Error types for natsmq

/// Main error type for natsmq operations
#[derive(Debug, thiserror::Error)]
pub enum NatsmqError {
    /// Initial connection to the broker failed. The client library error is
    /// kept as the source so callers can inspect its kind.
    #[error("NATS connection failed: {0}")]
    Connect(#[from] async_nats::ConnectError),

    #[error("NATS error: {0}")]
    Nats(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Serialization error: {0}")]
    Serialize(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Acknowledgement failed: {0}")]
    Ack(String),

    #[error("Request failed: {0}")]
    Request(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not connected")]
    NotConnected,
}

impl From<serde_json::Error> for NatsmqError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

impl From<async_nats::Error> for NatsmqError {
    fn from(err: async_nats::Error) -> Self {
        Self::Nats(err.to_string())
    }
}

/// Result type alias for natsmq operations
pub type Result<T> = std::result::Result<T, NatsmqError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_error_maps_to_serialize() {
        let err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: NatsmqError = err.into();
        assert!(matches!(err, NatsmqError::Serialize(_)));
        assert!(err.to_string().starts_with("Serialization error:"));
    }

    #[test]
    fn test_not_connected_message() {
        assert_eq!(NatsmqError::NotConnected.to_string(), "Not connected");
    }
}
