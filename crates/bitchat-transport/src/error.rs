/// Errors that can occur in the radio layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The operation did not finish within its time budget.
    #[error("operation timed out")]
    Timeout,

    /// Scanning for nearby peers failed.
    #[error("discovery failed: {0}")]
    DiscoveryFailed(String),

    /// Opening a link to a peer failed.
    #[error("connect failed: {0}")]
    ConnectFailed(String),

    /// The link is no longer usable (peer went away or was disconnected).
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Writing to a characteristic failed.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// The peer does not expose the requested capability.
    #[error("capability {0} not supported")]
    Unsupported(String),

    /// The radio was shut down.
    #[error("radio shut down")]
    Shutdown,
}

impl TransportError {
    /// Returns `true` for failures worth another connect attempt.
    ///
    /// Everything except an explicit shutdown is considered transient at this
    /// layer; whether the *peer* is acceptable is decided above the radio.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_shutdown_is_not_transient() {
        assert!(!TransportError::Shutdown.is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::ConnectFailed("busy".into()).is_transient());
    }

    #[test]
    fn test_display_includes_detail() {
        let err = TransportError::WriteFailed("gatt error 133".into());
        assert_eq!(err.to_string(), "write failed: gatt error 133");
    }
}
