//! Entity layer errors.

/// Result type for entity operations.
pub type Result<T> = std::result::Result<T, EntityError>;

#[derive(Debug, thiserror::Error)]
pub enum EntityError {
    /// Encoding or publishing the command failed.
    #[error(transparent)]
    Device(#[from] xgate_devices::Error),

    /// The device backing the entity is gone from the registry.
    #[error("Device removed: {0}")]
    DeviceRemoved(String),

    /// No factory is registered for a platform.
    #[error("No entity factory for platform '{0}'")]
    UnknownPlatform(String),

    /// A command argument the adapter can't express.
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
}

impl EntityError {
    /// Whether the command reached the device layer and failed there.
    pub fn is_command_failure(&self) -> bool {
        match self {
            Self::Device(e) => e.is_command_failure(),
            Self::InvalidCommand(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_is_transparent() {
        let err: EntityError = xgate_devices::Error::Publish("offline".into()).into();
        assert_eq!(err.to_string(), "Publish failed: offline");
        assert!(err.is_command_failure());
        assert!(!EntityError::DeviceRemoved("lumi.1".into()).is_command_failure());
    }
}
