//! Error taxonomy for the device layer.

/// Result type for device and gateway operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while translating or routing device traffic.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A raw value has no mapping in the attribute's lookup table.
    ///
    /// Recovered inside `Device::decode`: the key is dropped and the rest of
    /// the message still decodes.
    #[error("Unknown code {code} for attribute '{attr}'")]
    UnknownCode { attr: String, code: String },

    /// Inbound traffic referenced an identity missing from the registry.
    #[error("Unknown device: {0}")]
    UnknownDevice(String),

    /// A requested attribute could not be encoded for the wire.
    #[error("Encode rejected for '{attr}': {reason}")]
    EncodeRejected { attr: String, reason: String },

    /// The transport failed to publish a command.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// A wire payload could not be parsed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    pub(crate) fn rejected(attr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EncodeRejected {
            attr: attr.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn unknown_code(attr: impl Into<String>, code: impl std::fmt::Display) -> Self {
        Self::UnknownCode {
            attr: attr.into(),
            code: code.to_string(),
        }
    }

    /// Whether this error should be reported to the caller of a command as a
    /// failed command.
    pub fn is_command_failure(&self) -> bool {
        matches!(self, Self::EncodeRejected { .. } | Self::Publish(_))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
