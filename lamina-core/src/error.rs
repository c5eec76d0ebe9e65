//! Error types for lamina

use thiserror::Error;

/// Result type alias for lamina operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lamina
///
/// Errors fall into two tiers. Data errors ([`Error::IllegalRawData`]) are
/// raised while decoding malformed bytes and are contained at the factory
/// boundary, where they become an illegal-data terminal packet instead of
/// propagating. Programmer errors ([`Error::Build`], [`Error::InvalidField`])
/// are raised synchronously by builders and are never swallowed.
#[derive(Error, Debug)]
pub enum Error {
    /// Raw data could not be decoded as the expected protocol
    #[error("illegal raw data: {0}")]
    IllegalRawData(String),

    /// Packet construction error
    #[error("packet build error: {0}")]
    Build(String),

    /// Invalid field value supplied to a builder
    #[error("invalid field '{name}': {reason}")]
    InvalidField { name: String, reason: String },

    /// Fragmentation error
    #[error("fragmentation error: {0}")]
    Fragmentation(String),

    /// Reassembly error
    #[error("reassembly error: {0}")]
    Reassembly(String),

    /// Factory binding configuration error
    #[error("factory configuration error: {0}")]
    FactoryConfig(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create an illegal-raw-data error with a custom message
    pub fn illegal_raw_data<S: Into<String>>(msg: S) -> Self {
        Error::IllegalRawData(msg.into())
    }

    /// Create a packet build error with a custom message
    pub fn build<S: Into<String>>(msg: S) -> Self {
        Error::Build(msg.into())
    }

    /// Create an invalid field error
    pub fn invalid_field<S: Into<String>>(name: S, reason: S) -> Self {
        Error::InvalidField {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::illegal_raw_data("header too short");
        assert_eq!(err.to_string(), "illegal raw data: header too short");

        let err = Error::invalid_field("ihl", "must be at least 5");
        assert_eq!(err.to_string(), "invalid field 'ihl': must be at least 5");
    }
}
