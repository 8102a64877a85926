use thiserror::Error;

/// Top-level error type for the concierge system.
///
/// Subsystem crates define their own error types and implement
/// `From<SubsystemError> for ConciergeError` so that `?` works across crate
/// boundaries in the binary.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConciergeError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Permission error: {0}")]
    Permission(String),

    #[error("Session error: {0}")]
    Session(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for ConciergeError {
    fn from(err: toml::de::Error) -> Self {
        ConciergeError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for ConciergeError {
    fn from(err: toml::ser::Error) -> Self {
        ConciergeError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for ConciergeError {
    fn from(err: serde_json::Error) -> Self {
        ConciergeError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for concierge operations.
pub type Result<T> = std::result::Result<T, ConciergeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(ConciergeError, &str)> = vec![
            (
                ConciergeError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                ConciergeError::Permission("denied".to_string()),
                "Permission error: denied",
            ),
            (
                ConciergeError::Session("timed out".to_string()),
                "Session error: timed out",
            ),
            (
                ConciergeError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: ConciergeError = io_err.into();
        match &err {
            ConciergeError::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::NotFound),
            _ => panic!("Expected Io variant"),
        }
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_toml_error_maps_to_config() {
        let toml_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let err: ConciergeError = toml_err.into();
        assert!(matches!(err, ConciergeError::Config(_)));
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let json_err = serde_json::from_str::<serde_json::Value>("{broken").unwrap_err();
        let err: ConciergeError = json_err.into();
        assert!(matches!(err, ConciergeError::Serialization(_)));
    }
}
