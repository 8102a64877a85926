use concierge_core::error::ConciergeError;
use thiserror::Error;

/// Why microphone access is unavailable.
///
/// Variants mirror the platform capture error names so a backend can map
/// them with [`PermissionError::from_platform_name`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PermissionError {
    #[error("microphone permission has not been granted")]
    NotGranted,

    #[error("microphone access was denied")]
    NotAllowed,

    #[error("no microphone found")]
    NotFound,

    #[error("microphone is in use by another application")]
    NotReadable,

    #[error("microphone constraints could not be satisfied")]
    Overconstrained,

    #[error("microphone access is blocked by security settings")]
    Security,

    #[error("media capture not supported: {0}")]
    Unsupported(String),

    #[error("microphone error: {0}")]
    Other(String),
}

impl PermissionError {
    /// Map a platform error name (`NotAllowedError`, `NotFoundError`, ...)
    /// to a variant. Unknown names become [`PermissionError::Other`].
    pub fn from_platform_name(name: &str, detail: &str) -> Self {
        match name {
            "NotAllowedError" | "PermissionDeniedError" => PermissionError::NotAllowed,
            "NotFoundError" | "DevicesNotFoundError" => PermissionError::NotFound,
            "NotReadableError" | "TrackStartError" => PermissionError::NotReadable,
            "OverconstrainedError" => PermissionError::Overconstrained,
            "SecurityError" => PermissionError::Security,
            "NotSupportedError" => PermissionError::Unsupported(detail.to_string()),
            _ => PermissionError::Other(format!("{name}: {detail}")),
        }
    }

    /// Whether the user (or a policy acting for them) refused access.
    pub fn is_denial(&self) -> bool {
        matches!(self, PermissionError::NotAllowed | PermissionError::Security)
    }

    /// Troubleshooting text shown to the user.
    pub fn guidance(&self) -> &'static str {
        match self {
            PermissionError::NotGranted => {
                "Microphone permission is required for voice chat. Please allow microphone access and try again."
            }
            PermissionError::NotAllowed => {
                "Microphone access was denied. Please allow microphone access in your browser settings and try again."
            }
            PermissionError::NotFound => {
                "No microphone found. Please connect a microphone and try again."
            }
            PermissionError::NotReadable => {
                "Microphone is being used by another application. Please close other applications using the microphone and try again."
            }
            PermissionError::Overconstrained => {
                "Microphone constraints could not be satisfied. Please try again."
            }
            PermissionError::Security => {
                "Microphone access is blocked by security settings. Please enable microphone access for this site."
            }
            PermissionError::Unsupported(_) | PermissionError::Other(_) => {
                "Unable to access microphone. Please check your browser settings and try again."
            }
        }
    }
}

impl From<PermissionError> for ConciergeError {
    fn from(err: PermissionError) -> Self {
        ConciergeError::Permission(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_platform_name() {
        let cases = [
            ("NotAllowedError", PermissionError::NotAllowed),
            ("NotFoundError", PermissionError::NotFound),
            ("NotReadableError", PermissionError::NotReadable),
            ("OverconstrainedError", PermissionError::Overconstrained),
            ("SecurityError", PermissionError::Security),
        ];
        for (name, expected) in cases {
            assert_eq!(PermissionError::from_platform_name(name, ""), expected);
        }
        assert_eq!(
            PermissionError::from_platform_name("NotSupportedError", "no mediaDevices"),
            PermissionError::Unsupported("no mediaDevices".into())
        );
        assert!(matches!(
            PermissionError::from_platform_name("AbortError", "aborted"),
            PermissionError::Other(_)
        ));
    }

    #[test]
    fn test_guidance_text() {
        assert!(PermissionError::NotAllowed
            .guidance()
            .starts_with("Microphone access was denied."));
        assert!(PermissionError::NotFound
            .guidance()
            .starts_with("No microphone found."));
        assert_eq!(
            PermissionError::Other("x".into()).guidance(),
            PermissionError::Unsupported("y".into()).guidance()
        );
        assert!(PermissionError::NotGranted
            .guidance()
            .contains("required for voice chat"));
    }

    #[test]
    fn test_is_denial() {
        assert!(PermissionError::NotAllowed.is_denial());
        assert!(PermissionError::Security.is_denial());
        assert!(!PermissionError::NotFound.is_denial());
        assert!(!PermissionError::NotGranted.is_denial());
    }

    #[test]
    fn test_converts_to_concierge_error() {
        let err: ConciergeError = PermissionError::NotFound.into();
        assert!(matches!(err, ConciergeError::Permission(_)));
        assert_eq!(err.to_string(), "Permission error: no microphone found");
    }
}
