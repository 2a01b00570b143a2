use std::borrow::Cow;

use thiserror::Error;

/// Location error types, as surfaced by the GPS source and permission gate.
///
/// The fusion layer never sees these: every GPS failure collapses to
/// `LocationStatus::Error`. Subtypes exist for UI display only.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LocationError {
    #[error("Location permission denied")]
    PermissionDenied,

    #[error("Position unavailable")]
    PositionUnavailable,

    #[error("Location request timed out")]
    Timeout,

    #[error("Geolocation not supported")]
    NotSupported,

    #[error("Geolocation requires a secure (HTTPS) context")]
    InsecureContext,

    #[error("Unknown location error: {0}")]
    Unknown(String),
}

impl LocationError {
    /// Maps a platform geolocation error code (1 = denied, 2 = unavailable, 3 = timeout).
    pub fn from_code(code: u16) -> Self {
        match code {
            1 => LocationError::PermissionDenied,
            2 => LocationError::PositionUnavailable,
            3 => LocationError::Timeout,
            other => LocationError::Unknown(format!("code {}", other)),
        }
    }

    /// Platform code for this error, when one exists.
    pub fn code(&self) -> Option<u16> {
        match self {
            LocationError::PermissionDenied => Some(1),
            LocationError::PositionUnavailable => Some(2),
            LocationError::Timeout => Some(3),
            _ => None,
        }
    }

    /// Human-readable hint for the status card.
    pub fn user_message(&self) -> &'static str {
        match self {
            LocationError::PermissionDenied => {
                "Location access denied by user. Please enable location permissions in your settings."
            }
            LocationError::PositionUnavailable => {
                "Location information unavailable. GPS may be disabled or the signal is poor."
            }
            LocationError::Timeout => {
                "Location request timed out. Please try again or check your GPS signal."
            }
            LocationError::NotSupported => "Geolocation is not supported on this platform.",
            LocationError::InsecureContext => {
                "Geolocation requires HTTPS. Please access the site using HTTPS."
            }
            LocationError::Unknown(_) => "Unknown location error occurred.",
        }
    }

    /// `user_message`, plus the platform's own text for unknown errors.
    pub fn detail(&self) -> Cow<'static, str> {
        match self {
            LocationError::Unknown(msg) if !msg.is_empty() => {
                Cow::Owned(format!("{} ({})", self.user_message(), msg))
            }
            _ => Cow::Borrowed(self.user_message()),
        }
    }
}

/// Errors loading a `TrackerConfig`.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Errors loading a recorded session.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read log: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse log: {0}")]
    Parse(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(LocationError::from_code(1), LocationError::PermissionDenied);
        assert_eq!(LocationError::from_code(2), LocationError::PositionUnavailable);
        assert_eq!(LocationError::from_code(3), LocationError::Timeout);
        assert!(matches!(LocationError::from_code(9), LocationError::Unknown(_)));
        assert_eq!(LocationError::Timeout.code(), Some(3));
        assert_eq!(LocationError::InsecureContext.code(), None);
    }

    #[test]
    fn test_user_message() {
        assert!(LocationError::InsecureContext.user_message().contains("HTTPS"));
        assert_eq!(
            LocationError::NotSupported.to_string(),
            "Geolocation not supported"
        );
    }

    #[test]
    fn test_detail_keeps_platform_message() {
        let err = LocationError::Unknown("kCLErrorDomain error 0".into());
        assert_eq!(
            err.detail(),
            "Unknown location error occurred. (kCLErrorDomain error 0)"
        );
        assert_eq!(LocationError::Unknown(String::new()).detail(), err.user_message());
        assert!(matches!(LocationError::Timeout.detail(), Cow::Borrowed(_)));
        assert_eq!(LocationError::Timeout.detail(), LocationError::Timeout.user_message());
    }
}
