//! Error types for configuration loading.

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// Field contained an invalid value.
    #[error("invalid configuration field")]
    InvalidField {
        /// Section that failed validation.
        section: &'static str,
        /// Field that failed validation.
        field: &'static str,
        /// Offending value when available.
        value: Option<String>,
        /// Machine-readable reason for the failure.
        reason: &'static str,
    },
}

impl ConfigError {
    pub(crate) fn invalid(
        section: &'static str,
        field: &'static str,
        value: impl Into<Option<String>>,
        reason: &'static str,
    ) -> Self {
        Self::InvalidField {
            section,
            field,
            value: value.into(),
            reason,
        }
    }

    /// Section and field the error refers to.
    #[must_use]
    pub const fn location(&self) -> (&'static str, &'static str) {
        match self {
            Self::InvalidField { section, field, .. } => (section, field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_field_reports_location() {
        let err = ConfigError::invalid("server", "port", Some("0".to_string()), "out of range");
        assert_eq!(err.to_string(), "invalid configuration field");
        assert_eq!(err.location(), ("server", "port"));
    }
}
