use thiserror::Error;

pub type Result<T> = std::result::Result<T, InspectorError>;

/// Errors raised by the query, filter and coaddition layers.
///
/// Everything except [`InspectorError::Collaborator`] and
/// [`InspectorError::NotFound`] is a defect in the caller's input.
#[derive(Debug, Error)]
pub enum InspectorError {
    /// Malformed range, location or filter token.
    #[error("{0}")]
    Parse(String),

    /// Well-formed input outside the allowed policy range.
    #[error("{0}")]
    Validation(String),

    /// Unknown or ineligible filter column, unknown operator, or a value that
    /// cannot be cast to the column type.
    #[error("{0}")]
    Filter(String),

    #[error(
        "{actual} spectra is more than we can realistically display; \
         please limit your search to fewer than {max} spectra"
    )]
    LimitExceeded { actual: usize, max: usize },

    #[error("{0}")]
    NotFound(String),

    /// Failure inside an external catalog / spectrum collaborator.
    #[error("collaborator failed: {0:#}")]
    Collaborator(#[from] anyhow::Error),
}

impl InspectorError {
    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn filter(message: impl Into<String>) -> Self {
        Self::Filter(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Whether the error should be reported as a bad request.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::Parse(_) | Self::Validation(_) | Self::Filter(_) | Self::LimitExceeded { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_message_carries_counts() {
        let err = InspectorError::LimitExceeded { actual: 1500, max: 1000 };
        let msg = err.to_string();
        assert!(msg.starts_with("1500 spectra is more than"));
        assert!(msg.ends_with("fewer than 1000 spectra"));
        assert!(err.is_client_error());
    }

    #[test]
    fn collaborator_errors_are_not_client_errors() {
        let err: InspectorError = anyhow::anyhow!("disk gone").into();
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("disk gone"));
        assert!(!InspectorError::not_found("tile 5").is_client_error());
    }
}
