// src/error.rs

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SourceError {
    pub fn code_str(&self) -> &'static str {
        match self {
            SourceError::InvalidInput(_) => "invalid_input",
            SourceError::Authentication(_) => "auth_failed",
            SourceError::HttpRequest(_) => "upstream_error",
            SourceError::SerdeJson(_) => "parse_error",
            SourceError::MalformedRecord(_) => "malformed_record",
            SourceError::JobNotFound(_) => "job_not_found",
            SourceError::Timeout(_) => "timeout",
            SourceError::Config(_) => "config_error",
            SourceError::Internal(_) => "internal_error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_str_is_stable() {
        assert_eq!(SourceError::InvalidInput("x".into()).code_str(), "invalid_input");
        assert_eq!(SourceError::Timeout("30s".into()).code_str(), "timeout");
        assert_eq!(
            SourceError::MalformedRecord("no start time".into()).code_str(),
            "malformed_record"
        );
    }
}
