use super::types::AuditError;

/// Whether an error is the user's to fix or a technical failure of the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    User,
    Technical,
}

#[derive(Debug, Clone)]
pub struct ErrorClassification {
    pub error_type: &'static str,
    pub retryable: bool,
    pub kind: ErrorKind,
}

impl ErrorClassification {
    const fn user(error_type: &'static str) -> Self {
        Self { error_type, retryable: false, kind: ErrorKind::User }
    }

    const fn technical(error_type: &'static str, retryable: bool) -> Self {
        Self { error_type, retryable, kind: ErrorKind::Technical }
    }
}

impl AuditError {
    /// Classify this error to determine its type and whether it can be retried.
    pub fn classify(&self) -> ErrorClassification {
        match self {
            // Retryable errors (single classifier HTTP attempts)
            AuditError::RateLimit(_) => ErrorClassification::technical("RateLimitError", true),
            AuditError::Network(_) => ErrorClassification::technical("NetworkError", true),
            AuditError::Timeout(_) => ErrorClassification::technical("TimeoutError", true),

            // User errors
            AuditError::Simple(_) => ErrorClassification::user("UserError"),
            AuditError::Config(_) => ErrorClassification::user("ConfigError"),
            AuditError::Authentication(_) => ErrorClassification::user("AuthenticationError"),

            // Technical, run-aborting
            AuditError::Technical(_) => ErrorClassification::technical("TechnicalError", false),
            AuditError::Parse(_) => ErrorClassification::technical("ParseError", false),
            AuditError::Classifier(_) => ErrorClassification::technical("ClassifierError", false),
            AuditError::Cancelled(_) => ErrorClassification::technical("CancelledError", false),
            AuditError::Io(_) => ErrorClassification::technical("IoError", false),
            AuditError::Json(_) => ErrorClassification::technical("JsonError", false),
            AuditError::Yaml(_) => ErrorClassification::technical("YamlError", false),
            AuditError::Xml(_) => ErrorClassification::technical("XmlError", false),
            AuditError::Zip(_) => ErrorClassification::technical("ArchiveError", false),
            AuditError::Internal(_) => ErrorClassification::technical("InternalError", false),
        }
    }

    pub fn is_user_error(&self) -> bool {
        self.classify().kind == ErrorKind::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_is_retryable() {
        let err = AuditError::RateLimit("too many requests".into());
        let class = err.classify();
        assert!(class.retryable);
        assert_eq!(class.error_type, "RateLimitError");
        assert_eq!(class.kind, ErrorKind::Technical);
    }

    #[test]
    fn test_simple_error_is_user_error() {
        let err = AuditError::simple("Folder(s) not found");
        let class = err.classify();
        assert!(!class.retryable);
        assert_eq!(class.kind, ErrorKind::User);
        assert!(err.is_user_error());
    }

    #[test]
    fn test_auth_error_not_retryable() {
        let err = AuditError::Authentication("bad token".into());
        let class = err.classify();
        assert!(!class.retryable);
        assert_eq!(class.error_type, "AuthenticationError");
    }

    #[test]
    fn test_cancelled_is_technical_and_final() {
        let err = AuditError::Cancelled("interrupted".into());
        let class = err.classify();
        assert!(!class.retryable);
        assert_eq!(class.kind, ErrorKind::Technical);
    }

    #[test]
    fn test_network_error_retryable() {
        let err = AuditError::Network("connection refused".into());
        assert!(err.classify().retryable);
    }

    #[test]
    fn test_io_error_is_technical() {
        let err: AuditError = std::io::Error::new(std::io::ErrorKind::NotFound, "gone").into();
        assert!(!err.is_user_error());
        assert_eq!(err.classify().error_type, "IoError");
    }

    #[test]
    fn test_simple_error_display_is_bare_message() {
        let err = AuditError::simple("No filter set matches 'x'");
        assert_eq!(err.to_string(), "No filter set matches 'x'");
    }
}
