/// Typed failure taxonomy for the Gmail wrapper. Transient variants are
/// retried by callers; permanent ones are handled per call site.
#[derive(Debug, thiserror::Error)]
pub enum MailApiError {
    #[error("access token expired and refresh failed")]
    AuthExpired,
    #[error("gmail quota exceeded (retry-after: {retry_after:?}s)")]
    QuotaExceeded { retry_after: Option<u64> },
    #[error("gmail server error: {0}")]
    ServerError(String),
    #[error("gmail rate limited")]
    RateLimited,
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid recipient: {0}")]
    RecipientInvalid(String),
    #[error("message too large")]
    MessageTooLarge,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MailApiError {
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MailApiError::QuotaExceeded { .. }
                | MailApiError::ServerError(_)
                | MailApiError::RateLimited
                | MailApiError::Network(_)
        )
    }

    /// Stable label used in EPQ error columns, DLQ rows and metrics.
    pub fn error_type(&self) -> &'static str {
        match self {
            MailApiError::AuthExpired => "auth_expired",
            MailApiError::QuotaExceeded { .. } => "quota_exceeded",
            MailApiError::ServerError(_) => "gmail_api_failure",
            MailApiError::RateLimited => "rate_limited",
            MailApiError::InvalidRequest(_) => "invalid_request",
            MailApiError::NotFound(_) => "not_found",
            MailApiError::RecipientInvalid(_) => "recipient_invalid",
            MailApiError::MessageTooLarge => "message_too_large",
            MailApiError::Conflict(_) => "conflict",
            MailApiError::Network(_) => "network_error",
            MailApiError::Other(_) => "gmail_api_failure",
        }
    }
}
