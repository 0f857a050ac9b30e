use thiserror::Error;

/// Errors raised while talking to a single vendor.
///
/// These never cross the provider boundary: a provider logs the error and
/// reports the attempt as failed, so the manager's retry loop always runs.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network timeout")]
    NetworkTimeout,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Invalid credentials or signature rejected")]
    InvalidAuthentication,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable")]
    ServiceUnavailable,

    #[error("Vendor rejected request ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Signing error: {0}")]
    Signing(String),

    #[error("Unexpected status code: {0}")]
    UnexpectedStatus(u16),
}

impl ProviderError {
    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &'static str {
        match self {
            ProviderError::NetworkTimeout => "NETWORK_TIMEOUT",
            ProviderError::NetworkError(_) => "NETWORK_ERROR",
            ProviderError::InvalidAuthentication => "INVALID_AUTHENTICATION",
            ProviderError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ProviderError::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ProviderError::Rejected { .. } => "REJECTED",
            ProviderError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            ProviderError::MalformedResponse(_) => "MALFORMED_RESPONSE",
            ProviderError::InvalidConfiguration(_) => "INVALID_CONFIGURATION",
            ProviderError::Signing(_) => "SIGNING_ERROR",
            ProviderError::UnexpectedStatus(_) => "UNEXPECTED_STATUS",
        }
    }

    /// Map a non-success HTTP status to the closest error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ProviderError::InvalidAuthentication,
            429 => ProviderError::RateLimitExceeded,
            500 | 502 | 503 | 504 => ProviderError::ServiceUnavailable,
            other => ProviderError::UnexpectedStatus(other),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::NetworkTimeout
        } else if err.is_decode() {
            ProviderError::MalformedResponse(err.to_string())
        } else {
            ProviderError::NetworkError(err.to_string())
        }
    }
}

/// Errors surfaced by a manager to its callers
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("no providers configured")]
    NoProviders,

    #[error("all providers failed")]
    AllProvidersFailed { attempts: u32 },

    #[error("provider {provider} failed after {attempts} attempts")]
    ProviderExhausted { provider: String, attempts: u32 },

    #[error("deadline exceeded after {attempts} attempts")]
    DeadlineExceeded { attempts: u32 },

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("duplicate provider name: {0}")]
    DuplicateProvider(String),
}

impl DispatchError {
    /// Number of provider attempts made before the error was returned
    pub fn attempts(&self) -> u32 {
        match self {
            DispatchError::AllProvidersFailed { attempts }
            | DispatchError::ProviderExhausted { attempts, .. }
            | DispatchError::DeadlineExceeded { attempts } => *attempts,
            DispatchError::NoProviders
            | DispatchError::UnknownProvider(_)
            | DispatchError::DuplicateProvider(_) => 0,
        }
    }
}
