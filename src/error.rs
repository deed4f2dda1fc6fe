#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum FaersLensError {
    #[error("HTTP client initialization failed: {0}")]
    HttpClientInit(reqwest::Error),

    #[error("Invalid {constraint}: {message}")]
    InvalidQuery {
        constraint: &'static str,
        message: String,
    },

    /// The reason is kept for logs; the message shown to users stays generic.
    #[error("{api} is unavailable right now (gave up after {attempts} attempts). Try again shortly.")]
    BackendUnavailable {
        api: String,
        attempts: u32,
        reason: String,
    },

    #[error("Unexpected response from {api}: {message}")]
    BackendProtocol { api: String, message: String },

    #[error("Request cancelled before {api} answered")]
    Cancelled { api: String },

    #[error("Template error: {0}")]
    Template(#[from] minijinja::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FaersLensError {
    pub(crate) fn invalid(constraint: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            constraint,
            message: message.into(),
        }
    }

    /// True for failures a user can fix by changing the request.
    pub fn is_user_error(&self) -> bool {
        matches!(self, Self::InvalidQuery { .. })
    }
}
