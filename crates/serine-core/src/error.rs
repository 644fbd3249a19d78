/// Core error types for serine.
#[derive(Debug, thiserror::Error)]
pub enum SerineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Chat error: {0}")]
    Chat(#[from] ChatError),

    #[error("Billing error: {0}")]
    Billing(#[from] BillingError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    #[error("No API key configured for provider")]
    NoApiKey,
}

/// Failures of a durable store collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

#[cfg(feature = "postgres-backend")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Errors a chat or feedback request can surface to its caller.
///
/// Generation failures never appear here: the pipeline replaces them with a
/// canned reply.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl From<StoreError> for ChatError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => ChatError::NotFound(what),
            StoreError::Unavailable(msg) => {
                ChatError::UpstreamUnavailable(msg)
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("Missing webhook signature")]
    MissingSignature,

    #[error("Webhook signature mismatch")]
    SignatureMismatch,

    #[error("Malformed webhook payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    #[error("Plan limit reached: {0}")]
    PlanLimit(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, SerineError>;
