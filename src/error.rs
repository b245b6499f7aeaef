/// GraphQL-shaped error surfaced to a single subscription's observer.
///
/// Mirrors the shape the wire protocol uses for `error`/`connection_error`
/// payloads so callers can render it the same way they would a GraphQL
/// response error.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct GraphQlError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<i64>,
}

impl GraphQlError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error_type: None,
            error_code: None,
        }
    }
}

/// Errors raised while building per-mode authorization headers.
#[derive(thiserror::Error, Debug, Clone)]
pub enum AuthError {
    #[error("authMode {0:?} requires an explicit authToken but none was provided")]
    MissingBearerToken(crate::auth::AuthMode),
    #[error("authMode {0:?} requires a session provider but none was configured")]
    MissingSessionProvider(crate::auth::AuthMode),
    #[error("failed to sign IAM/SIGV4 request: {0}")]
    SigningFailure(String),
    #[error("extra-headers supplier failed: {0}")]
    ExtraHeadersFailure(String),
}

/// Errors raised during the connect/handshake sequence.
#[derive(thiserror::Error, Debug, Clone)]
pub enum HandshakeError {
    #[error("auth header construction failed: {0}")]
    Auth(#[from] AuthError),
    #[error("invalid endpoint URL {0:?}: {1}")]
    InvalidEndpoint(String, String),
    #[error("websocket connect failed: {0}")]
    ConnectFailure(String),
    #[error("socket closed before handshake completed")]
    ClosedBeforeOpen,
    #[error("timed out waiting for connection_ack")]
    AckTimeout,
    #[error("server rejected connection: {error_type} ({error_code:?})")]
    ConnectionError {
        error_type: String,
        error_code: Option<i64>,
    },
}

impl HandshakeError {
    /// Whether the retry utility should abandon retrying after this error.
    pub fn is_non_retryable(&self, non_retryable_codes: &[i64]) -> bool {
        match self {
            HandshakeError::ConnectionError { error_code, .. } => error_code
                .map(|code| non_retryable_codes.contains(&code))
                .unwrap_or(false),
            HandshakeError::Auth(_) => true,
            _ => false,
        }
    }
}

/// Errors scoped to a single subscription.
#[derive(thiserror::Error, Debug, Clone)]
pub enum SubscriptionError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("start-ack timed out waiting for the server to acknowledge the subscription")]
    StartAckTimeout,
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error(transparent)]
    Auth(#[from] AuthError),
}

/// Converts a typed provider-side failure into the GraphQL-shaped error an
/// observer actually receives. An error scoped to one subscription only
/// terminates that observer, not the shared provider.
impl From<SubscriptionError> for GraphQlError {
    fn from(error: SubscriptionError) -> Self {
        GraphQlError::new(error.to_string())
    }
}

/// Top-level errors surfaced by [`crate::provider::RealtimeProvider`] operations
/// that are not scoped to a single subscription.
#[derive(thiserror::Error, Debug, Clone)]
pub enum ProviderError {
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    #[error("provider is closed")]
    Closed,
}
