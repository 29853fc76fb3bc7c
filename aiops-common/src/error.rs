use thiserror::Error;

/// Error taxonomy shared across the control plane. Variants map onto the
/// kinds documented for the core: transient/permanent external failures,
/// authorization denial, not-found, precondition violations, and internal
/// invariant breaches.
#[derive(Debug, Error)]
pub enum Error {
    #[error("transient external failure: {0}")]
    TransientExternal(String),

    #[error("permanent external failure: {0}")]
    PermanentExternal(String),

    #[error("authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("precondition violated: {0}")]
    PreconditionViolated(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Redis(#[from] redis::RedisError),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
