//! Error taxonomy.
//!
//! Candidate-caused failures (runtime faults, timeouts, memory exhaustion) are
//! never errors here: they are reported as data inside `ExecutionResult`.
//! Only request rejections and infrastructure failures surface as `ServiceError`.

use std::time::Duration;
use thiserror::Error;

/// The isolation mechanism itself failed, outside the candidate's control.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("docker daemon unavailable: {0}")]
    Unavailable(#[source] bollard::errors::Error),

    #[error("failed to prepare image '{image}': {source}")]
    Image {
        image: String,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("failed to {stage} sandbox container: {source}")]
    Container {
        stage: &'static str,
        #[source]
        source: bollard::errors::Error,
    },

    #[error("sandbox crashed: {0}")]
    Crashed(String),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog backend error: {0}")]
    Backend(String),

    #[error("malformed exercise definition: {0}")]
    Malformed(String),
}

impl From<redis::RedisError> for CatalogError {
    fn from(e: redis::RedisError) -> Self {
        CatalogError::Backend(e.to_string())
    }
}

/// Caller-visible failures
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("exercise '{0}' not found")]
    NotFound(String),

    #[error("no reference solution available for exercise '{0}'")]
    NoReferenceSolution(String),

    #[error("grader failure: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("service busy: no execution slot became free within {}ms", .0.as_millis())]
    Busy(Duration),

    #[error("exercise catalog unavailable: {0}")]
    Catalog(#[from] CatalogError),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    /// Only infrastructure faults are worth a second attempt; candidate code
    /// is assumed deterministic.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Sandbox(_))
    }

    /// Stable machine-readable kind, used on the wire and as a metric label
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidRequest(_) => "invalid_request",
            ServiceError::NotFound(_) => "not_found",
            ServiceError::NoReferenceSolution(_) => "no_reference_solution",
            ServiceError::Sandbox(_) => "sandbox_fault",
            ServiceError::Busy(_) => "service_busy",
            ServiceError::Catalog(_) => "catalog_unavailable",
        }
    }
}
