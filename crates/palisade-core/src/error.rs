use thiserror::Error;

pub type CoreResult<T> = Result<T, CoreError>;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The caller handed us something malformed. Not retried.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A certificate could not be built or signed.
    #[error("signing error: {0}")]
    Signing(String),

    /// A backing capability (key oracle, registry, cluster store) failed.
    /// Surfaced to the caller, never retried inside a request.
    #[error("dependency failure: {0}")]
    Dependency(String),
}
