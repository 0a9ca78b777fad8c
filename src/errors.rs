use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("contract violation: {0}")]
    ContractViolation(String),

    #[error("runtime failure: {0}")]
    RuntimeFailure(String),

    #[error("resource limit exceeded: {0}")]
    ResourceExceeded(String),

    #[error("status store unavailable: {0}")]
    StoreUnavailable(#[from] redis::RedisError),
}
