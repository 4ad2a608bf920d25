use thiserror::Error;

/// Errors produced by the deterministic core.
///
/// The staking and scheduler variants carry stable `(module, code)` pairs
/// that are part of the interface contract towards RPC consumers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("staking: invalid argument")]
    InvalidArgument,
    #[error("staking: invalid signature")]
    InvalidSignature,
    #[error("staking: insufficient balance")]
    InsufficientBalance,
    #[error("staking: insufficient stake")]
    InsufficientStake,
    #[error("staking: forbidden by policy")]
    Forbidden,
    #[error("staking: invalid threshold")]
    InvalidThreshold,
    #[error("scheduler: failed to elect any validators")]
    NoValidators,
    #[error("scheduler: insufficient validators")]
    InsufficientValidators,
    #[error("consensus: halt epoch reached")]
    Halted,
    #[error("state corruption: {0}")]
    StateCorruption(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),
    #[error("cryptography error: {0}")]
    Crypto(String),
    #[error("genesis error: {0}")]
    Genesis(String),
    #[error("transaction rejected: {0}")]
    Transaction(String),
}

impl CoreError {
    pub fn module(&self) -> &'static str {
        match self {
            CoreError::InvalidArgument
            | CoreError::InvalidSignature
            | CoreError::InsufficientBalance
            | CoreError::InsufficientStake
            | CoreError::Forbidden
            | CoreError::InvalidThreshold => "staking",
            CoreError::NoValidators | CoreError::InsufficientValidators => "scheduler",
            _ => "core",
        }
    }

    pub fn code(&self) -> u32 {
        match self {
            CoreError::InvalidArgument => 1,
            CoreError::InvalidSignature => 2,
            CoreError::InsufficientBalance => 3,
            CoreError::InsufficientStake => 4,
            CoreError::Forbidden => 5,
            CoreError::InvalidThreshold => 6,
            CoreError::NoValidators => 1,
            CoreError::InsufficientValidators => 2,
            _ => 0,
        }
    }

    /// Fatal errors abort the block; the replica must not continue past them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CoreError::NoValidators
                | CoreError::InsufficientValidators
                | CoreError::Halted
                | CoreError::StateCorruption(_)
        )
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
