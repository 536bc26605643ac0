use bytes::Bytes;
use std::fmt;

/// Error kinds the keyspace core raises. `Invariant` is fatal: callers that
/// see it should abort rather than try to keep serving requests, since it
/// means an invariant this module depends on no longer holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    InvalidArgument(String),
    WrongRole(String),
    BucketStateViolation(String),
    KeyNotFound,
    DuplicateTarget,
    AlreadyLocked(Bytes),
    SyntaxError(String),
    WrongType,
    Invariant(String),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    pub fn wrong_role(msg: impl Into<String>) -> Self {
        CoreError::WrongRole(msg.into())
    }

    pub fn bucket_state(msg: impl Into<String>) -> Self {
        CoreError::BucketStateViolation(msg.into())
    }

    pub fn syntax(msg: impl Into<String>) -> Self {
        CoreError::SyntaxError(msg.into())
    }

    /// Whether this error is fatal and must not be swallowed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CoreError::Invariant(_))
    }
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::InvalidArgument(m) => write!(f, "ERR invalid argument: {}", m),
            CoreError::WrongRole(m) => write!(f, "ERR wrong role: {}", m),
            CoreError::BucketStateViolation(m) => write!(f, "ERR {}", m),
            CoreError::KeyNotFound => write!(f, "ERR no such key"),
            CoreError::DuplicateTarget => write!(f, "ERR target already exists"),
            CoreError::AlreadyLocked(k) => write!(
                f,
                "ERR lock failed, only one key can be locked. locking key: {}",
                String::from_utf8_lossy(k)
            ),
            CoreError::SyntaxError(m) => write!(f, "ERR syntax error: {}", m),
            CoreError::WrongType => write!(
                f,
                "WRONGTYPE Operation against a key holding the wrong kind of value"
            ),
            CoreError::Invariant(m) => write!(f, "CRITICAL invariant violation: {}", m),
        }
    }
}

impl std::error::Error for CoreError {}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
