use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EmberError {
    #[error(
        "Invalid key size: key must be 1-{} bytes",
        crate::constants::MAX_KEY_SIZE
    )]
    InvalidKeySize,

    #[error(
        "Invalid value size: value must be at most {} bytes",
        crate::constants::MAX_VALUE_SIZE
    )]
    InvalidValueSize,

    #[error("Key not found")]
    KeyNotFound,

    #[error("Key exists")]
    KeyExists,

    #[error("Not stored")]
    NotStored,

    #[error("Key is locked")]
    Locked,

    #[error("Key is locked, temporary failure")]
    LockedTmpFail,

    #[error("Out of memory")]
    NoMem,

    #[error("Operation would block on a background fetch")]
    WouldBlock,

    #[error("Store-if predicate failed")]
    PredicateFailed,

    #[error("Requested range cannot be satisfied")]
    Ranged,

    #[error("Connection must be disconnected")]
    Disconnect,

    #[error("Not my vbucket")]
    NotMyVBucket,

    #[error("Vbucket {0} does not exist")]
    UnknownVBucket(u16),

    #[error("Durability requirements are invalid")]
    DurabilityInvalid,

    #[error("Sync write timed out")]
    SyncWriteTimeout,

    #[error("Manifest update refused: {0}")]
    ManifestUpdate(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown stat group: {0}")]
    UnknownStatGroup(String),
}

pub type Result<T> = std::result::Result<T, EmberError>;

impl From<serde_json::Error> for EmberError {
    fn from(e: serde_json::Error) -> Self {
        EmberError::Serialization(e.to_string())
    }
}

impl EmberError {
    /// Whether the caller may retry the operation after backing off.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EmberError::NoMem | EmberError::WouldBlock | EmberError::LockedTmpFail
        )
    }
}
