use thiserror::Error;

/// Failure taxonomy for relay operations. Every operation either succeeds or
/// returns one of these; there is no partial success.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// Room code unknown or already destroyed. The two cases are
    /// indistinguishable to callers and equally final.
    #[error("room does not exist")]
    RoomNotFound,
    /// File id unknown in this room, or the whole room is gone.
    #[error("file does not exist")]
    FileNotFound,
    #[error("file of {size} bytes exceeds the {limit} byte upload limit")]
    PayloadTooLarge { size: u64, limit: u64 },
    #[error("host authorization required")]
    Unauthorized,
    /// Could not find an unused room code. Not a normal failure path: the
    /// code space is large enough that hitting this means the deployment is
    /// holding an absurd number of live rooms.
    #[error("room code space exhausted")]
    CodeSpaceExhausted,
}
