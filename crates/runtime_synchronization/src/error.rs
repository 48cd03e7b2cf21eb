/// A non-blocking operation could not complete without waiting.
///
/// Returned by `try_lock` when the lock is held in a conflicting mode, and by `try_upgrade` when the caller is not the
/// only reader.  This is ordinary control flow: misuse of a primitive panics instead.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, thiserror::Error)]
#[error("The operation would block")]
pub struct WouldBlock;

pub type Result<T, E = WouldBlock> = std::result::Result<T, E>;
