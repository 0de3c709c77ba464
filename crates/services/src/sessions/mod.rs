mod pool;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use pool::{DirectionMode, Drawn, SelectionMode, SessionPool, SessionProgress};
