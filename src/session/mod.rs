//! Session turn-budget tracking

pub mod state;
pub mod store;

pub use state::{status_for, SessionContext, SessionLimits, SessionState, SessionStatus, Turn};
pub use store::{SessionStats, SessionStore};
