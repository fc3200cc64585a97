//! Session management

pub mod registry;
pub mod state;

pub use registry::SessionRegistry;
pub use state::{Session, SessionSnapshot, SessionState};
