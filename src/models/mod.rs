pub mod pause;
pub mod session;

pub use pause::PauseInterval;
pub use session::{Session, SessionPatch, SyncStatus};
