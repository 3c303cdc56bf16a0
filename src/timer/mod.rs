pub mod controller;
mod error;
mod reconcile;
pub mod state;

pub use controller::{TimerConfig, TimerController, UpdateCallback};
pub use error::TimerError;
pub use reconcile::Reconciliation;
pub use state::{TimerState, TimerStatus};
