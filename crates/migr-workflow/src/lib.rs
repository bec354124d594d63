pub mod controller;
pub mod new_metadata;
pub mod state;

pub use controller::{cleanup_old, cutover, drain, migrate, plan, reset, status, MigrateOutcome, StatusReport};
pub use state::{Event, Phase};
