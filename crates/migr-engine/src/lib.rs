pub mod copier;
pub mod identity;
pub mod journal;
pub mod old_metadata;
pub mod progress;
pub mod replayer;

pub use copier::bulk_copy;
pub use journal::{count_since, read_log_since, run_transaction, JournalEntry, Op, WriteContext};
pub use old_metadata::MarkerStatus;
pub use replayer::{begin_draining, drain, DrainOutcome};
