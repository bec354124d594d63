pub mod copy_plan;
pub mod diff;
pub mod preflight;

pub use copy_plan::{build_copy_plan, TableCopyPlan};
pub use diff::{diff, ColumnMapping, ColumnStrategy, SchemaDiff, TableColumnDiff};
pub use preflight::{preflight, PreflightReport};
