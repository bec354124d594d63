//! Migration Controller (C9): orchestrates `migrate → drain → cutover`, plus
//! `status`, `reset`, `cleanup-old`, and `plan` (§4.8). Each phase is
//! instrumented so a failing phase's fields and error land in the logs even
//! when the caller only prints a terse summary.

use std::path::Path;

use tracing::{info, instrument, warn};

use migr_core::db::{create_pool, DbPool};
use migr_core::ddl::render_schema;
use migr_core::error::{MigrError, Result};
use migr_core::introspect::introspect;
use migr_core::model::Schema;
use migr_engine::old_metadata::{self, MarkerStatus};
use migr_engine::{identity, progress};
use migr_plan::{build_copy_plan, preflight, PreflightReport, TableCopyPlan};

use crate::new_metadata::{self, SchemaIdentity, Status};
use crate::state::{self, Event, Phase};

#[derive(Debug, Clone, PartialEq)]
pub struct MigrateOutcome {
    pub schema_hash: String,
    pub tables_copied: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub marker: Option<String>,
    pub journal_entries: i64,
    pub new_status: Option<String>,
    pub schema_hash: Option<String>,
    pub schema_commit: Option<String>,
    pub id_mappings: Option<i64>,
    pub pending_replay: Option<i64>,
}

fn introspect_source(old_pool: &DbPool) -> Result<Schema> {
    let conn = migr_core::db::get(old_pool)?;
    introspect(&conn)
}

/// Run the `migrate` phase: preflight, materialize the new DB, bulk-copy, and
/// only then install the old-DB journal so recording begins after the data
/// is in place (§4.8, `migrate`).
#[instrument(skip(target), fields(new_db_path))]
pub fn migrate(
    old_db_path: &str,
    new_db_path: &str,
    target: &Schema,
    schema_commit: Option<String>,
) -> Result<MigrateOutcome> {
    let current = if Path::new(new_db_path).exists() {
        let probe = create_pool(new_db_path)?;
        let conn = migr_core::db::get(&probe)?;
        let has_identity = new_metadata::read_identity(&conn)?.is_some();
        match new_metadata::read_status(&conn)? {
            Some(Status::Ready) => Phase::Ready,
            // `Recording` is a stand-in for "already migrated" here: every
            // non-`Absent` phase is equally illegal for `migrate`.
            Some(Status::InProgress) if has_identity => Phase::Recording,
            _ => Phase::Absent,
        }
    } else {
        Phase::Absent
    };
    if state::validate_transition(&current, &Event::Migrate).is_err() {
        return Err(MigrError::InvalidInput(format!(
            "{new_db_path} already has a migration identity; run `reset` before migrating again"
        )));
    }

    let old_pool = create_pool(old_db_path)?;
    let source = introspect_source(&old_pool)?;

    let report = preflight(&source, target);
    if !report.is_runnable() {
        warn!(unsupported = ?report.unsupported, "preflight failed");
        return Err(MigrError::PreflightFailed {
            supported: report.supported,
            unsupported: report.unsupported,
        });
    }
    for w in &report.composite_pk_warnings {
        warn!(warning = %w, "composite-pk identity warning");
    }

    let new_pool = create_pool(new_db_path)?;
    {
        let conn = migr_core::db::get(&new_pool)?;
        conn.execute_batch(&render_schema(target))?;
        let identity = SchemaIdentity {
            schema_hash: report.schema_hash.clone(),
            schema_commit,
            created_utc: chrono::Utc::now().to_rfc3339(),
        };
        new_metadata::install(&conn, &identity)?;
        progress::install(&conn)?;
    }

    let plans = build_copy_plan(&source, target, &report);
    info!(tables = plans.len(), "starting bulk copy");
    migr_engine::bulk_copy(&old_pool, &new_pool, target, &plans)?;

    {
        let old_conn = migr_core::db::get(&old_pool)?;
        old_metadata::install(&old_conn)?;
    }

    info!(schema_hash = %report.schema_hash, "migrate complete, recording started");
    Ok(MigrateOutcome { schema_hash: report.schema_hash, tables_copied: plans.len() })
}

fn load_plans(old_pool: &DbPool, target: &Schema) -> Result<(Schema, Vec<TableCopyPlan>)> {
    let source = introspect_source(old_pool)?;
    let report = preflight(&source, target);
    let plans = build_copy_plan(&source, target, &report);
    Ok((source, plans))
}

/// Run the `drain` phase: flip the old-DB marker to `draining`, then replay
/// the journal until `drain_completed=1` (§4.8, `drain`; §4.7).
#[instrument(skip(target))]
pub fn drain(old_db_path: &str, new_db_path: &str, target: &Schema) -> migr_core::error::Result<migr_engine::DrainOutcome> {
    let old_pool = create_pool(old_db_path)?;
    let new_pool = create_pool(new_db_path)?;

    let current = {
        let conn = migr_core::db::get(&old_pool)?;
        match old_metadata::marker_status(&conn)? {
            None => Phase::Absent,
            Some(MarkerStatus::Recording) => Phase::Recording,
            Some(MarkerStatus::Draining) => Phase::Draining,
        }
    };
    if state::validate_transition(&current, &Event::DrainStarted).is_err() {
        return Err(MigrError::InvalidInput("no migration marker present; run migrate first".into()));
    }

    let (_, plans) = load_plans(&old_pool, target)?;
    migr_engine::begin_draining(&old_pool)?;
    let outcome = migr_engine::drain(&old_pool, &new_pool, target, &plans)?;
    info!(groups = outcome.groups_replayed, completed = outcome.drain_completed, "drain pass complete");
    Ok(outcome)
}

/// Run `cutover`: requires `status=in_progress` and `drain_completed=1`.
/// Idempotent once already `ready` (§4.8, `cutover`).
#[instrument]
pub fn cutover(new_db_path: &str) -> Result<()> {
    let new_pool = create_pool(new_db_path)?;
    let mut conn = migr_core::db::get(&new_pool)?;

    let status = new_metadata::read_status(&conn)?
        .ok_or_else(|| MigrError::InvalidInput("no migration status on new DB; run migrate first".into()))?;
    let drain_completed = progress::read(&conn)?.map(|p| p.drain_completed).unwrap_or(false);

    // Marker state (recording vs. draining) doesn't change whether `cutover`
    // is legal, so `Recording` stands in for "not yet drained" here.
    let current = match status {
        Status::Ready => Phase::Ready,
        Status::InProgress if drain_completed => Phase::Drained,
        Status::InProgress => Phase::Recording,
    };
    if state::validate_transition(&current, &Event::Cutover).is_err() {
        return Err(MigrError::CutoverBlocked { drain_completed: false });
    }
    if current == Phase::Ready {
        info!("cutover already complete, no-op");
        return Ok(());
    }

    let tx = conn.transaction()?;
    new_metadata::set_status(&tx, Status::Ready)?;
    identity::drop_table(&tx)?;
    progress::drop_table(&tx)?;
    tx.commit()?;
    info!("cutover complete, new DB is authoritative");
    Ok(())
}

/// Run `cleanup-old`: requires marker status is not `recording` (§4.8).
#[instrument]
pub fn cleanup_old(old_db_path: &str) -> Result<()> {
    let old_pool = create_pool(old_db_path)?;
    let conn = migr_core::db::get(&old_pool)?;
    // No marker at all is treated as already cleaned (§4.8: idempotent when
    // the tables are already absent), so it maps to the same phase as the
    // cleaned terminal state rather than `Absent`.
    let current = match old_metadata::marker_status(&conn)? {
        Some(MarkerStatus::Recording) => Phase::Recording,
        Some(MarkerStatus::Draining) => Phase::Draining,
        None => Phase::ReadyOldCleaned,
    };
    if state::validate_transition(&current, &Event::CleanupOld).is_err() {
        return Err(MigrError::CleanupRefused { reason: "marker is still recording".into() });
    }
    old_metadata::drop_all(&conn)?;
    info!("old-DB metadata dropped");
    Ok(())
}

/// Run `reset`: drops old-side markers unconditionally and deletes the new
/// DB file only when its status is not `ready` (§4.8, `reset`).
#[instrument]
pub fn reset(old_db_path: &str, new_db_path: Option<&str>) -> Result<()> {
    if let Some(new_db_path) = new_db_path {
        if Path::new(new_db_path).exists() {
            let new_pool = create_pool(new_db_path)?;
            let status = {
                let conn = migr_core::db::get(&new_pool)?;
                new_metadata::read_status(&conn)?
            };
            // Marker state doesn't affect whether `reset` may delete the new
            // DB, so any non-`Ready` status stands in for "some in-flight
            // phase" here; `reset` is legal from all of them alike.
            let current = if status == Some(Status::Ready) { Phase::Ready } else { Phase::Recording };
            if state::validate_transition(&current, &Event::Reset).is_err() {
                return Err(MigrError::ResetRefused { reason: "new DB status is ready".into() });
            }
            drop(new_pool);
            std::fs::remove_file(new_db_path)?;
        }
    }

    if Path::new(old_db_path).exists() {
        let old_pool = create_pool(old_db_path)?;
        let conn = migr_core::db::get(&old_pool)?;
        old_metadata::drop_all(&conn)?;
    }
    info!("reset complete");
    Ok(())
}

/// Read-only snapshot from both DBs for `status` (§4.8, `status`).
#[instrument]
pub fn status(old_db_path: Option<&str>, new_db_path: Option<&str>) -> Result<StatusReport> {
    let (marker, journal_entries) = match old_db_path.filter(|p| Path::new(p).exists()) {
        Some(path) => {
            let pool = create_pool(path)?;
            let conn = migr_core::db::get(&pool)?;
            let marker = old_metadata::marker_status(&conn)?;
            let count = old_metadata::log_entry_count(&conn)?;
            (marker.map(|m| m.as_str().to_string()), count)
        }
        None => (None, 0),
    };

    let mut report = StatusReport {
        marker,
        journal_entries,
        new_status: None,
        schema_hash: None,
        schema_commit: None,
        id_mappings: None,
        pending_replay: None,
    };

    if let Some(path) = new_db_path.filter(|p| Path::new(p).exists()) {
        let pool = create_pool(path)?;
        let conn = migr_core::db::get(&pool)?;
        if let Some(identity) = new_metadata::read_identity(&conn)? {
            report.schema_hash = Some(identity.schema_hash);
            report.schema_commit = identity.schema_commit;
        }
        let status = new_metadata::read_status(&conn)?;
        report.new_status = status.map(|s| s.as_str().to_string());

        if status == Some(Status::Ready) {
            report.id_mappings = None;
            report.pending_replay = Some(0);
        } else {
            report.id_mappings = identity::count(&conn).ok();
            if let Some(p) = progress::read(&conn)? {
                let pending = old_db_path
                    .filter(|p| Path::new(p).exists())
                    .map(|old_path| -> Result<i64> {
                        let old_pool = create_pool(old_path)?;
                        let old_conn = migr_core::db::get(&old_pool)?;
                        migr_engine::count_since(&old_conn, p.last_replayed_log_id)
                    })
                    .transpose()?;
                report.pending_replay = pending;
            }
        }
    }

    Ok(report)
}

/// Run `plan`: preflight only, no side effects (§4.8, `plan`).
#[instrument(skip(target))]
pub fn plan(old_db_path: &str, target: &Schema) -> Result<PreflightReport> {
    let source = if Path::new(old_db_path).exists() {
        introspect_source(&create_pool(old_db_path)?)?
    } else {
        Schema::default()
    };
    Ok(preflight(&source, target))
}
