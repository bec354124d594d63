//! Migration Controller (C9) phase state machine (§4.8): the same
//! `match (current, event) -> Result<next, Error>` idiom this workspace uses
//! for its other state machine, with the phase commands as the event
//! alphabet. `status` and `plan` are read-only and sit outside this table.

use migr_core::error::{MigrError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Absent,
    Copying,
    Broken,
    Recording,
    Draining,
    Drained,
    Ready,
    ReadyOldCleaned,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Absent => "absent",
            Phase::Copying => "copying",
            Phase::Broken => "broken",
            Phase::Recording => "recording",
            Phase::Draining => "draining",
            Phase::Drained => "drained",
            Phase::Ready => "ready",
            Phase::ReadyOldCleaned => "ready_old_cleaned",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    Migrate,
    MigrateFailed,
    CopyComplete,
    DrainStarted,
    DrainCompleted,
    Cutover,
    CleanupOld,
    Reset,
}

impl Event {
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::Migrate => "migrate",
            Event::MigrateFailed => "migrate_failed",
            Event::CopyComplete => "copy_complete",
            Event::DrainStarted => "drain_started",
            Event::DrainCompleted => "drain_completed",
            Event::Cutover => "cutover",
            Event::CleanupOld => "cleanup_old",
            Event::Reset => "reset",
        }
    }
}

/// Validate that `event` is a legal transition from `current` and return the
/// resulting [`Phase`]. Returns `Err(InvalidInput)` when the combination is
/// not permitted.
pub fn validate_transition(current: &Phase, event: &Event) -> Result<Phase> {
    let next = match (current, event) {
        (Phase::Absent, Event::Migrate) => Phase::Copying,
        (Phase::Copying, Event::MigrateFailed) => Phase::Broken,
        (Phase::Copying, Event::CopyComplete) => Phase::Recording,
        (Phase::Recording, Event::DrainStarted) => Phase::Draining,
        (Phase::Draining, Event::DrainStarted) => Phase::Draining,
        (Phase::Draining, Event::DrainCompleted) => Phase::Drained,
        (Phase::Drained, Event::Cutover) => Phase::Ready,
        (Phase::Ready, Event::Cutover) => Phase::Ready,
        (Phase::Draining, Event::CleanupOld) => Phase::Draining,
        (Phase::Drained, Event::CleanupOld) => Phase::Drained,
        (Phase::Ready, Event::CleanupOld) => Phase::ReadyOldCleaned,
        (Phase::ReadyOldCleaned, Event::CleanupOld) => Phase::ReadyOldCleaned,

        // `reset` tears down everything short of a `ready` new DB (§4.8):
        // legal from every phase except the two that mean the new DB has
        // already been cut over to.
        (Phase::Absent, Event::Reset) => Phase::Absent,
        (Phase::Broken, Event::Reset) => Phase::Absent,
        (Phase::Recording, Event::Reset) => Phase::Absent,
        (Phase::Draining, Event::Reset) => Phase::Absent,
        (Phase::Drained, Event::Reset) => Phase::Absent,

        (state, ev) => {
            return Err(MigrError::InvalidInput(format!(
                "illegal transition: event '{}' is not permitted in phase '{}'",
                ev.as_str(),
                state.as_str()
            )));
        }
    };
    Ok(next)
}

/// Return the set of events that are legally applicable to `phase`.
pub fn legal_transitions(phase: &Phase) -> Vec<Event> {
    match phase {
        Phase::Absent => vec![Event::Migrate, Event::Reset],
        Phase::Copying => vec![Event::MigrateFailed, Event::CopyComplete],
        Phase::Broken => vec![Event::Reset],
        Phase::Recording => vec![Event::DrainStarted, Event::Reset],
        Phase::Draining => vec![Event::DrainStarted, Event::DrainCompleted, Event::CleanupOld, Event::Reset],
        Phase::Drained => vec![Event::Cutover, Event::CleanupOld, Event::Reset],
        Phase::Ready => vec![Event::Cutover, Event::CleanupOld],
        Phase::ReadyOldCleaned => vec![Event::CleanupOld],
    }
}
