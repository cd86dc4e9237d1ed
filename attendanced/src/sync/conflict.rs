use attendance_core::RemoteEntry;

use super::entry::Entry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictDecision {
    /// No local copy yet.
    CreateLocal,
    /// Remote copy is strictly newer. `superseded_dirty` is set when an
    /// unpushed local edit is being overwritten.
    ApplyRemote { superseded_dirty: bool },
    KeepLocal,
}

/// Last write wins on `last_modified`; ties keep the local copy.
pub fn resolve_conflict(local: Option<&Entry>, remote: &RemoteEntry) -> ConflictDecision {
    match local {
        None => ConflictDecision::CreateLocal,
        Some(local) if remote.last_modified > local.last_modified => {
            ConflictDecision::ApplyRemote {
                superseded_dirty: local.needs_sync,
            }
        }
        Some(_) => ConflictDecision::KeepLocal,
    }
}
