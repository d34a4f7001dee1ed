//! Checkpoint records exposed to hosts, and the builder that normalizes
//! backend commit metadata into them.

use crate::event::HistoryEvent;
use chrono::{DateTime, Duration, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use vcs::CommitInfo;

/// An immutable snapshot of a document, backed by one commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    /// Commit id, opaque to hosts
    pub id: String,
    pub last_modified: DateTime<Utc>,
}

/// A checkpoint together with the history event its commit recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    #[serde(flatten)]
    pub checkpoint: Checkpoint,
    pub event: HistoryEvent,
}

/// Interprets naive commit timestamps in one canonical zone.
///
/// Commits written by this crate carry that zone's offset, so the reading is
/// exact except inside the repeated hour when clocks fall back, where the
/// daylight-saving (earlier) instant is chosen.
#[derive(Debug, Clone, Copy)]
pub struct CheckpointModelBuilder {
    zone: Tz,
}

impl CheckpointModelBuilder {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        match self.zone.from_local_datetime(&local) {
            LocalResult::Single(dt) => dt.with_timezone(&Utc),
            LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
            // Skipped by a spring-forward gap: read with the post-transition offset.
            LocalResult::None => {
                let hour = Duration::hours(1);
                match self.zone.from_local_datetime(&(local + hour)).earliest() {
                    Some(dt) => dt.with_timezone(&Utc) - hour,
                    None => Utc.from_utc_datetime(&local),
                }
            }
        }
    }

    pub fn checkpoint(&self, id: impl Into<String>, local: NaiveDateTime) -> Checkpoint {
        Checkpoint {
            id: id.into(),
            last_modified: self.to_utc(local),
        }
    }

    pub fn from_commit(&self, commit: &CommitInfo) -> Checkpoint {
        self.checkpoint(commit.id.clone(), commit.local_time)
    }

    pub fn history_entry(&self, commit: &CommitInfo) -> HistoryEntry {
        HistoryEntry {
            checkpoint: self.from_commit(commit),
            event: HistoryEvent::from_message(&commit.message),
        }
    }
}
