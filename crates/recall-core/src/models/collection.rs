//! The fixed set of synchronized collections

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A named collection of records tracked by the sync engine.
///
/// `tasks`, `notes`, and `lists` participate in tombstoned deletion; the
/// remaining collections are append/update-only and never deleted through
/// the sync path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Collection {
    Tasks,
    Notes,
    Lists,
    Conversations,
    Settings,
    Activities,
    DailyStats,
    ActivityGoals,
}

impl Collection {
    /// All collections, in canonical order.
    pub const ALL: [Self; 8] = [
        Self::Tasks,
        Self::Notes,
        Self::Lists,
        Self::Conversations,
        Self::Settings,
        Self::Activities,
        Self::DailyStats,
        Self::ActivityGoals,
    ];

    /// The collections that track deletions with tombstones.
    pub const DELETABLE: [Self; 3] = [Self::Tasks, Self::Notes, Self::Lists];

    /// Wire name of the collection.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Tasks => "tasks",
            Self::Notes => "notes",
            Self::Lists => "lists",
            Self::Conversations => "conversations",
            Self::Settings => "settings",
            Self::Activities => "activities",
            Self::DailyStats => "dailyStats",
            Self::ActivityGoals => "activityGoals",
        }
    }

    /// Whether deletions in this collection leave tombstones behind.
    #[must_use]
    pub const fn supports_deletion(self) -> bool {
        matches!(self, Self::Tasks | Self::Notes | Self::Lists)
    }

    /// Wire name of the tombstone array for this collection, if any.
    #[must_use]
    pub const fn tombstone_key(self) -> Option<&'static str> {
        match self {
            Self::Tasks => Some("deletedTasks"),
            Self::Notes => Some("deletedNotes"),
            Self::Lists => Some("deletedLists"),
            _ => None,
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Collection {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown collection: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_round_trip() {
        for collection in Collection::ALL {
            let parsed: Collection = collection.as_str().parse().unwrap();
            assert_eq!(parsed, collection);
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        assert!("reminders".parse::<Collection>().is_err());
    }

    #[test]
    fn only_tasks_notes_lists_support_deletion() {
        let deletable: Vec<Collection> = Collection::ALL
            .into_iter()
            .filter(|collection| collection.supports_deletion())
            .collect();
        assert_eq!(deletable, Collection::DELETABLE.to_vec());
        assert!(Collection::Tasks.tombstone_key().is_some());
        assert!(Collection::Activities.tombstone_key().is_none());
    }
}
