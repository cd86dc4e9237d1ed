use attendance_core::{DayStatus, RemoteEntry};
use serde::Serialize;
use time::Date;
use time::macros::format_description;

/// One day's status for one tracker, as kept on the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    pub id: String,
    pub tracker_id: String,
    pub date: String,
    pub status: DayStatus,
    pub is_advisory: bool,
    pub last_modified: i64,
    pub created_at: i64,
    pub needs_sync: bool,
    pub sync_error: Option<String>,
    pub retry_count: u32,
}

impl Entry {
    pub fn id_for(tracker_id: &str, date: &str) -> String {
        format!("{tracker_id}_{date}")
    }

    /// A UI mutation: dirty until the remote store acknowledges it.
    pub fn local_edit(
        tracker_id: &str,
        date: &str,
        status: DayStatus,
        is_advisory: bool,
        now: i64,
    ) -> Self {
        Self {
            id: Self::id_for(tracker_id, date),
            tracker_id: tracker_id.to_string(),
            date: date.to_string(),
            status,
            is_advisory,
            last_modified: now,
            created_at: now,
            needs_sync: true,
            sync_error: None,
            retry_count: 0,
        }
    }

    pub fn from_remote(tracker_id: &str, remote: &RemoteEntry) -> Self {
        Self {
            id: Self::id_for(tracker_id, &remote.date),
            tracker_id: tracker_id.to_string(),
            date: remote.date.clone(),
            status: remote.status,
            is_advisory: remote.is_advisory,
            last_modified: remote.last_modified,
            created_at: remote.created_at,
            needs_sync: false,
            sync_error: None,
            retry_count: 0,
        }
    }

    pub fn to_remote(&self) -> RemoteEntry {
        RemoteEntry {
            date: self.date.clone(),
            status: self.status,
            is_advisory: self.is_advisory,
            created_at: self.created_at,
            last_modified: self.last_modified,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.tracker_id.trim().is_empty() {
            return Err("entry has no tracker id".to_string());
        }
        if !is_valid_date(&self.date) {
            return Err(format!("invalid entry date: {:?}", self.date));
        }
        if self.id != Self::id_for(&self.tracker_id, &self.date) {
            return Err(format!("entry id {} does not match tracker/date", self.id));
        }
        Ok(())
    }
}

pub fn is_valid_date(value: &str) -> bool {
    Date::parse(value, format_description!("[year]-[month]-[day]")).is_ok()
}

/// The `(owner, tracker)` data set the UI is currently showing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveView {
    pub owner_id: String,
    pub tracker_id: String,
}

impl ActiveView {
    pub fn new(owner_id: impl Into<String>, tracker_id: impl Into<String>) -> Self {
        Self {
            owner_id: owner_id.into(),
            tracker_id: tracker_id.into(),
        }
    }

    pub fn is_owned_by(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
}

impl Session {
    pub fn new(user_id: impl Into<String>, email: Option<&str>) -> Self {
        Self {
            user_id: user_id.into(),
            email: email.map(|value| value.trim().to_ascii_lowercase()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_derived_from_tracker_and_date() {
        let entry = Entry::local_edit("t1", "2025-01-01", DayStatus::Office, false, 10);
        assert_eq!(entry.id, "t1_2025-01-01");
        assert!(entry.needs_sync);
        assert!(entry.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_dates() {
        let mut entry = Entry::local_edit("t1", "2025-13-01", DayStatus::Office, false, 10);
        assert!(entry.validate().is_err());
        entry = Entry::local_edit("t1", "01/02/2025", DayStatus::Office, false, 10);
        assert!(entry.validate().is_err());
        entry = Entry::local_edit("", "2025-01-01", DayStatus::Office, false, 10);
        assert!(entry.validate().is_err());
    }

    #[test]
    fn remote_copy_is_clean() {
        let remote = RemoteEntry {
            date: "2025-01-01".into(),
            status: DayStatus::Wfh,
            is_advisory: true,
            created_at: 5,
            last_modified: 200,
        };
        let entry = Entry::from_remote("t1", &remote);
        assert!(!entry.needs_sync);
        assert_eq!(entry.to_remote(), remote);
    }
}
