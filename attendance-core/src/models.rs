use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timestamp::rfc3339_millis;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("invalid day status: {0}")]
    InvalidStatus(String),
    #[error("invalid permission: {0}")]
    InvalidPermission(String),
    #[error("invalid tracker type: {0}")]
    InvalidTrackerType(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Office,
    Wfh,
    Holiday,
    Leave,
    Advisory,
}

impl DayStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Office => "office",
            DayStatus::Wfh => "wfh",
            DayStatus::Holiday => "holiday",
            DayStatus::Leave => "leave",
            DayStatus::Advisory => "advisory",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "office" => Ok(DayStatus::Office),
            "wfh" => Ok(DayStatus::Wfh),
            "holiday" => Ok(DayStatus::Holiday),
            "leave" => Ok(DayStatus::Leave),
            "advisory" => Ok(DayStatus::Advisory),
            other => Err(ModelError::InvalidStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Permission {
    Read,
    Write,
}

impl Permission {
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Read => "read",
            Permission::Write => "write",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            other => Err(ModelError::InvalidPermission(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackerType {
    Attendance,
    Custom,
}

impl TrackerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackerType::Attendance => "attendance",
            TrackerType::Custom => "custom",
        }
    }

    pub fn parse(value: &str) -> Result<Self, ModelError> {
        match value {
            "attendance" => Ok(TrackerType::Attendance),
            "custom" => Ok(TrackerType::Custom),
            other => Err(ModelError::InvalidTrackerType(other.to_string())),
        }
    }
}

/// One day's status as stored in a tracker's `entries` sub-collection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteEntry {
    pub date: String,
    pub status: DayStatus,
    #[serde(default)]
    pub is_advisory: bool,
    #[serde(with = "rfc3339_millis")]
    pub created_at: i64,
    #[serde(with = "rfc3339_millis")]
    pub last_modified: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Tracker {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub is_default: bool,
    pub tracker_type: TrackerType,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Share {
    pub tracker_id: String,
    pub owner_id: String,
    pub shared_with_id: String,
    pub shared_with_email: String,
    pub permission: Permission,
    #[serde(with = "rfc3339_millis")]
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BatchWriteResponse {
    pub written: usize,
}

#[derive(Debug, Deserialize, Serialize)]
pub(crate) struct DocumentList<T> {
    #[serde(default = "Vec::new")]
    pub documents: Vec<T>,
}

#[derive(Debug, Serialize)]
pub(crate) struct BatchWriteRequest<'a> {
    pub writes: &'a [RemoteEntry],
}

#[derive(Debug, Serialize)]
pub(crate) struct PermissionPatch {
    pub permission: Permission,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UserLookup {
    pub user_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_names_round_trip_through_parse() {
        for status in [
            DayStatus::Office,
            DayStatus::Wfh,
            DayStatus::Holiday,
            DayStatus::Leave,
            DayStatus::Advisory,
        ] {
            assert_eq!(DayStatus::parse(status.as_str()).unwrap(), status);
        }
        assert_eq!(
            DayStatus::parse("vacation"),
            Err(ModelError::InvalidStatus("vacation".into()))
        );
    }

    #[test]
    fn remote_entry_uses_camel_case_and_rfc3339() {
        let entry: RemoteEntry = serde_json::from_value(serde_json::json!({
            "date": "2025-01-01",
            "status": "wfh",
            "isAdvisory": true,
            "createdAt": "2025-01-01T00:00:00Z",
            "lastModified": "2025-01-01T00:00:01Z"
        }))
        .unwrap();
        assert_eq!(entry.status, DayStatus::Wfh);
        assert!(entry.is_advisory);
        assert_eq!(entry.last_modified - entry.created_at, 1_000);

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["lastModified"], "2025-01-01T00:00:01Z");
        assert_eq!(value["isAdvisory"], true);
    }

    #[test]
    fn share_permission_is_lowercase() {
        let share: Share = serde_json::from_value(serde_json::json!({
            "trackerId": "t1",
            "ownerId": "alice",
            "sharedWithId": "bob",
            "sharedWithEmail": "bob@example.com",
            "permission": "read",
            "createdAt": "2025-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(share.permission, Permission::Read);
    }
}
