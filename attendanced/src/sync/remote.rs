use attendance_core::{ApiErrorClass, CloudClient, CloudError, Permission, RemoteEntry, Share, Tracker};
use tracing::{debug, warn};

use super::error::SyncError;

/// Thin adapter over [`CloudClient`] that speaks [`SyncError`].
#[derive(Clone)]
pub struct RemoteRepository {
    client: CloudClient,
}

impl RemoteRepository {
    pub fn new(client: CloudClient) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &CloudClient {
        &self.client
    }

    pub async fn ping(&self) -> Result<(), SyncError> {
        self.client.ping().await.map_err(SyncError::remote)
    }

    pub async fn batch_write(
        &self,
        owner_id: &str,
        tracker_id: &str,
        entries: &[RemoteEntry],
    ) -> Result<usize, SyncError> {
        debug!(owner_id, tracker_id, count = entries.len(), "batch write");
        self.client
            .batch_write(owner_id, tracker_id, entries)
            .await
            .map(|response| response.written)
            .map_err(|err| write_error(err, owner_id, tracker_id))
    }

    pub async fn query_by_owner(
        &self,
        owner_id: &str,
        tracker_id: &str,
    ) -> Result<Vec<RemoteEntry>, SyncError> {
        match self.client.list_entries(owner_id, tracker_id).await {
            Ok(entries) => Ok(entries),
            Err(err) if is_unlisted(&err) => {
                warn!(owner_id, tracker_id, error = %err, "entries not readable; treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(SyncError::remote(err)),
        }
    }

    /// Shares granted to `user_id` across all owners.
    pub async fn query_shares(&self, user_id: &str) -> Result<Vec<Share>, SyncError> {
        match self.client.shares_for_user(user_id).await {
            Ok(shares) => Ok(shares),
            Err(err) if is_unlisted(&err) => {
                warn!(user_id, error = %err, "shares not readable; treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(SyncError::remote(err)),
        }
    }

    pub async fn list_shares_by_owner(&self, owner_id: &str) -> Result<Vec<Share>, SyncError> {
        match self.client.shares_by_owner(owner_id).await {
            Ok(shares) => Ok(shares),
            Err(err) if is_unlisted(&err) => {
                warn!(owner_id, error = %err, "owned shares not readable; treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(SyncError::remote(err)),
        }
    }

    pub async fn list_trackers(&self, owner_id: &str) -> Result<Vec<Tracker>, SyncError> {
        match self.client.list_trackers(owner_id).await {
            Ok(trackers) => Ok(trackers),
            Err(err) if is_unlisted(&err) => {
                warn!(owner_id, error = %err, "trackers not readable; treating as empty");
                Ok(Vec::new())
            }
            Err(err) => Err(SyncError::remote(err)),
        }
    }

    pub async fn get_tracker(&self, tracker_id: &str) -> Result<Option<Tracker>, SyncError> {
        match self.client.get_tracker(tracker_id).await {
            Ok(tracker) => Ok(Some(tracker)),
            Err(err) if err.classification() == Some(ApiErrorClass::NotFound) => Ok(None),
            Err(err) => Err(SyncError::remote(err)),
        }
    }

    pub async fn put_tracker(&self, tracker: &Tracker) -> Result<Tracker, SyncError> {
        self.client
            .put_tracker(tracker)
            .await
            .map_err(|err| write_error(err, &tracker.owner_id, &tracker.id))
    }

    pub async fn create_share(&self, share: &Share) -> Result<Share, SyncError> {
        self.client
            .create_share(share)
            .await
            .map_err(|err| write_error(err, &share.owner_id, &share.tracker_id))
    }

    pub async fn update_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
        permission: Permission,
    ) -> Result<Share, SyncError> {
        self.client
            .update_share_permission(owner_id, tracker_id, shared_with_id, permission)
            .await
            .map_err(|err| write_error(err, owner_id, tracker_id))
    }

    pub async fn remove_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<(), SyncError> {
        match self
            .client
            .delete_share(owner_id, tracker_id, shared_with_id)
            .await
        {
            Ok(()) => Ok(()),
            Err(err) if err.classification() == Some(ApiErrorClass::NotFound) => {
                debug!(owner_id, tracker_id, shared_with_id, "share already gone remotely");
                Ok(())
            }
            Err(err) => Err(write_error(err, owner_id, tracker_id)),
        }
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<Option<String>, SyncError> {
        self.client
            .lookup_user_by_email(email)
            .await
            .map_err(SyncError::remote)
    }
}

fn is_unlisted(err: &CloudError) -> bool {
    matches!(
        err.classification(),
        Some(ApiErrorClass::PermissionDenied) | Some(ApiErrorClass::NotFound)
    )
}

fn write_error(err: CloudError, owner_id: &str, tracker_id: &str) -> SyncError {
    if err.is_permission_denied() {
        SyncError::PermissionDenied {
            owner_id: owner_id.to_string(),
            tracker_id: tracker_id.to_string(),
        }
    } else {
        SyncError::remote(err)
    }
}
