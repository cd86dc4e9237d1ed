use std::sync::Arc;

use attendance_core::timestamp::now_millis;
use attendance_core::{Permission, Share, Tracker};
use tracing::{debug, info, warn};

use crate::sync::engine::SyncOrchestrator;
use crate::sync::entry::{ActiveView, Session};
use crate::sync::error::SyncError;

/// Grants other users access to the signed-in user's trackers and lets the
/// UI switch between its own data and data shared with it.
pub struct ShareManager {
    orchestrator: Arc<SyncOrchestrator>,
}

impl ShareManager {
    pub fn new(orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Creates a grant for `email`, or changes its permission if one exists.
    /// `tracker_id` defaults to the owner's default tracker.
    pub async fn share(
        &self,
        email: &str,
        permission: Permission,
        tracker_id: Option<&str>,
    ) -> Result<Share, SyncError> {
        let session = self.require_session()?;
        let email = normalize_email(email)?;
        if session.email.as_deref() == Some(email.as_str()) {
            return Err(SyncError::Validation("cannot share a tracker with yourself".into()));
        }
        self.require_online()?;

        let tracker = self.owned_tracker(&session, tracker_id).await?;
        let remote = self.orchestrator.remote();
        let shared_with_id = match remote.find_user_by_email(&email).await? {
            Some(user_id) => user_id,
            None => {
                debug!(%email, "no account for email; keying share by address");
                email.clone()
            }
        };
        if shared_with_id == session.user_id {
            return Err(SyncError::Validation("cannot share a tracker with yourself".into()));
        }

        let existing = self
            .find_owned_share(&session.user_id, &tracker.id, &shared_with_id)
            .await?;
        let share = match existing {
            Some(existing) if existing.permission == permission => existing,
            Some(_) => {
                remote
                    .update_share(&session.user_id, &tracker.id, &shared_with_id, permission)
                    .await?
            }
            None => {
                let share = Share {
                    tracker_id: tracker.id.clone(),
                    owner_id: session.user_id.clone(),
                    shared_with_id,
                    shared_with_email: email,
                    permission,
                    created_at: now_millis(),
                };
                remote.create_share(&share).await?
            }
        };
        self.orchestrator.local().upsert_share(&share).await?;
        info!(
            tracker_id = %share.tracker_id,
            shared_with_id = %share.shared_with_id,
            permission = share.permission.as_str(),
            "tracker shared"
        );
        Ok(share)
    }

    pub async fn update_share_permission(
        &self,
        shared_with_id: &str,
        permission: Permission,
        tracker_id: Option<&str>,
    ) -> Result<Share, SyncError> {
        let session = self.require_session()?;
        self.require_online()?;
        let tracker = self.owned_tracker(&session, tracker_id).await?;
        let shared_with_id = normalize_grantee(shared_with_id);
        if self
            .find_owned_share(&session.user_id, &tracker.id, &shared_with_id)
            .await?
            .is_none()
        {
            return Err(share_not_found(&tracker.id, &shared_with_id));
        }

        let updated = self
            .orchestrator
            .remote()
            .update_share(&session.user_id, &tracker.id, &shared_with_id, permission)
            .await?;
        self.orchestrator.local().upsert_share(&updated).await?;
        info!(tracker_id = %tracker.id, %shared_with_id, permission = permission.as_str(), "share updated");
        Ok(updated)
    }

    pub async fn remove_share(
        &self,
        shared_with_id: &str,
        tracker_id: Option<&str>,
    ) -> Result<(), SyncError> {
        let session = self.require_session()?;
        self.require_online()?;
        let tracker = self.owned_tracker(&session, tracker_id).await?;
        let shared_with_id = normalize_grantee(shared_with_id);
        if self
            .find_owned_share(&session.user_id, &tracker.id, &shared_with_id)
            .await?
            .is_none()
        {
            return Err(share_not_found(&tracker.id, &shared_with_id));
        }

        self.orchestrator
            .remote()
            .remove_share(&session.user_id, &tracker.id, &shared_with_id)
            .await?;
        self.orchestrator
            .local()
            .remove_share(&session.user_id, &tracker.id, &shared_with_id)
            .await?;
        info!(tracker_id = %tracker.id, %shared_with_id, "share removed");
        Ok(())
    }

    /// Grants other owners made to the signed-in user. Served from the cache
    /// when the remote store is unreachable.
    pub async fn list_shared_with_me(&self) -> Result<Vec<Share>, SyncError> {
        let session = self.require_session()?;
        let local = self.orchestrator.local();
        if self.orchestrator.connectivity().is_online() {
            match self.orchestrator.remote().query_shares(&session.user_id).await {
                Ok(shares) => {
                    local.replace_shares_for_user(&session.user_id, &shares).await?;
                    return Ok(shares);
                }
                Err(err) => warn!(error = %err, "shared-with-me lookup failed; using cache"),
            }
        }
        Ok(local.list_shares_for_user(&session.user_id).await?)
    }

    /// Grants the signed-in user made to others.
    pub async fn list_my_shares(&self) -> Result<Vec<Share>, SyncError> {
        let session = self.require_session()?;
        let local = self.orchestrator.local();
        if self.orchestrator.connectivity().is_online() {
            match self
                .orchestrator
                .remote()
                .list_shares_by_owner(&session.user_id)
                .await
            {
                Ok(shares) => {
                    local.replace_shares_by_owner(&session.user_id, &shares).await?;
                    return Ok(shares);
                }
                Err(err) => warn!(error = %err, "owned shares lookup failed; using cache"),
            }
        }
        Ok(local.list_shares_by_owner(&session.user_id).await?)
    }

    /// Switches the active view to `owner_id`'s data. Other owners' trackers
    /// are only selectable when shared with the signed-in user.
    pub async fn select_view(
        &self,
        owner_id: &str,
        tracker_id: Option<&str>,
    ) -> Result<ActiveView, SyncError> {
        let session = self.require_session()?;
        if owner_id == session.user_id {
            let view = match tracker_id {
                None => return self.orchestrator.view_own_tracker().await,
                Some(_) => {
                    let tracker = self.owned_tracker(&session, tracker_id).await?;
                    ActiveView::new(tracker.owner_id, tracker.id)
                }
            };
            self.orchestrator.set_active_view(view.clone());
            return Ok(view);
        }

        let shares = self.list_shared_with_me().await?;
        let share = shares.into_iter().find(|share| {
            share.owner_id == owner_id && tracker_id.is_none_or(|id| id == share.tracker_id)
        });
        match share {
            Some(share) => {
                let view = ActiveView::new(share.owner_id, share.tracker_id);
                self.orchestrator.set_active_view(view.clone());
                Ok(view)
            }
            None => Err(SyncError::PermissionDenied {
                owner_id: owner_id.to_string(),
                tracker_id: tracker_id.unwrap_or_default().to_string(),
            }),
        }
    }

    fn require_session(&self) -> Result<Session, SyncError> {
        self.orchestrator.session().ok_or(SyncError::Auth)
    }

    fn require_online(&self) -> Result<(), SyncError> {
        if self.orchestrator.connectivity().is_online() {
            Ok(())
        } else {
            Err(SyncError::NetworkUnavailable)
        }
    }

    async fn owned_tracker(
        &self,
        session: &Session,
        tracker_id: Option<&str>,
    ) -> Result<Tracker, SyncError> {
        let Some(tracker_id) = tracker_id else {
            return self.orchestrator.ensure_own_tracker(&session.user_id).await;
        };

        let local = self.orchestrator.local();
        let tracker = match local.get_tracker(tracker_id).await? {
            Some(tracker) => tracker,
            None => {
                let fetched = if self.orchestrator.connectivity().is_online() {
                    self.orchestrator.remote().get_tracker(tracker_id).await?
                } else {
                    None
                };
                let tracker =
                    fetched.ok_or_else(|| SyncError::NotFound(format!("tracker {tracker_id}")))?;
                local.upsert_tracker(&tracker).await?;
                tracker
            }
        };

        if tracker.owner_id != session.user_id {
            return Err(SyncError::PermissionDenied {
                owner_id: tracker.owner_id,
                tracker_id: tracker.id,
            });
        }
        Ok(tracker)
    }

    /// Looks in the cache first, then refreshes it from the remote store.
    async fn find_owned_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<Option<Share>, SyncError> {
        let local = self.orchestrator.local();
        if let Some(share) = local.find_share(owner_id, tracker_id, shared_with_id).await? {
            return Ok(Some(share));
        }
        let shares = self.orchestrator.remote().list_shares_by_owner(owner_id).await?;
        local.replace_shares_by_owner(owner_id, &shares).await?;
        Ok(shares.into_iter().find(|share| {
            share.tracker_id == tracker_id && share.shared_with_id == shared_with_id
        }))
    }
}

fn share_not_found(tracker_id: &str, shared_with_id: &str) -> SyncError {
    SyncError::NotFound(format!("share of {tracker_id} with {shared_with_id}"))
}

/// Grantee ids that look like addresses are keyed lower-case.
fn normalize_grantee(value: &str) -> String {
    let value = value.trim();
    if value.contains('@') {
        value.to_ascii_lowercase()
    } else {
        value.to_string()
    }
}

pub fn normalize_email(value: &str) -> Result<String, SyncError> {
    let email = value.trim().to_ascii_lowercase();
    let invalid = || SyncError::Validation(format!("invalid email address: {value:?}"));
    if email.chars().any(char::is_whitespace) {
        return Err(invalid());
    }
    let (local, domain) = email.split_once('@').ok_or_else(invalid)?;
    if local.is_empty()
        || domain.contains('@')
        || !domain.contains('.')
        || domain.starts_with('.')
        || domain.ends_with('.')
    {
        return Err(invalid());
    }
    Ok(email)
}
