use std::sync::Arc;

use attendance_core::Permission;
use tracing::{debug, warn};

use super::connectivity::ConnectivityMonitor;
use super::entry::ActiveView;
use super::error::SyncError;
use super::remote::RemoteRepository;
use super::store::LocalRepository;

/// Decides whether the current user may write into a tracker.
pub struct PermissionResolver {
    local: Arc<LocalRepository>,
    remote: Arc<RemoteRepository>,
    connectivity: Arc<ConnectivityMonitor>,
}

impl PermissionResolver {
    pub fn new(
        local: Arc<LocalRepository>,
        remote: Arc<RemoteRepository>,
        connectivity: Arc<ConnectivityMonitor>,
    ) -> Self {
        Self {
            local,
            remote,
            connectivity,
        }
    }

    /// The grant `user_id` holds on `view`. Owners always hold `Write`.
    ///
    /// Online, asks the remote store first and refreshes the cached share list
    /// from the answer. Offline, or when the lookup fails, reads the cache.
    pub async fn permission_for(
        &self,
        view: &ActiveView,
        user_id: &str,
    ) -> Result<Option<Permission>, SyncError> {
        if view.is_owned_by(user_id) {
            return Ok(Some(Permission::Write));
        }

        if !self.connectivity.is_online() {
            return self.cached_permission(view, user_id).await;
        }

        match self.remote.query_shares(user_id).await {
            Ok(shares) => {
                if let Err(err) = self.local.replace_shares_for_user(user_id, &shares).await {
                    warn!(error = %err, "failed to refresh cached shares");
                }
                Ok(shares
                    .iter()
                    .find(|share| {
                        share.owner_id == view.owner_id && share.tracker_id == view.tracker_id
                    })
                    .map(|share| share.permission))
            }
            Err(err) => {
                debug!(error = %err, "share lookup failed; using cached grants");
                self.cached_permission(view, user_id).await
            }
        }
    }

    async fn cached_permission(
        &self,
        view: &ActiveView,
        user_id: &str,
    ) -> Result<Option<Permission>, SyncError> {
        let cached = self
            .local
            .find_share(&view.owner_id, &view.tracker_id, user_id)
            .await?;
        Ok(cached.map(|share| share.permission))
    }

    pub async fn can_write(&self, view: &ActiveView, user_id: &str) -> Result<bool, SyncError> {
        Ok(self.permission_for(view, user_id).await? == Some(Permission::Write))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attendance_core::{CloudClient, Share};
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn resolver(server: &MockServer) -> (PermissionResolver, Arc<LocalRepository>) {
        resolver_with(server, true).await
    }

    async fn resolver_with(
        server: &MockServer,
        online: bool,
    ) -> (PermissionResolver, Arc<LocalRepository>) {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let local = Arc::new(LocalRepository::from_pool(pool));
        local.ensure_ready().await.unwrap();
        let remote = Arc::new(RemoteRepository::new(
            CloudClient::with_base_url(&server.uri(), "token").unwrap(),
        ));
        let connectivity = Arc::new(ConnectivityMonitor::new(online));
        (PermissionResolver::new(local.clone(), remote, connectivity), local)
    }

    #[tokio::test]
    async fn owner_can_always_write() {
        let server = MockServer::start().await;
        let (resolver, _) = resolver(&server).await;
        let view = ActiveView::new("alice", "t1");
        assert!(resolver.can_write(&view, "alice").await.unwrap());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn read_grant_cannot_write_and_is_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/shares"))
            .and(query_param("sharedWithId", "bob"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "documents": [{
                    "trackerId": "t1",
                    "ownerId": "alice",
                    "sharedWithId": "bob",
                    "sharedWithEmail": "bob@example.com",
                    "permission": "read",
                    "createdAt": "2025-01-01T00:00:00Z"
                }]
            })))
            .mount(&server)
            .await;

        let (resolver, local) = resolver(&server).await;
        let view = ActiveView::new("alice", "t1");
        assert_eq!(
            resolver.permission_for(&view, "bob").await.unwrap(),
            Some(Permission::Read)
        );
        assert!(!resolver.can_write(&view, "bob").await.unwrap());
        assert_eq!(local.list_shares_for_user("bob").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn falls_back_to_cache_when_remote_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/shares"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (resolver, local) = resolver(&server).await;
        local
            .upsert_share(&Share {
                tracker_id: "t1".into(),
                owner_id: "alice".into(),
                shared_with_id: "bob".into(),
                shared_with_email: "bob@example.com".into(),
                permission: Permission::Write,
                created_at: 1,
            })
            .await
            .unwrap();

        let view = ActiveView::new("alice", "t1");
        assert!(resolver.can_write(&view, "bob").await.unwrap());
        assert!(!resolver.can_write(&view, "carol").await.unwrap());
    }

    #[tokio::test]
    async fn offline_reads_cached_grant_without_requests() {
        let server = MockServer::start().await;
        let (resolver, local) = resolver_with(&server, false).await;
        local
            .upsert_share(&Share {
                tracker_id: "t1".into(),
                owner_id: "alice".into(),
                shared_with_id: "bob".into(),
                shared_with_email: "bob@example.com".into(),
                permission: Permission::Write,
                created_at: 1,
            })
            .await
            .unwrap();

        let view = ActiveView::new("alice", "t1");
        assert!(resolver.can_write(&view, "bob").await.unwrap());
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
