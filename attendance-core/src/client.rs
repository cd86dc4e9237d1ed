use std::time::SystemTime;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::models::{
    BatchWriteRequest, BatchWriteResponse, DocumentList, Permission, PermissionPatch,
    RemoteEntry, Share, Tracker, UserLookup,
};

const DEFAULT_BASE_URL: &str = "https://api.attendance-tracker.app";

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("base url cannot be a base for path segments")]
    CannotBeABase,
    #[error("api returned {status}: {body}")]
    Api {
        status: StatusCode,
        body: String,
        retry_after: Option<u64>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorClass {
    Auth,
    PermissionDenied,
    NotFound,
    RateLimit,
    Transient,
    Permanent,
}

#[derive(Clone)]
pub struct CloudClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl CloudClient {
    pub fn new(token: impl Into<String>) -> Result<Self, CloudError> {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: &str, token: impl Into<String>) -> Result<Self, CloudError> {
        let base_url = Url::parse(base_url)?;
        if base_url.cannot_be_a_base() {
            return Err(CloudError::CannotBeABase);
        }
        Ok(Self {
            http: Client::new(),
            base_url,
            token: token.into(),
        })
    }

    pub async fn ping(&self) -> Result<(), CloudError> {
        let url = self.endpoint(&["v1", "health"])?;
        let response = self.http.get(url).send().await?;
        Self::handle_empty(response).await
    }

    /// Writes every entry into the tracker's `entries` collection in one request.
    pub async fn batch_write(
        &self,
        owner_id: &str,
        tracker_id: &str,
        entries: &[RemoteEntry],
    ) -> Result<BatchWriteResponse, CloudError> {
        let url = self.endpoint(&[
            "v1",
            "users",
            owner_id,
            "trackers",
            tracker_id,
            "entries:batchWrite",
        ])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&BatchWriteRequest { writes: entries })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn list_entries(
        &self,
        owner_id: &str,
        tracker_id: &str,
    ) -> Result<Vec<RemoteEntry>, CloudError> {
        let url = self.endpoint(&["v1", "users", owner_id, "trackers", tracker_id, "entries"])?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let list: DocumentList<RemoteEntry> = Self::handle_response(response).await?;
        Ok(list.documents)
    }

    pub async fn get_tracker(&self, tracker_id: &str) -> Result<Tracker, CloudError> {
        let url = self.endpoint(&["v1", "trackers", tracker_id])?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        Self::handle_response(response).await
    }

    pub async fn list_trackers(&self, owner_id: &str) -> Result<Vec<Tracker>, CloudError> {
        let url = self.endpoint(&["v1", "users", owner_id, "trackers"])?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let list: DocumentList<Tracker> = Self::handle_response(response).await?;
        Ok(list.documents)
    }

    pub async fn put_tracker(&self, tracker: &Tracker) -> Result<Tracker, CloudError> {
        let url = self.endpoint(&["v1", "users", &tracker.owner_id, "trackers", &tracker.id])?;
        let response = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(tracker)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    /// Collection-group query over every owner's shares.
    pub async fn shares_for_user(&self, user_id: &str) -> Result<Vec<Share>, CloudError> {
        let mut url = self.endpoint(&["v1", "shares"])?;
        url.query_pairs_mut().append_pair("sharedWithId", user_id);
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let list: DocumentList<Share> = Self::handle_response(response).await?;
        Ok(list.documents)
    }

    pub async fn shares_by_owner(&self, owner_id: &str) -> Result<Vec<Share>, CloudError> {
        let url = self.endpoint(&["v1", "users", owner_id, "shares"])?;
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        let list: DocumentList<Share> = Self::handle_response(response).await?;
        Ok(list.documents)
    }

    pub async fn create_share(&self, share: &Share) -> Result<Share, CloudError> {
        let url = self.endpoint(&[
            "v1",
            "users",
            &share.owner_id,
            "trackers",
            &share.tracker_id,
            "shares",
        ])?;
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(share)
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn update_share_permission(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
        permission: Permission,
    ) -> Result<Share, CloudError> {
        let url = self.share_endpoint(owner_id, tracker_id, shared_with_id)?;
        let response = self
            .http
            .patch(url)
            .bearer_auth(&self.token)
            .json(&PermissionPatch { permission })
            .send()
            .await?;
        Self::handle_response(response).await
    }

    pub async fn delete_share(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<(), CloudError> {
        let url = self.share_endpoint(owner_id, tracker_id, shared_with_id)?;
        let response = self.http.delete(url).bearer_auth(&self.token).send().await?;
        Self::handle_empty(response).await
    }

    /// Returns `None` when no account is registered for the email.
    pub async fn lookup_user_by_email(&self, email: &str) -> Result<Option<String>, CloudError> {
        let mut url = self.endpoint(&["v1", "users:lookup"])?;
        url.query_pairs_mut().append_pair("email", email);
        let response = self.http.get(url).bearer_auth(&self.token).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let lookup: UserLookup = Self::handle_response(response).await?;
        Ok(Some(lookup.user_id))
    }

    fn share_endpoint(
        &self,
        owner_id: &str,
        tracker_id: &str,
        shared_with_id: &str,
    ) -> Result<Url, CloudError> {
        self.endpoint(&[
            "v1",
            "users",
            owner_id,
            "trackers",
            tracker_id,
            "shares",
            shared_with_id,
        ])
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, CloudError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| CloudError::CannotBeABase)?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn handle_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        if response.status().is_success() {
            Ok(response.json::<T>().await?)
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn handle_empty(response: reqwest::Response) -> Result<(), CloudError> {
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::api_error(response).await)
        }
    }

    async fn api_error(response: reqwest::Response) -> CloudError {
        let status = response.status();
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        CloudError::Api {
            status,
            body,
            retry_after,
        }
    }
}

impl CloudError {
    pub fn classification(&self) -> Option<ApiErrorClass> {
        match self {
            CloudError::Api { status, .. } => Some(classify_api_status(*status)),
            _ => None,
        }
    }

    /// Network failures and transient server answers are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            CloudError::Request(err) => !err.is_decode() && !err.is_builder(),
            CloudError::Api { .. } => matches!(
                self.classification(),
                Some(ApiErrorClass::RateLimit | ApiErrorClass::Transient)
            ),
            _ => false,
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        self.classification() == Some(ApiErrorClass::PermissionDenied)
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            CloudError::Api { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

fn classify_api_status(status: StatusCode) -> ApiErrorClass {
    if status == StatusCode::UNAUTHORIZED {
        ApiErrorClass::Auth
    } else if status == StatusCode::FORBIDDEN {
        ApiErrorClass::PermissionDenied
    } else if status == StatusCode::NOT_FOUND {
        ApiErrorClass::NotFound
    } else if status == StatusCode::TOO_MANY_REQUESTS {
        ApiErrorClass::RateLimit
    } else if status.is_server_error()
        || matches!(
            status,
            StatusCode::REQUEST_TIMEOUT | StatusCode::CONFLICT | StatusCode::TOO_EARLY
        )
    {
        ApiErrorClass::Transient
    } else {
        ApiErrorClass::Permanent
    }
}

fn parse_retry_after(value: &str) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds);
    }
    let at = httpdate::parse_http_date(value).ok()?;
    Some(
        at.duration_since(SystemTime::now())
            .map(|wait| wait.as_secs())
            .unwrap_or(0),
    )
}
