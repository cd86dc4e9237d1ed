use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use attendance_core::timestamp::now_millis;
use attendance_core::{DayStatus, RemoteEntry, Tracker};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncConfig;

use super::conflict::{ConflictDecision, resolve_conflict};
use super::connectivity::{ConnectivityMonitor, Subscription};
use super::entry::{ActiveView, Entry, Session};
use super::error::{SyncError, SyncErrorCode};
use super::permission::PermissionResolver;
use super::queue::BatchQueue;
use super::remote::RemoteRepository;
use super::store::{LocalRepository, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum SyncPhase {
    Idle = 0,
    Pushing = 1,
    Pulling = 2,
}

impl SyncPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SyncPhase::Pushing,
            2 => SyncPhase::Pulling,
            _ => SyncPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    AlreadyRunning,
    Offline,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushReport {
    pub batches: usize,
    pub pushed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PullReport {
    pub fetched: usize,
    pub applied: usize,
    pub kept_local: usize,
    pub conflicts: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub push: PushReport,
    pub pull: PullReport,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Completed(SyncReport),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusError {
    pub code: SyncErrorCode,
    pub message: String,
}

impl From<&SyncError> for StatusError {
    fn from(err: &SyncError) -> Self {
        Self {
            code: err.code(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_syncing: bool,
    pub phase: SyncPhase,
    pub is_online: bool,
    pub last_sync_time: Option<i64>,
    pub pending_syncs: u64,
    pub error: Option<StatusError>,
}

struct PeriodicHandle {
    token: CancellationToken,
    timer: JoinHandle<()>,
    _reconnect: Subscription,
}

/// Resets the phase to `Idle` when a cycle ends, however it ends.
struct CycleGuard<'a> {
    phase: &'a AtomicU8,
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.phase.store(SyncPhase::Idle as u8, Ordering::SeqCst);
    }
}

/// Coordinates push and pull between the local store and the cloud store.
///
/// Only one cycle runs at a time; a trigger that arrives while a cycle is in
/// flight is skipped rather than queued.
pub struct SyncOrchestrator {
    local: Arc<LocalRepository>,
    remote: Arc<RemoteRepository>,
    connectivity: Arc<ConnectivityMonitor>,
    permissions: PermissionResolver,
    config: SyncConfig,
    phase: AtomicU8,
    session: RwLock<Option<Session>>,
    view: RwLock<Option<ActiveView>>,
    last_sync_time: Mutex<Option<i64>>,
    last_error: Mutex<Option<StatusError>>,
    periodic: Mutex<Option<PeriodicHandle>>,
}

impl SyncOrchestrator {
    pub async fn new(
        local: Arc<LocalRepository>,
        remote: Arc<RemoteRepository>,
        connectivity: Arc<ConnectivityMonitor>,
        config: SyncConfig,
    ) -> Result<Self, SyncError> {
        local.ensure_ready().await?;
        let last_sync_time = local.last_sync_time().await?;
        let permissions = PermissionResolver::new(
            Arc::clone(&local),
            Arc::clone(&remote),
            Arc::clone(&connectivity),
        );
        Ok(Self {
            local,
            remote,
            connectivity,
            permissions,
            config,
            phase: AtomicU8::new(SyncPhase::Idle as u8),
            session: RwLock::new(None),
            view: RwLock::new(None),
            last_sync_time: Mutex::new(last_sync_time),
            last_error: Mutex::new(None),
            periodic: Mutex::new(None),
        })
    }

    pub fn local(&self) -> &Arc<LocalRepository> {
        &self.local
    }

    pub fn remote(&self) -> &Arc<RemoteRepository> {
        &self.remote
    }

    pub fn connectivity(&self) -> &Arc<ConnectivityMonitor> {
        &self.connectivity
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn phase(&self) -> SyncPhase {
        SyncPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Signs a user in or out. Switching users drops the active view.
    pub fn set_session(&self, session: Option<Session>) {
        let mut current = write(&self.session);
        let changed = current.as_ref().map(|s| &s.user_id) != session.as_ref().map(|s| &s.user_id);
        *current = session;
        drop(current);
        if changed {
            *write(&self.view) = None;
        }
    }

    pub fn session(&self) -> Option<Session> {
        read(&self.session).clone()
    }

    pub fn set_active_view(&self, view: ActiveView) {
        info!(owner_id = %view.owner_id, tracker_id = %view.tracker_id, "active view changed");
        *write(&self.view) = Some(view);
    }

    pub fn active_view(&self) -> Option<ActiveView> {
        read(&self.view).clone()
    }

    /// Points the active view at the signed-in user's default tracker.
    pub async fn view_own_tracker(&self) -> Result<ActiveView, SyncError> {
        let session = self.require_session()?;
        let tracker = self.ensure_own_tracker(&session.user_id).await?;
        let view = ActiveView::new(session.user_id, tracker.id);
        self.set_active_view(view.clone());
        Ok(view)
    }

    /// One push-then-pull cycle for the active view.
    pub async fn manual_sync(&self) -> Result<SyncOutcome, SyncError> {
        let session = self.require_session()?;
        if !self.connectivity.is_online() {
            debug!("offline; sync skipped");
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_guard) = self.begin_cycle() else {
            debug!("sync already running; trigger ignored");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        info!(user_id = %session.user_id, "sync cycle started");
        let result = self.run_cycle(&session).await;
        self.finish_cycle(&result).await;
        result.map(SyncOutcome::Completed)
    }

    /// Push only. Used by the periodic timer and after local edits.
    pub async fn push_pending(&self) -> Result<SyncOutcome, SyncError> {
        let session = self.require_session()?;
        if !self.connectivity.is_online() {
            return Ok(SyncOutcome::Skipped(SkipReason::Offline));
        }
        let Some(_guard) = self.begin_cycle() else {
            debug!("sync already running; push skipped");
            return Ok(SyncOutcome::Skipped(SkipReason::AlreadyRunning));
        };

        let result = match self.resolve_view(&session).await {
            Ok(view) => self.push(&view, &session).await.map(|push| SyncReport {
                push,
                pull: PullReport::default(),
            }),
            Err(err) => Err(err),
        };
        self.finish_cycle(&result).await;
        result.map(SyncOutcome::Completed)
    }

    pub fn start_periodic_sync(self: &Arc<Self>, interval: Duration) {
        let mut periodic = lock(&self.periodic);
        if periodic.is_some() {
            info!("periodic sync already running");
            return;
        }

        let token = CancellationToken::new();
        let child = token.clone();
        let weak = Arc::downgrade(self);
        let timer = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(orchestrator) = weak.upgrade() else {
                            break;
                        };
                        if !orchestrator.connectivity.is_online() {
                            continue;
                        }
                        match orchestrator.push_pending().await {
                            Ok(outcome) => debug!(?outcome, "periodic push finished"),
                            Err(err) => warn!(error = %err, "periodic push failed"),
                        }
                    }
                }
            }
        });

        let weak = Arc::downgrade(self);
        let reconnect = self.connectivity.on_online(move || {
            let Some(orchestrator) = weak.upgrade() else {
                return;
            };
            tokio::spawn(async move {
                info!("back online; syncing");
                if let Err(err) = orchestrator.manual_sync().await {
                    warn!(error = %err, "reconnect sync failed");
                }
            });
        });

        *periodic = Some(PeriodicHandle {
            token,
            timer,
            _reconnect: reconnect,
        });
        info!(interval_ms = interval.as_millis() as u64, "periodic sync started");
    }

    /// Cancels the timer and the reconnect subscription. A cycle already in
    /// flight runs to completion.
    pub fn stop_periodic_sync(&self) {
        match lock(&self.periodic).take() {
            Some(handle) => {
                handle.token.cancel();
                info!("periodic sync stopped");
            }
            None => debug!("periodic sync was not running"),
        }
    }

    pub fn is_periodic_running(&self) -> bool {
        lock(&self.periodic)
            .as_ref()
            .is_some_and(|handle| !handle.timer.is_finished())
    }

    pub async fn sync_status(&self) -> Result<SyncStatus, SyncError> {
        let pending_syncs = self.local.count_needing_sync(None).await?;
        let phase = self.phase();
        let last_sync_time = *lock(&self.last_sync_time);
        let error = lock(&self.last_error).clone();
        Ok(SyncStatus {
            is_syncing: phase != SyncPhase::Idle,
            phase,
            is_online: self.connectivity.is_online(),
            last_sync_time,
            pending_syncs,
            error,
        })
    }

    /// Marks the active tracker's entry for `date` dirty and pushes it when
    /// online. A date with no entry is stale and ignored.
    pub async fn queue_sync(&self, date: &str) -> Result<(), SyncError> {
        let session = self.require_session()?;
        let view = self.resolve_view(&session).await?;
        if !self.local.mark_dirty(&view.tracker_id, date).await? {
            debug!(tracker_id = %view.tracker_id, date, "no entry for date; nothing to queue");
            return Ok(());
        }
        self.push_opportunistically().await;
        Ok(())
    }

    /// The UI edit path: writes the day locally as dirty, then queues it.
    pub async fn record_day(
        &self,
        date: &str,
        status: DayStatus,
        is_advisory: bool,
    ) -> Result<Entry, SyncError> {
        let session = self.require_session()?;
        let view = self.resolve_view(&session).await?;
        self.ensure_writable(&view, &session).await?;

        let mut entry = Entry::local_edit(&view.tracker_id, date, status, is_advisory, now_millis());
        if let Some(existing) = self.local.get_entry(&view.tracker_id, date).await? {
            entry.created_at = existing.created_at;
            entry.last_modified = entry.last_modified.max(existing.last_modified + 1);
        }
        let stored = self.local.create_or_update(&entry).await?;
        debug!(entry_id = %stored.id, status = stored.status.as_str(), "day recorded");
        self.push_opportunistically().await;
        Ok(stored)
    }

    /// Ends the orchestrator's life: stops timers and closes the local store.
    pub async fn dispose(&self) {
        self.stop_periodic_sync();
        self.local.close().await;
        info!("sync orchestrator disposed");
    }

    fn require_session(&self) -> Result<Session, SyncError> {
        self.session().ok_or(SyncError::Auth)
    }

    fn begin_cycle(&self) -> Option<CycleGuard<'_>> {
        self.phase
            .compare_exchange(
                SyncPhase::Idle as u8,
                SyncPhase::Pushing as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .ok()
            .map(|_| CycleGuard { phase: &self.phase })
    }

    async fn run_cycle(&self, session: &Session) -> Result<SyncReport, SyncError> {
        let view = self.resolve_view(session).await?;
        let push = self.push(&view, session).await;
        self.phase.store(SyncPhase::Pulling as u8, Ordering::SeqCst);
        let pull = self.pull(&view, session).await;
        match (push, pull) {
            (Ok(push), Ok(pull)) => {
                info!(
                    pushed = push.pushed,
                    applied = pull.applied,
                    conflicts = pull.conflicts,
                    "sync cycle finished"
                );
                Ok(SyncReport { push, pull })
            }
            (Err(err), pull) => {
                if let Err(pull_err) = pull {
                    warn!(error = %pull_err, "pull failed after push error");
                }
                Err(err)
            }
            (Ok(_), Err(err)) => Err(err),
        }
    }

    async fn finish_cycle(&self, result: &Result<SyncReport, SyncError>) {
        match result {
            Ok(_) => {
                *lock(&self.last_error) = None;
                self.touch_last_sync().await;
            }
            Err(err) => {
                warn!(error = %err, code = %err.code(), "sync cycle failed");
                *lock(&self.last_error) = Some(StatusError::from(err));
            }
        }
    }

    async fn touch_last_sync(&self) {
        let now = now_millis();
        *lock(&self.last_sync_time) = Some(now);
        if let Err(err) = self.local.set_last_sync_time(now).await {
            warn!(error = %err, "failed to persist last sync time");
        }
    }

    async fn push_opportunistically(&self) {
        if !self.connectivity.is_online() {
            return;
        }
        if let Err(err) = self.push_pending().await {
            warn!(error = %err, "push after local edit failed");
        }
    }

    async fn resolve_view(&self, session: &Session) -> Result<ActiveView, SyncError> {
        if let Some(view) = self.active_view() {
            if !view.is_owned_by(&session.user_id) || !self.connectivity.is_online() {
                return Ok(view);
            }
            let Some(tracker) = self.local.get_tracker(&view.tracker_id).await? else {
                return Ok(view);
            };
            let tracker = self.publish_tracker(&session.user_id, tracker).await?;
            if tracker.id == view.tracker_id {
                return Ok(view);
            }
            let view = ActiveView::new(session.user_id.clone(), tracker.id);
            self.set_active_view(view.clone());
            return Ok(view);
        }
        let tracker = self.ensure_own_tracker(&session.user_id).await?;
        let view = ActiveView::new(session.user_id.clone(), tracker.id);
        self.set_active_view(view.clone());
        Ok(view)
    }

    /// Local default, else the remote default, else a freshly created one.
    pub(crate) async fn ensure_own_tracker(&self, user_id: &str) -> Result<Tracker, SyncError> {
        if let Some(tracker) = self.local.default_tracker(user_id).await? {
            return self.publish_tracker(user_id, tracker).await;
        }

        if self.connectivity.is_online() {
            match self.remote.list_trackers(user_id).await {
                Ok(trackers) => {
                    for tracker in trackers.iter().filter(|t| t.owner_id == user_id) {
                        self.local.upsert_tracker(tracker).await?;
                    }
                    if let Some(tracker) = self.local.default_tracker(user_id).await? {
                        return Ok(tracker);
                    }
                }
                Err(err) => warn!(error = %err, "could not list remote trackers"),
            }
        }

        let tracker = self.local.ensure_default_tracker(user_id).await?;
        info!(tracker_id = %tracker.id, "created default tracker");
        self.publish_tracker(user_id, tracker).await
    }

    /// Hands a tracker created on this device to the remote store once online.
    /// When the remote store already has a default for the owner, that one is
    /// adopted instead and the local entries move into it.
    async fn publish_tracker(&self, user_id: &str, tracker: Tracker) -> Result<Tracker, SyncError> {
        if !self.connectivity.is_online() || !self.local.tracker_needs_publish(&tracker.id).await? {
            return Ok(tracker);
        }

        if tracker.is_default {
            let remote_default = match self.remote.list_trackers(user_id).await {
                Ok(trackers) => trackers
                    .into_iter()
                    .find(|t| t.owner_id == user_id && t.is_default),
                Err(err) => {
                    warn!(error = %err, tracker_id = %tracker.id, "could not list remote trackers; publish deferred");
                    return Ok(tracker);
                }
            };
            if let Some(remote_default) = remote_default.filter(|t| t.id != tracker.id) {
                let moved = self.local.adopt_tracker(&tracker.id, &remote_default).await?;
                info!(
                    from = %tracker.id,
                    to = %remote_default.id,
                    moved,
                    "adopted remote default tracker"
                );
                return Ok(remote_default);
            }
        }

        match self.remote.put_tracker(&tracker).await {
            Ok(_) => {
                self.local.mark_tracker_published(&tracker.id).await?;
                info!(tracker_id = %tracker.id, "tracker published");
            }
            Err(err) => warn!(error = %err, tracker_id = %tracker.id, "could not publish tracker"),
        }
        Ok(tracker)
    }

    async fn ensure_writable(&self, view: &ActiveView, session: &Session) -> Result<(), SyncError> {
        if view.is_owned_by(&session.user_id)
            || self.permissions.can_write(view, &session.user_id).await?
        {
            return Ok(());
        }
        Err(SyncError::PermissionDenied {
            owner_id: view.owner_id.clone(),
            tracker_id: view.tracker_id.clone(),
        })
    }

    async fn push(&self, view: &ActiveView, session: &Session) -> Result<PushReport, SyncError> {
        if let Err(err) = self.ensure_writable(view, session).await {
            warn!(owner_id = %view.owner_id, tracker_id = %view.tracker_id, "no write access; push skipped");
            return Err(err);
        }

        let dirty = self.local.list_needing_sync(Some(&view.tracker_id)).await?;
        let mut report = PushReport::default();
        if dirty.is_empty() {
            debug!(tracker_id = %view.tracker_id, "nothing to push");
            return Ok(report);
        }

        let mut queue = BatchQueue::from_entries(dirty, self.config.batch_size);
        let policy = self.config.retry_policy();
        let mut first_error: Option<SyncError> = None;

        while let Ok(batch) = queue.dequeue() {
            let writes: Vec<RemoteEntry> = batch.entries.iter().map(Entry::to_remote).collect();
            let writes = writes.as_slice();
            let sequence = batch.sequence;
            let outcome = policy
                .run_with_hint(
                    |attempt| async move {
                        debug!(sequence, attempt, size = writes.len(), "pushing batch");
                        self.remote
                            .batch_write(&view.owner_id, &view.tracker_id, writes)
                            .await
                    },
                    |err: &SyncError| {
                        let retryable = err.is_retryable();
                        if retryable {
                            warn!(sequence, error = %err, "batch write failed; will retry");
                        }
                        retryable
                    },
                    SyncError::retry_after,
                )
                .await;

            report.batches += 1;
            match outcome.result {
                Ok(_) => {
                    self.local.mark_synced(&batch.entries).await?;
                    report.pushed += batch.entries.len();
                    self.touch_last_sync().await;
                }
                Err(err) => {
                    error!(
                        sequence,
                        attempts = outcome.attempts,
                        error = %err,
                        "batch write gave up"
                    );
                    self.local
                        .mark_sync_error(&batch.entries, &err.to_string(), outcome.attempts)
                        .await?;
                    report.failed += batch.entries.len();
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    async fn pull(&self, view: &ActiveView, session: &Session) -> Result<PullReport, SyncError> {
        let remote_entries = self
            .remote
            .query_by_owner(&view.owner_id, &view.tracker_id)
            .await?;
        let mut report = PullReport {
            fetched: remote_entries.len(),
            ..PullReport::default()
        };

        for remote in &remote_entries {
            let local = self.local.get_entry(&view.tracker_id, &remote.date).await?;
            let superseded_dirty = match resolve_conflict(local.as_ref(), remote) {
                ConflictDecision::KeepLocal => {
                    report.kept_local += 1;
                    continue;
                }
                ConflictDecision::CreateLocal => false,
                ConflictDecision::ApplyRemote { superseded_dirty } => superseded_dirty,
            };

            let incoming = Entry::from_remote(&view.tracker_id, remote);
            let applied = match self.local.apply_remote(&incoming).await {
                Ok(applied) => applied,
                Err(StoreError::Validation(message)) => {
                    warn!(date = %remote.date, %message, "skipping malformed remote entry");
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            if !applied {
                report.kept_local += 1;
                continue;
            }
            report.applied += 1;

            if superseded_dirty {
                if let Some(local) = &local {
                    self.local
                        .record_conflict(local, &incoming, now_millis())
                        .await?;
                    report.conflicts += 1;
                    info!(entry_id = %incoming.id, "unsynced local edit superseded by newer remote value");
                }
            }
        }

        match self.remote.query_shares(&session.user_id).await {
            Ok(shares) => {
                self.local
                    .replace_shares_for_user(&session.user_id, &shares)
                    .await?
            }
            Err(err) => warn!(error = %err, "could not refresh shares"),
        }

        Ok(report)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
