use std::sync::Arc;

use anyhow::Context;
use attendance_core::CloudClient;
use tracing::{info, warn};

use crate::config::DaemonConfig;
use crate::sharing::ShareManager;
use crate::sync::backoff::RetryPolicy;
use crate::sync::connectivity::ConnectivityMonitor;
use crate::sync::engine::{SyncOrchestrator, SyncOutcome, SyncStatus};
use crate::sync::remote::RemoteRepository;
use crate::sync::store::LocalRepository;

pub struct DaemonRuntime {
    config: DaemonConfig,
    orchestrator: Arc<SyncOrchestrator>,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: DaemonConfig) -> anyhow::Result<Self> {
        let token = config.token.clone().unwrap_or_else(|| {
            warn!("ATTENDANCE_TOKEN is not set; the cloud store will reject requests");
            String::new()
        });
        let client = match config.api_url.as_deref() {
            Some(url) => CloudClient::with_base_url(url, token),
            None => CloudClient::new(token),
        }
        .context("failed to build cloud client")?;

        let local = LocalRepository::open_path(&config.db_path, &RetryPolicy::startup())
            .await
            .with_context(|| format!("failed to open local store at {:?}", config.db_path))?;
        let orchestrator = SyncOrchestrator::new(
            Arc::new(local),
            Arc::new(RemoteRepository::new(client)),
            Arc::new(ConnectivityMonitor::new(false)),
            config.sync,
        )
        .await
        .context("failed to initialize sync orchestrator")?;
        orchestrator.set_session(config.session());

        Ok(Self {
            config,
            orchestrator: Arc::new(orchestrator),
        })
    }

    pub fn orchestrator(&self) -> &Arc<SyncOrchestrator> {
        &self.orchestrator
    }

    pub fn share_manager(&self) -> ShareManager {
        ShareManager::new(Arc::clone(&self.orchestrator))
    }

    /// Pings the cloud store once and records the result.
    pub async fn probe_once(&self) -> bool {
        let online = self.orchestrator.remote().ping().await.is_ok();
        self.orchestrator.connectivity().set_online(online);
        online
    }

    pub async fn sync_once(&self) -> anyhow::Result<SyncOutcome> {
        if !self.probe_once().await {
            warn!("cloud store unreachable");
        }
        let outcome = self
            .orchestrator
            .manual_sync()
            .await
            .context("sync cycle failed")?;
        Ok(outcome)
    }

    pub async fn status(&self) -> anyhow::Result<SyncStatus> {
        self.orchestrator
            .sync_status()
            .await
            .context("failed to read sync status")
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(
            db_path = %self.config.db_path.display(),
            interval_ms = self.config.sync.periodic_interval.as_millis() as u64,
            "attendanced started"
        );
        if self.orchestrator.session().is_none() {
            warn!("ATTENDANCE_USER_ID is not set; sync stays idle");
        }

        self.orchestrator
            .start_periodic_sync(self.config.sync.periodic_interval);
        let probe = self.orchestrator.connectivity().spawn_probe(
            Arc::clone(self.orchestrator.remote()),
            self.config.probe_interval,
        );

        tokio::signal::ctrl_c()
            .await
            .context("failed waiting for shutdown signal")?;
        info!("shutting down");

        drop(probe);
        self.orchestrator.dispose().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "daemon_tests.rs"]
mod tests;
