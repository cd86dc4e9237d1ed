use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::sync::backoff::{Backoff, RetryPolicy};
use crate::sync::entry::Session;
use crate::sync::store::default_db_path;

const DEFAULT_BATCH_SIZE: u64 = 50;
const DEFAULT_MAX_RETRIES: u64 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 1000;
const DEFAULT_SYNC_INTERVAL_MS: u64 = 300_000;
const DEFAULT_PROBE_SECS: u64 = 30;

/// Knobs for the push pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncConfig {
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub periodic_interval: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE as usize,
            max_retries: DEFAULT_MAX_RETRIES as u32,
            retry_base_delay: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            periodic_interval: Duration::from_millis(DEFAULT_SYNC_INTERVAL_MS),
        }
    }
}

impl SyncConfig {
    /// Linear `base × attempt` retry for a single batch.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Backoff::linear(self.retry_base_delay))
    }

    fn from_lookup<F>(lookup: &F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            batch_size: read_u64(lookup, "ATTENDANCE_BATCH_SIZE", DEFAULT_BATCH_SIZE) as usize,
            max_retries: read_u64(lookup, "ATTENDANCE_MAX_RETRIES", DEFAULT_MAX_RETRIES)
                .min(u64::from(u32::MAX)) as u32,
            retry_base_delay: Duration::from_millis(read_u64(
                lookup,
                "ATTENDANCE_RETRY_BASE_MS",
                DEFAULT_RETRY_BASE_MS,
            )),
            periodic_interval: Duration::from_millis(read_u64(
                lookup,
                "ATTENDANCE_SYNC_INTERVAL_MS",
                DEFAULT_SYNC_INTERVAL_MS,
            )),
        }
    }
}

#[derive(Clone, Debug)]
pub struct DaemonConfig {
    pub api_url: Option<String>,
    pub token: Option<String>,
    pub user_id: Option<String>,
    pub user_email: Option<String>,
    pub db_path: PathBuf,
    pub probe_interval: Duration,
    pub sync: SyncConfig,
}

impl DaemonConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = match read_string(&lookup, "ATTENDANCE_DB_PATH") {
            Some(value) if value.starts_with('~') => {
                let home = dirs::home_dir().context("home directory is unavailable")?;
                expand_with_home(&value, &home)
            }
            Some(value) => PathBuf::from(value),
            None => default_db_path().context("no default location for the local database")?,
        };

        Ok(Self {
            api_url: read_string(&lookup, "ATTENDANCE_API_URL"),
            token: read_string(&lookup, "ATTENDANCE_TOKEN"),
            user_id: read_string(&lookup, "ATTENDANCE_USER_ID"),
            user_email: read_string(&lookup, "ATTENDANCE_USER_EMAIL"),
            db_path,
            probe_interval: Duration::from_secs(read_u64(
                &lookup,
                "ATTENDANCE_PROBE_SECS",
                DEFAULT_PROBE_SECS,
            )),
            sync: SyncConfig::from_lookup(&lookup),
        })
    }

    /// The signed-in user, if the environment names one.
    pub fn session(&self) -> Option<Session> {
        self.user_id
            .as_deref()
            .map(|user_id| Session::new(user_id, self.user_email.as_deref()))
    }
}

fn read_string<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn expand_with_home(value: &str, home: &Path) -> PathBuf {
    if value == "~" {
        return home.to_path_buf();
    }
    if let Some(rest) = value.strip_prefix("~/") {
        return home.join(rest);
    }
    PathBuf::from(value)
}
