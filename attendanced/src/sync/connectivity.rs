use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::remote::RemoteRepository;

/// Reachability of the cloud store, published over a `watch` channel.
pub struct ConnectivityMonitor {
    state: watch::Sender<bool>,
}

/// Keeps an `on_online` callback or a probe task alive. Dropping it unsubscribes.
pub struct Subscription {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn cancel(&mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl ConnectivityMonitor {
    pub fn new(online: bool) -> Self {
        let (state, _) = watch::channel(online);
        Self { state }
    }

    pub fn is_online(&self) -> bool {
        *self.state.borrow()
    }

    pub fn set_online(&self, online: bool) {
        let changed = self.state.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state.subscribe()
    }

    /// Runs `callback` on every offline to online transition until the
    /// returned subscription is dropped.
    pub fn on_online<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut rx = self.subscribe();
        let mut was_online = *rx.borrow_and_update();
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let online = *rx.borrow_and_update();
                        if online && !was_online {
                            callback();
                        }
                        was_online = online;
                    }
                }
            }
        });
        Subscription {
            token,
            handle: Some(handle),
        }
    }

    /// Pings the health endpoint every `interval` and feeds the result into
    /// [`ConnectivityMonitor::set_online`].
    pub fn spawn_probe(
        self: &Arc<Self>,
        remote: Arc<RemoteRepository>,
        interval: Duration,
    ) -> Subscription {
        let monitor = Arc::clone(self);
        let token = CancellationToken::new();
        let child = token.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = child.cancelled() => break,
                    _ = ticker.tick() => {
                        let online = match remote.ping().await {
                            Ok(()) => true,
                            Err(err) => {
                                debug!(error = %err, "health probe failed");
                                false
                            }
                        };
                        monitor.set_online(online);
                    }
                }
            }
        });
        Subscription {
            token,
            handle: Some(handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use attendance_core::CloudClient;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn callback_fires_on_each_reconnect() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let _sub = monitor.on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        monitor.set_online(true);
        settle().await;
        monitor.set_online(true);
        settle().await;
        monitor.set_online(false);
        settle().await;
        monitor.set_online(true);
        settle().await;

        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropping_subscription_unsubscribes() {
        let monitor = ConnectivityMonitor::new(false);
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let sub = monitor.on_online(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(sub);

        monitor.set_online(true);
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn probe_tracks_health_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let remote = Arc::new(RemoteRepository::new(
            CloudClient::with_base_url(&server.uri(), "token").unwrap(),
        ));
        let monitor = Arc::new(ConnectivityMonitor::new(false));
        let mut probe = monitor.spawn_probe(remote, Duration::from_millis(20));
        settle().await;
        assert!(monitor.is_online());

        probe.cancel();
        assert!(!probe.is_active());
    }
}
