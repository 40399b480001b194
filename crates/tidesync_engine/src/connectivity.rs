//! Connectivity monitor.
//!
//! Network presence alone does not permit transmission. The monitor moves
//! through three states:
//!
//! ```text
//!            network online            probe ok
//! Offline ─────────────────▶ OnlineUnverified ─────────▶ Online
//!    ▲                             ▲    │ probe failed       │
//!    │        network offline      │    └─ (retry on tick)   │
//!    └─────────────────────────────┴──────── probe failed ◀──┘
//! ```
//!
//! Only [`ConnectivityState::Online`] lets the sync driver transmit.
//! Probing never blocks the caller; it runs in spawned tasks.

use crate::guard::BusyFlag;
use crate::remote::RemoteStore;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Reachability of the remote store as seen by this process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectivityState {
    /// The network is down.
    Offline,
    /// The network is up but the remote store has not answered a probe yet.
    OnlineUnverified,
    /// The remote store answered recently.
    Online,
}

impl ConnectivityState {
    /// Returns true if transmission to the remote store is permitted.
    pub fn allows_transmission(&self) -> bool {
        matches!(self, ConnectivityState::Online)
    }

    /// Returns the state name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectivityState::Offline => "offline",
            ConnectivityState::OnlineUnverified => "online-unverified",
            ConnectivityState::Online => "online",
        }
    }
}

impl fmt::Display for ConnectivityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of the connectivity state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Connectivity {
    /// Current state.
    pub state: ConnectivityState,
    /// When the remote store was last confirmed reachable.
    pub last_verified: Option<DateTime<Utc>>,
}

impl Connectivity {
    fn initial() -> Self {
        Self {
            state: ConnectivityState::OnlineUnverified,
            last_verified: None,
        }
    }
}

/// Tracks network transitions and probes the remote store.
///
/// The monitor starts in [`ConnectivityState::OnlineUnverified`] and is the
/// only writer of the connectivity state. Other components observe it
/// through [`ConnectivityMonitor::subscribe`].
pub struct ConnectivityMonitor {
    remote: Arc<dyn RemoteStore>,
    state: watch::Sender<Connectivity>,
    probe_interval: Duration,
    probing: BusyFlag,
}

impl ConnectivityMonitor {
    /// Creates a monitor probing `remote` every `probe_interval`.
    pub fn new(remote: Arc<dyn RemoteStore>, probe_interval: Duration) -> Self {
        let (state, _) = watch::channel(Connectivity::initial());
        Self {
            remote,
            state,
            probe_interval,
            probing: BusyFlag::new(),
        }
    }

    /// Returns a receiver that sees every state change.
    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Returns the current snapshot.
    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    /// Returns true if transmission is permitted.
    pub fn is_online(&self) -> bool {
        self.current().state.allows_transmission()
    }

    /// Handles the runtime reporting that the network went away.
    pub fn network_offline(&self) {
        self.state.send_if_modified(|c| {
            if c.state == ConnectivityState::Offline {
                return false;
            }
            info!(from = %c.state, "connectivity lost");
            c.state = ConnectivityState::Offline;
            true
        });
    }

    /// Handles the runtime reporting that the network is back.
    ///
    /// Moves to [`ConnectivityState::OnlineUnverified`] and probes in the
    /// background.
    pub fn network_online(self: &Arc<Self>) {
        self.state.send_if_modified(|c| {
            if c.state != ConnectivityState::Offline {
                return false;
            }
            info!("network available, verifying remote store");
            c.state = ConnectivityState::OnlineUnverified;
            true
        });

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            monitor.probe().await;
        });
    }

    /// Probes the remote store once and updates the state.
    ///
    /// Does nothing while offline. A probe already running is not doubled;
    /// the caller gets the current verdict instead. Returns whether the
    /// store is considered reachable afterwards.
    pub async fn probe(&self) -> bool {
        if self.current().state == ConnectivityState::Offline {
            return false;
        }
        let Some(_probing) = self.probing.try_acquire() else {
            return self.is_online();
        };

        let reachable = self.remote.probe_connected().await;
        debug!(reachable, "remote store probed");

        self.state.send_if_modified(|c| match (c.state, reachable) {
            // went offline while the probe was out
            (ConnectivityState::Offline, _) => false,
            (previous, true) => {
                if previous != ConnectivityState::Online {
                    info!("remote store reachable");
                }
                c.state = ConnectivityState::Online;
                c.last_verified = Some(Utc::now());
                true
            }
            (ConnectivityState::Online, false) => {
                info!("remote store stopped answering");
                c.state = ConnectivityState::OnlineUnverified;
                true
            }
            (ConnectivityState::OnlineUnverified, false) => false,
        });

        reachable && self.is_online()
    }

    /// Records that a remote call just succeeded.
    ///
    /// Upgrades [`ConnectivityState::OnlineUnverified`] to online; never
    /// overrides an offline report.
    pub fn record_reachable(&self) {
        self.state.send_if_modified(|c| {
            if c.state != ConnectivityState::OnlineUnverified {
                return false;
            }
            info!("remote store reachable");
            c.state = ConnectivityState::Online;
            c.last_verified = Some(Utc::now());
            true
        });
    }

    /// Spawns the periodic prober. The first probe runs immediately.
    pub fn spawn_prober(self: &Arc<Self>) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.probe_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                monitor.probe().await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_remote::MemoryRemoteStore;

    fn monitor(remote: &MemoryRemoteStore) -> Arc<ConnectivityMonitor> {
        Arc::new(ConnectivityMonitor::new(
            Arc::new(remote.clone()),
            Duration::from_secs(30),
        ))
    }

    #[tokio::test]
    async fn starts_unverified_and_probe_verifies() {
        let remote = MemoryRemoteStore::new();
        let monitor = monitor(&remote);
        assert_eq!(monitor.current().state, ConnectivityState::OnlineUnverified);
        assert!(!monitor.is_online());

        assert!(monitor.probe().await);
        let current = monitor.current();
        assert_eq!(current.state, ConnectivityState::Online);
        assert!(current.last_verified.is_some());
    }

    #[tokio::test]
    async fn failed_probe_stays_unverified() {
        let remote = MemoryRemoteStore::new();
        remote.set_reachable(false);
        let monitor = monitor(&remote);

        assert!(!monitor.probe().await);
        assert_eq!(monitor.current().state, ConnectivityState::OnlineUnverified);

        remote.set_reachable(true);
        assert!(monitor.probe().await);
        assert!(monitor.is_online());
    }

    #[tokio::test]
    async fn failed_probe_downgrades_online() {
        let remote = MemoryRemoteStore::new();
        let monitor = monitor(&remote);
        monitor.probe().await;

        remote.set_reachable(false);
        monitor.probe().await;
        assert_eq!(monitor.current().state, ConnectivityState::OnlineUnverified);
    }

    #[tokio::test]
    async fn offline_blocks_probing() {
        let remote = MemoryRemoteStore::new();
        let monitor = monitor(&remote);
        monitor.network_offline();

        assert!(!monitor.probe().await);
        monitor.record_reachable();
        assert_eq!(monitor.current().state, ConnectivityState::Offline);
    }

    #[tokio::test]
    async fn network_online_probes_in_background() {
        let remote = MemoryRemoteStore::new();
        let monitor = monitor(&remote);
        monitor.network_offline();
        let mut rx = monitor.subscribe();

        monitor.network_online();
        let online = tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|c| c.state == ConnectivityState::Online),
        )
        .await;
        assert!(matches!(online, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn record_reachable_upgrades_unverified() {
        let remote = MemoryRemoteStore::new();
        let monitor = monitor(&remote);
        monitor.record_reachable();
        assert!(monitor.is_online());
    }

    #[test]
    fn only_online_allows_transmission() {
        assert!(ConnectivityState::Online.allows_transmission());
        assert!(!ConnectivityState::OnlineUnverified.allows_transmission());
        assert!(!ConnectivityState::Offline.allows_transmission());
        assert_eq!(ConnectivityState::OnlineUnverified.to_string(), "online-unverified");
    }
}
