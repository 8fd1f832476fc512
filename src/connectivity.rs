//! Network reachability tracking.
//!
//! The host reports reachability changes (or lets a [`ReachabilityProbe`] poll for them) and the
//! monitor fans transitions out to the callback registered with [`ConnectivityMonitor::start`].

use async_trait::async_trait;
use log::{debug, info};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    Available,
    Unavailable,
}

/// Something that can tell whether the network is usable right now.
#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    async fn check(&self) -> Connectivity;
}

/// Considers the network available when a TCP connection to `addr` succeeds in time.
#[derive(Debug, Clone)]
pub struct TcpReachabilityProbe {
    addr: String,
    timeout: Duration,
}

impl TcpReachabilityProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpReachabilityProbe {
    async fn check(&self) -> Connectivity {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.addr)).await {
            Ok(Ok(_)) => Connectivity::Available,
            Ok(Err(e)) => {
                debug!(target: "Client/Connectivity", "Probe to {} failed: {e}", self.addr);
                Connectivity::Unavailable
            }
            Err(_) => Connectivity::Unavailable,
        }
    }
}

pub struct ConnectivityMonitor {
    state: watch::Sender<Connectivity>,
    probe: Option<(Arc<dyn ReachabilityProbe>, Duration)>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Default for ConnectivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectivityMonitor {
    /// A monitor that only learns about changes through [`report`](Self::report).
    pub fn new() -> Self {
        Self {
            state: watch::channel(Connectivity::Available).0,
            probe: None,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// A monitor that also polls `probe` every `interval` while started.
    pub fn with_probe(probe: Arc<dyn ReachabilityProbe>, interval: Duration) -> Self {
        Self {
            state: watch::channel(Connectivity::Available).0,
            probe: Some((probe, interval)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    pub fn current(&self) -> Connectivity {
        *self.state.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.current() == Connectivity::Available
    }

    pub fn subscribe(&self) -> watch::Receiver<Connectivity> {
        self.state.subscribe()
    }

    /// Records the latest reachability. Repeating the current value is not a transition.
    pub fn report(&self, connectivity: Connectivity) {
        let changed = self.state.send_if_modified(|current| {
            if *current == connectivity {
                false
            } else {
                *current = connectivity;
                true
            }
        });
        if changed {
            info!(target: "Client/Connectivity", "Network is now {connectivity:?}");
        }
    }

    /// Begins observing. `callback` runs once per transition, in order.
    pub fn start<F>(self: &Arc<Self>, callback: F)
    where
        F: Fn(Connectivity) + Send + Sync + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);

        let mut rx = self.state.subscribe();
        rx.mark_unchanged();
        tasks.push(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let connectivity = *rx.borrow_and_update();
                callback(connectivity);
            }
        }));

        if let Some((probe, interval)) = self.probe.clone() {
            let monitor = Arc::downgrade(self);
            tasks.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    ticker.tick().await;
                    let connectivity = probe.check().await;
                    match monitor.upgrade() {
                        Some(monitor) => monitor.report(connectivity),
                        None => break,
                    }
                }
            }));
        }
    }

    /// Stops observing. The last known state stays readable.
    pub fn stop(&self) {
        let tasks = std::mem::take(
            &mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner),
        );
        for task in tasks {
            task.abort();
        }
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}
