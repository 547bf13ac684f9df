use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::view::{View, ViewConfig, ViewError, ViewUpdate};
use crate::clients::ClientSet;
use crate::dependency::{Dep, DepKind};

/// Channels the Runner consumes. The Watcher never closes them while it
/// is running; consumers select them alongside a shutdown signal.
#[derive(Debug)]
pub struct WatcherChannels {
    pub data_rx: mpsc::UnboundedReceiver<ViewUpdate>,
    pub err_rx: mpsc::UnboundedReceiver<ViewError>,
}

#[derive(Debug)]
struct ViewHandle {
    dep: Dep,
    cancel: CancellationToken,
    /// Protected views (Vault token lifecycle) survive dependency
    /// garbage collection.
    protected: bool,
}

/// Owns the set of Views, exactly one per fingerprint.
///
/// Adds and removes are serialized through the map lock; concurrent adds
/// for the same fingerprint collapse to one View.
#[derive(Debug)]
pub struct Watcher {
    clients: ClientSet,
    config: ViewConfig,
    views: Mutex<HashMap<String, ViewHandle>>,
    data_tx: mpsc::UnboundedSender<ViewUpdate>,
    err_tx: mpsc::UnboundedSender<ViewError>,
    cancel: CancellationToken,
}

impl Watcher {
    pub fn new(clients: ClientSet, config: ViewConfig) -> (Arc<Self>, WatcherChannels) {
        let (data_tx, data_rx) = mpsc::unbounded_channel();
        let (err_tx, err_rx) = mpsc::unbounded_channel();
        let watcher = Arc::new(Self {
            clients,
            config,
            views: Mutex::new(HashMap::new()),
            data_tx,
            err_tx,
            cancel: CancellationToken::new(),
        });
        (watcher, WatcherChannels { data_rx, err_rx })
    }

    /// Ensures a View exists for the dependency. Returns false when one
    /// was already polling (no-op).
    pub fn add(&self, dep: Dep) -> bool {
        self.add_inner(dep, false, self.data_tx.clone(), self.err_tx.clone())
    }

    /// Like `add`, but the View survives `prune`. Used for the Vault
    /// token lifecycle views, which no template ever reports as used.
    pub fn add_protected(&self, dep: Dep) -> bool {
        self.add_inner(dep, true, self.data_tx.clone(), self.err_tx.clone())
    }

    /// Registers a View whose updates and errors flow to private
    /// channels instead of the shared ones.
    pub(crate) fn add_with_channels(
        &self,
        dep: Dep,
        data_tx: mpsc::UnboundedSender<ViewUpdate>,
        err_tx: mpsc::UnboundedSender<ViewError>,
    ) -> bool {
        self.add_inner(dep, true, data_tx, err_tx)
    }

    fn add_inner(
        &self,
        dep: Dep,
        protected: bool,
        data_tx: mpsc::UnboundedSender<ViewUpdate>,
        err_tx: mpsc::UnboundedSender<ViewError>,
    ) -> bool {
        let mut views = self.views.lock();
        if self.cancel.is_cancelled() {
            return false;
        }
        let fingerprint = dep.fingerprint().to_string();
        if views.contains_key(&fingerprint) {
            return false;
        }
        debug!("(watcher) adding {}", dep);

        let cancel = self.cancel.child_token();
        let mut config = self.config;
        if dep.kind() != DepKind::Consul {
            // Stale reads are a Consul blocking-query feature.
            config.max_stale = None;
        }
        let view = View::new(dep.clone(), self.clients.clone(), config, data_tx, err_tx);
        let view_cancel = cancel.clone();
        tokio::spawn(view.poll(view_cancel));

        views.insert(
            fingerprint,
            ViewHandle {
                dep,
                cancel,
                protected,
            },
        );
        true
    }

    /// Stops and discards the View if present; returns whether it
    /// existed.
    pub fn remove(&self, fingerprint: &str) -> bool {
        let mut views = self.views.lock();
        match views.remove(fingerprint) {
            Some(handle) => {
                debug!("(watcher) removing {}", handle.dep);
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn watching(&self, fingerprint: &str) -> bool {
        self.views.lock().contains_key(fingerprint)
    }

    pub fn size(&self) -> usize {
        self.views.lock().len()
    }

    /// Garbage-collects views whose dependency is no longer used by any
    /// template. Protected views are retained.
    pub fn prune(&self, used: &HashSet<String>) {
        let mut views = self.views.lock();
        views.retain(|fingerprint, handle| {
            if handle.protected || used.contains(fingerprint) {
                return true;
            }
            info!("(watcher) {} is no longer needed, stopping", handle.dep);
            handle.cancel.cancel();
            false
        });
    }

    /// Stops every View. Idempotent.
    pub fn stop(&self) {
        info!("(watcher) stopping all views");
        self.cancel.cancel();
        self.views.lock().clear();
    }

    pub(crate) fn clients(&self) -> &ClientSet {
        &self.clients
    }
}
