//! Application-to-drain bindings
//!
//! An external registry announces drains through two event streams, one for
//! additions and one for removals. [`DrainBindings`] is the manager's view
//! of what is currently bound, independent of whether a sink is running.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use tokio::sync::mpsc;

/// One registry announcement: `app_id` wants its logs sent to `url`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AppDestination {
    pub app_id: String,
    pub url: String,
}

impl AppDestination {
    pub fn new(app_id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            url: url.into(),
        }
    }
}

impl fmt::Display for AppDestination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.app_id, self.url)
    }
}

/// Sending halves of the registry event streams
#[derive(Debug, Clone)]
pub struct RegistryEvents {
    pub adds: mpsc::Sender<AppDestination>,
    pub removes: mpsc::Sender<AppDestination>,
}

/// Receiving halves, handed to [`crate::SinkManager::start`]
#[derive(Debug)]
pub struct RegistryStreams {
    pub adds: mpsc::Receiver<AppDestination>,
    pub removes: mpsc::Receiver<AppDestination>,
}

/// Create a pair of bounded add/remove event streams
pub fn registry_channels(capacity: usize) -> (RegistryEvents, RegistryStreams) {
    let (add_tx, add_rx) = mpsc::channel(capacity.max(1));
    let (remove_tx, remove_rx) = mpsc::channel(capacity.max(1));
    (
        RegistryEvents {
            adds: add_tx,
            removes: remove_tx,
        },
        RegistryStreams {
            adds: add_rx,
            removes: remove_rx,
        },
    )
}

/// Drains currently bound per application
#[derive(Debug, Default)]
pub struct DrainBindings {
    bindings: HashMap<String, BTreeSet<String>>,
}

impl DrainBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns false if the binding already existed
    pub fn bind(&mut self, app_id: &str, url: &str) -> bool {
        self.bindings
            .entry(app_id.to_string())
            .or_default()
            .insert(url.to_string())
    }

    /// Returns false if there was no such binding
    pub fn unbind(&mut self, app_id: &str, url: &str) -> bool {
        let Some(urls) = self.bindings.get_mut(app_id) else {
            return false;
        };
        let removed = urls.remove(url);
        if urls.is_empty() {
            self.bindings.remove(app_id);
        }
        removed
    }

    pub fn is_bound(&self, app_id: &str, url: &str) -> bool {
        self.bindings
            .get(app_id)
            .is_some_and(|urls| urls.contains(url))
    }

    pub fn urls_for(&self, app_id: &str) -> impl Iterator<Item = &str> {
        self.bindings
            .get(app_id)
            .into_iter()
            .flat_map(|urls| urls.iter().map(String::as_str))
    }

    pub fn len(&self) -> usize {
        self.bindings.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
