//! Per-path change callbacks.
//!
//! The session's read loop calls [`SubscriptionRegistry::notify`] for every
//! SetData packet it reassembles, in arrival order.  Callbacks run on the
//! read loop itself, so they must be quick; a callback that needs to do real
//! work should forward the update to a channel.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use rnet_core::protocol::SequenceCounter;
use rnet_core::{DeviceAddress, Path};

/// Handle returned by [`SubscriptionRegistry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// What changed at a subscribed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathUpdate {
    /// One packet of a transfer arrived.
    Fragment {
        device: DeviceAddress,
        path: Path,
        packet_number: u16,
        packet_count: u16,
        bytes: Arc<[u8]>,
    },
    /// The transfer finished; `value` is now what a read returns.
    Complete {
        device: DeviceAddress,
        path: Path,
        value: Arc<[u8]>,
    },
}

pub type PathCallback = Arc<dyn Fn(&PathUpdate) + Send + Sync>;

type Key = (DeviceAddress, Path);

#[derive(Default)]
struct Entries {
    by_path: HashMap<Key, Vec<(SubscriptionId, PathCallback)>>,
    by_id: HashMap<SubscriptionId, Key>,
}

/// Callbacks keyed by device and path.
#[derive(Default)]
pub struct SubscriptionRegistry {
    ids: SequenceCounter,
    entries: RwLock<Entries>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` for every update of `path` on `device`.
    pub fn subscribe(
        &self,
        device: DeviceAddress,
        path: Path,
        callback: PathCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.ids.next());
        let key = (device, path);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        entries
            .by_path
            .entry(key.clone())
            .or_default()
            .push((id, callback));
        entries.by_id.insert(id, key);
        id
    }

    /// Removes a subscription.  Returns whether it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let Some(key) = entries.by_id.remove(&id) else {
            return false;
        };
        if let Some(list) = entries.by_path.get_mut(&key) {
            list.retain(|(sid, _)| *sid != id);
            if list.is_empty() {
                entries.by_path.remove(&key);
            }
        }
        true
    }

    /// Runs every callback registered for `(device, path)`, in subscription order.
    ///
    /// Returns how many callbacks ran.
    pub fn notify(&self, device: DeviceAddress, path: &Path, update: &PathUpdate) -> usize {
        // Snapshot first so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<PathCallback> = {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            match entries.by_path.get(&(device, path.clone())) {
                Some(list) => list.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
                None => return 0,
            }
        };
        for cb in &callbacks {
            cb(update);
        }
        callbacks.len()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .by_id
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
