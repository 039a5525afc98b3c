//! Subscriber registry: per-channel ordered handler lists with isolated fan-out.

use crate::realtime::channel::Channel;
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

/// Callback invoked with the exact payload received on its channel.
pub type Handler = Arc<dyn Fn(&Value) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Inner {
    /// Never reset, so a stale handle cannot remove a newer handler.
    next_id: u64,
    channels: HashMap<Channel, Vec<Entry>>,
}

impl Inner {
    fn contains(&self, channel: Channel, id: u64) -> bool {
        self.channels
            .get(&channel)
            .map_or(false, |list| list.iter().any(|e| e.id == id))
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Registry of channel → handlers. Shared between the client API and the connection task.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the channel's list; returns the handle that removes it.
    pub fn subscribe<F>(&self, channel: Channel, handler: F) -> Subscription
    where
        F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let handler: Handler = Arc::new(handler);
        let mut g = lock(&self.inner);
        g.next_id += 1;
        let id = g.next_id;
        g.channels.entry(channel).or_default().push(Entry { id, handler });
        Subscription {
            channel,
            id,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every handler of `channel` in registration order. Returns how many ran.
    ///
    /// The lock is not held while handlers run, so handlers may subscribe or unsubscribe.
    /// A handler removed mid-dispatch (by a sibling, or by `clear`) is skipped. An `Err` or a
    /// panic from one handler is logged and the remaining handlers still run.
    pub fn dispatch(&self, channel: Channel, payload: &Value) -> usize {
        let snapshot: Vec<(u64, Handler)> = {
            let g = lock(&self.inner);
            match g.channels.get(&channel) {
                Some(list) => list.iter().map(|e| (e.id, e.handler.clone())).collect(),
                None => return 0,
            }
        };
        let mut invoked = 0;
        for (id, handler) in snapshot {
            if !lock(&self.inner).contains(channel, id) {
                continue;
            }
            invoked += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(payload))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    log::warn!("{} subscriber #{} failed: {:#}", channel, id, e);
                }
                Err(panic) => {
                    let msg = panic
                        .downcast_ref::<&str>()
                        .map(|s| s.to_string())
                        .or_else(|| panic.downcast_ref::<String>().cloned())
                        .unwrap_or_else(|| "non-string panic payload".to_string());
                    log::error!("{} subscriber #{} panicked: {}", channel, id, msg);
                }
            }
        }
        invoked
    }

    /// Drop every registration on every channel.
    pub fn clear(&self) {
        lock(&self.inner).channels.clear();
    }

    pub fn count(&self, channel: Channel) -> usize {
        lock(&self.inner).channels.get(&channel).map_or(0, Vec::len)
    }
}

/// Handle returned by `on`. Dropping it does not unsubscribe.
#[must_use = "keep the Subscription and call unsubscribe() to stop delivery"]
#[derive(Debug)]
pub struct Subscription {
    channel: Channel,
    id: u64,
    registry: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Remove exactly this handler. Safe to call more than once, after `disconnect`, or after
    /// the client is gone.
    pub fn unsubscribe(&self) {
        let Some(inner) = self.registry.upgrade() else {
            return;
        };
        let mut g = lock(&inner);
        if let Some(list) = g.channels.get_mut(&self.channel) {
            list.retain(|e| e.id != self.id);
            if list.is_empty() {
                g.channels.remove(&self.channel);
            }
        }
    }
}
