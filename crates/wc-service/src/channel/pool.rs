//! Channel pool implementation

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Instant;

use wc_core::traits::ChannelHandle;
use wc_protocol::ChannelId;

/// Set of channels currently open on behalf of the service.
///
/// The pool only tracks identities; the ledger connection itself is owned by
/// the channel's lifecycle task.
pub struct ChannelPool {
    channels: DashMap<ChannelId, PoolEntry>,
}

/// Bookkeeping for a pooled channel
#[derive(Debug, Clone)]
pub struct PoolEntry {
    pub handle: ChannelHandle,
    /// When the channel was first seen open
    pub added_at: Instant,
}

impl ChannelPool {
    /// Create a new empty channel pool
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Track a channel. Returns `false` if it was already pooled.
    pub fn add(&self, handle: ChannelHandle) -> bool {
        match self.channels.entry(handle.channel_id.clone()) {
            Entry::Occupied(_) => {
                tracing::debug!("Channel {} already pooled", handle.channel_id);
                false
            }
            Entry::Vacant(slot) => {
                tracing::info!("Added to pool channel with ID: {}", handle.channel_id);
                slot.insert(PoolEntry {
                    handle,
                    added_at: Instant::now(),
                });
                true
            }
        }
    }

    /// Stop tracking a channel. Returns `false` if it was not pooled.
    pub fn remove(&self, channel_id: &ChannelId) -> bool {
        let removed = self.channels.remove(channel_id).is_some();
        if removed {
            tracing::info!("Removed from pool channel with ID: {}", channel_id);
        }
        removed
    }

    pub fn contains(&self, channel_id: &ChannelId) -> bool {
        self.channels.contains_key(channel_id)
    }

    /// Get a pooled channel by ID
    pub fn get(&self, channel_id: &ChannelId) -> Option<PoolEntry> {
        self.channels.get(channel_id).map(|r| r.value().clone())
    }

    /// IDs of all pooled channels
    pub fn channel_ids(&self) -> Vec<ChannelId> {
        self.channels.iter().map(|r| r.key().clone()).collect()
    }

    /// Number of pooled channels
    pub fn len(&self) -> usize {
        self.channels.len()
    }

    /// Check if pool is empty
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelPool {
    fn default() -> Self {
        Self::new()
    }
}
