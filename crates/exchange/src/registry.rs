//! Per-peer grouping of connections into read- and write-designated sets.

use crate::channel::ExchangeChannel;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;
use uuid::Uuid;

#[derive(Default)]
struct RoleGroup {
    slots: RwLock<Vec<Option<Arc<ExchangeChannel>>>>,
    cursor: AtomicUsize,
}

impl RoleGroup {
    fn put(&self, slot: u16, channel: Arc<ExchangeChannel>) {
        let mut slots = self.slots.write();
        let index = slot as usize;
        if slots.len() <= index {
            slots.resize_with(index + 1, || None);
        }
        slots[index] = Some(channel);
    }

    // Round-robin over open channels; deterministic while the topology
    // holds still.
    fn pick(&self) -> Option<Arc<ExchangeChannel>> {
        let slots = self.slots.read();
        if slots.is_empty() {
            return None;
        }
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        for offset in 0..slots.len() {
            if let Some(channel) = &slots[(start + offset) % slots.len()] {
                if channel.is_available() {
                    return Some(Arc::clone(channel));
                }
            }
        }
        None
    }

    fn get(&self, slot: u16) -> Option<Arc<ExchangeChannel>> {
        self.slots.read().get(slot as usize).and_then(Clone::clone)
    }

    fn remove(&self, channel_id: u64) {
        let mut slots = self.slots.write();
        for slot in slots.iter_mut() {
            if slot.as_ref().is_some_and(|ch| ch.id() == channel_id) {
                *slot = None;
            }
        }
    }
}

#[derive(Default)]
struct RoleEntry {
    read: RoleGroup,
    write: RoleGroup,
}

/// Registry of role-split connections, keyed by the peer's 128-bit
/// logical identifier.
///
/// Entries are created lazily on first insertion and shrink when their
/// owning connections close.
#[derive(Default)]
pub struct ChannelRoleRegistry {
    peers: DashMap<Uuid, Arc<RoleEntry>>,
    channel_peers: DashMap<u64, Uuid>,
}

impl ChannelRoleRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, peer: Uuid) -> Arc<RoleEntry> {
        let entry = self.peers.entry(peer).or_default();
        Arc::clone(&entry)
    }

    /// Register a read-designated channel for `peer` at `slot`.
    pub fn add_read_channel(&self, peer: Uuid, slot: u16, channel: Arc<ExchangeChannel>) {
        debug!("peer {} read slot {} <- channel {}", peer, slot, channel.id());
        self.channel_peers.insert(channel.id(), peer);
        self.entry(peer).read.put(slot, channel);
    }

    /// Register a write-designated channel for `peer` at `slot`.
    pub fn add_write_channel(&self, peer: Uuid, slot: u16, channel: Arc<ExchangeChannel>) {
        debug!("peer {} write slot {} <- channel {}", peer, slot, channel.id());
        self.channel_peers.insert(channel.id(), peer);
        self.entry(peer).write.put(slot, channel);
    }

    /// Pick an open read-designated channel for `peer`, round-robin.
    ///
    /// Never returns a closed channel while an open one exists.
    #[must_use]
    pub fn pick_read(&self, peer: &Uuid) -> Option<Arc<ExchangeChannel>> {
        self.peers.get(peer).and_then(|entry| entry.read.pick())
    }

    /// Pick an open write-designated channel for `peer`, round-robin.
    #[must_use]
    pub fn pick_write(&self, peer: &Uuid) -> Option<Arc<ExchangeChannel>> {
        self.peers.get(peer).and_then(|entry| entry.write.pick())
    }

    /// The read-designated channel registered at an exact slot, if any.
    #[must_use]
    pub fn read_channel_at(&self, peer: &Uuid, slot: u16) -> Option<Arc<ExchangeChannel>> {
        self.peers.get(peer).and_then(|entry| entry.read.get(slot))
    }

    /// The write-designated channel registered at an exact slot, if any.
    #[must_use]
    pub fn write_channel_at(&self, peer: &Uuid, slot: u16) -> Option<Arc<ExchangeChannel>> {
        self.peers.get(peer).and_then(|entry| entry.write.get(slot))
    }

    /// Whether any role declarations have been seen for `peer`.
    #[must_use]
    pub fn contains_peer(&self, peer: &Uuid) -> bool {
        self.peers.contains_key(peer)
    }

    /// Drop every slot held by the given channel. Invoked on connection
    /// close.
    pub fn remove_channel(&self, channel_id: u64) {
        if let Some((_, peer)) = self.channel_peers.remove(&channel_id) {
            if let Some(entry) = self.peers.get(&peer) {
                entry.read.remove(channel_id);
                entry.write.remove(channel_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::ChannelConfig;
    use crate::tracer::Tracer;
    use skiff_transport_memory::MemoryConnection;

    fn test_channel() -> Arc<ExchangeChannel> {
        let (conn, _peer) = MemoryConnection::pair();
        ExchangeChannel::new(conn, Arc::new(Tracer::new()), ChannelConfig::default())
    }

    #[tokio::test]
    async fn test_entries_created_lazily() {
        let registry = ChannelRoleRegistry::new();
        let peer = Uuid::new_v4();
        assert!(!registry.contains_peer(&peer));
        assert!(registry.pick_read(&peer).is_none());

        registry.add_read_channel(peer, 0, test_channel());
        assert!(registry.contains_peer(&peer));
        assert!(registry.pick_read(&peer).is_some());
        assert!(registry.pick_write(&peer).is_none());
    }

    #[tokio::test]
    async fn test_slots_are_addressable() {
        let registry = ChannelRoleRegistry::new();
        let peer = Uuid::new_v4();
        let ch = test_channel();
        registry.add_write_channel(peer, 3, Arc::clone(&ch));

        assert!(registry.write_channel_at(&peer, 0).is_none());
        assert_eq!(registry.write_channel_at(&peer, 3).unwrap().id(), ch.id());
    }

    #[tokio::test]
    async fn test_round_robin_cycles_over_open_channels() {
        let registry = ChannelRoleRegistry::new();
        let peer = Uuid::new_v4();
        let first = test_channel();
        let second = test_channel();
        registry.add_write_channel(peer, 0, Arc::clone(&first));
        registry.add_write_channel(peer, 1, Arc::clone(&second));

        let mut seen = Vec::new();
        for _ in 0..4 {
            seen.push(registry.pick_write(&peer).unwrap().id());
        }
        assert!(seen.contains(&first.id()));
        assert!(seen.contains(&second.id()));
    }

    #[tokio::test]
    async fn test_pick_never_returns_a_closed_channel() {
        let registry = ChannelRoleRegistry::new();
        let peer = Uuid::new_v4();
        let closed = test_channel();
        let open = test_channel();
        registry.add_read_channel(peer, 0, Arc::clone(&closed));
        registry.add_read_channel(peer, 1, Arc::clone(&open));

        closed.close().await;
        for _ in 0..8 {
            assert_eq!(registry.pick_read(&peer).unwrap().id(), open.id());
        }
    }

    #[tokio::test]
    async fn test_remove_channel_clears_its_slots() {
        let registry = ChannelRoleRegistry::new();
        let peer = Uuid::new_v4();
        let ch = test_channel();
        registry.add_read_channel(peer, 2, Arc::clone(&ch));

        registry.remove_channel(ch.id());
        assert!(registry.read_channel_at(&peer, 2).is_none());
        assert!(registry.pick_read(&peer).is_none());
    }
}
