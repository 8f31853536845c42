//! Scrollback ring: a finite, append-only buffer of recent PTY output, used
//! to snapshot terminal state for late-joining clients. Budgeted at ~500 KB,
//! sized for the multi-client snapshot-on-join use case rather than a
//! single long-lived viewer.

use std::sync::RwLock;

/// Default scrollback capacity in bytes.
pub const DEFAULT_CAPACITY: usize = 500 * 1024;

/// Append-only byte ring: pushes evict the oldest bytes once over capacity.
/// Reads take a read lock so a snapshot dump is not starved by fan-out pushes.
pub struct ScrollbackRing {
    data: RwLock<Vec<u8>>,
    capacity: usize,
}

impl ScrollbackRing {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self { data: RwLock::new(Vec::new()), capacity }
    }

    /// Append bytes, evicting the oldest bytes if the ring is over capacity.
    pub fn push(&self, bytes: &[u8]) {
        let mut guard = self.data.write().expect("ring lock poisoned");
        guard.extend_from_slice(bytes);
        if guard.len() > self.capacity {
            let excess = guard.len() - self.capacity;
            guard.drain(..excess);
        }
    }

    /// Snapshot the current contents (byte-exact copy, in order).
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.read().expect("ring lock poisoned").clone()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().expect("ring lock poisoned").is_empty()
    }
}

impl Default for ScrollbackRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_is_byte_exact_under_capacity() {
        let ring = ScrollbackRing::with_capacity(1024);
        ring.push(b"echo hi\n");
        ring.push(b"hi\r\n");
        assert_eq!(ring.snapshot(), b"echo hi\nhi\r\n".to_vec());
    }

    #[test]
    fn push_evicts_oldest_bytes_over_capacity() {
        let ring = ScrollbackRing::with_capacity(8);
        ring.push(b"0123456789");
        let snap = ring.snapshot();
        assert_eq!(snap.len(), 8);
        assert_eq!(snap, b"23456789".to_vec());
    }

    #[test]
    fn empty_ring_snapshots_empty() {
        let ring = ScrollbackRing::new();
        assert!(ring.is_empty());
        assert_eq!(ring.snapshot(), Vec::<u8>::new());
    }
}
