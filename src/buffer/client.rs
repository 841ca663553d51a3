//! Per-client buffers and the fan-out registry
//!
//! Every connected HTTP/WebSocket client gets one bounded channel of byte
//! chunks. The ingest task offers each chunk to every registered channel
//! with `try_send`, so a slow client loses its newest chunks instead of
//! stalling ingest or its neighbours.
//!
//! The registered senders live in an `ArcSwap` snapshot: the fan-out hot
//! path iterates a plain `Arc<Vec<_>>` with no lock, while register and
//! deregister replace the snapshot wholesale (rare operations).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use bytes::Bytes;
use tokio::sync::mpsc;

struct ClientEntry {
    id: u64,
    tx: mpsc::Sender<Bytes>,
}

/// Registry of connected client buffers
///
/// Chunks are shared by reference count (`Bytes` clone), never copied.
pub struct ClientRegistry {
    clients: ArcSwap<Vec<Arc<ClientEntry>>>,
    next_id: AtomicU64,
    dropped_chunks: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            clients: ArcSwap::from_pointee(Vec::new()),
            next_id: AtomicU64::new(1),
            dropped_chunks: AtomicU64::new(0),
        }
    }

    /// Register a new client buffer with the given chunk capacity
    ///
    /// Returns the receiving side and a guard that deregisters the client
    /// when dropped, whatever way the client handler exits.
    pub fn register(self: &Arc<Self>, capacity: usize) -> (ClientGuard, mpsc::Receiver<Bytes>) {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let entry = Arc::new(ClientEntry { id, tx });

        self.clients.rcu(|clients| {
            let mut next = Vec::with_capacity(clients.len() + 1);
            next.extend(clients.iter().cloned());
            next.push(Arc::clone(&entry));
            next
        });

        tracing::debug!(client_id = id, clients = self.len(), "Client buffer registered");

        (
            ClientGuard {
                registry: Arc::clone(self),
                id,
            },
            rx,
        )
    }

    fn remove(&self, id: u64) {
        self.clients.rcu(|clients| {
            clients
                .iter()
                .filter(|e| e.id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        tracing::debug!(client_id = id, clients = self.len(), "Client buffer removed");
    }

    /// Offer a chunk to every registered client buffer
    ///
    /// Never blocks; a full buffer drops the chunk silently (live feed,
    /// freshness over completeness).
    pub fn fan_out(&self, chunk: &Bytes) {
        for entry in self.clients.load().iter() {
            if entry.tx.try_send(chunk.clone()).is_err() {
                self.dropped_chunks.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(client_id = entry.id, "Client buffer full, chunk dropped");
            }
        }
    }

    /// Number of registered client buffers
    pub fn len(&self) -> usize {
        self.clients.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total chunks dropped across all clients since creation
    pub fn dropped_chunks(&self) -> u64 {
        self.dropped_chunks.load(Ordering::Relaxed)
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Deregisters its client buffer on drop
pub struct ClientGuard {
    registry: Arc<ClientRegistry>,
    id: u64,
}

impl ClientGuard {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fan_out_preserves_order() {
        let registry = Arc::new(ClientRegistry::new());
        let (_guard_a, mut rx_a) = registry.register(8);
        let (_guard_b, mut rx_b) = registry.register(8);

        for n in 0u8..5 {
            registry.fan_out(&Bytes::copy_from_slice(&[n]));
        }

        for n in 0u8..5 {
            assert_eq!(rx_a.recv().await.unwrap(), Bytes::copy_from_slice(&[n]));
            assert_eq!(rx_b.recv().await.unwrap(), Bytes::copy_from_slice(&[n]));
        }
    }

    #[tokio::test]
    async fn test_overflow_drops_newest_without_reorder() {
        let registry = Arc::new(ClientRegistry::new());
        let (_guard, mut rx) = registry.register(2);

        for n in 0u8..5 {
            registry.fan_out(&Bytes::copy_from_slice(&[n]));
        }

        // Capacity 2: only the first two chunks fit, the rest were dropped.
        assert_eq!(rx.recv().await.unwrap(), Bytes::copy_from_slice(&[0]));
        assert_eq!(rx.recv().await.unwrap(), Bytes::copy_from_slice(&[1]));
        assert!(rx.try_recv().is_err());
        assert_eq!(registry.dropped_chunks(), 3);
    }

    #[tokio::test]
    async fn test_guard_deregisters_on_drop() {
        let registry = Arc::new(ClientRegistry::new());
        let (guard, _rx) = registry.register(4);
        assert_eq!(registry.len(), 1);

        drop(guard);
        assert_eq!(registry.len(), 0);

        // Fan-out to an empty registry is a no-op.
        registry.fan_out(&Bytes::from_static(b"x"));
    }
}
