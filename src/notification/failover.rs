//! Active-client selection over an ordered failover list.

use std::sync::Arc;
use arc_swap::ArcSwap;

use crate::transport::NotificationClient;

/// The active position and the client at that position, swapped as a unit.
struct Active {
    index: usize,
    client: Arc<dyn NotificationClient>,
}

/// Ordered, immutable client list plus a lock-free active pointer.
///
/// Readers always see a matching `(index, client)` pair; rotation replaces
/// the pair atomically.
pub struct FailoverSelector {
    clients: Vec<Arc<dyn NotificationClient>>,
    active: ArcSwap<Active>,
}

impl FailoverSelector {
    /// Returns `None` for an empty list.
    pub fn new(clients: Vec<Arc<dyn NotificationClient>>) -> Option<Self> {
        let first = clients.first()?.clone();
        Some(Self {
            active: ArcSwap::from_pointee(Active {
                index: 0,
                client: first,
            }),
            clients,
        })
    }

    pub fn active(&self) -> Arc<dyn NotificationClient> {
        self.active.load().client.clone()
    }

    pub fn active_index(&self) -> usize {
        self.active.load().index
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    pub fn clients(&self) -> &[Arc<dyn NotificationClient>] {
        &self.clients
    }

    /// Advance to the next client, wrapping around. Returns the new index,
    /// or `None` when there is nothing to fail over to.
    pub fn rotate(&self) -> Option<usize> {
        let len = self.clients.len();
        if len <= 1 {
            return None;
        }
        let previous = self.active.rcu(|current| {
            let index = (current.index + 1) % len;
            Arc::new(Active {
                index,
                client: self.clients[index].clone(),
            })
        });
        Some((previous.index + 1) % len)
    }
}

impl std::fmt::Debug for FailoverSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailoverSelector")
            .field("clients", &self.clients.len())
            .field("active", &self.active_index())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryBroker;

    fn clients(n: usize) -> Vec<Arc<dyn NotificationClient>> {
        (0..n)
            .map(|i| Arc::new(MemoryBroker::new(format!("region-{}:none", i))) as Arc<dyn NotificationClient>)
            .collect()
    }

    #[test]
    fn test_rotation_wraps() {
        let selector = FailoverSelector::new(clients(3)).unwrap();
        assert_eq!(selector.active_index(), 0);
        assert_eq!(selector.rotate(), Some(1));
        assert_eq!(selector.rotate(), Some(2));
        assert_eq!(selector.rotate(), Some(0));
        assert!(Arc::ptr_eq(&selector.active(), &selector.clients()[0]));
    }

    #[test]
    fn test_single_client_never_rotates() {
        let selector = FailoverSelector::new(clients(1)).unwrap();
        assert_eq!(selector.rotate(), None);
        assert_eq!(selector.active_index(), 0);
    }

    #[test]
    fn test_empty_list_rejected() {
        assert!(FailoverSelector::new(Vec::new()).is_none());
    }

    #[test]
    fn test_concurrent_rotations_are_not_lost() {
        let selector = Arc::new(FailoverSelector::new(clients(4)).unwrap());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let s = selector.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        s.rotate();
                        // Index and client always agree.
                        let active = s.active.load();
                        assert!(Arc::ptr_eq(&active.client, &s.clients[active.index]));
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }
        // 800 rotations over 4 clients land back on the start.
        assert_eq!(selector.active_index(), 0);
    }
}
