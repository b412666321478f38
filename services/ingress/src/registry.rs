// Process-wide map of live sockets, keyed by connection UUID.
// The engine never iterates it; acks are the only cross-task consumers.
use dashmap::DashMap;
use std::sync::Arc;

use crate::socket::SocketManager;

#[derive(Default)]
pub struct SocketRegistry {
    sockets: DashMap<String, Arc<SocketManager>>,
}

impl SocketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, socket: Arc<SocketManager>) {
        self.sockets.insert(socket.uuid().to_string(), socket);
    }

    pub fn deregister(&self, socket: &SocketManager) {
        self.sockets.remove(socket.uuid());
    }

    /// Live socket for `uuid`, or `None` once deregistered. Never returns
    /// a dangling reference; entries are owned `Arc`s.
    pub fn lookup(&self, uuid: &str) -> Option<Arc<SocketManager>> {
        self.sockets.get(uuid).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.sockets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sockets.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use drover_telemetry::RequestIdentity;
    use tokio::sync::{mpsc, watch};

    fn socket() -> Arc<SocketManager> {
        let (out_tx, _out_rx) = mpsc::channel(8);
        let (cancel_tx, _cancel_rx) = watch::channel(false);
        SocketManager::new(
            RequestIdentity::new("vehicle_device", "VIN123"),
            "wifi".to_string(),
            out_tx,
            cancel_tx,
            false,
            1024,
        )
    }

    #[test]
    fn lookup_tracks_register_and_deregister() {
        let registry = SocketRegistry::new();
        let sm = socket();
        assert!(registry.lookup(sm.uuid()).is_none());

        registry.register(sm.clone());
        let found = registry.lookup(sm.uuid()).expect("registered socket");
        assert_eq!(found.uuid(), sm.uuid());

        registry.deregister(&sm);
        assert!(registry.lookup(sm.uuid()).is_none());
    }

    #[test]
    fn each_uuid_held_at_most_once() {
        let registry = SocketRegistry::new();
        let sm = socket();
        registry.register(sm.clone());
        registry.register(sm.clone());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_register_and_lookup() {
        let registry = Arc::new(SocketRegistry::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let sm = socket();
                registry.register(sm.clone());
                assert!(registry.lookup(sm.uuid()).is_some());
                registry.deregister(&sm);
                assert!(registry.lookup(sm.uuid()).is_none());
            }));
        }
        for handle in handles {
            handle.await.expect("task");
        }
        assert!(registry.is_empty());
    }
}
