//! Per-client serialization
//!
//! Each client has one [`ClientGate`]:
//! - `writer` serializes every financial write (generation, payments,
//!   provisioning, cancellation, reconciliation) for that client.
//! - `partition` guards the client's usage partition. Ingestion holds it
//!   shared, so appends run in parallel; closing a period holds it exclusively
//!   while it aggregates and commits.
//!
//! Different clients never share a gate.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use core_kernel::ClientId;

#[derive(Debug, Default)]
pub struct ClientGate {
    writer: Mutex<()>,
    partition: RwLock<()>,
}

impl ClientGate {
    pub async fn write(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().await
    }

    /// Shared access for appending usage
    pub async fn ingest(&self) -> RwLockReadGuard<'_, ()> {
        self.partition.read().await
    }

    /// Exclusive access while a period closes
    pub async fn close(&self) -> RwLockWriteGuard<'_, ()> {
        self.partition.write().await
    }
}

#[derive(Debug, Default)]
pub struct ClientGates {
    gates: DashMap<ClientId, Arc<ClientGate>>,
}

impl ClientGates {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn gate(&self, client_id: ClientId) -> Arc<ClientGate> {
        self.gates.entry(client_id).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_client_shares_gate() {
        let gates = ClientGates::new();
        let id = ClientId::new();
        assert!(Arc::ptr_eq(&gates.gate(id), &gates.gate(id)));
        assert!(!Arc::ptr_eq(&gates.gate(id), &gates.gate(ClientId::new())));
    }

    #[tokio::test]
    async fn test_close_waits_for_ingestion() {
        let gate = Arc::new(ClientGate::default());
        let shared = gate.ingest().await;
        let _second = gate.ingest().await;

        let closing = tokio::time::timeout(Duration::from_millis(20), gate.close()).await;
        assert!(closing.is_err());

        drop(shared);
        drop(_second);
        let closing = tokio::time::timeout(Duration::from_millis(20), gate.close()).await;
        assert!(closing.is_ok());
    }
}
