/// file: src/manager.rs
/// description: Multi-tenant store of per-user protocol clients. The only
/// process-wide shared structure; everything else is owned by one client.
use crate::{client::ProtocolClient, config::Config};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct ConnectionManager {
    config: Arc<Config>,
    clients: DashMap<String, ProtocolClient>,
}

impl ConnectionManager {
    pub fn new(config: Arc<Config>) -> Self {
        ConnectionManager {
            config,
            clients: DashMap::new(),
        }
    }

    /// Returns the client for `user_id`, creating it lazily. The entry lock
    /// guarantees a single client per user even under concurrent callers.
    pub fn get_or_create(&self, user_id: &str) -> ProtocolClient {
        self.clients
            .entry(user_id.to_string())
            .or_insert_with(|| {
                debug!(user = user_id, "creating protocol client");
                ProtocolClient::new(self.config.clone(), user_id)
            })
            .clone()
    }

    pub fn get_if_exists(&self, user_id: &str) -> Option<ProtocolClient> {
        self.clients.get(user_id).map(|entry| entry.clone())
    }

    /// Disconnects and evicts one user's client. Teardown is best-effort;
    /// the eviction happens regardless.
    pub async fn remove(&self, user_id: &str) {
        if let Some((_, client)) = self.clients.remove(user_id) {
            client.disconnect().await;
            info!(user = user_id, "client removed");
        }
    }

    /// Disconnects every stored client and clears the store. One user's
    /// teardown never blocks another's.
    pub async fn shutdown_all(&self) {
        let user_ids: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        for user_id in user_ids {
            if let Some((_, client)) = self.clients.remove(&user_id) {
                client.disconnect().await;
            }
        }
        info!("all clients disconnected");
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn manager() -> ConnectionManager {
        let config = Config::for_endpoint(
            Url::parse("wss://venue.invalid/websockets/v3").unwrap(),
            "1089",
        );
        ConnectionManager::new(Arc::new(config))
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_user() {
        let manager = manager();
        let a = manager.get_or_create("alice");
        let b = manager.get_or_create("alice");
        assert!(a.ptr_eq(&b));
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn different_users_get_independent_clients() {
        let manager = manager();
        let a = manager.get_or_create("alice");
        let b = manager.get_or_create("bob");
        assert!(!a.ptr_eq(&b));
        assert_eq!(manager.len(), 2);
    }

    #[tokio::test]
    async fn remove_then_create_yields_fresh_client() {
        let manager = manager();
        let old = manager.get_or_create("alice");
        manager.remove("alice").await;
        assert!(manager.get_if_exists("alice").is_none());

        let fresh = manager.get_or_create("alice");
        assert!(!old.ptr_eq(&fresh));
    }

    #[tokio::test]
    async fn concurrent_creation_produces_one_client() {
        let manager = Arc::new(manager());
        let mut handles = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            handles.push(tokio::spawn(
                async move { manager.get_or_create("alice") },
            ));
        }
        let mut clients = Vec::new();
        for handle in handles {
            clients.push(handle.await.unwrap());
        }
        for client in &clients[1..] {
            assert!(clients[0].ptr_eq(client));
        }
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_all_clears_store() {
        let manager = manager();
        manager.get_or_create("alice");
        manager.get_or_create("bob");
        manager.shutdown_all().await;
        assert!(manager.is_empty());
    }
}
