use std::sync::Arc;

use dashmap::DashMap;

use crate::client::GitHubHostClient;

/// Keyed map from host to client, per §2's "GitHub registry" summary.
#[derive(Default)]
pub struct GitHubRegistry {
    clients: DashMap<String, Arc<GitHubHostClient>>,
}

impl GitHubRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client: GitHubHostClient) {
        self.clients.insert(client.host().to_string(), Arc::new(client));
    }

    pub fn get(&self, host: &str) -> Option<Arc<GitHubHostClient>> {
        self.clients.get(host).map(|entry| entry.clone())
    }

    pub fn hosts(&self) -> Vec<String> {
        self.clients.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
