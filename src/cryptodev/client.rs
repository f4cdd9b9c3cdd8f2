// Copyright 2024 Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Backend clients, the per-queue endpoints a backend exposes to its frontend.

use serde::{Deserialize, Serialize};

/// Kind of backend serving a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptodevBackendType {
    /// In-process software backend.
    Builtin,
    /// Kernel keyring offload backend.
    Lkcf,
}

/// One queue endpoint of a backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackendClient {
    /// Queue served by this client.
    pub queue_index: u32,
    /// Backend kind.
    #[serde(rename = "type")]
    pub client_type: CryptodevBackendType,
    /// Human readable name, e.g. `cryptodev-builtin0`.
    pub info_str: String,
}

impl BackendClient {
    /// Creates the client for `queue_index`, named after the backend kind.
    pub fn new(client_type: CryptodevBackendType, queue_index: u32) -> Self {
        let kind = match client_type {
            CryptodevBackendType::Builtin => "builtin",
            CryptodevBackendType::Lkcf => "lkcf",
        };
        BackendClient {
            queue_index,
            client_type,
            info_str: format!("cryptodev-{kind}{queue_index}"),
        }
    }
}

/// Clients registered by one backend instance.
#[derive(Debug, Default, Serialize)]
#[serde(transparent)]
pub struct ClientRegistry {
    clients: Vec<BackendClient>,
}

impl ClientRegistry {
    /// Registers `client`, replacing any previous client of the same queue.
    pub fn register(&mut self, client: BackendClient) {
        self.clients.retain(|c| c.queue_index != client.queue_index);
        self.clients.push(client);
    }

    /// Client serving `queue_index`.
    pub fn get(&self, queue_index: u32) -> Option<&BackendClient> {
        self.clients.iter().find(|c| c.queue_index == queue_index)
    }

    /// Releases every client.
    pub fn release_all(&mut self) {
        self.clients.clear();
    }

    /// Registered clients in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &BackendClient> {
        self.clients.iter()
    }

    /// Number of registered clients.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no client is registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
