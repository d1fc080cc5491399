// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

//! At most one running workflow per node or instance
//!
//! Evacuation, power-down and power-up all act on a node and share one key
//! per node, so only one of them can hold a node at a time. Single-instance
//! migration is keyed on the instance.

use std::collections::HashMap;

use async_trait::async_trait;
use nodevac_types::{WorkflowId, WorkflowKind};
use tokio::sync::Mutex;

/// Outcome of a reservation attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The key was free and now belongs to the candidate id
    Acquired(WorkflowId),
    /// Another workflow already holds the key
    Existing(WorkflowId),
}

#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically bind `key` to `candidate` unless it is already bound.
    async fn reserve_if_absent(&self, key: &str, candidate: &str) -> Reservation;

    /// Release `key` if it is still held by `id`.
    async fn release(&self, key: &str, id: &str);
}

pub fn workflow_key(kind: WorkflowKind, cluster: &str, target: &str) -> String {
    let scope = match kind {
        WorkflowKind::Migrate => "migrate",
        WorkflowKind::Evacuate | WorkflowKind::PowerDown | WorkflowKind::PowerUp => "node",
    };
    format!("{}:{}:{}", scope, cluster, target)
}

/// Process-local store. Reservations do not survive a restart.
#[derive(Default)]
pub struct InMemoryIdempotencyStore {
    keys: Mutex<HashMap<String, WorkflowId>>,
}

impl InMemoryIdempotencyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IdempotencyStore for InMemoryIdempotencyStore {
    async fn reserve_if_absent(&self, key: &str, candidate: &str) -> Reservation {
        let mut keys = self.keys.lock().await;
        match keys.get(key) {
            Some(existing) => Reservation::Existing(existing.clone()),
            None => {
                keys.insert(key.to_string(), candidate.to_string());
                Reservation::Acquired(candidate.to_string())
            }
        }
    }

    async fn release(&self, key: &str, id: &str) {
        let mut keys = self.keys.lock().await;
        if keys.get(key).is_some_and(|held| held == id) {
            keys.remove(key);
        }
    }
}
