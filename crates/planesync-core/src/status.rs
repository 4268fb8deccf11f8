// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Latest-value store behind workflow status queries.
//!
//! Each workflow id owns one slot while an instance of it is in flight. The
//! running instance is the only writer; readers get a clone of whatever was
//! published last and never wait on the workflow. The engine clears the slot
//! once the id has no instance left, after the final projection is stored.

use dashmap::DashMap;
use serde_json::Value;

/// Published status projections, keyed by workflow id.
#[derive(Debug, Default)]
pub struct StatusBoard {
    slots: DashMap<String, Value>,
}

impl StatusBoard {
    /// Create an empty board.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the projection for `workflow_id`.
    pub fn publish(&self, workflow_id: &str, projection: Value) {
        self.slots.insert(workflow_id.to_string(), projection);
    }

    /// Last projection published for `workflow_id`.
    pub fn latest(&self, workflow_id: &str) -> Option<Value> {
        self.slots.get(workflow_id).map(|slot| slot.value().clone())
    }

    /// Drop the slot for `workflow_id`.
    pub fn clear(&self, workflow_id: &str) {
        self.slots.remove(workflow_id);
    }

    /// Number of workflow ids with a slot.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no slot exists.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
