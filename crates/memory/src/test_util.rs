// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::manager::MemoryManager;

/// Memory manager remembering every delta it was sent.
#[derive(Debug, Default)]
pub struct RecordingManager {
    deltas: Mutex<Vec<i64>>,
    release_wait_timeout: Option<Duration>,
}

impl RecordingManager {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_release_wait_timeout(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            release_wait_timeout: Some(timeout),
            ..Default::default()
        })
    }

    pub fn deltas(&self) -> Vec<i64> {
        self.deltas.lock().clone()
    }

    /// Sum of all deltas, i.e. what the pools currently hold.
    pub fn net(&self) -> i64 {
        self.deltas.lock().iter().sum()
    }
}

impl MemoryManager for RecordingManager {
    fn consume_available_memory(&self, delta: i64) {
        self.deltas.lock().push(delta);
    }

    fn release_wait_timeout(&self) -> Option<Duration> {
        self.release_wait_timeout
    }
}
