// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::fmt;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};

/// Capacity and usage counters of a single memory pool.
///
/// Setters overwrite without validation. The record is owned by its pool and
/// handed out as a copy through [`MemoryPool::snapshot`](crate::MemoryPool::snapshot).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PoolStats {
    name: String,
    max_capacity_bytes: u64,
    allocated_bytes: u64,
    used_bytes: u64,
    cumulative_bytes: u64,
    num_shrinks: u64,
}

impl PoolStats {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configured ceiling, `0` when the pool is not bounded by policy.
    pub fn max_capacity_bytes(&self) -> u64 {
        self.max_capacity_bytes
    }

    pub fn set_max_capacity_bytes(&mut self, bytes: u64) {
        self.max_capacity_bytes = bytes;
    }

    /// Memory currently checked out to this pool.
    pub fn allocated_bytes(&self) -> u64 {
        self.allocated_bytes
    }

    pub fn set_allocated_bytes(&mut self, bytes: u64) {
        self.allocated_bytes = bytes;
    }

    /// The portion of the allocation consumed by tracked work.
    pub fn used_bytes(&self) -> u64 {
        self.used_bytes
    }

    pub fn set_used_bytes(&mut self, bytes: u64) {
        self.used_bytes = bytes;
    }

    /// Total ever consumed through this pool. Never decreases.
    pub fn cumulative_bytes(&self) -> u64 {
        self.cumulative_bytes
    }

    pub fn set_cumulative_bytes(&mut self, bytes: u64) {
        self.cumulative_bytes = bytes;
    }

    /// Number of completed reclaims against this pool.
    pub fn num_shrinks(&self) -> u64 {
        self.num_shrinks
    }

    pub fn set_num_shrinks(&mut self, num_shrinks: u64) {
        self.num_shrinks = num_shrinks;
    }

    /// Allocated but unused bytes.
    ///
    /// Saturates at zero. Use [`is_consistent`](Self::is_consistent) to detect a
    /// pool that reports more used than allocated memory.
    pub fn free_bytes(&self) -> u64 {
        self.allocated_bytes.saturating_sub(self.used_bytes)
    }

    #[inline]
    pub fn is_consistent(&self) -> bool {
        self.used_bytes <= self.allocated_bytes
    }
}

impl fmt::Display for PoolStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{{max_capacity={}, allocated={}, used={}, free={}, cumulative={}, shrinks={}}}",
            self.name,
            ByteSize(self.max_capacity_bytes),
            ByteSize(self.allocated_bytes),
            ByteSize(self.used_bytes),
            ByteSize(self.free_bytes()),
            ByteSize(self.cumulative_bytes),
            self.num_shrinks,
        )
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[test]
    fn free_bytes_is_derived() {
        let mut stats = PoolStats::new("query-1");
        stats.set_allocated_bytes(100);
        stats.set_used_bytes(40);

        assert_that!(stats.name(), eq("query-1"));
        assert_that!(stats.free_bytes(), eq(60));
        assert!(stats.is_consistent());
    }

    #[test]
    fn setters_overwrite_without_validation() {
        let mut stats = PoolStats::new("op");
        stats.set_allocated_bytes(10);
        stats.set_used_bytes(25);

        // Inconsistent on purpose, only the accessor saturates.
        assert_that!(stats.free_bytes(), eq(0));
        assert!(!stats.is_consistent());
    }

    #[test]
    fn serializes_as_kebab_case() {
        let mut stats = PoolStats::new("task");
        stats.set_max_capacity_bytes(1024);
        stats.set_num_shrinks(2);

        let json = serde_json::to_value(&stats).unwrap();
        assert_that!(json["max-capacity-bytes"].as_u64(), some(eq(1024)));
        assert_that!(json["num-shrinks"].as_u64(), some(eq(2)));

        let back: PoolStats = serde_json::from_value(json).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn display_renders_human_bytes() {
        let mut stats = PoolStats::new("root");
        stats.set_allocated_bytes(2048);
        let rendered = stats.to_string();
        assert_that!(rendered.as_str(), starts_with("root{"));
        assert_that!(rendered.as_str(), contains_substring("shrinks=0"));
    }
}
