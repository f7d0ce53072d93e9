// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Pool variants decide where a pool draws its capacity from.
//!
//! The bookkeeping of a pool (usage, allocation, reclaim walk) lives in
//! [`MemoryPool`] and cannot be skipped; a variant only supplies the upward
//! negotiation step and, for leaves, how much of the pool's own memory may be
//! reclaimed.

use std::fmt;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arbitrator::MemoryArbitrator;
use crate::error::MemoryError;
use crate::pool::MemoryPool;
use crate::stats::PoolStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolKind {
    /// The whole budget of one query or task.
    Query,
    /// A unit of work within a query.
    Task,
    /// A single operator, the leaf holding actual memory.
    Operator,
}

impl PoolKind {
    pub fn is_leaf(&self) -> bool {
        matches!(self, PoolKind::Operator)
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolKind::Query => f.write_str("query"),
            PoolKind::Task => f.write_str("task"),
            PoolKind::Operator => f.write_str("operator"),
        }
    }
}

pub trait PoolVariant: Send + Sync + 'static {
    fn kind(&self) -> PoolKind;

    /// Obtains `bytes` of additional capacity for `pool` from wherever the pool
    /// draws its memory. On success the caller grows the pool's allocation.
    fn require_memory(&self, pool: &MemoryPool, bytes: u64) -> Result<(), MemoryError>;

    /// Bytes of the pool's own memory (excluding children) that a reclaim of
    /// `needed` bytes may take away.
    fn reclaimable_bytes(&self, stats: &PoolStats, needed: u64) -> u64 {
        let _ = (stats, needed);
        0
    }

    /// Variant used for pools created through [`MemoryPool::add_child_pool`].
    /// `None` for leaves.
    fn child_variant(&self) -> Option<Box<dyn PoolVariant>> {
        None
    }
}

/// Root of a query's pool tree.
///
/// Enforces the pool's `max_capacity_bytes` (reclaiming inside its own tree
/// when it would be exceeded) and reserves memory from the memory manager.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryPool {
    arbitrator: MemoryArbitrator,
}

impl PoolVariant for QueryPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Query
    }

    fn require_memory(&self, pool: &MemoryPool, bytes: u64) -> Result<(), MemoryError> {
        let max_capacity = pool.max_capacity_bytes();
        if max_capacity > 0 {
            let overflow = pool
                .allocated_bytes()
                .saturating_add(bytes)
                .saturating_sub(max_capacity);
            if overflow > 0 {
                debug!(
                    pool = %pool.name(),
                    max_capacity = %ByteSize(max_capacity),
                    "Query memory pool would exceed its capacity by {}, reclaiming locally",
                    ByteSize(overflow)
                );
                self.arbitrator.reclaim_locally(pool, overflow);
                if pool.allocated_bytes().saturating_add(bytes) > max_capacity {
                    return Err(MemoryError::OutOfMemory {
                        pool: pool.name().to_owned(),
                        needed: bytes,
                    });
                }
            }
        }

        if pool.manager().request_memory(pool, bytes) {
            Ok(())
        } else {
            Err(MemoryError::OutOfMemory {
                pool: pool.name().to_owned(),
                needed: bytes,
            })
        }
    }

    fn child_variant(&self) -> Option<Box<dyn PoolVariant>> {
        Some(Box::new(TaskPool))
    }
}

/// Intermediate pool, draws from its parent.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskPool;

impl PoolVariant for TaskPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Task
    }

    fn require_memory(&self, pool: &MemoryPool, bytes: u64) -> Result<(), MemoryError> {
        require_from_parent(pool, bytes)
    }

    fn child_variant(&self) -> Option<Box<dyn PoolVariant>> {
        Some(Box::new(OperatorPool))
    }
}

/// Leaf pool, draws from its parent. Its free memory is what reclaims take.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorPool;

impl PoolVariant for OperatorPool {
    fn kind(&self) -> PoolKind {
        PoolKind::Operator
    }

    fn require_memory(&self, pool: &MemoryPool, bytes: u64) -> Result<(), MemoryError> {
        require_from_parent(pool, bytes)
    }

    fn reclaimable_bytes(&self, stats: &PoolStats, needed: u64) -> u64 {
        stats.free_bytes().min(needed)
    }
}

fn require_from_parent(pool: &MemoryPool, bytes: u64) -> Result<(), MemoryError> {
    let parent = pool.parent_pool().ok_or_else(|| MemoryError::Detached {
        pool: pool.name().to_owned(),
    })?;
    parent.require_memory(bytes)
}
