// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Process-wide memory accounting.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use bytesize::ByteSize;
use dashmap::DashMap;
use metrics::gauge;
use tracing::{debug, info, warn};

use crate::arbitrator::MemoryArbitrator;
use crate::config::MemoryOptions;
use crate::metric_definitions::{
    MEMORY_PROCESS_AVAILABLE_BYTES, MEMORY_QUERY_POOLS, describe_metrics,
};
use crate::pool::{MemoryPool, PoolId, ReleaseOutcome, WeakMemoryPool};
use crate::variant::QueryPool;

/// Tracks the memory all pools of a process hold together.
///
/// Pools report every change of their allocation through
/// [`consume_available_memory`](Self::consume_available_memory). Must be safe to
/// call concurrently from many pools.
pub trait MemoryManager: Send + Sync + 'static {
    /// Positive `delta` reserves, negative releases.
    fn consume_available_memory(&self, delta: i64);

    /// Reserves `bytes` for `requester`, returning `false` if the process
    /// cannot provide them.
    fn request_memory(&self, requester: &MemoryPool, bytes: u64) -> bool {
        let _ = requester;
        self.consume_available_memory(reserve_delta(bytes));
        true
    }

    /// Called once a pool without parent was released.
    fn query_pool_released(&self, pool: &MemoryPool) {
        let _ = pool;
    }

    /// How long [`MemoryPool::release_self`] waits for an in-flight reclaim.
    /// `None` waits indefinitely.
    fn release_wait_timeout(&self) -> Option<Duration> {
        None
    }
}

pub(crate) fn reserve_delta(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

pub(crate) fn release_delta(bytes: u64) -> i64 {
    -reserve_delta(bytes)
}

/// [`MemoryManager`] bounding all query pools of the process by
/// [`MemoryOptions::total_capacity`].
pub struct ProcessMemoryManager {
    options: MemoryOptions,
    capacity: Option<u64>,
    consumed: AtomicU64,
    query_pools: DashMap<PoolId, WeakMemoryPool>,
    arbitrator: MemoryArbitrator,
}

impl ProcessMemoryManager {
    pub fn new(options: MemoryOptions) -> Arc<Self> {
        describe_metrics();
        let capacity = options.total_capacity_bytes();
        match capacity {
            Some(capacity) => info!(
                global_arbitration = options.global_arbitration,
                "Starting process memory manager with a capacity of {}",
                ByteSize(capacity)
            ),
            None => info!(
                global_arbitration = options.global_arbitration,
                "Starting process memory manager without capacity limit"
            ),
        }
        let manager = Self {
            options,
            capacity,
            consumed: AtomicU64::new(0),
            query_pools: DashMap::new(),
            arbitrator: MemoryArbitrator,
        };
        manager.report_available();
        Arc::new(manager)
    }

    pub fn options(&self) -> &MemoryOptions {
        &self.options
    }

    pub fn arbitrator(&self) -> &MemoryArbitrator {
        &self.arbitrator
    }

    /// `None` if the process is not bounded.
    pub fn capacity_bytes(&self) -> Option<u64> {
        self.capacity
    }

    pub fn consumed_bytes(&self) -> u64 {
        self.consumed.load(Ordering::Relaxed)
    }

    pub fn available_bytes(&self) -> u64 {
        match self.capacity {
            Some(capacity) => capacity.saturating_sub(self.consumed_bytes()),
            None => u64::MAX,
        }
    }

    /// Creates and registers the root pool of a new query.
    pub fn add_query_memory_pool(self: &Arc<Self>, name: impl Into<String>) -> MemoryPool {
        let manager: Arc<dyn MemoryManager> = self.clone();
        let pool = MemoryPool::new_root(
            name,
            self.options.query_capacity_bytes().unwrap_or(0),
            QueryPool::default(),
            manager,
        );
        self.query_pools.insert(pool.id(), pool.downgrade());
        gauge!(MEMORY_QUERY_POOLS).set(self.query_pools.len() as f64);
        debug!(pool = %pool.name(), "Registered query memory pool");
        pool
    }

    /// Releases a query's pool tree and forgets about it.
    pub fn gc_query_memory_pool(&self, pool: &MemoryPool) -> ReleaseOutcome {
        let outcome = pool.release_self("query finished");
        if outcome != ReleaseOutcome::Abandoned {
            self.unregister(pool.id());
        }
        outcome
    }

    /// Live, open query pools.
    pub fn query_pools(&self) -> Vec<MemoryPool> {
        self.query_pools
            .retain(|_, pool| pool.upgrade().is_some_and(|pool| !pool.is_closed()));
        self.query_pools
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect()
    }

    fn unregister(&self, id: PoolId) {
        if self.query_pools.remove(&id).is_some() {
            gauge!(MEMORY_QUERY_POOLS).set(self.query_pools.len() as f64);
        }
    }

    fn try_consume(&self, bytes: u64) -> bool {
        let consumed = match self.capacity {
            Some(capacity) => self
                .consumed
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |consumed| {
                    let new_consumed = consumed.checked_add(bytes)?;
                    (new_consumed <= capacity).then_some(new_consumed)
                })
                .is_ok(),
            None => {
                self.consumed.fetch_add(bytes, Ordering::Relaxed);
                true
            }
        };
        if consumed {
            self.report_available();
        }
        consumed
    }

    fn report_available(&self) {
        if let Some(capacity) = self.capacity {
            gauge!(MEMORY_PROCESS_AVAILABLE_BYTES)
                .set(capacity.saturating_sub(self.consumed_bytes()) as f64);
        }
    }
}

impl MemoryManager for ProcessMemoryManager {
    fn consume_available_memory(&self, delta: i64) {
        if delta >= 0 {
            self.consumed.fetch_add(delta.unsigned_abs(), Ordering::Relaxed);
        } else {
            let released = delta.unsigned_abs();
            let _ = self
                .consumed
                .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |consumed| {
                    Some(consumed.saturating_sub(released))
                });
        }
        self.report_available();
    }

    fn request_memory(&self, requester: &MemoryPool, bytes: u64) -> bool {
        if self.try_consume(bytes) {
            return true;
        }
        if self.options.global_arbitration {
            let shortfall = bytes.saturating_sub(self.available_bytes());
            debug!(
                requester = %requester.name(),
                "Process memory exhausted, arbitrating {} across queries",
                ByteSize(shortfall)
            );
            self.arbitrator
                .reclaim_globally(requester, shortfall, self.query_pools());
            if self.try_consume(bytes) {
                return true;
            }
        }
        warn!(
            requester = %requester.name(),
            available = %ByteSize(self.available_bytes()),
            "Process memory exhausted, refusing {}",
            ByteSize(bytes)
        );
        false
    }

    fn query_pool_released(&self, pool: &MemoryPool) {
        self.unregister(pool.id());
    }

    fn release_wait_timeout(&self) -> Option<Duration> {
        self.options.release_wait_timeout()
    }
}
