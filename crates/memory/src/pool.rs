// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! The memory pool tree.
//!
//! A [`MemoryPool`] is a node in a tree of memory budgets. The root of a tree
//! represents the whole budget of one query; children represent tasks and
//! operators running on its behalf. Interior nodes report the aggregate of their
//! subtree, so `allocated`/`used` of a parent include the figures of all of its
//! descendants. Memory is consumed from leaves only.
//!
//! # Locking
//!
//! Every pool carries three independent locks:
//!
//! - a short data mutex around its [`PoolStats`], never held while calling into
//!   another pool except in [`gc_child_pool`](MemoryPool::gc_child_pool), which
//!   locks parent before child,
//! - the arbitration permit + condition variable, held for the duration of a
//!   reclaim walk and awaited by [`release_self`](MemoryPool::release_self),
//! - a release mutex that serialises concurrent releases of the same pool.
//!
//! A reclaim walk holds the permits of the pool it starts at and of all its
//! ancestors, taken top-down. Walks within one tree are therefore serialised
//! by the root's permit, a release never races a walk below it, and walks in
//! different trees proceed in parallel.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use bytesize::ByteSize;
use metrics::counter;
use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::error::MemoryError;
use crate::manager::{MemoryManager, release_delta};
use crate::metric_definitions::{
    MEMORY_POOL_OUT_OF_MEMORY, MEMORY_POOL_RELEASED, RELEASE_OUTCOME,
};
use crate::order;
use crate::stats::PoolStats;
use crate::variant::{PoolKind, PoolVariant};

/// How often a leaf re-checks its free memory after negotiating a shortfall
/// with its ancestors. A concurrent reclaim may take the freshly granted bytes
/// away between negotiation and bookkeeping.
const MAX_ACQUIRE_ATTEMPTS: usize = 3;

/// Process-unique identity of a memory pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PoolId(u64);

impl PoolId {
    fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Result of [`MemoryPool::release_self`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The pool is now closed and detached from its tree.
    Released,
    /// Another caller released the pool before.
    AlreadyClosed,
    /// An in-flight reclaim did not finish within the configured wait timeout.
    /// The pool is left open.
    Abandoned,
}

/// A node of the memory pool tree.
///
/// Cheaply cloneable (uses `Arc` internally); clones refer to the same pool.
#[derive(Clone)]
pub struct MemoryPool {
    inner: Arc<PoolInner>,
}

/// Non-owning handle onto a [`MemoryPool`].
#[derive(Clone, Default)]
pub struct WeakMemoryPool {
    inner: Weak<PoolInner>,
}

struct PoolInner {
    id: PoolId,
    name: String,
    variant: Box<dyn PoolVariant>,
    manager: Arc<dyn MemoryManager>,
    ledger: Mutex<Ledger>,
    parent: Mutex<Weak<PoolInner>>,
    children: Mutex<Vec<MemoryPool>>,
    closed: AtomicBool,
    arbitration: Mutex<Arbitration>,
    arbitration_done: Condvar,
    release: Mutex<()>,
}

struct Ledger {
    stats: PoolStats,
    /// Set once this pool's allocation has been handed back to the memory
    /// manager, either by the parent collecting it or, for a root, by the pool
    /// itself. Afterwards bytes leaving this pool must not be reported again.
    budget_returned: bool,
}

#[derive(Default)]
struct Arbitration {
    in_progress: bool,
}

impl MemoryPool {
    /// Creates a pool without parent.
    ///
    /// `max_capacity_bytes` of `0` leaves the pool unbounded by policy.
    pub fn new_root(
        name: impl Into<String>,
        max_capacity_bytes: u64,
        variant: impl PoolVariant,
        manager: Arc<dyn MemoryManager>,
    ) -> Self {
        Self::new(
            name.into(),
            max_capacity_bytes,
            Box::new(variant),
            manager,
            Weak::new(),
        )
    }

    fn new(
        name: String,
        max_capacity_bytes: u64,
        variant: Box<dyn PoolVariant>,
        manager: Arc<dyn MemoryManager>,
        parent: Weak<PoolInner>,
    ) -> Self {
        let mut stats = PoolStats::new(name.clone());
        stats.set_max_capacity_bytes(max_capacity_bytes);
        Self {
            inner: Arc::new(PoolInner {
                id: PoolId::next(),
                name,
                variant,
                manager,
                ledger: Mutex::new(Ledger {
                    stats,
                    budget_returned: false,
                }),
                parent: Mutex::new(parent),
                children: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                arbitration: Mutex::new(Arbitration::default()),
                arbitration_done: Condvar::new(),
                release: Mutex::new(()),
            }),
        }
    }

    /// Creates a child pool whose variant is chosen by this pool's variant
    /// (query → task → operator).
    pub fn add_child_pool(&self, name: impl Into<String>) -> Result<MemoryPool, MemoryError> {
        let variant = self
            .inner
            .variant
            .child_variant()
            .ok_or_else(|| MemoryError::LeafPool {
                pool: self.inner.name.clone(),
            })?;
        self.attach_child(name.into(), variant)
    }

    /// Creates a child pool with an explicit variant.
    pub fn add_child_pool_with(
        &self,
        name: impl Into<String>,
        variant: impl PoolVariant,
    ) -> Result<MemoryPool, MemoryError> {
        self.attach_child(name.into(), Box::new(variant))
    }

    fn attach_child(
        &self,
        name: String,
        variant: Box<dyn PoolVariant>,
    ) -> Result<MemoryPool, MemoryError> {
        let mut children = self.inner.children.lock();
        // Checked under the children lock: a release sets `closed` before it
        // snapshots the children, so it either sees this child or we see it closed.
        if self.is_closed() {
            return Err(self.closed_error());
        }
        let child = MemoryPool::new(
            name,
            0,
            variant,
            Arc::clone(&self.inner.manager),
            Arc::downgrade(&self.inner),
        );
        children.push(child.clone());
        debug!(
            parent = %self.inner.name,
            child = %child.inner.name,
            kind = %child.kind(),
            "Added child memory pool"
        );
        Ok(child)
    }

    pub fn id(&self) -> PoolId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn kind(&self) -> PoolKind {
        self.inner.variant.kind()
    }

    pub fn manager(&self) -> &Arc<dyn MemoryManager> {
        &self.inner.manager
    }

    pub fn max_capacity_bytes(&self) -> u64 {
        self.inner.ledger.lock().stats.max_capacity_bytes()
    }

    pub fn used_bytes(&self) -> u64 {
        self.inner.ledger.lock().stats.used_bytes()
    }

    pub fn free_bytes(&self) -> u64 {
        self.inner.ledger.lock().stats.free_bytes()
    }

    pub fn allocated_bytes(&self) -> u64 {
        self.inner.ledger.lock().stats.allocated_bytes()
    }

    /// Copy of this pool's statistics.
    ///
    /// Stays populated after the pool was released.
    pub fn snapshot(&self) -> PoolStats {
        self.inner.ledger.lock().stats.clone()
    }

    pub fn parent_pool(&self) -> Option<MemoryPool> {
        self.inner
            .parent
            .lock()
            .upgrade()
            .map(|inner| MemoryPool { inner })
    }

    /// Snapshot of the current children.
    pub fn children(&self) -> Vec<MemoryPool> {
        self.inner.children.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn is_being_arbitrated(&self) -> bool {
        self.inner.arbitration.lock().in_progress
    }

    /// Walks up the parent links to the pool representing the whole query.
    pub fn find_root_query_pool(&self) -> MemoryPool {
        let mut current = self.clone();
        while let Some(parent) = current.parent_pool() {
            current = parent;
        }
        current
    }

    pub fn downgrade(&self) -> WeakMemoryPool {
        WeakMemoryPool {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[inline]
    pub fn ptr_eq(&self, other: &MemoryPool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Records `bytes` as used on this pool only.
    ///
    /// Pure bookkeeping: no capacity is negotiated and the arbitration permit is
    /// not taken. Returns the recorded bytes, `0` if the pool is closed.
    pub fn try_to_acquire_memory_internal(&self, bytes: u64) -> u64 {
        if self.is_closed() {
            warn!(
                pool = %self.inner.name,
                "Memory pool is already closed, abandoning allocation of {}",
                ByteSize(bytes)
            );
            return 0;
        }
        record_usage(&mut self.inner.ledger.lock().stats, bytes);
        bytes
    }

    /// Grows this pool's allocation by `bytes`, negotiating the capacity with
    /// whatever the pool's variant draws from.
    ///
    /// If the pool is closed while the capacity is being negotiated, the granted
    /// bytes are handed back to where they came from.
    pub fn require_memory(&self, bytes: u64) -> Result<(), MemoryError> {
        if self.is_closed() {
            return Err(self.closed_error());
        }
        if bytes == 0 {
            return Ok(());
        }
        // Parent links are only ever cleared by a release, so this is the pool
        // the variant negotiates with, if any.
        let grantor = self.parent_pool();
        self.inner.variant.require_memory(self, bytes)?;

        let mut ledger = self.inner.ledger.lock();
        if self.is_closed() {
            drop(ledger);
            debug!(
                pool = %self.inner.name,
                "Memory pool closed during negotiation, handing back {}",
                ByteSize(bytes)
            );
            match grantor {
                Some(parent) => parent.hand_back_grant(bytes),
                None => self
                    .inner
                    .manager
                    .consume_available_memory(release_delta(bytes)),
            }
            return Err(self.closed_error());
        }
        let stats = &mut ledger.stats;
        stats.set_allocated_bytes(stats.allocated_bytes().saturating_add(bytes));
        trace!(
            pool = %self.inner.name,
            allocated = %ByteSize(stats.allocated_bytes()),
            "Grew memory pool by {}",
            ByteSize(bytes)
        );
        Ok(())
    }

    /// Takes `bytes` of a grant that never reached a child back out of this
    /// pool and its ancestors.
    ///
    /// Stops at the first pool whose budget was already returned, since that
    /// return covered the grant. A pool without parent releases the bytes to
    /// the memory manager.
    fn hand_back_grant(&self, bytes: u64) {
        let mut current = Some(self.clone());
        while let Some(pool) = current {
            let mut ledger = pool.inner.ledger.lock();
            if ledger.budget_returned {
                return;
            }
            let stats = &mut ledger.stats;
            stats.set_allocated_bytes(stats.allocated_bytes().saturating_sub(bytes));
            current = pool.parent_pool();
            if current.is_none() {
                pool.inner
                    .manager
                    .consume_available_memory(release_delta(bytes));
            }
        }
    }

    /// Consumes `bytes` from this leaf pool on behalf of the caller.
    ///
    /// Draws from the pool's free memory first and negotiates only the
    /// shortfall. The usage is recorded on this pool and all of its ancestors.
    /// Interior pools hand out memory only through their children and refuse
    /// with [`MemoryError::InteriorPool`].
    ///
    /// Returns the recorded bytes, `Ok(0)` if the pool is already closed.
    pub fn acquire(&self, bytes: u64) -> Result<u64, MemoryError> {
        if self.is_closed() {
            warn!(
                pool = %self.inner.name,
                "Memory pool is already closed, abandoning allocation of {}",
                ByteSize(bytes)
            );
            return Ok(0);
        }
        if bytes == 0 {
            return Ok(0);
        }

        if !self.kind().is_leaf() {
            return Err(MemoryError::InteriorPool {
                pool: self.inner.name.clone(),
            });
        }

        for _ in 0..MAX_ACQUIRE_ATTEMPTS {
            let shortfall = {
                let mut ledger = self.inner.ledger.lock();
                let free = ledger.stats.free_bytes();
                if free >= bytes {
                    record_usage(&mut ledger.stats, bytes);
                    0
                } else {
                    bytes - free
                }
            };
            if shortfall == 0 {
                self.record_on_ancestors(|pool| {
                    pool.try_to_acquire_memory_internal(bytes);
                });
                return Ok(bytes);
            }
            self.require_memory(shortfall)
                .inspect_err(count_out_of_memory)?;
        }

        let err = MemoryError::OutOfMemory {
            pool: self.inner.name.clone(),
            needed: bytes,
        };
        count_out_of_memory(&err);
        Err(err)
    }

    /// Gives `bytes` of used memory back to this pool.
    ///
    /// The allocation is kept and becomes free, hence reclaimable. Returns the
    /// bytes actually released (clamped to the used bytes), `0` for interior
    /// pools whose usage belongs to their children.
    pub fn release(&self, bytes: u64) -> u64 {
        if self.is_closed() {
            debug!(pool = %self.inner.name, "Memory pool is already closed, ignoring release");
            return 0;
        }
        if !self.kind().is_leaf() {
            warn!(pool = %self.inner.name, "Ignoring release on interior memory pool");
            return 0;
        }
        let released = release_usage(&mut self.inner.ledger.lock().stats, bytes);
        if released > 0 {
            self.record_on_ancestors(|pool| {
                release_usage(&mut pool.inner.ledger.lock().stats, released);
            });
        }
        released
    }

    fn record_on_ancestors(&self, mut record: impl FnMut(&MemoryPool)) {
        let mut current = self.parent_pool();
        while let Some(pool) = current {
            record(&pool);
            current = pool.parent_pool();
        }
    }

    /// Reclaims up to `needed_bytes` from this pool's subtree.
    ///
    /// The pool first gives back what its variant considers reclaimable of its
    /// own memory, then walks its children in descending order of free memory
    /// until the need is met. Returns the bytes actually reclaimed, which may
    /// be less than requested.
    ///
    /// The arbitration permits of all ancestors are held for the duration of
    /// the walk, so releasing any pool above waits for it to finish. Ancestors
    /// shrink by the reclaimed total.
    pub fn try_to_reclaim_local_memory(&self, needed_bytes: u64) -> u64 {
        let mut ancestors = Vec::new();
        let mut current = self.parent_pool();
        while let Some(pool) = current {
            current = pool.parent_pool();
            ancestors.push(pool);
        }

        let mut permits = Vec::with_capacity(ancestors.len());
        for ancestor in ancestors.iter().rev() {
            match ArbitrationPermit::acquire(ancestor) {
                Some(permit) => permits.push(permit.covering_descendant()),
                None => {
                    warn!(
                        pool = %self.inner.name,
                        ancestor = %ancestor.inner.name,
                        "Ancestor memory pool is closed, aborting reclaim"
                    );
                    return 0;
                }
            }
        }

        let reclaimed = self.reclaim_subtree(needed_bytes);
        for permit in &mut permits {
            permit.children_reclaimed = reclaimed;
        }
        reclaimed
    }

    fn reclaim_subtree(&self, needed_bytes: u64) -> u64 {
        if self.is_closed() {
            warn!(pool = %self.inner.name, "Memory pool is already closed, aborting reclaim");
            return 0;
        }
        let Some(mut permit) = ArbitrationPermit::acquire(self) else {
            warn!(pool = %self.inner.name, "Memory pool closed while waiting for arbitration, aborting reclaim");
            return 0;
        };
        info!(
            pool = %self.inner.name,
            "Reclaiming local memory, needed {}",
            ByteSize(needed_bytes)
        );

        let own = self.reclaim_own(needed_bytes);
        let mut remaining = needed_bytes.saturating_sub(own);
        if remaining > 0 {
            for child in order::by_descending_free(self.children()) {
                let reclaimed = child.reclaim_subtree(remaining);
                if reclaimed > 0 {
                    permit.children_reclaimed += reclaimed;
                    remaining = remaining.saturating_sub(reclaimed);
                    if remaining == 0 {
                        break;
                    }
                }
            }
        }

        let total = own + permit.children_reclaimed;
        info!(
            pool = %self.inner.name,
            "Finished reclaiming local memory, reclaimed {} of {}",
            ByteSize(total),
            ByteSize(needed_bytes)
        );
        total
    }

    fn reclaim_own(&self, needed_bytes: u64) -> u64 {
        let mut ledger = self.inner.ledger.lock();
        let reclaimed = self
            .inner
            .variant
            .reclaimable_bytes(&ledger.stats, needed_bytes)
            .min(needed_bytes)
            .min(ledger.stats.free_bytes());
        if reclaimed == 0 {
            return 0;
        }
        let stats = &mut ledger.stats;
        stats.set_allocated_bytes(stats.allocated_bytes() - reclaimed);
        if !ledger.budget_returned {
            self.inner
                .manager
                .consume_available_memory(release_delta(reclaimed));
        }
        reclaimed
    }

    /// Closes this pool, detaches it from its parent and force-collects all of
    /// its children.
    ///
    /// Waits for an in-flight reclaim on this pool to finish first. Releasing
    /// an already closed pool is a no-op.
    pub fn release_self(&self, reason: &str) -> ReleaseOutcome {
        let _serialized = self.inner.release.lock();
        if self.is_closed() {
            debug!(pool = %self.inner.name, reason, "Memory pool is already released");
            return ReleaseOutcome::AlreadyClosed;
        }

        {
            let mut arbitration = self.inner.arbitration.lock();
            if arbitration.in_progress {
                debug!(pool = %self.inner.name, "Waiting for in-flight reclaim before releasing");
            }
            let deadline = self
                .inner
                .manager
                .release_wait_timeout()
                .map(|timeout| Instant::now() + timeout);
            while arbitration.in_progress {
                match deadline {
                    Some(deadline) => {
                        let timed_out = self
                            .inner
                            .arbitration_done
                            .wait_until(&mut arbitration, deadline)
                            .timed_out();
                        if timed_out && arbitration.in_progress {
                            error!(
                                pool = %self.inner.name,
                                reason,
                                "Failed to release memory pool, reclaim still in progress"
                            );
                            counter!(MEMORY_POOL_RELEASED, RELEASE_OUTCOME => "abandoned")
                                .increment(1);
                            return ReleaseOutcome::Abandoned;
                        }
                    }
                    None => self.inner.arbitration_done.wait(&mut arbitration),
                }
            }
            self.inner.closed.store(true, Ordering::Release);
        }
        info!(pool = %self, reason, "Releasing memory pool");

        match self.parent_pool() {
            Some(parent) => parent.gc_child_pool(self, false),
            None => {
                self.return_budget();
                self.inner.manager.query_pool_released(self);
            }
        }

        let children = self.children();
        for child in &children {
            self.gc_child_pool(child, true);
        }

        *self.inner.parent.lock() = Weak::new();
        self.inner.children.lock().clear();

        counter!(MEMORY_POOL_RELEASED, RELEASE_OUTCOME => "released").increment(1);
        info!(pool = %self.inner.name, "Released memory pool");
        ReleaseOutcome::Released
    }

    /// Detaches `child` and folds its budget back into this pool.
    ///
    /// With `force`, the child is released first, which closes its whole
    /// subtree. The accounting happens once per child: a child that already
    /// detached itself is skipped. While this pool is open, its ancestors drop
    /// the child's figures as well.
    pub fn gc_child_pool(&self, child: &MemoryPool, force: bool) {
        if force {
            debug!(
                pool = %self.inner.name,
                child = %child.inner.name,
                "Force-collecting child memory pool"
            );
            let outcome = child.release_self("collected by parent");
            if outcome == ReleaseOutcome::Abandoned {
                warn!(
                    pool = %self.inner.name,
                    child = %child.inner.name,
                    "Child memory pool did not close, detaching it anyway"
                );
            }
        }

        let removed = {
            let mut children = self.inner.children.lock();
            children
                .iter()
                .position(|c| c.ptr_eq(child))
                .map(|idx| children.remove(idx))
        };
        let Some(child) = removed else {
            trace!(
                pool = %self.inner.name,
                child = %child.inner.name,
                "Child memory pool already detached"
            );
            return;
        };

        let (allocated, used) = {
            let mut ledger = self.inner.ledger.lock();
            let mut child_ledger = child.inner.ledger.lock();
            let allocated = child_ledger.stats.allocated_bytes();
            let used = child_ledger.stats.used_bytes();

            let stats = &mut ledger.stats;
            stats.set_allocated_bytes(stats.allocated_bytes().saturating_sub(allocated));
            stats.set_used_bytes(stats.used_bytes().saturating_sub(used));

            let child_returned = std::mem::replace(&mut child_ledger.budget_returned, true);
            if !child_returned && !ledger.budget_returned && allocated > 0 {
                self.inner
                    .manager
                    .consume_available_memory(release_delta(allocated));
            }
            (allocated, used)
        };
        if !self.is_closed() {
            self.record_on_ancestors(|pool| {
                let mut ledger = pool.inner.ledger.lock();
                let stats = &mut ledger.stats;
                stats.set_allocated_bytes(stats.allocated_bytes().saturating_sub(allocated));
                stats.set_used_bytes(stats.used_bytes().saturating_sub(used));
            });
        }

        debug!(
            pool = %self.inner.name,
            child = %child.inner.name,
            allocated = %ByteSize(allocated),
            used = %ByteSize(used),
            force,
            "Collected child memory pool"
        );
    }

    /// Hands this pool's allocation back to the memory manager. Only for pools
    /// without parent; children are returned by their parent.
    fn return_budget(&self) {
        let mut ledger = self.inner.ledger.lock();
        if std::mem::replace(&mut ledger.budget_returned, true) {
            return;
        }
        let allocated = ledger.stats.allocated_bytes();
        if allocated > 0 {
            self.inner
                .manager
                .consume_available_memory(release_delta(allocated));
        }
    }

    fn closed_error(&self) -> MemoryError {
        MemoryError::Closed {
            pool: self.inner.name.clone(),
        }
    }
}

impl WeakMemoryPool {
    pub fn upgrade(&self) -> Option<MemoryPool> {
        self.inner.upgrade().map(|inner| MemoryPool { inner })
    }
}

impl fmt::Display for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.snapshot().fmt(f)
    }
}

impl fmt::Debug for MemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPool")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("kind", &self.kind())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl fmt::Debug for WeakMemoryPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakMemoryPool").finish_non_exhaustive()
    }
}

/// Exclusive right to arbitrate a pool.
///
/// Dropping the permit performs the reclaim bookkeeping and wakes up waiters,
/// also when the walk unwinds.
struct ArbitrationPermit<'a> {
    pool: &'a MemoryPool,
    children_reclaimed: u64,
    /// Unset for ancestors of the pool a walk started at. They only shrink.
    counts_shrink: bool,
}

impl<'a> ArbitrationPermit<'a> {
    fn acquire(pool: &'a MemoryPool) -> Option<Self> {
        let mut arbitration = pool.inner.arbitration.lock();
        while arbitration.in_progress {
            pool.inner.arbitration_done.wait(&mut arbitration);
        }
        if pool.is_closed() {
            return None;
        }
        arbitration.in_progress = true;
        Some(Self {
            pool,
            children_reclaimed: 0,
            counts_shrink: true,
        })
    }

    fn covering_descendant(mut self) -> Self {
        self.counts_shrink = false;
        self
    }
}

impl Drop for ArbitrationPermit<'_> {
    fn drop(&mut self) {
        {
            let mut ledger = self.pool.inner.ledger.lock();
            let stats = &mut ledger.stats;
            if self.counts_shrink {
                stats.set_num_shrinks(stats.num_shrinks() + 1);
            }
            stats.set_allocated_bytes(
                stats
                    .allocated_bytes()
                    .saturating_sub(self.children_reclaimed),
            );
        }
        self.pool.inner.arbitration.lock().in_progress = false;
        self.pool.inner.arbitration_done.notify_all();
    }
}

fn record_usage(stats: &mut PoolStats, bytes: u64) {
    stats.set_used_bytes(stats.used_bytes().saturating_add(bytes));
    stats.set_cumulative_bytes(stats.cumulative_bytes().saturating_add(bytes));
}

fn release_usage(stats: &mut PoolStats, bytes: u64) -> u64 {
    let released = bytes.min(stats.used_bytes());
    stats.set_used_bytes(stats.used_bytes() - released);
    released
}

fn count_out_of_memory(err: &MemoryError) {
    if err.is_out_of_memory() {
        counter!(MEMORY_POOL_OUT_OF_MEMORY).increment(1);
    }
}

static_assertions::assert_impl_all!(MemoryPool: Send, Sync);
static_assertions::assert_impl_all!(WeakMemoryPool: Send, Sync);
