// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Instant;

use bytesize::ByteSize;
use metrics::{counter, histogram};
use tracing::{debug, info};

use crate::metric_definitions::{
    ARBITRATION_GLOBAL, ARBITRATION_KIND, ARBITRATION_LOCAL, MEMORY_ARBITRATION_DURATION,
    MEMORY_POOL_RECLAIM, MEMORY_POOL_RECLAIMED_BYTES,
};
use crate::order;
use crate::pool::MemoryPool;

/// Decides which pools give memory back under pressure.
///
/// Local arbitration stays within one query's tree; global arbitration takes
/// memory from other queries when the process as a whole runs short.
#[derive(Debug, Clone, Copy, Default)]
pub struct MemoryArbitrator;

impl MemoryArbitrator {
    /// Reclaims up to `needed_bytes` from the subtree of `target`.
    pub fn reclaim_locally(&self, target: &MemoryPool, needed_bytes: u64) -> u64 {
        let start = Instant::now();
        let reclaimed = target.try_to_reclaim_local_memory(needed_bytes);
        record_arbitration(ARBITRATION_LOCAL, start, reclaimed);
        debug!(
            pool = %target.name(),
            "Local arbitration reclaimed {} of {}",
            ByteSize(reclaimed),
            ByteSize(needed_bytes)
        );
        reclaimed
    }

    /// Reclaims up to `needed_bytes` from `candidates` other than the query
    /// `requester` belongs to, most free memory first.
    pub fn reclaim_globally(
        &self,
        requester: &MemoryPool,
        needed_bytes: u64,
        candidates: impl IntoIterator<Item = MemoryPool>,
    ) -> u64 {
        let start = Instant::now();
        let requester_root = requester.find_root_query_pool();
        let candidates = candidates
            .into_iter()
            .filter(|candidate| !candidate.ptr_eq(&requester_root) && !candidate.is_closed());

        let mut remaining = needed_bytes;
        let mut reclaimed = 0;
        for candidate in order::by_descending_free(candidates) {
            if remaining == 0 {
                break;
            }
            let from_candidate = candidate.try_to_reclaim_local_memory(remaining);
            reclaimed += from_candidate;
            remaining = remaining.saturating_sub(from_candidate);
        }

        record_arbitration(ARBITRATION_GLOBAL, start, reclaimed);
        info!(
            requester = %requester_root.name(),
            "Global arbitration reclaimed {} of {}",
            ByteSize(reclaimed),
            ByteSize(needed_bytes)
        );
        reclaimed
    }
}

fn record_arbitration(kind: &'static str, start: Instant, reclaimed: u64) {
    counter!(MEMORY_POOL_RECLAIM, ARBITRATION_KIND => kind).increment(1);
    counter!(MEMORY_POOL_RECLAIMED_BYTES, ARBITRATION_KIND => kind).increment(reclaimed);
    histogram!(MEMORY_ARBITRATION_DURATION, ARBITRATION_KIND => kind).record(start.elapsed());
}
