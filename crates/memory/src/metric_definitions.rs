// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};

pub const MEMORY_POOL_RECLAIMED_BYTES: &str = "graphstore.memory.pool.reclaimed.bytes";
pub const MEMORY_POOL_RECLAIM: &str = "graphstore.memory.pool.reclaim.total";
pub const MEMORY_POOL_RELEASED: &str = "graphstore.memory.pool.released.total";
pub const MEMORY_POOL_OUT_OF_MEMORY: &str = "graphstore.memory.pool.out_of_memory.total";
pub const MEMORY_ARBITRATION_DURATION: &str = "graphstore.memory.arbitration.duration.seconds";
pub const MEMORY_PROCESS_AVAILABLE_BYTES: &str = "graphstore.memory.process.available.bytes";
pub const MEMORY_QUERY_POOLS: &str = "graphstore.memory.query_pools";

pub const ARBITRATION_KIND: &str = "kind";
pub const ARBITRATION_LOCAL: &str = "local";
pub const ARBITRATION_GLOBAL: &str = "global";

pub const RELEASE_OUTCOME: &str = "outcome";

pub fn describe_metrics() {
    describe_counter!(
        MEMORY_POOL_RECLAIMED_BYTES,
        Unit::Bytes,
        "Bytes reclaimed from memory pools, label 'kind' tells whether the arbitration was local or global"
    );

    describe_counter!(
        MEMORY_POOL_RECLAIM,
        Unit::Count,
        "Number of arbitrations, label 'kind' tells whether the arbitration was local or global"
    );

    describe_counter!(
        MEMORY_POOL_RELEASED,
        Unit::Count,
        "Number of memory pools released, label 'outcome' is 'released' or 'abandoned'"
    );

    describe_counter!(
        MEMORY_POOL_OUT_OF_MEMORY,
        Unit::Count,
        "Number of memory requests that could not be satisfied"
    );

    describe_histogram!(
        MEMORY_ARBITRATION_DURATION,
        Unit::Seconds,
        "Time spent reclaiming memory, with 'kind' label"
    );

    describe_gauge!(
        MEMORY_PROCESS_AVAILABLE_BYTES,
        Unit::Bytes,
        "Bytes still available under the process-wide memory capacity"
    );

    describe_gauge!(
        MEMORY_QUERY_POOLS,
        Unit::Count,
        "Number of live query memory pools"
    );
}
