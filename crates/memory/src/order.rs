// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Child selection for reclaim walks.

use std::cmp::Reverse;

use crate::pool::MemoryPool;

/// Orders `pools` by descending free bytes.
///
/// Free bytes are read once per pool, so the order is a snapshot that stays
/// well-defined while the pools keep changing. Pools with equal free bytes keep
/// their relative order.
pub fn by_descending_free(pools: impl IntoIterator<Item = MemoryPool>) -> Vec<MemoryPool> {
    let mut keyed: Vec<_> = pools
        .into_iter()
        .map(|pool| (pool.free_bytes(), pool))
        .collect();
    keyed.sort_by_key(|(free, _)| Reverse(*free));
    keyed.into_iter().map(|(_, pool)| pool).collect()
}
