// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

//! Hierarchical memory accounting for graph queries.
//!
//! This crate provides:
//! - [`MemoryPool`]: A node in a tree of memory budgets (query → task → operator)
//! - [`MemoryArbitrator`]: Reclaims free memory from pools when a budget runs out
//! - [`ProcessMemoryManager`]: Bounds the memory of all queries of a process

mod arbitrator;
mod config;
mod error;
mod manager;
mod metric_definitions;
mod order;
mod pool;
mod stats;
mod variant;

#[cfg(test)]
mod test_util;

pub use arbitrator::MemoryArbitrator;
pub use config::{MemoryOptions, MemoryOptionsBuilder, MemoryOptionsBuilderError};
pub use error::MemoryError;
pub use manager::{MemoryManager, ProcessMemoryManager};
pub use pool::{MemoryPool, PoolId, ReleaseOutcome, WeakMemoryPool};
pub use stats::PoolStats;
pub use variant::{OperatorPool, PoolKind, PoolVariant, QueryPool, TaskPool};
