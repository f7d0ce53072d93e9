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
use std::thread;
use std::time::Duration;

use googletest::prelude::*;
use serde_json::json;

use graphstore_memory::{
    MemoryManager, MemoryOptions, MemoryPool, PoolKind, ProcessMemoryManager, ReleaseOutcome,
};

fn manager(options: serde_json::Value) -> Arc<ProcessMemoryManager> {
    let options: MemoryOptions = serde_json::from_value(options).unwrap();
    ProcessMemoryManager::new(options)
}

fn operator(query: &MemoryPool, name: &str) -> MemoryPool {
    query
        .add_child_pool("task")
        .and_then(|task| task.add_child_pool(name))
        .unwrap()
}

#[test_log::test]
fn global_arbitration_reclaims_from_other_queries() {
    let manager = manager(json!({ "total-capacity": 200 }));
    let idle = manager.add_query_memory_pool("idle");
    let busy = manager.add_query_memory_pool("busy");
    let idle_op = operator(&idle, "scan");
    let busy_op = operator(&busy, "join");

    assert_eq!(idle_op.acquire(150), Ok(150));
    idle_op.release(100);

    assert_eq!(busy_op.acquire(120), Ok(120));
    assert_that!(idle_op.allocated_bytes(), eq(80));
    assert_that!(idle.allocated_bytes(), eq(80));
    assert_that!(busy.allocated_bytes(), eq(120));
    assert_that!(manager.consumed_bytes(), eq(200));
    assert_that!(manager.available_bytes(), eq(0));
}

#[test]
fn refuses_when_other_queries_are_busy() {
    let manager = manager(json!({ "total-capacity": 100 }));
    let first = manager.add_query_memory_pool("first");
    let second = manager.add_query_memory_pool("second");
    let first_op = operator(&first, "scan");
    let second_op = operator(&second, "scan");

    first_op.acquire(100).unwrap();
    let err = second_op.acquire(10).unwrap_err();

    assert!(err.is_out_of_memory());
    assert_that!(second.allocated_bytes(), eq(0));
    assert_that!(first.allocated_bytes(), eq(100));
    assert_that!(manager.consumed_bytes(), eq(100));
}

#[test]
fn disabled_global_arbitration_leaves_other_queries_alone() {
    let manager = manager(json!({
        "total-capacity": 100,
        "global-arbitration": false,
    }));
    let idle = manager.add_query_memory_pool("idle");
    let busy = manager.add_query_memory_pool("busy");
    let idle_op = operator(&idle, "scan");
    idle_op.acquire(100).unwrap();
    idle_op.release(100);

    assert!(operator(&busy, "join").acquire(50).is_err());
    assert_that!(idle.allocated_bytes(), eq(100));
}

#[test]
fn query_capacity_bounds_each_query() {
    let manager = manager(json!({
        "total-capacity": 1000,
        "query-capacity": 64,
    }));
    let query = manager.add_query_memory_pool("query");
    let op = operator(&query, "sort");

    assert_eq!(op.acquire(64), Ok(64));
    assert!(op.acquire(1).unwrap_err().is_out_of_memory());
    assert_that!(manager.consumed_bytes(), eq(64));
}

#[test]
fn collected_queries_return_their_memory_once() {
    let manager = manager(json!({ "total-capacity": 1000 }));
    let first = manager.add_query_memory_pool("first");
    let second = manager.add_query_memory_pool("second");
    let scan = operator(&first, "scan");
    let join = operator(&first, "join");
    operator(&second, "scan").acquire(30).unwrap();
    scan.acquire(100).unwrap();
    join.acquire(200).unwrap();
    assert_that!(manager.consumed_bytes(), eq(330));

    assert_that!(join.release_self("join finished"), eq(ReleaseOutcome::Released));
    assert_that!(manager.consumed_bytes(), eq(130));

    assert_that!(
        manager.gc_query_memory_pool(&first),
        eq(ReleaseOutcome::Released)
    );
    assert_that!(manager.consumed_bytes(), eq(30));
    assert!(scan.is_closed());
    assert_that!(manager.query_pools().len(), eq(1));

    assert_that!(
        manager.gc_query_memory_pool(&first),
        eq(ReleaseOutcome::AlreadyClosed)
    );
    manager.gc_query_memory_pool(&second);
    assert_that!(manager.consumed_bytes(), eq(0));
    assert!(manager.query_pools().is_empty());
}

#[test]
fn pools_follow_the_query_hierarchy() {
    let manager = manager(json!({}));
    let query = manager.add_query_memory_pool("query");
    let task = query.add_child_pool("task").unwrap();
    let op = task.add_child_pool("op").unwrap();

    assert_that!(query.kind(), eq(PoolKind::Query));
    assert_that!(task.kind(), eq(PoolKind::Task));
    assert_that!(op.kind(), eq(PoolKind::Operator));
    assert!(op.find_root_query_pool().ptr_eq(&query));
    assert!(op.add_child_pool("nested").is_err());
}

#[test]
fn release_wait_timeout_is_configurable() {
    let manager = manager(json!({ "release-wait-timeout": "2s" }));
    assert_that!(
        manager.release_wait_timeout(),
        some(eq(Duration::from_secs(2)))
    );
}

#[test]
fn concurrent_queries_keep_consistent_accounting() {
    let manager = manager(json!({ "total-capacity": 4096 }));
    let queries: Vec<_> = (0..2)
        .map(|i| manager.add_query_memory_pool(format!("query-{i}")))
        .collect();
    let operators: Vec<Vec<MemoryPool>> = queries
        .iter()
        .map(|query| {
            let task = query.add_child_pool("task").unwrap();
            (0..4)
                .map(|i| task.add_child_pool(format!("op-{i}")).unwrap())
                .collect()
        })
        .collect();

    thread::scope(|s| {
        for op in operators.iter().flatten() {
            s.spawn(move || {
                for round in 0..200u64 {
                    let bytes = 64 + (round % 7) * 128;
                    if let Ok(acquired) = op.acquire(bytes) {
                        op.release(acquired);
                    }
                }
            });
        }
        for query in &queries {
            s.spawn(move || {
                for _ in 0..50 {
                    query.try_to_reclaim_local_memory(1024);
                }
            });
        }
    });

    let held: u64 = queries.iter().map(MemoryPool::allocated_bytes).sum();
    assert_that!(manager.consumed_bytes(), eq(held));
    for (query, ops) in queries.iter().zip(&operators) {
        let leaves: u64 = ops.iter().map(MemoryPool::allocated_bytes).sum();
        assert_that!(query.allocated_bytes(), eq(leaves));
        assert_that!(query.used_bytes(), eq(0));
        for op in ops {
            assert!(op.snapshot().is_consistent());
        }
    }

    for (collected, query) in queries.iter().enumerate() {
        assert_that!(
            manager.gc_query_memory_pool(query),
            eq(ReleaseOutcome::Released)
        );
        let still_held: u64 = queries[collected + 1..]
            .iter()
            .map(MemoryPool::allocated_bytes)
            .sum();
        assert_that!(manager.consumed_bytes(), eq(still_held));
    }
    assert_that!(manager.consumed_bytes(), eq(0));
    assert!(manager.query_pools().is_empty());
}

#[test]
fn queries_collected_under_load_return_everything() {
    let manager = manager(json!({ "total-capacity": 2048 }));
    let queries: Vec<_> = (0..3)
        .map(|i| manager.add_query_memory_pool(format!("query-{i}")))
        .collect();

    thread::scope(|s| {
        for query in &queries {
            let op = operator(query, "scan");
            s.spawn(move || {
                for round in 0..500u64 {
                    match op.acquire(32 + (round % 5) * 64) {
                        Ok(0) | Err(_) if op.is_closed() => break,
                        Ok(acquired) => {
                            op.release(acquired);
                        }
                        Err(_) => {}
                    }
                }
            });
            s.spawn(move || {
                for _ in 0..100 {
                    query.try_to_reclaim_local_memory(256);
                }
            });
        }
        let manager = &manager;
        for query in &queries {
            s.spawn(move || manager.gc_query_memory_pool(query));
        }
    });

    assert!(queries.iter().all(MemoryPool::is_closed));
    assert_that!(manager.consumed_bytes(), eq(0));
    assert!(manager.query_pools().is_empty());
}
