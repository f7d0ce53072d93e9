// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use std::time::Duration;

use bytesize::ByteSize;
use serde::{Deserialize, Serialize};
use serde_with::serde_as;

/// # Memory options
///
/// Bounds the memory that queries and tasks may check out of this process.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, derive_builder::Builder)]
#[serde(rename_all = "kebab-case")]
#[serde(default)]
#[builder(default)]
pub struct MemoryOptions {
    /// # Total memory capacity
    ///
    /// Upper bound of memory all query pools of this process may hold together.
    /// `0` disables the process-wide limit.
    pub total_capacity: ByteSize,

    /// # Query memory capacity
    ///
    /// Upper bound of memory a single query pool (and all pools below it) may
    /// hold. `0` leaves query pools bounded only by the total capacity.
    pub query_capacity: ByteSize,

    /// # Global arbitration
    ///
    /// When the process-wide capacity is exhausted, reclaim free memory from
    /// other queries before refusing a request.
    pub global_arbitration: bool,

    /// # Release wait timeout
    ///
    /// How long releasing a pool waits for an in-flight reclaim on that pool.
    /// A release that gives up leaves the pool open. Unset waits indefinitely.
    ///
    /// Can be configured using the [`humantime`](https://docs.rs/humantime/latest/humantime/fn.parse_duration.html) format.
    #[serde(
        with = "serde_with::As::<Option<serde_with::DisplayFromStr>>",
        skip_serializing_if = "Option::is_none"
    )]
    pub release_wait_timeout: Option<humantime::Duration>,
}

impl MemoryOptions {
    pub fn total_capacity_bytes(&self) -> Option<u64> {
        non_zero(self.total_capacity)
    }

    pub fn query_capacity_bytes(&self) -> Option<u64> {
        non_zero(self.query_capacity)
    }

    pub fn release_wait_timeout(&self) -> Option<Duration> {
        self.release_wait_timeout.map(Into::into)
    }
}

fn non_zero(size: ByteSize) -> Option<u64> {
    (size.as_u64() > 0).then_some(size.as_u64())
}

impl Default for MemoryOptions {
    fn default() -> Self {
        Self {
            total_capacity: ByteSize(0),
            query_capacity: ByteSize(0),
            global_arbitration: true,
            release_wait_timeout: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use googletest::prelude::*;

    use super::*;

    #[test]
    fn defaults_are_unbounded() {
        let options = MemoryOptions::default();
        assert_that!(options.total_capacity_bytes(), none());
        assert_that!(options.query_capacity_bytes(), none());
        assert!(options.global_arbitration);
        assert_that!(options.release_wait_timeout(), none());
    }

    #[test]
    fn parses_human_readable_values() {
        let options: MemoryOptions = serde_json::from_str(
            r#"{
                "total-capacity": "1 MiB",
                "query-capacity": 4096,
                "global-arbitration": false,
                "release-wait-timeout": "250ms"
            }"#,
        )
        .unwrap();

        assert_that!(options.total_capacity_bytes(), some(eq(1024 * 1024)));
        assert_that!(options.query_capacity_bytes(), some(eq(4096)));
        assert!(!options.global_arbitration);
        assert_that!(
            options.release_wait_timeout(),
            some(eq(Duration::from_millis(250)))
        );
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let options: MemoryOptions =
            serde_json::from_str(r#"{"query-capacity": "64 KiB"}"#).unwrap();
        assert_that!(options.query_capacity_bytes(), some(eq(64 * 1024)));
        assert!(options.global_arbitration);
    }

    #[test]
    fn builder_starts_from_defaults() {
        let options = MemoryOptionsBuilder::default()
            .total_capacity(ByteSize::kib(8))
            .build()
            .unwrap();
        assert_that!(options.total_capacity_bytes(), some(eq(8 * 1024)));
        assert!(options.global_arbitration);
    }
}
