// Copyright (c) 2023 - 2026 Restate Software, Inc., Restate GmbH.
// All rights reserved.
//
// Use of this software is governed by the Business Source License
// included in the LICENSE file.
//
// As of the Change Date specified in that file, in accordance with
// the Business Source License, use of this software will be governed
// by the Apache License, Version 2.0.

use bytesize::ByteSize;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryError {
    #[error("memory pool '{pool}' is closed")]
    Closed { pool: String },
    #[error("memory pool '{pool}' cannot provide {}", ByteSize(*.needed))]
    OutOfMemory { pool: String, needed: u64 },
    #[error("memory pool '{pool}' is a leaf and cannot own child pools")]
    LeafPool { pool: String },
    #[error("memory pool '{pool}' hands out memory only through its child pools")]
    InteriorPool { pool: String },
    #[error("memory pool '{pool}' has no parent to draw memory from")]
    Detached { pool: String },
}

impl MemoryError {
    pub fn is_out_of_memory(&self) -> bool {
        matches!(self, MemoryError::OutOfMemory { .. })
    }
}
