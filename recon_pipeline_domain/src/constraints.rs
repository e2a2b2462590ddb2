// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Execution constraint tags (§4.C) and their incompatibility table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageConstraint {
    SequentialOnly,
    ParallelSafe,
    ResourceIntensive,
    NetworkDependent,
    FilesystemDependent,
    MemoryIntensive,
    CpuIntensive,
    ExclusiveAccess,
    TimeSensitive,
    Stateful,
}

impl StageConstraint {
    pub const ALL: [StageConstraint; 10] = [
        StageConstraint::SequentialOnly,
        StageConstraint::ParallelSafe,
        StageConstraint::ResourceIntensive,
        StageConstraint::NetworkDependent,
        StageConstraint::FilesystemDependent,
        StageConstraint::MemoryIntensive,
        StageConstraint::CpuIntensive,
        StageConstraint::ExclusiveAccess,
        StageConstraint::TimeSensitive,
        StageConstraint::Stateful,
    ];

    /// Pairs that may never both hold for the same stage (§4.C).
    pub fn conflicts_with(self, other: StageConstraint) -> bool {
        use StageConstraint::*;
        matches!(
            (self, other),
            (SequentialOnly, ParallelSafe)
                | (ParallelSafe, SequentialOnly)
                | (ParallelSafe, ExclusiveAccess)
                | (ExclusiveAccess, ParallelSafe)
        )
    }
}
