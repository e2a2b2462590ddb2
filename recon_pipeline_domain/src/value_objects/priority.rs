// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! Stage priority, shared by the thread pool's task queue and the resolver's
//! tie-breaking rule.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StagePriority {
    Low = 0,
    #[default]
    Normal = 1,
    High = 2,
    Critical = 3,
}

impl StagePriority {
    /// CPU-minute weight used by the selector's resource estimator (§4.D).
    pub fn cpu_weight(self) -> f64 {
        match self {
            StagePriority::Low | StagePriority::Normal => 1.0,
            StagePriority::High => 1.5,
            StagePriority::Critical => 2.0,
        }
    }
}
