// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Stage Identifier Value Object
//!
//! `StageId` is operator-facing: unlike most entity ids in this crate it is
//! not a ULID. The data model (§3) requires stage ids to be short, stable
//! strings chosen by the operator (e.g. `"subhunter"`, `"resolve-dns"`) so
//! they can be referenced from dependency lists and CLI filters. Validation
//! restricts the character set to letters, digits, `_`, `-`, and `.`.

use crate::PipelineError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A validated stage identifier, unique within one pipeline.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(String);

impl StageId {
    pub fn new(raw: impl Into<String>) -> Result<Self, PipelineError> {
        let raw = raw.into();
        validate(&raw)?;
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate(raw: &str) -> Result<(), PipelineError> {
    if raw.is_empty() {
        return Err(PipelineError::ValidationFailed("stage id must not be empty".into()));
    }
    if !raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(PipelineError::ValidationFailed(format!(
            "stage id '{raw}' contains characters outside [A-Za-z0-9_.-]"
        )));
    }
    Ok(())
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StageId {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for StageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_operator_chosen_names() {
        assert!(StageId::new("subhunter").is_ok());
        assert!(StageId::new("resolve-dns.v2").is_ok());
    }

    #[test]
    fn rejects_empty_and_invalid_characters() {
        assert!(StageId::new("").is_err());
        assert!(StageId::new("bad id").is_err());
        assert!(StageId::new("bad/id").is_err());
    }

    #[test]
    fn displays_as_raw_string() {
        let id = StageId::new("httpx").unwrap();
        assert_eq!(id.to_string(), "httpx");
        assert_eq!(id.as_str(), "httpx");
    }
}
