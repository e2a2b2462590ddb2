// /////////////////////////////////////////////////////////////////////////////
// Recon Pipeline
// Copyright (c) 2025 Michael Gardner, A Bit of Help, Inc.
// SPDX-License-Identifier: BSD-3-Clause
// See LICENSE file in the project root.
// /////////////////////////////////////////////////////////////////////////////

//! # Generic ID Value Object
//!
//! Type-safe, category-specific identifiers built on ULID (Universally Unique
//! Lexicographically Sortable Identifier) with phantom types. This is the base
//! implementation that specific entity IDs (`PipelineId`, `StageId`,
//! `CheckpointId`) compose; it should not be used directly.
//!
//! ULIDs are naturally time-ordered (48-bit timestamp + 80 bits of randomness),
//! which makes entity ids sortable by creation time for free.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display};
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use ulid::Ulid;

use crate::PipelineError;

/// Category-specific validation and nil-handling for a [`GenericId`].
pub trait IdCategory {
    /// Unique name for this ID category, used in error messages.
    fn category_name() -> &'static str;

    /// Validates category-specific constraints. Default rejects nil ULIDs.
    fn validate_id(ulid: &Ulid) -> Result<(), PipelineError> {
        if *ulid == Ulid::nil() {
            return Err(PipelineError::ValidationFailed(format!(
                "{} id cannot be nil",
                Self::category_name()
            )));
        }
        Ok(())
    }
}

/// Generic identifier value object for domain entities.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub struct GenericId<T: IdCategory> {
    value: Ulid,
    _phantom: std::marker::PhantomData<T>,
}

impl<T: IdCategory> Serialize for GenericId<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.value.to_string().serialize(serializer)
    }
}

impl<'de, T: IdCategory> Deserialize<'de> for GenericId<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let ulid = Ulid::from_string(&s).map_err(|e| serde::de::Error::custom(e.to_string()))?;
        Ok(Self {
            value: ulid,
            _phantom: std::marker::PhantomData,
        })
    }
}

impl<T: IdCategory> GenericId<T> {
    /// Creates a new time-ordered id.
    pub fn new() -> Self {
        Self {
            value: Ulid::new(),
            _phantom: std::marker::PhantomData,
        }
    }

    /// Builds an id from an existing ULID, enforcing category validation.
    pub fn from_ulid(ulid: Ulid) -> Result<Self, PipelineError> {
        T::validate_id(&ulid)?;
        Ok(Self {
            value: ulid,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Builds an id anchored at a given millisecond timestamp (range queries, tests).
    pub fn from_timestamp_ms(timestamp_ms: u64) -> Result<Self, PipelineError> {
        let random = rand::random::<u128>() & ((1u128 << 80) - 1);
        let ulid = Ulid::from_parts(timestamp_ms, random);
        T::validate_id(&ulid)?;
        Ok(Self {
            value: ulid,
            _phantom: std::marker::PhantomData,
        })
    }

    /// Parses an id from its 26-character ULID string form.
    pub fn from_string(s: &str) -> Result<Self, PipelineError> {
        let ulid =
            Ulid::from_str(s).map_err(|e| PipelineError::ValidationFailed(format!("invalid id format: {e}")))?;
        Self::from_ulid(ulid)
    }

    pub fn as_ulid(&self) -> Ulid {
        self.value
    }

    pub fn timestamp_ms(&self) -> u64 {
        self.value.timestamp_ms()
    }

    pub fn datetime(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(self.timestamp_ms() as i64).unwrap_or_else(chrono::Utc::now)
    }

    pub fn category(&self) -> &'static str {
        T::category_name()
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        T::validate_id(&self.value)
    }

    pub fn is_nil(&self) -> bool {
        self.value.0 == 0
    }
}

impl<T: IdCategory> Default for GenericId<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: IdCategory> Display for GenericId<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.value)
    }
}

impl<T: IdCategory> Hash for GenericId<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T: IdCategory> FromStr for GenericId<T> {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_string(s)
    }
}

impl<T: IdCategory> From<Ulid> for GenericId<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid).unwrap_or_else(|_| Self::new())
    }
}

impl<T: IdCategory> From<GenericId<T>> for Ulid {
    fn from(id: GenericId<T>) -> Self {
        id.value
    }
}

impl<T: IdCategory> AsRef<Ulid> for GenericId<T> {
    fn as_ref(&self) -> &Ulid {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
    struct TestEntity;

    impl IdCategory for TestEntity {
        fn category_name() -> &'static str {
            "test"
        }
    }

    type TestId = GenericId<TestEntity>;

    #[test]
    fn ids_are_unique_and_time_ordered() {
        let id1 = TestId::new();
        std::thread::sleep(std::time::Duration::from_millis(1));
        let id2 = TestId::new();

        assert_ne!(id1, id2);
        assert!(id2 > id1);
    }

    #[test]
    fn round_trips_through_json() {
        let id = TestId::new();
        let json = serde_json::to_string(&id).unwrap();
        let back: TestId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }

    #[test]
    fn rejects_nil_ulid() {
        let err = TestId::from_ulid(Ulid::nil()).unwrap_err();
        assert!(matches!(err, PipelineError::ValidationFailed(_)));
    }
}
