//! Strongly-typed keys for ledger assets.
//!
//! Every key is a ULID chosen by the submitter (or generated locally), so two
//! organizations can register assets without coordinating. The newtypes keep a
//! task key from being passed where a plan key is expected.
//!
//! # Example
//!
//! ```rust
//! use cohort_core::id::{ComputePlanKey, ComputeTaskKey};
//!
//! let plan = ComputePlanKey::generate();
//! let task = ComputeTaskKey::generate();
//!
//! // Keys are different types - this won't compile:
//! // let wrong: ComputeTaskKey = plan;
//! # let _ = (plan, task);
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_key {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique key.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates a key from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!("invalid {} '{s}': {e}", $label),
                    })
            }
        }
    };
}

ulid_key!(
    /// Key of a compute task.
    ComputeTaskKey,
    "compute task key"
);

ulid_key!(
    /// Key of a compute plan.
    ComputePlanKey,
    "compute plan key"
);

ulid_key!(
    /// Key of a registered function.
    FunctionKey,
    "function key"
);

ulid_key!(
    /// Key of a data asset (data manager, data sample or model).
    AssetKey,
    "asset key"
);

ulid_key!(
    /// Identifier of a ledger event.
    ///
    /// Event IDs are derived from the transaction time and the position of the
    /// event in the ledger, so replaying a transaction yields the same IDs.
    EventId,
    "event id"
);

impl EventId {
    /// Builds the ID of the event at ledger position `sequence`, recorded at
    /// `timestamp`.
    ///
    /// The position alone makes the ID unique; the timestamp keeps IDs sortable
    /// by time. Times before the epoch are clamped to it.
    #[must_use]
    pub fn sequenced(timestamp: DateTime<Utc>, sequence: u64) -> Self {
        let ms = u64::try_from(timestamp.timestamp_millis()).unwrap_or(0);
        Self(Ulid::from_parts(ms, u128::from(sequence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn task_key_roundtrip() {
        let key = ComputeTaskKey::generate();
        let parsed: ComputeTaskKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn keys_are_unique() {
        assert_ne!(FunctionKey::generate(), FunctionKey::generate());
    }

    #[test]
    fn invalid_key_names_the_key_type() {
        let err = "not-a-ulid".parse::<ComputePlanKey>().unwrap_err();
        assert!(err.to_string().contains("compute plan key"));
    }

    #[test]
    fn sequenced_event_ids_are_deterministic_and_ordered() {
        let at = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(EventId::sequenced(at, 3), EventId::sequenced(at, 3));
        assert!(EventId::sequenced(at, 1) < EventId::sequenced(at, 2));
    }

    #[test]
    fn pre_epoch_event_ids_stay_distinct() {
        let before_epoch = Utc.with_ymd_and_hms(1960, 1, 1, 0, 0, 0).unwrap();
        assert_ne!(
            EventId::sequenced(before_epoch, 0),
            EventId::sequenced(before_epoch, 1)
        );
    }

    #[test]
    fn keys_serialize_as_plain_strings() {
        let key = AssetKey::generate();
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, format!("\"{key}\""));
    }
}
