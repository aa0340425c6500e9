//! Identifiers shared across the validator: chain-native keys, executor
//! classes and job identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An SS58-encoded public key. We do not re-implement SS58 codec/signature
/// verification here (non-goal, spec.md §1): this is an opaque, comparable,
/// orderable handle on a chain identity.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Hotkey(String);

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Coldkey(String);

macro_rules! ss58_newtype {
    ($ty:ident) => {
        impl $ty {
            pub fn new(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.to_string()))
            }
        }

        impl From<String> for $ty {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $ty {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}

ss58_newtype!(Hotkey);
ss58_newtype!(Coldkey);

/// Categorical capacity descriptor for a miner's workers (e.g. `"a6000"`).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutorClass(String);

ss58_newtype!(ExecutorClass);

/// Block identifier. Monotonically increasing; the chain's time axis.
pub type BlockId = i64;

/// A job's unique identifier, as carried end-to-end through the facilitator
/// link, the miner protocol and receipts.
pub type JobUuid = uuid::Uuid;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hotkey_round_trips_through_display() {
        let hk: Hotkey = "5F3sa2TJAWMqDhXG6jhV4N8ko9SxwGy8TpaNS1repo5EYjQX".into();
        assert_eq!(hk.to_string(), hk.as_str());
    }

    #[test]
    fn hotkeys_sort_lexicographically() {
        let a: Hotkey = "aaa".into();
        let b: Hotkey = "bbb".into();
        assert!(a < b);
    }
}
