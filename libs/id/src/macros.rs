//! `define_id!` and the parsing every generated type shares.

use crate::{IdError, Ulid};

/// Split `{prefix}_{ulid}` and check the prefix.
#[doc(hidden)]
pub fn parse_prefixed(expected: &'static str, raw: &str) -> Result<Ulid, IdError> {
    let (prefix, ulid) = match raw.split_once('_') {
        Some(parts) => parts,
        None if raw.is_empty() => return Err(IdError::Empty),
        None => return Err(IdError::MissingSeparator),
    };

    if prefix != expected {
        return Err(IdError::InvalidPrefix {
            expected,
            actual: prefix.to_owned(),
        });
    }

    Ulid::from_string(ulid).map_err(|e| IdError::InvalidUlid(e.to_string()))
}

/// Defines a ULID-backed identifier rendered as `{prefix}_{ulid}`.
///
/// ```ignore
/// define_id!(
///     /// A machine reporting inventory.
///     MachineId => "mach"
/// );
/// ```
#[macro_export]
macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name($crate::Ulid);

        impl $name {
            pub const PREFIX: &'static str = $prefix;

            /// Mint a fresh identifier.
            #[must_use]
            pub fn new() -> Self {
                Self($crate::Ulid::new())
            }

            #[must_use]
            pub const fn from_ulid(ulid: $crate::Ulid) -> Self {
                Self(ulid)
            }

            #[must_use]
            pub const fn ulid(&self) -> $crate::Ulid {
                self.0
            }

            /// Milliseconds since the Unix epoch at which this id was minted.
            pub fn timestamp_ms(&self) -> u64 {
                self.0.timestamp_ms()
            }

            /// Parse the `{prefix}_{ulid}` form. Surrounding whitespace is ignored.
            pub fn parse(raw: &str) -> Result<Self, $crate::IdError> {
                $crate::parse_prefixed(Self::PREFIX, raw.trim()).map(Self)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $name {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                f.write_str(Self::PREFIX)?;
                f.write_str("_")?;
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl core::str::FromStr for $name {
            type Err = $crate::IdError;

            fn from_str(raw: &str) -> Result<Self, Self::Err> {
                Self::parse(raw)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = <std::borrow::Cow<'de, str>>::deserialize(deserializer)?;
                Self::parse(&raw).map_err(serde::de::Error::custom)
            }
        }
    };
}
