//! Stable identifiers for modules and chunks.
//!
//! Bundlers emit either numeric ids (`693`) or named ids (`"vendors~main"`).
//! Both forms are kept as-is; an all-digit string without a leading zero is
//! read as the numeric form so that JSON object keys and JSON numbers name the
//! same id.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
enum Key {
    Numeric(u64),
    Named(Arc<str>),
}

impl Key {
    fn parse(text: &str) -> Self {
        let canonical_number = !text.is_empty()
            && text.bytes().all(|b| b.is_ascii_digit())
            && !(text.len() > 1 && text.starts_with('0'));

        if canonical_number {
            if let Ok(n) = text.parse::<u64>() {
                return Key::Numeric(n);
            }
        }
        Key::Named(Arc::from(text))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Numeric(n) => write!(f, "{}", n),
            Key::Named(s) => f.write_str(&**s),
        }
    }
}

struct KeyVisitor;

impl<'de> Visitor<'de> for KeyVisitor {
    type Value = Key;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a non-negative integer or a string id")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<Key, E> {
        Ok(Key::Numeric(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<Key, E> {
        u64::try_from(v)
            .map(Key::Numeric)
            .map_err(|_| E::custom(format!("id must not be negative: {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Key, E> {
        Ok(Key::parse(v))
    }
}

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Key);

        impl $name {
            pub fn numeric(n: u64) -> Self {
                Self(Key::Numeric(n))
            }

            pub fn named(name: impl AsRef<str>) -> Self {
                Self(Key::Named(Arc::from(name.as_ref())))
            }

            pub fn as_number(&self) -> Option<u64> {
                match &self.0 {
                    Key::Numeric(n) => Some(*n),
                    Key::Named(_) => None,
                }
            }

            pub fn as_name(&self) -> Option<&str> {
                match &self.0 {
                    Key::Numeric(_) => None,
                    Key::Named(s) => Some(&**s),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = std::convert::Infallible;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Key::parse(s)))
            }
        }

        impl From<u64> for $name {
            fn from(n: u64) -> Self {
                Self::numeric(n)
            }
        }

        impl From<u32> for $name {
            fn from(n: u32) -> Self {
                Self::numeric(u64::from(n))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(Key::parse(s))
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(Key::parse(&s))
            }
        }

        impl From<&$name> for $name {
            fn from(id: &$name) -> Self {
                id.clone()
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match &self.0 {
                    Key::Numeric(n) => serializer.serialize_u64(*n),
                    Key::Named(s) => serializer.serialize_str(s),
                }
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserializer.deserialize_any(KeyVisitor).map(Self)
            }
        }
    };
}

define_id!(
    /// Identifier of a module, unique within one build.
    ModuleId
);

define_id!(
    /// Identifier of an independently loadable chunk.
    ChunkId
);
