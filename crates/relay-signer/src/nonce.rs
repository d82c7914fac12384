//! Idempotency keys: UUIDv7 strings, strictly increasing per generator.

use std::fmt;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A time-ordered idempotency key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(String);

impl Nonce {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Millisecond Unix timestamp embedded in a UUIDv7 nonce.
    pub fn timestamp_ms(&self) -> Option<u64> {
        let uuid = Uuid::parse_str(&self.0).ok()?;
        if uuid.get_version_num() != 7 {
            return None;
        }
        Some((uuid.as_u128() >> 80) as u64)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Nonce {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Produces one nonce per submission intent.
///
/// UUIDv7 already sorts by creation millisecond; the generator additionally
/// bumps the random tail when two nonces land in the same millisecond so that
/// its output is strictly increasing.
#[derive(Debug, Default)]
pub struct NonceGenerator {
    last: Mutex<Option<Uuid>>,
}

impl NonceGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Nonce {
        let mut last = self.last.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut candidate = Uuid::now_v7();
        if let Some(prev) = *last {
            if candidate <= prev {
                candidate = Uuid::from_u128(prev.as_u128() + 1);
            }
        }
        *last = Some(candidate);
        Nonce(candidate.hyphenated().to_string())
    }
}
