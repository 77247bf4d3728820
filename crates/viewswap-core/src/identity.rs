//! Participant identity
//!
//! Participants are identified by the stable integer id their chat
//! transport assigns them. The id is also the storage key prefix, so the
//! byte encoding is big-endian to keep per-participant rows contiguous.

use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::IdentityError;

/// Stable participant identity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(pub i64);

impl ParticipantId {
    /// Width of the storage key encoding
    pub const ENCODED_LEN: usize = 8;

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the raw id
    pub fn get(&self) -> i64 {
        self.0
    }

    /// Encode as storage key bytes
    pub fn as_bytes(&self) -> [u8; 8] {
        self.0.to_be_bytes()
    }

    /// Decode from storage key bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, IdentityError> {
        let raw: [u8; 8] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyLength {
                expected: Self::ENCODED_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(i64::from_be_bytes(raw)))
    }

    /// Get a short display form (for logging)
    pub fn short_id(&self) -> String {
        self.0.to_string()
    }
}

impl Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ParticipantId {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<i64>()
            .map(Self)
            .map_err(|e| IdentityError::InvalidFormat(format!("{s:?}: {e}")))
    }
}

impl From<i64> for ParticipantId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}
