use std::fmt;
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{TypeError, TypeResult};

/// Maximum length of a protocol code in bytes.
pub const MAX_PROTOCOL_LEN: usize = 128;

const RANDOM_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Human-facing complaint code.
///
/// A protocol code is assigned by the caller when a complaint is submitted
/// and doubles as the report's primary key in the document store. Codes are
/// validated so they are always usable as a single path segment:
///
/// - non-empty and at most [`MAX_PROTOCOL_LEN`] bytes
/// - no `/` and no control characters
/// - not `.` or `..`
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Validate and wrap a protocol code.
    pub fn new(value: impl Into<String>) -> TypeResult<Self> {
        let value = value.into();
        validate(&value)?;
        Ok(Self(value))
    }

    /// Build a sequential code shaped `YYYY-NNNN`.
    pub fn sequential(year: u16, seq: u32) -> Self {
        Self(format!("{year:04}-{seq:04}"))
    }

    /// Build a random code shaped `YYYY-XXXXXXXX` from an unambiguous alphabet.
    pub fn random<R: Rng + ?Sized>(year: u16, rng: &mut R) -> Self {
        let suffix: String = (0..8)
            .map(|_| RANDOM_ALPHABET[rng.gen_range(0..RANDOM_ALPHABET.len())] as char)
            .collect();
        Self(format!("{year:04}-{suffix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

fn validate(value: &str) -> TypeResult<()> {
    let reject = |reason: &str| {
        Err(TypeError::InvalidProtocol {
            value: value.to_string(),
            reason: reason.to_string(),
        })
    };
    if value.is_empty() {
        return reject("empty");
    }
    if value.len() > MAX_PROTOCOL_LEN {
        return reject("too long");
    }
    if value == "." || value == ".." {
        return reject("reserved path segment");
    }
    if value.contains('/') {
        return reject("contains '/'");
    }
    if value.chars().any(char::is_control) {
        return reject("contains control characters");
    }
    Ok(())
}

impl fmt::Debug for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProtocolId({})", self.0)
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ProtocolId {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for ProtocolId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ProtocolId> for String {
    fn from(id: ProtocolId) -> Self {
        id.0
    }
}

impl AsRef<str> for ProtocolId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
