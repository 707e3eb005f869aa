#![forbid(unsafe_code)]

//! Fixed-width subscription bitmask.
//!
//! An 8-byte buffer read as a big-endian `u64`; bit `i` (value `1 << i`) set
//! means subscription id `i` matched.

use std::collections::BTreeSet;

pub const BITMASK_LEN: usize = 8;
pub const MAX_IDENTIFIERS: u32 = 64;

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum BitmaskError {
    #[error("malformed bitmask: expected {BITMASK_LEN} bytes, got {len}")]
    MalformedBitmask { len: usize },
    #[error("identifier {id} out of range (must be < {MAX_IDENTIFIERS})")]
    IdentifierOutOfRange { id: u32 },
}

impl BitmaskError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MalformedBitmask { .. } => "MALFORMED_BITMASK",
            Self::IdentifierOutOfRange { .. } => "IDENTIFIER_OUT_OF_RANGE",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Bitmask(u64);

impl Bitmask {
    pub const EMPTY: Bitmask = Bitmask(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, BitmaskError> {
        let buf: [u8; BITMASK_LEN] = bytes
            .try_into()
            .map_err(|_| BitmaskError::MalformedBitmask { len: bytes.len() })?;
        Ok(Self(u64::from_be_bytes(buf)))
    }

    pub fn to_bytes(self) -> [u8; BITMASK_LEN] {
        self.0.to_be_bytes()
    }

    pub fn from_ids<I>(ids: I) -> Result<Self, BitmaskError>
    where
        I: IntoIterator<Item = u32>,
    {
        let mut bits = 0u64;
        for id in ids {
            bits |= bit(id)?;
        }
        Ok(Self(bits))
    }

    pub fn ids(self) -> BTreeSet<u32> {
        let mut out = BTreeSet::new();
        let mut rest = self.0;
        while rest != 0 {
            let id = rest.trailing_zeros();
            out.insert(id);
            rest &= rest - 1;
        }
        out
    }

    pub fn contains(self, id: u32) -> bool {
        id < MAX_IDENTIFIERS && self.0 & (1u64 << id) != 0
    }

    pub fn toggled(self, id: u32) -> Result<Self, BitmaskError> {
        Ok(Self(self.0 ^ bit(id)?))
    }

    pub fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

fn bit(id: u32) -> Result<u64, BitmaskError> {
    if id >= MAX_IDENTIFIERS {
        return Err(BitmaskError::IdentifierOutOfRange { id });
    }
    Ok(1u64 << id)
}

/// Decodes a stored mask into the set of matched ids.
///
/// A missing value (SQL `NULL`) or a zero-length blob is the empty set. Any
/// other length than 8 bytes is rejected rather than truncated.
pub fn decode(buffer: Option<&[u8]>) -> Result<BTreeSet<u32>, BitmaskError> {
    match buffer {
        None => Ok(BTreeSet::new()),
        Some(bytes) if bytes.is_empty() => Ok(BTreeSet::new()),
        Some(bytes) => Ok(Bitmask::from_bytes(bytes)?.ids()),
    }
}

pub fn encode(ids: &BTreeSet<u32>) -> Result<[u8; BITMASK_LEN], BitmaskError> {
    Ok(Bitmask::from_ids(ids.iter().copied())?.to_bytes())
}
