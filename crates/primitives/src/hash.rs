#[cfg(test)]
#[path = "tests/hash.rs"]
mod tests;

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::Digest;
use thiserror::Error;

const BYTES_LEN: usize = 32;

/// A SHA-256 content hash, rendered as base58.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize)]
pub struct Hash([u8; BYTES_LEN]);

impl Hash {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; BYTES_LEN] {
        &self.0
    }

    #[must_use]
    pub fn new(data: &[u8]) -> Self {
        Self(sha2::Sha256::digest(data).into())
    }

    /// Hashes the borsh encoding of `data` without materializing it.
    pub fn hash_borsh<T: BorshSerialize>(data: &T) -> std::io::Result<Self> {
        let mut hasher = sha2::Sha256::default();

        data.serialize(&mut hasher)?;

        Ok(Self(hasher.finalize().into()))
    }

    /// Short base58 prefix, handy in log lines.
    #[must_use]
    pub fn short(&self) -> String {
        let mut encoded = bs58::encode(&self.0).into_string();
        encoded.truncate(8);
        encoded
    }
}

impl From<[u8; BYTES_LEN]> for Hash {
    fn from(bytes: [u8; BYTES_LEN]) -> Self {
        Self(bytes)
    }
}

impl From<Hash> for [u8; BYTES_LEN] {
    fn from(hash: Hash) -> Self {
        hash.0
    }
}

impl Deref for Hash {
    type Target = [u8; BYTES_LEN];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&bs58::encode(&self.0).into_string())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Hash").field(&self.short()).finish()
    }
}

#[derive(Clone, Copy, Debug, Error)]
#[non_exhaustive]
pub enum HashParseError {
    #[error("invalid hash length")]
    InvalidLength,

    #[error("invalid base58")]
    DecodeError(#[from] bs58::decode::Error),
}

impl FromStr for Hash {
    type Err = HashParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0; BYTES_LEN];

        match bs58::decode(s).onto(&mut bytes) {
            Ok(len) if len == BYTES_LEN => Ok(Self(bytes)),
            Ok(_) => Err(HashParseError::InvalidLength),
            Err(err) => Err(HashParseError::DecodeError(err)),
        }
    }
}

impl serde::Serialize for Hash {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> serde::Deserialize<'de> for Hash {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HashVisitor;

        impl serde::de::Visitor<'_> for HashVisitor {
            type Value = Hash;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a base58 encoded hash")
            }

            fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
                match Hash::from_str(v) {
                    Ok(hash) => Ok(hash),
                    Err(HashParseError::InvalidLength) => Err(E::invalid_length(v.len(), &self)),
                    Err(err) => Err(E::custom(err)),
                }
            }
        }

        deserializer.deserialize_str(HashVisitor)
    }
}
