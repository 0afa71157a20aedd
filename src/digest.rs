// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! Content-address primitives shared by the planner and the cache.
//!
//! Every intermediate and result value produced by a [`crate::plan`]
//! process instance is named by a [`Hash`]: a digest over the process's
//! registered name, its canonicalized parameters, and the hashes of its
//! inputs. This module only deals with the digest machinery; the plan
//! table (`crate::plan`) is what actually derives a process instance's
//! hashes.

use digest::OutputSizeUser;
use generic_array::GenericArray;
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// The digest algorithm used throughout this crate.
///
/// Any collision-resistant hash function would do; this is currently
/// [`sha2::Sha256`].
pub type DigestComputer = Sha256;

/// The raw digest bytes emitted by [`DigestComputer`].
pub type DigestData = GenericArray<u8, <DigestComputer as OutputSizeUser>::OutputSize>;

/// A content-address: a lowercase-hex digest naming a cached object.
///
/// `Hash` is the primary key of [`crate::cache::CacheStore`] and
/// [`crate::metadata::MetadataTable`], and is what source references
/// (`hash:<digest>`) and result hashes in the plan table are made of.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Hash(DigestData);

impl Hash {
    /// Finalize a running [`DigestComputer`] into a `Hash`.
    pub fn finalize(dc: DigestComputer) -> Self {
        Hash(dc.finalize())
    }

    /// Hash a single byte string in one shot.
    pub fn of_bytes(data: impl AsRef<[u8]>) -> Self {
        let mut dc = DigestComputer::new();
        dc.update(data.as_ref());
        Hash::finalize(dc)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({self})")
    }
}

/// Error returned when a string fails to parse as a [`Hash`].
#[derive(Debug, thiserror::Error)]
#[error("`{0}` is not a valid hex digest")]
pub struct InvalidHash(String);

impl FromStr for Hash {
    type Err = InvalidHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != <DigestComputer as OutputSizeUser>::output_size() * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(InvalidHash(s.to_owned()));
        }

        let mut out = DigestData::default();

        for (i, byte) in out.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).map_err(|_| InvalidHash(s.to_owned()))?;
        }

        Ok(Hash(out))
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// A helper trait for things that can contribute bytes to a running digest:
/// types that know how to feed themselves into a [`DigestComputer`] so that
/// composite digests (a process's inputs, its canonical params, ...) can be
/// built up incrementally.
pub trait Digestible {
    fn update_digest(&self, dc: &mut DigestComputer);
}

impl Digestible for Hash {
    fn update_digest(&self, dc: &mut DigestComputer) {
        dc.update(self.0);
    }
}

impl Digestible for str {
    fn update_digest(&self, dc: &mut DigestComputer) {
        dc.update(self.as_bytes());
    }
}

impl<T: Digestible> Digestible for [T] {
    fn update_digest(&self, dc: &mut DigestComputer) {
        for item in self {
            item.update_digest(dc);
        }
    }
}
