// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! The runtime value and parameter types that flow between processes,
//! the cache, and canonical hashing.

use crate::digest::{DigestComputer, Digestible};
use std::collections::BTreeMap;

/// A value produced or consumed by a process.
///
/// A single universal, self-describing value type stands in for a
/// per-process codec. [`Value`] round-trips through
/// `serde_json::to_vec`/`from_slice`, which doubles as the cache's payload
/// format (see [`crate::cache::CacheStore`]).
pub type Value = serde_json::Value;

/// A process's specialized parameter dictionary.
///
/// Using a `BTreeMap` keeps keys in sorted order by construction, which is
/// exactly the canonical, key-sorted form the planner's hash derivation
/// requires before hashing; no separate sorting pass is needed.
pub type Params = BTreeMap<String, Value>;

/// Serialize a [`Params`] dict into its canonical byte form for hashing.
///
/// `serde_json` preserves a `BTreeMap`'s iteration order (already
/// key-sorted) and uses a fixed numeric-literal format, so this is stable
/// across runs and hosts.
pub fn canonical_params_bytes(params: &Params) -> Vec<u8> {
    serde_json::to_vec(params).expect("Params values are always JSON-serializable")
}

impl Digestible for Params {
    fn update_digest(&self, dc: &mut DigestComputer) {
        use sha2::Digest;
        dc.update(canonical_params_bytes(self));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_form_is_key_sorted() {
        let mut params = Params::new();
        params.insert("zeta".into(), json!(1));
        params.insert("alpha".into(), json!(2));

        let bytes = canonical_params_bytes(&params);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
    }

    #[test]
    fn canonical_form_is_deterministic() {
        let mut a = Params::new();
        a.insert("n".into(), json!(5));
        let mut b = Params::new();
        b.insert("n".into(), json!(5));
        assert_eq!(canonical_params_bytes(&a), canonical_params_bytes(&b));
    }
}
