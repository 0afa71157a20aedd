// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! `CacheStore`: a content-addressed file store with a persistent
//! metadata sidecar.
//!
//! Writes use a temp-file-then-persist pattern so that a crash mid-write
//! never leaves a half-written payload visible under its final name.

use crate::digest::Hash;
use crate::error::CacheError;
use crate::metadata::{MetadataPatch, MetadataRow, MetadataTable};
use crate::value::Value;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tectonic_errors::prelude::*;
use tectonic_status_base::StatusBackend;

/// A content-addressed object store plus its metadata sidecar.
#[derive(Debug)]
pub struct CacheStore {
    root: PathBuf,
    metadata: MetadataTable,
}

impl CacheStore {
    /// Open (or initialize) a cache directory at `root`.
    pub fn open(root: impl Into<PathBuf>, status: &mut dyn StatusBackend) -> Result<Self> {
        let root = root.into();

        atry!(
            fs::create_dir_all(&root);
            ["failed to create cache directory `{}`", root.display()]
        );

        let metadata = atry!(
            MetadataTable::load(root.join("metadata.csv"), status);
            ["failed to load cache metadata in `{}`", root.display()]
        );

        Ok(CacheStore { root, metadata })
    }

    fn payload_path(&self, filename: &str) -> PathBuf {
        self.root.join(filename)
    }

    /// Test whether `hash` is already present.
    pub fn has(&self, hash: &Hash) -> bool {
        self.metadata.contains(hash)
    }

    /// Read the value stored under `hash`.
    pub fn get(&self, hash: &Hash) -> Result<Value> {
        let row = self
            .metadata
            .get(hash)
            .ok_or(CacheError::NotFound(*hash))?;

        let path = self.payload_path(&row.filename);

        let bytes = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::new(CacheError::NotFound(*hash))
            } else {
                Error::new(e).context(format!("failed to read `{}`", path.display()))
            }
        })?;

        // Payloads written by `put`/`add_value` are always JSON. Payloads
        // ingested verbatim by `add_file` generally aren't; fall back to
        // treating them as plain text so such files still round-trip
        // through `get` even for content that was never JSON to begin with.
        if let Ok(value) = serde_json::from_slice(&bytes) {
            return Ok(value);
        }

        String::from_utf8(bytes)
            .map(Value::String)
            .map_err(|e| CacheError::CorruptObject(*hash, e.to_string()).into())
    }

    /// Write `value` under `hash`, optionally attributing it to
    /// `source_label`.
    ///
    /// If a row already exists for `hash`, only its metadata is refreshed
    /// (`time_modified`, the union of `sources`); the payload, being a
    /// pure function of `hash`'s provenance, is assumed identical and is
    /// not rewritten.
    pub fn put(&mut self, hash: Hash, value: &Value, source_label: Option<&str>) -> Result<()> {
        let now = Utc::now();

        if !self.metadata.contains(&hash) {
            let bytes = serde_json::to_vec_pretty(value).expect("Value is always JSON-serializable");
            let filename = hash.to_string();
            let path = self.payload_path(&filename);

            let mut tmp = atry!(
                tempfile::NamedTempFile::new_in(&self.root);
                ["failed to create a temporary file in `{}`", self.root.display()]
            );
            atry!(
                std::io::Write::write_all(&mut tmp, &bytes);
                ["failed to write payload for `{}`", hash]
            );
            atry!(
                tmp.persist(&path);
                ["failed to persist payload to `{}`", path.display()]
            );
        }

        let mut patch = MetadataPatch::new(hash).with_filename(
            self.metadata
                .get(&hash)
                .map(|r| r.filename.clone())
                .unwrap_or_else(|| hash.to_string()),
        );
        if let Some(label) = source_label {
            patch = patch.with_source(label);
        }
        self.metadata.merge_one(patch, now);
        self.metadata.save()
    }

    /// Ingest an external file whose `filename` is preserved verbatim.
    ///
    /// The hash is a digest of the file's contents, keeping the basename
    /// purely as the `filename` attribute; `file:<name>` source
    /// references resolve through [`Self::keys_by_filename`] and never
    /// treat the name itself as a digest.
    pub fn add_file(&mut self, path: impl AsRef<Path>) -> Result<Hash> {
        let path = path.as_ref();

        let filename = atry!(
            path.file_name().and_then(|f| f.to_str()).map(str::to_owned)
                .ok_or_else(|| anyhow!("path `{}` has no usable file name", path.display()));
            ["failed to ingest external file `{}`", path.display()]
        );

        let bytes = atry!(
            fs::read(path);
            ["failed to read external file `{}`", path.display()]
        );

        let hash = Hash::of_bytes(&bytes);
        let dest = self.payload_path(&filename);

        if !dest.exists() {
            atry!(
                fs::copy(path, &dest);
                ["failed to copy `{}` into the cache", path.display()]
            );
        }

        let now = Utc::now();
        let patch = MetadataPatch::new(hash).with_filename(filename);
        self.metadata.merge_one(patch, now);
        self.metadata.save()?;

        Ok(hash)
    }

    /// Ingest a literal value directly, used for `value:<literal>`
    /// sources ingested directly from configuration.
    pub fn add_value(&mut self, value: &Value) -> Result<Hash> {
        let bytes = serde_json::to_vec(value).expect("Value is always JSON-serializable");
        let hash = Hash::of_bytes(&bytes);
        self.put(hash, value, None)?;
        Ok(hash)
    }

    /// All hashes whose `filename` attribute equals `value`.
    pub fn keys_by_filename(&self, value: &str) -> Vec<Hash> {
        self.metadata.keys_by_filename(value)
    }

    /// The on-disk filename currently associated with `hash`.
    pub fn filename_of(&self, hash: &Hash) -> Result<String> {
        self.metadata
            .get(hash)
            .map(|r| r.filename.clone())
            .ok_or_else(|| CacheError::NotFound(*hash).into())
    }

    /// Rename the payload file for `hash` to its canonical filename,
    /// derived from its first source label.
    ///
    /// Uses an 8-hex-character hash-prefix suffix to keep collisions
    /// between similarly-labeled objects unlikely, falling back to the
    /// raw hash string if there is no source label yet, or if another
    /// hash already owns the canonical name (a true collision).
    pub fn rename(&mut self, hash: &Hash) -> Result<()> {
        let row = match self.metadata.get(hash) {
            Some(r) => r.clone(),
            None => return Err(CacheError::NotFound(*hash).into()),
        };

        let mut new_filename = canonical_filename(&row);
        if self.metadata.keys_by_filename(&new_filename).iter().any(|h| h != hash) {
            new_filename = row.hash.to_string();
        }

        if new_filename == row.filename {
            return Ok(());
        }

        let old_path = self.payload_path(&row.filename);
        let new_path = self.payload_path(&new_filename);

        atry!(
            fs::rename(&old_path, &new_path);
            ["failed to rename `{}` to `{}`", old_path.display(), new_path.display()]
        );

        let now = Utc::now();
        self.metadata
            .merge_one(MetadataPatch::new(*hash).with_filename(new_filename), now);
        self.metadata.save()
    }

    /// Reconcile the on-disk file set against the metadata sidecar.
    pub fn sync(&mut self) -> Result<()> {
        // (i) Drop rows whose filename is missing on disk.
        let missing: Vec<Hash> = self
            .metadata
            .rows()
            .filter(|r| !self.payload_path(&r.filename).exists())
            .map(|r| r.hash)
            .collect();

        for hash in missing {
            self.metadata.remove(&hash);
        }

        // (ii) Adopt any file on disk that has no row.
        let known_filenames: std::collections::HashSet<String> =
            self.metadata.rows().map(|r| r.filename.clone()).collect();

        let entries = atry!(
            fs::read_dir(&self.root);
            ["failed to list cache directory `{}`", self.root.display()]
        );

        let mut orphans = Vec::new();

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }

            let filename = entry.file_name().to_string_lossy().into_owned();
            if filename == "metadata.csv" || known_filenames.contains(&filename) {
                continue;
            }

            orphans.push(filename);
        }

        let now = Utc::now();

        for filename in orphans {
            let hash = match filename.parse::<Hash>() {
                Ok(h) => h,
                Err(_) => {
                    let bytes = fs::read(self.payload_path(&filename))?;
                    Hash::of_bytes(&bytes)
                }
            };

            self.metadata.merge_one(
                MetadataPatch::new(hash).with_filename(filename),
                now,
            );
        }

        self.metadata.save()
    }
}

fn slug(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

fn canonical_filename(row: &MetadataRow) -> String {
    match row.sources.iter().next() {
        Some(first_label) => {
            let hash_str = row.hash.to_string();
            format!("{}_{}", slug(first_label), &hash_str[..8])
        }
        None => row.hash.to_string(),
    }
}
