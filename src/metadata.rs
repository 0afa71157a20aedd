// Copyright 2024 the labforge Project
// Licensed under the MIT License

//! `MetadataTable`: the cache's sidecar.
//!
//! Persisted as a human-inspectable CSV table, one row per object, with a
//! fixed column set. Writes are merge-on-write, never a wholesale
//! replace, so that re-runs and overlapping experiments only ever add
//! information to a row.

use crate::digest::Hash;
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tectonic_errors::{anyhow::Context, prelude::*};
use tectonic_status_base::{tt_warning, StatusBackend};

/// The fixed column set of the metadata sidecar. Never drifts across runs.
const COLUMNS: [&str; 5] = ["hash", "filename", "sources", "time_created", "time_modified"];

/// One row of the metadata sidecar.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetadataRow {
    pub hash: Hash,
    pub filename: String,
    pub sources: BTreeSet<String>,
    pub time_created: DateTime<Utc>,
    pub time_modified: DateTime<Utc>,
}

impl MetadataRow {
    /// A freshly-created row for `hash`, with defaults filled in.
    pub fn new(hash: Hash, now: DateTime<Utc>) -> Self {
        MetadataRow {
            filename: hash.to_string(),
            sources: BTreeSet::new(),
            time_created: now,
            time_modified: now,
            hash,
        }
    }
}

/// A partially-specified update to a row, as produced by a batch write.
///
/// Any field left `None` falls back to the default-filling rule in
/// [`MetadataRow::new`] if the row is new, or is left untouched by the
/// merge if the row already exists.
#[derive(Clone, Debug, Default)]
pub struct MetadataPatch {
    pub hash: Option<Hash>,
    pub filename: Option<String>,
    pub sources: Option<BTreeSet<String>>,
    pub time_created: Option<DateTime<Utc>>,
    pub time_modified: Option<DateTime<Utc>>,
}

impl MetadataPatch {
    pub fn new(hash: Hash) -> Self {
        MetadataPatch {
            hash: Some(hash),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.sources.get_or_insert_with(BTreeSet::new).insert(source.into());
        self
    }
}

/// The sidecar table itself: an in-memory mirror of `metadata.csv`,
/// written back with an atomic temp-file-then-rename.
#[derive(Debug)]
pub struct MetadataTable {
    path: PathBuf,
    rows: HashMap<Hash, MetadataRow>,
}

impl MetadataTable {
    /// Load (or initialize empty) the sidecar at `path`.
    pub fn load(path: impl Into<PathBuf>, status: &mut dyn StatusBackend) -> Result<Self> {
        let path = path.into();

        let text = match fs::read_to_string(&path) {
            Ok(t) => t,
            Err(ref e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(MetadataTable {
                    path,
                    rows: HashMap::new(),
                })
            }
            Err(e) => return Err(e).context(format!("failed to read `{}`", path.display())),
        };

        let mut reader = csv::ReaderBuilder::new().from_reader(text.as_bytes());

        let headers = atry!(
            reader.headers();
            ["failed to read header row of `{}`", path.display()]
        )
        .clone();

        let unknown: Vec<&str> = headers.iter().filter(|h| !COLUMNS.contains(h)).collect();
        if !unknown.is_empty() {
            tt_warning!(
                status,
                "dropping unrecognized metadata column(s) {:?} in `{}`",
                unknown,
                path.display()
            );
        }

        let missing: Vec<&str> = COLUMNS.iter().filter(|c| !headers.iter().any(|h| h == **c)).copied().collect();
        if !missing.is_empty() {
            tt_warning!(
                status,
                "metadata columns {:?} missing from `{}`; filling defaults",
                missing,
                path.display()
            );
        }

        let mut rows = HashMap::new();
        let now = Utc::now();

        for result in reader.records() {
            let record = atry!(
                result;
                ["failed to parse a row of `{}`", path.display()]
            );

            let get = |col: &str| -> Option<&str> {
                headers.iter().position(|h| h == col).and_then(|i| record.get(i))
            };

            let hash: Hash = match get("hash").and_then(|s| s.parse().ok()) {
                Some(h) => h,
                None => {
                    tt_warning!(status, "skipping metadata row with missing/invalid hash in `{}`", path.display());
                    continue;
                }
            };

            let filename = get("filename").map(str::to_owned).unwrap_or_else(|| hash.to_string());
            let sources = get("sources")
                .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
                .map(BTreeSet::from_iter)
                .unwrap_or_default();
            let time_created = get("time_created").and_then(|s| s.parse().ok()).unwrap_or(now);
            let time_modified = get("time_modified").and_then(|s| s.parse().ok()).unwrap_or(now);

            rows.insert(
                hash,
                MetadataRow {
                    hash,
                    filename,
                    sources,
                    time_created,
                    time_modified,
                },
            );
        }

        Ok(MetadataTable { path, rows })
    }

    /// Persist the table to disk, atomically.
    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            atry!(
                fs::create_dir_all(dir);
                ["failed to create directory tree `{}`", dir.display()]
            );
        }

        let mut tmp = atry!(
            tempfile::NamedTempFile::new_in(self.path.parent().unwrap_or_else(|| Path::new(".")));
            ["failed to create a temporary file for `{}`", self.path.display()]
        );

        {
            let mut writer = csv::WriterBuilder::new().from_writer(&mut tmp);

            atry!(
                writer.write_record(COLUMNS);
                ["failed to write metadata header into `{}`", self.path.display()]
            );

            let mut rows: Vec<&MetadataRow> = self.rows.values().collect();
            rows.sort_by_key(|r| r.hash.to_string());

            for row in rows {
                let sources: Vec<&str> = row.sources.iter().map(String::as_str).collect();
                let sources_json = serde_json::to_string(&sources).unwrap();

                atry!(
                    writer.write_record([
                        row.hash.to_string(),
                        row.filename.clone(),
                        sources_json,
                        row.time_created.to_rfc3339(),
                        row.time_modified.to_rfc3339(),
                    ]);
                    ["failed to write a metadata row into `{}`", self.path.display()]
                );
            }

            atry!(
                writer.flush();
                ["failed to flush metadata writer for `{}`", self.path.display()]
            );
        }

        atry!(
            tmp.persist(&self.path);
            ["failed to persist metadata table to `{}`", self.path.display()]
        );
        Ok(())
    }

    /// Apply one patch, merging it into any existing row for the same
    /// hash.
    pub fn merge_one(&mut self, patch: MetadataPatch, now: DateTime<Utc>) {
        let Some(hash) = patch.hash else { return };

        match self.rows.get_mut(&hash) {
            Some(existing) => {
                if let Some(filename) = patch.filename {
                    existing.filename = filename;
                }
                if let Some(sources) = patch.sources {
                    existing.sources.extend(sources);
                }
                existing.time_created = match patch.time_created {
                    Some(t) => existing.time_created.min(t),
                    None => existing.time_created,
                };
                existing.time_modified = match patch.time_modified {
                    Some(t) => existing.time_modified.max(t),
                    None => existing.time_modified.max(now),
                };
            }
            None => {
                let mut row = MetadataRow::new(hash, now);
                if let Some(filename) = patch.filename {
                    row.filename = filename;
                }
                if let Some(sources) = patch.sources {
                    row.sources = sources;
                }
                if let Some(t) = patch.time_created {
                    row.time_created = t;
                }
                if let Some(t) = patch.time_modified {
                    row.time_modified = t;
                }
                self.rows.insert(hash, row);
            }
        }
    }

    /// Merge a whole batch of patches at once.
    pub fn merge(&mut self, patches: impl IntoIterator<Item = MetadataPatch>, now: DateTime<Utc>) {
        for patch in patches {
            self.merge_one(patch, now);
        }
    }

    pub fn get(&self, hash: &Hash) -> Option<&MetadataRow> {
        self.rows.get(hash)
    }

    pub fn contains(&self, hash: &Hash) -> bool {
        self.rows.contains_key(hash)
    }

    pub fn remove(&mut self, hash: &Hash) {
        self.rows.remove(hash);
    }

    pub fn rows(&self) -> impl Iterator<Item = &MetadataRow> {
        self.rows.values()
    }

    /// All hashes whose `filename` (or other simple scalar attribute)
    /// equals `value`.
    pub fn keys_by_filename(&self, filename: &str) -> Vec<Hash> {
        self.rows
            .values()
            .filter(|r| r.filename == filename)
            .map(|r| r.hash)
            .collect()
    }
}
