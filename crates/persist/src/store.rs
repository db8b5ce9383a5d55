//! File-backed save store.
//!
//! Layout inside the store directory:
//! ```text
//! save.meta.json             - metadata and schema versions
//! saves/
//!   000001.save.cbor.zst     - CBOR+zstd compressed save snapshots
//! events/
//!   000001.log.cbor.zst      - CBOR+zstd compressed journal segments
//! integrity/
//!   manifest.json            - hash chain manifest
//! ```

use crate::snapshot::SaveSnapshot;
use crate::SaveError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tickwork_kernel::{Heap, World, WorldEvent};

const SAVE_SCHEMA_VERSION: u32 = 1;
const EVENT_SCHEMA_VERSION: u32 = 1;

/// Metadata stored in save.meta.json.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveMeta {
    pub save_schema_version: u32,
    pub event_schema_version: u32,
    pub save_count: u32,
    pub event_segment_count: u32,
}

/// A single entry in the integrity manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub sha256: String,
    pub prev_hash: Option<String>,
}

/// Integrity manifest tracking every written file in a chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntegrityManifest {
    pub entries: Vec<ManifestEntry>,
}

/// Numbered saves plus a scheduling journal, with schema versioning and
/// integrity checking.
pub struct SaveStore {
    root: PathBuf,
    meta: SaveMeta,
    manifest: IntegrityManifest,
}

impl SaveStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SaveError> {
        let root = path.as_ref().to_path_buf();
        std::fs::create_dir_all(root.join("saves"))?;
        std::fs::create_dir_all(root.join("events"))?;
        std::fs::create_dir_all(root.join("integrity"))?;

        let meta_path = root.join("save.meta.json");
        let manifest_path = root.join("integrity").join("manifest.json");

        let (meta, manifest) = if meta_path.exists() {
            let meta: SaveMeta = serde_json::from_reader(std::fs::File::open(&meta_path)?)?;
            if meta.save_schema_version != SAVE_SCHEMA_VERSION {
                return Err(SaveError::SchemaMismatch {
                    file_version: meta.save_schema_version,
                    expected_version: SAVE_SCHEMA_VERSION,
                });
            }
            if meta.event_schema_version != EVENT_SCHEMA_VERSION {
                return Err(SaveError::SchemaMismatch {
                    file_version: meta.event_schema_version,
                    expected_version: EVENT_SCHEMA_VERSION,
                });
            }
            let manifest: IntegrityManifest = if manifest_path.exists() {
                serde_json::from_reader(std::fs::File::open(&manifest_path)?)?
            } else {
                IntegrityManifest::default()
            };
            (meta, manifest)
        } else {
            let meta = SaveMeta {
                save_schema_version: SAVE_SCHEMA_VERSION,
                event_schema_version: EVENT_SCHEMA_VERSION,
                save_count: 0,
                event_segment_count: 0,
            };
            let manifest = IntegrityManifest::default();
            serde_json::to_writer_pretty(std::fs::File::create(&meta_path)?, &meta)?;
            serde_json::to_writer_pretty(std::fs::File::create(&manifest_path)?, &manifest)?;
            (meta, manifest)
        };
        tracing::debug!(root = %root.display(), saves = meta.save_count, "opened save store");

        Ok(Self {
            root,
            meta,
            manifest,
        })
    }

    /// Capture `world` and write it as the next numbered save. Returns its
    /// index.
    pub fn save(&mut self, world: &World, heap: &Heap, keep_players: bool) -> Result<u32, SaveError> {
        let snapshot = SaveSnapshot::capture(world, heap, keep_players)?;
        self.write_snapshot(&snapshot)
    }

    /// Write an already captured snapshot as the next numbered save.
    pub fn write_snapshot(&mut self, snapshot: &SaveSnapshot) -> Result<u32, SaveError> {
        self.meta.save_count += 1;
        let index = self.meta.save_count;
        let filename = save_filename(index);
        self.write_chained(self.root.join("saves"), filename, snapshot)?;
        tracing::info!(index, tick = snapshot.tick, thinkers = snapshot.thinkers.len(), "wrote save");
        Ok(index)
    }

    /// Append journal events as a new segment. Empty slices write nothing.
    pub fn append_events(&mut self, events: &[WorldEvent]) -> Result<(), SaveError> {
        if events.is_empty() {
            return Ok(());
        }
        self.meta.event_segment_count += 1;
        let filename = segment_filename(self.meta.event_segment_count);
        self.write_chained(self.root.join("events"), filename, events)?;
        tracing::debug!(count = events.len(), "appended journal segment");
        Ok(())
    }

    /// Every journaled event, oldest first.
    pub fn load_events(&self) -> Result<Vec<WorldEvent>, SaveError> {
        let mut events = Vec::new();
        for index in 1..=self.meta.event_segment_count {
            let segment: Vec<WorldEvent> = self.read_checked(
                &self.root.join("events"),
                &segment_filename(index),
            )?;
            events.extend(segment);
        }
        Ok(events)
    }

    /// Read and verify a save without restoring it.
    pub fn load_snapshot(&self, index: u32) -> Result<SaveSnapshot, SaveError> {
        if index == 0 || index > self.meta.save_count {
            return Err(SaveError::MissingSave(index));
        }
        let snapshot: SaveSnapshot = self.read_checked(&self.root.join("saves"), &save_filename(index))?;
        if !snapshot.verify() {
            return Err(SaveError::IntegrityMismatch {
                expected: "valid snapshot hash".into(),
                actual: "snapshot hash mismatch".into(),
            });
        }
        Ok(snapshot)
    }

    /// Restore save `index` into `heap`.
    pub fn load(&self, index: u32, heap: &mut Heap) -> Result<World, SaveError> {
        let world = self.load_snapshot(index)?.restore(heap)?;
        tracing::info!(index, world = %world.id(), tick = world.tick(), "loaded save");
        Ok(world)
    }

    /// Restore the newest save into `heap`.
    pub fn load_latest(&self, heap: &mut Heap) -> Result<World, SaveError> {
        if self.meta.save_count == 0 {
            return Err(SaveError::NoSaves);
        }
        self.load(self.meta.save_count, heap)
    }

    /// Verify all integrity hashes in the manifest.
    pub fn verify_integrity(&self) -> Result<(), SaveError> {
        let mut prev_hash: Option<String> = None;
        for entry in &self.manifest.entries {
            if entry.prev_hash != prev_hash {
                return Err(SaveError::IntegrityMismatch {
                    expected: prev_hash.unwrap_or_else(|| "None".into()),
                    actual: entry.prev_hash.clone().unwrap_or_else(|| "None".into()),
                });
            }

            let data = std::fs::read(self.path_of(&entry.filename))?;
            let actual_hash = sha256_hex(&data);
            if actual_hash != entry.sha256 {
                return Err(SaveError::IntegrityMismatch {
                    expected: entry.sha256.clone(),
                    actual: actual_hash,
                });
            }

            prev_hash = Some(entry.sha256.clone());
        }
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn meta(&self) -> &SaveMeta {
        &self.meta
    }

    pub fn manifest(&self) -> &IntegrityManifest {
        &self.manifest
    }

    fn path_of(&self, filename: &str) -> PathBuf {
        if filename.contains(".save.") {
            self.root.join("saves").join(filename)
        } else {
            self.root.join("events").join(filename)
        }
    }

    fn write_chained<T: Serialize + ?Sized>(
        &mut self,
        dir: PathBuf,
        filename: String,
        value: &T,
    ) -> Result<(), SaveError> {
        let compressed = zstd_compress(&cbor_serialize(value)?)?;
        let hash = sha256_hex(&compressed);
        let prev_hash = self.manifest.entries.last().map(|e| e.sha256.clone());

        std::fs::write(dir.join(&filename), &compressed)?;

        self.manifest.entries.push(ManifestEntry {
            filename,
            sha256: hash,
            prev_hash,
        });
        self.save_meta()?;
        self.save_manifest()
    }

    fn read_checked<T: for<'de> Deserialize<'de>>(&self, dir: &Path, filename: &str) -> Result<T, SaveError> {
        let compressed = std::fs::read(dir.join(filename))?;
        self.verify_file_hash(filename, &compressed)?;
        cbor_deserialize(&zstd_decompress(&compressed)?)
    }

    fn verify_file_hash(&self, filename: &str, data: &[u8]) -> Result<(), SaveError> {
        let actual = sha256_hex(data);
        match self.manifest.entries.iter().find(|e| e.filename == filename) {
            Some(entry) if entry.sha256 != actual => Err(SaveError::IntegrityMismatch {
                expected: entry.sha256.clone(),
                actual,
            }),
            Some(_) => Ok(()),
            None => Err(SaveError::IntegrityMismatch {
                expected: format!("manifest entry for {filename}"),
                actual: "none".into(),
            }),
        }
    }

    fn save_meta(&self) -> Result<(), SaveError> {
        let path = self.root.join("save.meta.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.meta)?;
        Ok(())
    }

    fn save_manifest(&self) -> Result<(), SaveError> {
        let path = self.root.join("integrity").join("manifest.json");
        serde_json::to_writer_pretty(std::fs::File::create(path)?, &self.manifest)?;
        Ok(())
    }
}

fn save_filename(index: u32) -> String {
    format!("{index:06}.save.cbor.zst")
}

fn segment_filename(index: u32) -> String {
    format!("{index:06}.log.cbor.zst")
}

fn cbor_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, SaveError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf).map_err(|e| SaveError::CborEncode(e.to_string()))?;
    Ok(buf)
}

fn cbor_deserialize<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, SaveError> {
    ciborium::from_reader(data).map_err(|e| SaveError::CborDecode(e.to_string()))
}

fn zstd_compress(data: &[u8]) -> Result<Vec<u8>, SaveError> {
    let mut encoder = zstd::Encoder::new(Vec::new(), 3)?;
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

fn zstd_decompress(data: &[u8]) -> Result<Vec<u8>, SaveError> {
    let mut decoder = zstd::Decoder::new(data)?;
    let mut buf = Vec::new();
    decoder.read_to_end(&mut buf)?;
    Ok(buf)
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
