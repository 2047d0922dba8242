//! Deduplicating, versioned file stack
//!
//! A stack lives in one directory:
//!
//! ```text
//! <root>/
//!   bulk.blst     bulk catalog (one BulkInfo per unique blob)
//!   levels.blst   level catalog (one LevelInfo per snapshot)
//!   stack.blst    metadata store (a single StackMetadata)
//!   stack.toml    optional configuration
//!   bulk/         blob files, named by bulk id
//! ```
//!
//! Creating a level hashes each source file and reuses an existing blob when
//! one with the same length and digest is already catalogued. Deleting a
//! level never touches blobs; [`Stack::prune_bulk`] reclaims the ones no
//! level references any more.

pub mod config;
pub mod error;
pub mod hash;
pub mod pattern;
pub mod records;

pub use config::StackConfig;
pub use error::{Result, StackError};
pub use hash::ContentHash;
pub use pattern::FilePattern;
pub use records::{
    BulkCatalog, BulkInfo, LevelCatalog, LevelInfo, MetadataStore, StackMetadata,
    StackedFileInfo,
};

use crate::core::block_list::BlockList;
use crate::core::config::OpenMode;
use ahash::{AHashMap, AHashSet};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

pub const BULK_CATALOG_FILE: &str = "bulk.blst";
pub const LEVEL_CATALOG_FILE: &str = "levels.blst";
pub const METADATA_FILE: &str = "stack.blst";
pub const BULK_DIR: &str = "bulk";

/// A file found by [`Stack::find_file`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMatch {
    pub level_id: String,
    pub bulk_id: String,
    pub original_path: PathBuf,
    pub file_name: String,
    pub time_saved: DateTime<Utc>,
}

/// Outcome of a prune pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneStats {
    /// Bulk records examined
    pub scanned: usize,
    /// Unreferenced bulk records removed
    pub removed: usize,
    /// Blob files with no bulk record that were deleted
    pub orphan_files: usize,
    pub bytes_reclaimed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackStats {
    pub levels: usize,
    pub stacked_files: usize,
    pub bulk_records: usize,
    pub bulk_bytes: u64,
}

/// Deduplicating file stack over three block list catalogs
pub struct Stack {
    root: PathBuf,
    bulk_dir: PathBuf,
    config: StackConfig,
    bulk: BulkCatalog,
    levels: LevelCatalog,
    metadata: MetadataStore,
    /// Serializes multi-catalog operations
    ops: Mutex<()>,
    disposed: AtomicBool,
}

impl Stack {
    /// Create a new, empty stack at `root`, replacing any existing catalogs
    pub fn create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config = StackConfig::load(&root)?;
        Self::open_with(root, OpenMode::Create, config)
    }

    /// Open an existing stack
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config = StackConfig::load(&root)?;
        Self::open_with(root, OpenMode::Open, config)
    }

    pub fn open_or_create<P: AsRef<Path>>(root: P) -> Result<Self> {
        let config = StackConfig::load(&root)?;
        Self::open_with(root, OpenMode::OpenOrCreate, config)
    }

    pub fn open_with<P: AsRef<Path>>(root: P, mode: OpenMode, config: StackConfig) -> Result<Self> {
        config.validate()?;
        let root = root.as_ref().to_path_buf();

        if mode != OpenMode::Open {
            fs::create_dir_all(&root).map_err(|e| StackError::io(&root, e))?;
        }

        let options = config.block_list;
        let bulk: BulkCatalog = BlockList::open_with(root.join(BULK_CATALOG_FILE), mode, options)?;
        let levels: LevelCatalog =
            BlockList::open_with(root.join(LEVEL_CATALOG_FILE), mode, options)?;
        let metadata: MetadataStore =
            BlockList::open_with(root.join(METADATA_FILE), mode, options)?;

        let bulk_dir = root.join(BULK_DIR);
        fs::create_dir_all(&bulk_dir).map_err(|e| StackError::io(&bulk_dir, e))?;

        if metadata.is_empty()? {
            metadata.add(StackMetadata::new())?;
        }

        let (level_count, bulk_count) = (levels.len()?, bulk.len()?);
        info!(
            "Opened stack at {:?}: {} levels, {} bulk records",
            root, level_count, bulk_count
        );

        Ok(Stack {
            root,
            bulk_dir,
            config,
            bulk,
            levels,
            metadata,
            ops: Mutex::new(()),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn bulk_dir(&self) -> &Path {
        &self.bulk_dir
    }

    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Stack the given files as a new level
    ///
    /// Content already in the bulk catalog is referenced, not copied. If any
    /// file fails, no level is written; blobs copied for earlier files stay
    /// behind until the next [`Stack::prune_bulk`].
    pub fn create_level<P: AsRef<Path>>(
        &self,
        files: &[P],
        metadata: Option<Vec<u8>>,
    ) -> Result<LevelInfo> {
        self.ensure_open()?;
        let _ops = self.ops.lock();

        let level_id = self.unique_id("level", |id| {
            Ok(self.levels.position(|level| level.level_id == id)?.is_some())
        })?;
        let mut level = LevelInfo::new(level_id, metadata);

        let mut known = self.bulk.to_vec()?;
        let mut new_blobs = 0usize;

        for file in files {
            let path = file.as_ref();
            let source = File::open(path).map_err(|e| StackError::source_file(path, e))?;
            let (content_hash, length) = ContentHash::of_reader(BufReader::new(source))
                .map_err(|e| StackError::io(path, e))?;

            let existing = known
                .iter()
                .find(|bulk| bulk.matches(&content_hash, length))
                .map(|bulk| bulk.bulk_id.clone());

            let bulk_id = match existing {
                Some(bulk_id) => {
                    debug!("Reusing bulk {} for {:?}", bulk_id, path);
                    bulk_id
                }
                None => {
                    let bulk_id = self.unique_id("bulk", |id| {
                        Ok(known.iter().any(|bulk| bulk.bulk_id == id)
                            || self.bulk_path(id).exists())
                    })?;
                    let blob = self.bulk_path(&bulk_id);
                    fs::copy(path, &blob).map_err(|e| StackError::io(&blob, e))?;

                    let info = BulkInfo {
                        bulk_id: bulk_id.clone(),
                        content_hash,
                        length,
                    };
                    self.bulk.add(info.clone())?;
                    known.push(info);
                    new_blobs += 1;
                    debug!("Stored {:?} as bulk {} ({} bytes)", path, bulk_id, length);
                    bulk_id
                }
            };

            let original_path = fs::canonicalize(path).map_err(|e| StackError::io(path, e))?;
            let file_name = original_path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();

            level.files.push(StackedFileInfo {
                bulk_id,
                original_path,
                file_name,
                level_id: level.level_id.clone(),
            });
        }

        self.levels.add(level.clone())?;

        if let Some(parent) = level.files.first().and_then(|f| f.original_path.parent()) {
            let updated = self.current_metadata()?.with_last_stacked_path(parent);
            self.store_metadata(updated)?;
        }

        info!(
            "Created level {} with {} files ({} new blobs)",
            level.level_id,
            level.files.len(),
            new_blobs
        );
        Ok(level)
    }

    pub fn get_all_levels(&self) -> Result<Vec<LevelInfo>> {
        self.ensure_open()?;
        Ok(self.levels.to_vec()?)
    }

    pub fn get_level(&self, level_id: &str) -> Result<LevelInfo> {
        self.ensure_open()?;
        let _ops = self.ops.lock();
        let position = self.level_position(level_id)?;
        Ok(self.levels.get(position)?)
    }

    /// Remove a level; its blobs stay until the next prune
    pub fn delete_level(&self, level_id: &str) -> Result<LevelInfo> {
        self.ensure_open()?;
        let _ops = self.ops.lock();

        let position = self.level_position(level_id)?;
        let level = self.levels.get(position)?;
        self.levels.remove(position)?;

        info!("Deleted level {} ({} files)", level_id, level.files.len());
        Ok(level)
    }

    /// Delete every blob no level references
    ///
    /// Mark and sweep: every bulk record starts unreferenced, each stacked
    /// file marks its bulk id, and the unmarked records are removed together
    /// with their blob files. Blob files without any bulk record, left behind
    /// by a failed [`Stack::create_level`], are deleted too.
    pub fn prune_bulk(&self) -> Result<PruneStats> {
        self.ensure_open()?;
        let _ops = self.ops.lock();

        let bulks = self.bulk.to_vec()?;
        let mut referenced: AHashSet<String> = AHashSet::with_capacity(bulks.len());
        for level in self.levels.to_vec()? {
            for file in level.files {
                referenced.insert(file.bulk_id);
            }
        }

        let mut stats = PruneStats {
            scanned: bulks.len(),
            ..PruneStats::default()
        };

        // highest position first so lower positions stay valid
        for (position, bulk) in bulks.iter().enumerate().rev() {
            if referenced.contains(&bulk.bulk_id) {
                continue;
            }
            self.bulk.remove(position)?;
            if self.remove_blob(&bulk.bulk_id)? {
                stats.bytes_reclaimed += bulk.length;
            } else {
                warn!("Blob for bulk {} was already missing", bulk.bulk_id);
            }
            stats.removed += 1;
            debug!("Pruned bulk {} ({} bytes)", bulk.bulk_id, bulk.length);
        }

        // a referenced blob is kept even when its bulk record is gone
        let entries = fs::read_dir(&self.bulk_dir).map_err(|e| StackError::io(&self.bulk_dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StackError::io(&self.bulk_dir, e))?;
            let path = entry.path();
            let is_file = entry
                .file_type()
                .map_err(|e| StackError::io(&path, e))?
                .is_file();
            if !is_file {
                debug!("Skipping non-file entry {:?} in blob directory", path);
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if referenced.contains(&name) {
                continue;
            }
            let len = entry.metadata().map(|m| m.len()).unwrap_or(0);
            fs::remove_file(&path).map_err(|e| StackError::io(&path, e))?;
            stats.orphan_files += 1;
            stats.bytes_reclaimed += len;
            debug!("Removed orphan blob {:?}", path);
        }

        info!(
            "Pruned {} of {} bulk records and {} orphan blobs, {} bytes reclaimed",
            stats.removed, stats.scanned, stats.orphan_files, stats.bytes_reclaimed
        );
        Ok(stats)
    }

    /// Search stacked files by wildcard pattern
    ///
    /// Matches the file name when `file_names_only` is set, otherwise the
    /// full original path. `level_id` restricts the search to one level.
    pub fn find_file(
        &self,
        pattern: &str,
        file_names_only: bool,
        level_id: Option<&str>,
    ) -> Result<Vec<FileMatch>> {
        self.ensure_open()?;
        let pattern = FilePattern::new(pattern)?;

        let levels = match level_id {
            Some(id) => vec![self.get_level(id)?],
            None => self.levels.to_vec()?,
        };

        let mut matches = Vec::new();
        for level in &levels {
            for file in &level.files {
                let hit = if file_names_only {
                    pattern.matches(&file.file_name)
                } else {
                    pattern.matches_path(&file.original_path)
                };
                if hit {
                    matches.push(FileMatch {
                        level_id: level.level_id.clone(),
                        bulk_id: file.bulk_id.clone(),
                        original_path: file.original_path.clone(),
                        file_name: file.file_name.clone(),
                        time_saved: level.time_saved,
                    });
                }
            }
        }

        debug!("Pattern {} matched {} files", pattern.as_str(), matches.len());
        Ok(matches)
    }

    /// Stream a blob into `sink`, returning the number of bytes written
    pub fn retrieve_file<W: Write>(&self, bulk_id: &str, sink: &mut W) -> Result<u64> {
        self.ensure_open()?;
        if !is_valid_id(bulk_id) {
            return Err(StackError::BulkNotFound(bulk_id.to_string()));
        }

        let blob = self.bulk_path(bulk_id);
        let file = match File::open(&blob) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(StackError::BulkNotFound(bulk_id.to_string()))
            }
            Err(e) => return Err(StackError::io(&blob, e)),
        };

        io::copy(&mut BufReader::new(file), sink).map_err(|e| StackError::io(&blob, e))
    }

    /// Write every file of a level into `target_dir` under its file name
    ///
    /// Fails with [`StackError::RestoreConflict`] before writing anything when
    /// two different source files share a file name.
    pub fn restore_level<P: AsRef<Path>>(&self, level_id: &str, target_dir: P) -> Result<Vec<PathBuf>> {
        let level = self.get_level(level_id)?;
        let target_dir = target_dir.as_ref();

        let mut claimed: AHashMap<&str, &Path> = AHashMap::with_capacity(level.files.len());
        for file in &level.files {
            match claimed.get(file.file_name.as_str()) {
                Some(first) if *first != file.original_path.as_path() => {
                    return Err(StackError::RestoreConflict {
                        file_name: file.file_name.clone(),
                        first: first.to_path_buf(),
                        second: file.original_path.clone(),
                    });
                }
                Some(_) => {}
                None => {
                    claimed.insert(file.file_name.as_str(), file.original_path.as_path());
                }
            }
        }

        fs::create_dir_all(target_dir).map_err(|e| StackError::io(target_dir, e))?;

        let mut restored = Vec::with_capacity(level.files.len());
        for file in &level.files {
            let target = target_dir.join(&file.file_name);
            let out = File::create(&target).map_err(|e| StackError::io(&target, e))?;
            let mut writer = BufWriter::new(out);
            self.retrieve_file(&file.bulk_id, &mut writer)?;
            writer.flush().map_err(|e| StackError::io(&target, e))?;
            restored.push(target);
        }

        info!(
            "Restored level {} ({} files) into {:?}",
            level_id,
            restored.len(),
            target_dir
        );
        Ok(restored)
    }

    pub fn get_bulk(&self, bulk_id: &str) -> Result<BulkInfo> {
        self.ensure_open()?;
        let _ops = self.ops.lock();
        let position = self
            .bulk
            .position(|bulk| bulk.bulk_id == bulk_id)?
            .ok_or_else(|| StackError::BulkNotFound(bulk_id.to_string()))?;
        Ok(self.bulk.get(position)?)
    }

    pub fn metadata(&self) -> Result<StackMetadata> {
        self.ensure_open()?;
        self.current_metadata()
    }

    pub fn set_metadata(&self, metadata: StackMetadata) -> Result<()> {
        self.ensure_open()?;
        let _ops = self.ops.lock();
        self.store_metadata(metadata)
    }

    pub fn last_stacked_path(&self) -> Result<Option<PathBuf>> {
        Ok(self.metadata()?.last_stacked_path)
    }

    pub fn stats(&self) -> Result<StackStats> {
        self.ensure_open()?;
        let _ops = self.ops.lock();
        let levels = self.levels.to_vec()?;
        let bulks = self.bulk.to_vec()?;

        Ok(StackStats {
            levels: levels.len(),
            stacked_files: levels.iter().map(|level| level.files.len()).sum(),
            bulk_records: bulks.len(),
            bulk_bytes: bulks.iter().map(|bulk| bulk.length).sum(),
        })
    }

    /// Dispose all three catalogs; later calls fail with [`StackError::Disposed`]
    ///
    /// Every catalog is disposed even when an earlier one fails, and the
    /// first failure is returned. A failed dispose can be retried.
    pub fn dispose(&self) -> Result<()> {
        let _ops = self.ops.lock();
        if self.is_disposed() {
            return Ok(());
        }

        let results = [
            self.bulk.dispose(),
            self.levels.dispose(),
            self.metadata.dispose(),
        ];
        if let Some(err) = results.into_iter().find_map(|result| result.err()) {
            warn!("Disposing stack at {:?} failed: {}", self.root, err);
            return Err(err.into());
        }
        self.disposed.store(true, Ordering::SeqCst);
        info!("Disposed stack at {:?}", self.root);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_disposed() {
            return Err(StackError::Disposed);
        }
        Ok(())
    }

    fn bulk_path(&self, bulk_id: &str) -> PathBuf {
        self.bulk_dir.join(bulk_id)
    }

    fn level_position(&self, level_id: &str) -> Result<usize> {
        self.levels
            .position(|level| level.level_id == level_id)?
            .ok_or_else(|| StackError::LevelNotFound(level_id.to_string()))
    }

    /// Delete a blob file; false if it did not exist
    fn remove_blob(&self, bulk_id: &str) -> Result<bool> {
        let blob = self.bulk_path(bulk_id);
        match fs::remove_file(&blob) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StackError::io(&blob, e)),
        }
    }

    fn current_metadata(&self) -> Result<StackMetadata> {
        if self.metadata.is_empty()? {
            return Ok(StackMetadata::new());
        }
        Ok(self.metadata.get(0)?)
    }

    fn store_metadata(&self, metadata: StackMetadata) -> Result<()> {
        if self.metadata.is_empty()? {
            self.metadata.add(metadata)?;
        } else {
            self.metadata.set(0, metadata)?;
        }
        Ok(())
    }

    /// Random alphanumeric id not yet `taken`
    fn unique_id<F>(&self, kind: &'static str, mut taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        let mut rng = rand::thread_rng();
        for _ in 0..self.config.max_id_attempts {
            let id: String = (&mut rng)
                .sample_iter(&Alphanumeric)
                .take(self.config.id_length)
                .map(char::from)
                .collect();
            if !taken(&id)? {
                return Ok(id);
            }
            debug!("Generated {} id {} is taken, re-rolling", kind, id);
        }

        Err(StackError::IdCollision {
            kind,
            attempts: self.config.max_id_attempts,
        })
    }
}

/// A bulk id names a file directly inside the blob directory
fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric())
}
