//! Block list: an ordered, index-addressable collection of records in one file
//!
//! Records are encoded with the crate codec and written into one or more
//! chained blocks. Freed blocks are reused first-fit before the file grows,
//! and an existing record is resized in place without moving the bytes it
//! already occupies.
//!
//! All state sits behind one mutex held for the whole call, including the
//! file I/O. Enumeration hands out a guard that makes structural mutation fail
//! with [`BlockListError::ConcurrentMutation`] until it is dropped or the
//! enumeration runs to completion.

use crate::core::cache::{BlockCache, CacheStats};
use crate::core::config::{BlockListOptions, OpenMode};
use crate::core::count::CountState;
use crate::core::directory::{BlockDescriptor, BlockId, BlockKind, Directory, DESCRIPTOR_SIZE};
use crate::core::error::{BlockListError, Result};
use crate::core::header::{Header, HEADER_SIZE, UNKNOWN_COUNT};
use crate::core::io::BlockFile;
use crate::core::record::{self, Record};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, warn};

/// Block list statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockListStats {
    pub records: usize,
    pub total_blocks: usize,
    pub directory_pages: usize,
    pub data_blocks: usize,
    pub empty_blocks: usize,
    pub file_len: u64,
    pub cache: CacheStats,
}

/// Persistent list of `T` records backed by a single file
pub struct BlockList<T: Record> {
    inner: Mutex<Inner<T>>,
    readers: AtomicUsize,
    path: PathBuf,
}

struct Inner<T> {
    /// `None` once disposed
    file: Option<BlockFile>,
    header: Header,
    directory: Directory,
    cache: BlockCache<T>,
    count: CountState,
    options: BlockListOptions,
}

fn page_len(page_capacity: u32) -> Result<u32> {
    u32::try_from(page_capacity as usize * DESCRIPTOR_SIZE).map_err(|_| {
        BlockListError::Config(format!("page_capacity {} is too large", page_capacity))
    })
}

impl<T: Record> BlockList<T> {
    /// Create a fresh block list at `path`, replacing any existing file
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with(path, OpenMode::Create, BlockListOptions::default())
    }

    pub fn open<P: AsRef<Path>>(path: P, mode: OpenMode) -> Result<Self> {
        Self::open_with(path, mode, BlockListOptions::default())
    }

    pub fn open_with<P: AsRef<Path>>(
        path: P,
        mode: OpenMode,
        options: BlockListOptions,
    ) -> Result<Self> {
        options.validate()?;
        let path = path.as_ref();
        let exists = path.exists();

        let inner = match mode {
            OpenMode::Create => Inner::create(path, options)?,
            OpenMode::OpenOrCreate if !exists => Inner::create(path, options)?,
            OpenMode::Open if !exists => {
                return Err(BlockListError::NotFound(path.display().to_string()))
            }
            OpenMode::Open | OpenMode::OpenOrCreate => Inner::load(path, options)?,
        };

        Ok(BlockList {
            inner: Mutex::new(inner),
            readers: AtomicUsize::new(0),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live records
    pub fn len(&self) -> Result<usize> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        Ok(inner.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Record at object position `index`
    pub fn get(&self, index: usize) -> Result<T> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        let head = inner.resolve(index)?;
        inner.load_value(head)
    }

    /// Head block id of the record at `index`
    pub fn block_id(&self, index: usize) -> Result<BlockId> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.resolve(index)
    }

    /// Append a record, returning its object position
    pub fn add(&self, record: T) -> Result<usize> {
        let bytes = record::encode(&record)?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        self.ensure_no_readers()?;

        let chain = inner.allocate(bytes.len())?;
        inner.write_chain(&chain, &bytes)?;

        let head = chain[0];
        inner.cache.insert(head, record);
        inner.count.increment();
        inner.write_header()?;

        let position = inner.directory.position_of(head).ok_or_else(|| {
            BlockListError::InvalidFormat(format!("block {} vanished after write", head))
        })?;
        debug!(
            "Added {} bytes at position {} (block {}, {} block chain)",
            bytes.len(),
            position,
            head,
            chain.len()
        );
        Ok(position)
    }

    /// Replace the record at `index`
    ///
    /// The existing chain is truncated to the blocks the new encoding needs,
    /// or extended by one block when it is too short.
    pub fn set(&self, index: usize, record: T) -> Result<()> {
        let bytes = record::encode(&record)?;
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        self.ensure_no_readers()?;

        let head = inner.resolve(index)?;
        let mut chain = inner.directory.chain(head)?;
        let capacity = inner.directory.capacity_of(&chain);
        let needed = bytes.len() as u64;

        if capacity >= needed {
            let keep = inner.prefix_len(&chain, needed);
            for &id in &chain[keep..] {
                inner.release_block(id)?;
            }
            chain.truncate(keep);
        } else {
            let length = inner.block_length(needed - capacity)?;
            let tail = inner.append_block(length, BlockKind::Fragment)?;
            chain.push(tail);
        }

        inner.write_chain(&chain, &bytes)?;
        inner.cache.insert(head, record);
        debug!(
            "Set position {} to {} bytes ({} block chain)",
            index,
            bytes.len(),
            chain.len()
        );
        Ok(())
    }

    /// Remove the record at `index`; later records shift down one position
    pub fn remove(&self, index: usize) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        self.ensure_no_readers()?;

        let head = inner.resolve(index)?;
        let chain = inner.directory.chain(head)?;
        for &id in &chain {
            inner.release_block(id)?;
        }

        inner.cache.evict(head);
        inner.count.decrement();
        inner.write_header()?;
        debug!("Removed position {} (block {}, {} blocks freed)", index, head, chain.len());
        Ok(())
    }

    /// Free every record block; the file does not shrink
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        self.ensure_no_readers()?;

        let live: Vec<BlockId> = inner
            .directory
            .entries()
            .iter()
            .enumerate()
            .filter(|(_, desc)| !desc.kind.is_directory() && !desc.empty)
            .map(|(id, _)| id as BlockId)
            .collect();
        for &id in &live {
            inner.release_block(id)?;
        }

        inner.count.invalidate();
        inner.cache.clear();
        inner.write_header()?;
        debug!("Cleared {} blocks", live.len());
        Ok(())
    }

    /// Start a forward-only enumeration in block order
    ///
    /// Structural mutation fails while the returned iterator is alive and not
    /// yet exhausted.
    pub fn iter(&self) -> Result<Iter<'_, T>> {
        let inner = self.inner.lock();
        inner.ensure_open()?;
        let guard = ReadGuard::new(&self.readers);
        drop(inner);

        Ok(Iter {
            list: self,
            next_id: 0,
            guard: Some(guard),
        })
    }

    /// All records in position order
    ///
    /// The snapshot is taken under the list lock and holds no read guard, so
    /// it never blocks writers on other threads.
    pub fn to_vec(&self) -> Result<Vec<T>> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let heads: Vec<BlockId> = inner.directory.heads().collect();
        heads
            .into_iter()
            .map(|head| inner.load_value(head))
            .collect()
    }

    /// Position of the first record equal to `record`
    pub fn index_of(&self, record: &T) -> Result<Option<usize>> {
        self.position(|candidate| candidate == record)
    }

    pub fn contains(&self, record: &T) -> Result<bool> {
        Ok(self.index_of(record)?.is_some())
    }

    /// Position of the first record matching `predicate`
    pub fn position<F>(&self, mut predicate: F) -> Result<Option<usize>>
    where
        F: FnMut(&T) -> bool,
    {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let heads: Vec<BlockId> = inner.directory.heads().collect();
        for (position, head) in heads.into_iter().enumerate() {
            if predicate(&inner.load_value(head)?) {
                return Ok(Some(position));
            }
        }
        Ok(None)
    }

    /// Number of enumerations currently holding a read guard
    pub fn readers(&self) -> usize {
        self.readers.load(Ordering::SeqCst)
    }

    /// Write the header and sync the file
    pub fn flush(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;
        inner.flush()
    }

    /// Flush and release the backing file
    ///
    /// Every later call fails with [`BlockListError::Disposed`]. Disposing
    /// twice is a no-op.
    pub fn dispose(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        if inner.file.is_none() {
            return Ok(());
        }
        inner.flush()?;
        inner.file = None;
        inner.cache.clear();
        info!("Disposed block list {:?}", self.path);
        Ok(())
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.lock().file.is_none()
    }

    pub fn stats(&self) -> Result<BlockListStats> {
        let mut inner = self.inner.lock();
        inner.ensure_open()?;

        let records = inner.len();
        let entries = inner.directory.entries();
        let directory_pages = inner.directory.pages().len();
        let empty_blocks = entries.iter().filter(|desc| desc.empty).count();
        let total_blocks = entries.len();

        Ok(BlockListStats {
            records,
            total_blocks,
            directory_pages,
            data_blocks: total_blocks - directory_pages - empty_blocks,
            empty_blocks,
            file_len: inner.file.as_ref().map(|file| file.len()).unwrap_or(0),
            cache: inner.cache.stats(),
        })
    }

    fn ensure_no_readers(&self) -> Result<()> {
        match self.readers.load(Ordering::SeqCst) {
            0 => Ok(()),
            readers => Err(BlockListError::ConcurrentMutation { readers }),
        }
    }
}

impl<T: Record> Drop for BlockList<T> {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if inner.file.is_some() {
            if let Err(e) = inner.flush() {
                warn!("Failed to flush block list {:?} on drop: {}", self.path, e);
            }
        }
    }
}

impl<T: Record> Inner<T> {
    fn create(path: &Path, options: BlockListOptions) -> Result<Self> {
        let page_len = page_len(options.page_capacity)?;
        let root = BlockDescriptor::directory_page(HEADER_SIZE as u64, page_len);
        let header = Header::new(T::TYPE_TAG, options.page_capacity, root);

        let mut file = BlockFile::create(path, &header, options.sync_on_write)?;
        file.extend(page_len)?;

        let mut inner = Inner {
            file: Some(file),
            header,
            directory: Directory::new(options.page_capacity as usize, root),
            cache: BlockCache::new(options.cache_capacity),
            count: CountState::Known(0),
            options,
        };
        inner.persist_descriptor(0)?;

        info!("Created {} block list at {:?}", T::TYPE_NAME, path);
        Ok(inner)
    }

    fn load(path: &Path, options: BlockListOptions) -> Result<Self> {
        let mut file = BlockFile::open(path, options.sync_on_write)?;
        let header = file.read_header()?;

        if header.type_tag != T::TYPE_TAG {
            return Err(BlockListError::RecordTypeMismatch {
                expected: T::TYPE_NAME,
                found: record::type_name(header.type_tag),
            });
        }

        let capacity = header.page_capacity as usize;
        let total = header.block_count as usize;
        let mut entries: Vec<BlockDescriptor> =
            Vec::with_capacity(total.min(file.len() as usize / DESCRIPTOR_SIZE));
        let mut pages: Vec<BlockId> = Vec::new();
        let mut page_id: BlockId = 0;
        let mut page = header.root;

        loop {
            if (page.length as usize) < capacity * DESCRIPTOR_SIZE {
                return Err(BlockListError::InvalidFormat(format!(
                    "directory page {} is {} bytes, expected {}",
                    page_id,
                    page.length,
                    capacity * DESCRIPTOR_SIZE
                )));
            }

            let in_page = capacity.min(total.saturating_sub(pages.len() * capacity));
            let bytes = file.read_at(page.start, in_page * DESCRIPTOR_SIZE)?;
            for chunk in bytes.chunks_exact(DESCRIPTOR_SIZE) {
                entries.push(BlockDescriptor::from_bytes(chunk)?);
            }
            pages.push(page_id);

            if pages.len() == 1 && entries.first() != Some(&header.root) {
                return Err(BlockListError::InvalidFormat(
                    "header and directory disagree about block 0".to_string(),
                ));
            }

            let next = match page.next_page() {
                Some(next) => next,
                None => break,
            };

            // a page's successor always occupies its last slot
            let expected = pages.len() * capacity - 1;
            if next as usize != expected {
                return Err(BlockListError::InvalidFormat(format!(
                    "directory page {} links to {}, expected {}",
                    page_id, next, expected
                )));
            }
            page = *entries.get(expected).ok_or_else(|| {
                BlockListError::InvalidFormat(format!(
                    "directory page {} links past the end of the directory",
                    page_id
                ))
            })?;
            page_id = next;
        }

        if entries.len() != total {
            return Err(BlockListError::InvalidFormat(format!(
                "directory holds {} descriptors, header records {}",
                entries.len(),
                total
            )));
        }

        for (id, desc) in entries.iter().enumerate() {
            if desc.start < HEADER_SIZE as u64 || desc.end() > file.len() {
                return Err(BlockListError::InvalidFormat(format!(
                    "block {} spans {}..{} outside the file ({} bytes)",
                    id,
                    desc.start,
                    desc.end(),
                    file.len()
                )));
            }
        }

        let directory = Directory::from_parts(capacity, entries, pages)?;
        info!(
            "Opened {} block list at {:?}: {} blocks in {} directory pages",
            T::TYPE_NAME,
            path,
            directory.len(),
            directory.pages().len()
        );

        Ok(Inner {
            file: Some(file),
            count: CountState::from_persisted(header.known_count()),
            header,
            directory,
            cache: BlockCache::new(options.cache_capacity),
            options,
        })
    }

    fn ensure_open(&self) -> Result<()> {
        if self.file.is_none() {
            return Err(BlockListError::Disposed);
        }
        Ok(())
    }

    fn file(&mut self) -> Result<&mut BlockFile> {
        self.file.as_mut().ok_or(BlockListError::Disposed)
    }

    fn len(&mut self) -> usize {
        let directory = &self.directory;
        self.count.get_or_compute(|| directory.count_records())
    }

    fn resolve(&mut self, index: usize) -> Result<BlockId> {
        match self.directory.resolve(index) {
            Some(head) => Ok(head),
            None => Err(BlockListError::IndexOutOfRange {
                index,
                len: self.len(),
            }),
        }
    }

    fn descriptor(&self, id: BlockId) -> Result<BlockDescriptor> {
        self.directory
            .get(id)
            .copied()
            .ok_or_else(|| BlockListError::InvalidFormat(format!("unknown block {}", id)))
    }

    fn flush(&mut self) -> Result<()> {
        self.write_header()?;
        self.file()?.sync()
    }

    fn write_header(&mut self) -> Result<()> {
        self.header.block_count = self.directory.len() as u32;
        self.header.record_count = self
            .count
            .known()
            .map(|n| n as u64)
            .unwrap_or(UNKNOWN_COUNT);
        let header = self.header;
        self.file()?.write_header(&header)
    }

    /// Write descriptor `id` into its directory page slot
    fn persist_descriptor(&mut self, id: BlockId) -> Result<()> {
        let offset = self.directory.descriptor_offset(id).ok_or_else(|| {
            BlockListError::InvalidFormat(format!("block {} has no directory slot", id))
        })?;
        let desc = self.descriptor(id)?;
        self.file()?.write_at(offset, &desc.to_bytes())?;

        if id == 0 {
            self.header.root = desc;
            self.write_header()?;
        }
        Ok(())
    }

    /// Add a directory page if the next descriptor would take the last slot
    fn reserve_slot(&mut self) -> Result<()> {
        if !self.directory.needs_new_page() {
            return Ok(());
        }

        let length = page_len(self.header.page_capacity)?;
        let start = self.file()?.extend(length)?;
        let previous = self.directory.last_page();
        let page = self
            .directory
            .push(BlockDescriptor::directory_page(start, length))?;
        self.directory.link_page(page);

        self.persist_descriptor(page)?;
        self.persist_descriptor(previous)?;
        self.write_header()?;

        debug!("Expanded directory with page block {} at offset {}", page, start);
        Ok(())
    }

    /// Grow the file by one block and describe it
    fn append_block(&mut self, length: u32, kind: BlockKind) -> Result<BlockId> {
        self.reserve_slot()?;
        let start = self.file()?.extend(length)?;
        let id = self
            .directory
            .push(BlockDescriptor::data(start, length, kind))?;
        self.persist_descriptor(id)?;
        self.write_header()?;
        Ok(id)
    }

    fn block_length(&self, needed: u64) -> Result<u32> {
        let length = needed.max(self.options.min_block_size as u64);
        u32::try_from(length).map_err(|_| BlockListError::RecordTooLarge(needed as usize))
    }

    /// Blocks to hold `len` bytes: one free block that fits, else a run of
    /// free blocks, topped up with a new block for any shortfall
    fn allocate(&mut self, len: usize) -> Result<Vec<BlockId>> {
        let needed = len as u64;
        let empties = self.directory.empty_blocks();

        let fits = empties
            .iter()
            .copied()
            .find(|&id| self.directory.capacity_of(&[id]) >= needed);
        if let Some(id) = fits {
            debug!("Reusing free block {} for {} bytes", id, len);
            return Ok(vec![id]);
        }

        let mut chain = Vec::new();
        let mut capacity = 0u64;
        for id in empties {
            if capacity >= needed && !chain.is_empty() {
                break;
            }
            capacity += self.directory.capacity_of(&[id]);
            chain.push(id);
        }

        if chain.is_empty() || capacity < needed {
            let length = self.block_length(needed - capacity.min(needed))?;
            chain.push(self.append_block(length, BlockKind::Fragment)?);
        }

        Ok(chain)
    }

    /// Number of leading chain blocks needed for `needed` bytes (at least one)
    fn prefix_len(&self, chain: &[BlockId], needed: u64) -> usize {
        let mut capacity = 0u64;
        for (i, &id) in chain.iter().enumerate() {
            capacity += self.directory.capacity_of(&[id]);
            if capacity >= needed {
                return i + 1;
            }
        }
        chain.len()
    }

    fn release_block(&mut self, id: BlockId) -> Result<()> {
        if let Some(desc) = self.directory.get_mut(id) {
            desc.release();
        }
        self.persist_descriptor(id)
    }

    /// Spread `bytes` over `chain` and link it as one record
    fn write_chain(&mut self, chain: &[BlockId], bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;

        for (i, &id) in chain.iter().enumerate() {
            let mut desc = self.descriptor(id)?;
            let take = (bytes.len() - offset).min(desc.length as usize);
            self.file()?
                .write_at(desc.start, &bytes[offset..offset + take])?;
            offset += take;

            desc.used = take as u32;
            desc.empty = false;
            desc.kind = if i == 0 {
                BlockKind::Head
            } else {
                BlockKind::Fragment
            };
            desc.next = chain.get(i + 1).copied();
            if let Some(slot) = self.directory.get_mut(id) {
                *slot = desc;
            }
            self.persist_descriptor(id)?;
        }

        if offset != bytes.len() {
            return Err(BlockListError::InvalidFormat(format!(
                "chain of {} blocks holds only {} of {} bytes",
                chain.len(),
                offset,
                bytes.len()
            )));
        }
        Ok(())
    }

    fn read_chain(&mut self, head: BlockId) -> Result<Vec<u8>> {
        let chain = self.directory.chain(head)?;
        let mut bytes = Vec::new();
        for id in chain {
            let desc = self.descriptor(id)?;
            let data = self.file()?.read_at(desc.start, desc.used as usize)?;
            bytes.extend_from_slice(&data);
        }
        Ok(bytes)
    }

    /// Decoded record for `head`, from the cache when possible
    fn load_value(&mut self, head: BlockId) -> Result<T> {
        if let Some(value) = self.cache.get(head) {
            return Ok(value);
        }
        let bytes = self.read_chain(head)?;
        let value: T = record::decode(&bytes)?;
        self.cache.insert(head, value.clone());
        Ok(value)
    }
}

/// Keeps a block list's reader count raised while alive
pub struct ReadGuard<'a> {
    readers: &'a AtomicUsize,
}

impl<'a> ReadGuard<'a> {
    fn new(readers: &'a AtomicUsize) -> Self {
        readers.fetch_add(1, Ordering::SeqCst);
        ReadGuard { readers }
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        self.readers.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Forward-only enumeration over a block list's records
///
/// The read guard is released on exhaustion, on the first error, or when the
/// iterator is dropped, whichever comes first.
pub struct Iter<'a, T: Record> {
    list: &'a BlockList<T>,
    next_id: BlockId,
    guard: Option<ReadGuard<'a>>,
}

impl<T: Record> Iter<'_, T> {
    /// True while this enumeration still blocks mutation
    pub fn is_active(&self) -> bool {
        self.guard.is_some()
    }
}

impl<T: Record> Iterator for Iter<'_, T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.guard.as_ref()?;

        let item = {
            let mut inner = self.list.inner.lock();
            match inner.ensure_open() {
                Err(e) => Some(Err(e)),
                Ok(()) => match inner.directory.next_head(self.next_id) {
                    Some(head) => {
                        self.next_id = head + 1;
                        Some(inner.load_value(head))
                    }
                    None => None,
                },
            }
        };

        if !matches!(item, Some(Ok(_))) {
            self.guard = None;
        }
        item
    }
}
