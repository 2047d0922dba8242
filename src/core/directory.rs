//! In-memory block directory
//!
//! Every block in a block list file is described by one [`BlockDescriptor`].
//! Descriptors live in an append-only arena; a descriptor's index in that
//! arena is its [`BlockId`] and never changes for the lifetime of the file.
//! Freed blocks are flagged empty and reused, never removed.
//!
//! The directory persists itself inside the file as a chain of fixed-capacity
//! pages. Page `k` holds descriptors `[k * cap, (k + 1) * cap)`, and block 0 is
//! always the first page.

use crate::core::error::{BlockListError, Result};

/// Permanent index of a descriptor in the directory
pub type BlockId = u32;

/// Size of one descriptor on disk
pub const DESCRIPTOR_SIZE: usize = 22;

/// Wire value for "no next block"
const NO_BLOCK: i32 = -1;

const FLAG_EMPTY: u8 = 0b0000_0001;

/// What a block is used for
///
/// The kind disambiguates the `next` link: a directory page links to the
/// next directory page, a record block links to the next fragment of the
/// same record.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockKind {
    /// A page of persisted descriptors
    DirectoryPage = 0,
    /// First block of a record; heads are what object positions count
    Head = 1,
    /// Continuation of the record whose chain reaches this block
    Fragment = 2,
}

impl BlockKind {
    pub fn from_u8(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::DirectoryPage),
            1 => Ok(Self::Head),
            2 => Ok(Self::Fragment),
            other => Err(BlockListError::InvalidFormat(format!(
                "unknown block kind {}",
                other
            ))),
        }
    }

    pub fn is_directory(self) -> bool {
        self == BlockKind::DirectoryPage
    }
}

/// Descriptor of one contiguous byte range in the backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Absolute file offset of the first byte
    pub start: u64,
    /// Capacity of the block in bytes
    pub length: u32,
    /// Payload bytes currently held (`<= length`)
    pub used: u32,
    pub kind: BlockKind,
    pub empty: bool,
    pub next: Option<BlockId>,
}

impl BlockDescriptor {
    pub fn directory_page(start: u64, length: u32) -> Self {
        BlockDescriptor {
            start,
            length,
            used: length,
            kind: BlockKind::DirectoryPage,
            empty: false,
            next: None,
        }
    }

    pub fn data(start: u64, length: u32, kind: BlockKind) -> Self {
        BlockDescriptor {
            start,
            length,
            used: 0,
            kind,
            empty: false,
            next: None,
        }
    }

    pub fn end(&self) -> u64 {
        self.start.saturating_add(self.length as u64)
    }

    /// Next directory page, if this is a directory page
    pub fn next_page(&self) -> Option<BlockId> {
        if self.kind.is_directory() {
            self.next
        } else {
            None
        }
    }

    /// Next fragment of the same record, if this is a record block
    pub fn next_fragment(&self) -> Option<BlockId> {
        if self.kind.is_directory() {
            None
        } else {
            self.next
        }
    }

    /// True for a live record head, the only blocks that count as records
    pub fn is_live_head(&self) -> bool {
        self.kind == BlockKind::Head && !self.empty
    }

    /// Flag the block free and unlink it
    pub fn release(&mut self) {
        self.empty = true;
        self.used = 0;
        self.next = None;
    }

    pub fn to_bytes(&self) -> [u8; DESCRIPTOR_SIZE] {
        let mut bytes = [0u8; DESCRIPTOR_SIZE];
        bytes[0..8].copy_from_slice(&self.start.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.length.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.used.to_le_bytes());
        bytes[16] = self.kind as u8;
        bytes[17] = if self.empty { FLAG_EMPTY } else { 0 };
        let next = self.next.map(|id| id as i32).unwrap_or(NO_BLOCK);
        bytes[18..22].copy_from_slice(&next.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < DESCRIPTOR_SIZE {
            return Err(BlockListError::InvalidFormat(
                "truncated block descriptor".to_string(),
            ));
        }

        let start = u64::from_le_bytes(fixed(&bytes[0..8]));
        let length = u32::from_le_bytes(fixed(&bytes[8..12]));
        let used = u32::from_le_bytes(fixed(&bytes[12..16]));
        let kind = BlockKind::from_u8(bytes[16])?;
        let empty = bytes[17] & FLAG_EMPTY != 0;

        let next = match i32::from_le_bytes(fixed(&bytes[18..22])) {
            NO_BLOCK => None,
            n if n >= 0 => Some(n as BlockId),
            n => {
                return Err(BlockListError::InvalidFormat(format!(
                    "invalid next block link {}",
                    n
                )))
            }
        };

        if used > length {
            return Err(BlockListError::InvalidFormat(format!(
                "block holds {} bytes but is only {} long",
                used, length
            )));
        }

        Ok(BlockDescriptor {
            start,
            length,
            used,
            kind,
            empty,
            next,
        })
    }
}

fn fixed<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Largest block id a link can address
pub const MAX_BLOCK_ID: BlockId = i32::MAX as BlockId;

/// Arena of descriptors plus the ids of the pages that persist them
#[derive(Debug, Clone)]
pub struct Directory {
    entries: Vec<BlockDescriptor>,
    /// Directory page block ids in chain order; `pages[k]` stores page `k`
    pages: Vec<BlockId>,
    page_capacity: usize,
}

impl Directory {
    /// A directory with only its root page (block 0)
    pub fn new(page_capacity: usize, root: BlockDescriptor) -> Self {
        Directory {
            entries: vec![root],
            pages: vec![0],
            page_capacity,
        }
    }

    /// Rebuild from descriptors read back from disk
    ///
    /// `pages` must list the directory page ids in chain order, starting at 0.
    pub fn from_parts(
        page_capacity: usize,
        entries: Vec<BlockDescriptor>,
        pages: Vec<BlockId>,
    ) -> Result<Self> {
        if pages.first() != Some(&0) {
            return Err(BlockListError::InvalidFormat(
                "directory does not start at block 0".to_string(),
            ));
        }
        if entries.len() > pages.len() * page_capacity {
            return Err(BlockListError::InvalidFormat(format!(
                "{} descriptors do not fit in {} directory pages",
                entries.len(),
                pages.len()
            )));
        }
        for &page in &pages {
            match entries.get(page as usize) {
                Some(desc) if desc.kind.is_directory() => {}
                _ => {
                    return Err(BlockListError::InvalidFormat(format!(
                        "block {} is linked as a directory page but is not one",
                        page
                    )))
                }
            }
        }

        Ok(Directory {
            entries,
            pages,
            page_capacity,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn page_capacity(&self) -> usize {
        self.page_capacity
    }

    pub fn pages(&self) -> &[BlockId] {
        &self.pages
    }

    pub fn get(&self, id: BlockId) -> Option<&BlockDescriptor> {
        self.entries.get(id as usize)
    }

    pub fn get_mut(&mut self, id: BlockId) -> Option<&mut BlockDescriptor> {
        self.entries.get_mut(id as usize)
    }

    pub fn entries(&self) -> &[BlockDescriptor] {
        &self.entries
    }

    /// Descriptors persisted by page `index`
    pub fn page_entries(&self, index: usize) -> &[BlockDescriptor] {
        let from = (index * self.page_capacity).min(self.entries.len());
        let to = ((index + 1) * self.page_capacity).min(self.entries.len());
        &self.entries[from..to]
    }

    /// File offset where descriptor `id` is persisted
    pub fn descriptor_offset(&self, id: BlockId) -> Option<u64> {
        let page = *self.pages.get(id as usize / self.page_capacity)?;
        let slot = id as usize % self.page_capacity;
        let page_desc = self.get(page)?;
        Some(page_desc.start + (slot * DESCRIPTOR_SIZE) as u64)
    }

    /// True when only the last slot of the last page is left
    ///
    /// That slot is reserved for the descriptor of the next directory page,
    /// so a page's successor is always described by an already-loaded page.
    pub fn needs_new_page(&self) -> bool {
        self.entries.len() + 1 == self.pages.len() * self.page_capacity
    }

    pub fn last_page(&self) -> BlockId {
        // pages is never empty: block 0 is always a directory page
        self.pages[self.pages.len() - 1]
    }

    pub fn push(&mut self, desc: BlockDescriptor) -> Result<BlockId> {
        let id = self.entries.len();
        if id > MAX_BLOCK_ID as usize {
            return Err(BlockListError::InvalidFormat(
                "directory is full".to_string(),
            ));
        }
        self.entries.push(desc);
        Ok(id as BlockId)
    }

    /// Register `id` as the new last directory page and link it
    pub fn link_page(&mut self, id: BlockId) {
        let last = self.last_page();
        if let Some(desc) = self.entries.get_mut(last as usize) {
            desc.next = Some(id);
        }
        self.pages.push(id);
    }

    /// Resolve an object position to the id of its head block
    pub fn resolve(&self, position: usize) -> Option<BlockId> {
        self.heads().nth(position)
    }

    /// Object position of a head block
    pub fn position_of(&self, id: BlockId) -> Option<usize> {
        self.heads().position(|head| head == id)
    }

    /// Live record heads in id order
    pub fn heads(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, desc)| desc.is_live_head())
            .map(|(id, _)| id as BlockId)
    }

    /// First live head with id `>= from`
    pub fn next_head(&self, from: BlockId) -> Option<BlockId> {
        self.entries
            .iter()
            .enumerate()
            .skip(from as usize)
            .find(|(_, desc)| desc.is_live_head())
            .map(|(id, _)| id as BlockId)
    }

    pub fn count_records(&self) -> usize {
        self.heads().count()
    }

    /// Free record blocks in id order (first-fit candidates)
    pub fn empty_blocks(&self) -> Vec<BlockId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, desc)| desc.empty && !desc.kind.is_directory())
            .map(|(id, _)| id as BlockId)
            .collect()
    }

    /// Blocks of the record whose head is `head`, in order
    pub fn chain(&self, head: BlockId) -> Result<Vec<BlockId>> {
        let mut chain = Vec::new();
        let mut current = Some(head);

        while let Some(id) = current {
            if chain.len() > self.entries.len() {
                return Err(BlockListError::InvalidFormat(format!(
                    "cycle in block chain starting at {}",
                    head
                )));
            }
            let desc = self.get(id).ok_or_else(|| {
                BlockListError::InvalidFormat(format!("chain links to missing block {}", id))
            })?;
            if desc.kind.is_directory() {
                return Err(BlockListError::InvalidFormat(format!(
                    "record chain {} runs into directory page {}",
                    head, id
                )));
            }
            chain.push(id);
            current = desc.next_fragment();
        }

        Ok(chain)
    }

    /// Total capacity of the given blocks
    pub fn capacity_of(&self, ids: &[BlockId]) -> u64 {
        ids.iter()
            .filter_map(|&id| self.get(id))
            .map(|desc| desc.length as u64)
            .sum()
    }
}
