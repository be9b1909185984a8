//! Fixed-size chunk layout
//!
//! The plan is derived, never stored: a descriptor records the chunk size it
//! was uploaded with, so later configuration changes cannot invalidate it.

/// Smallest permitted chunk size (1 KiB).
pub const MIN_CHUNK_SIZE: u64 = 1024;
/// Largest permitted chunk size (20 MiB).
pub const MAX_CHUNK_SIZE: u64 = 20 * 1024 * 1024;

/// One contiguous byte range of the source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub index: u64,
    pub offset: u64,
    pub len: u64,
}

/// Partition of a file into ordered, contiguous, non-overlapping ranges.
/// Only the last chunk may be shorter than the chunk size.
#[derive(Debug, Clone, Copy)]
pub struct ChunkPlan {
    file_size: u64,
    chunk_size: u64,
}

impl ChunkPlan {
    pub fn new(file_size: u64, chunk_size: u64) -> Self {
        Self {
            file_size,
            chunk_size: chunk_size.clamp(MIN_CHUNK_SIZE, MAX_CHUNK_SIZE),
        }
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> u64 {
        self.file_size.div_ceil(self.chunk_size)
    }

    pub fn range(&self, index: u64) -> ChunkRange {
        let offset = index * self.chunk_size;
        ChunkRange {
            index,
            offset,
            len: self.chunk_size.min(self.file_size - offset),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = ChunkRange> + '_ {
        (0..self.chunk_count()).map(|i| self.range(i))
    }
}
