//! Splitting files into fixed-size chunks.
//!
//! A chunk is the unit of one read from the source endpoint followed by one write to the
//! destination endpoint. The chunks of a file are transferred in order by a single worker.

use crate::error::Error;

pub const DEFAULT_CHUNK_SIZE: u64 = 65536;

/// Chunk size validated to be a positive power of two.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ChunkSize(u64);

impl ChunkSize {
    pub fn new(size: u64) -> Result<Self, Error> {
        if !size.is_power_of_two() {
            return Err(Error::InvalidConfiguration(format!(
                "chunk size must be a positive power of two, got {size}"
            )));
        }
        Ok(Self(size))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl Default for ChunkSize {
    fn default() -> Self {
        Self(DEFAULT_CHUNK_SIZE)
    }
}

impl std::fmt::Display for ChunkSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", bytesize::ByteSize(self.0))
    }
}

/// A contiguous byte range `[offset, offset + length)` of a file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ChunkRange {
    pub offset: u64,
    pub length: u64,
}

impl ChunkRange {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Splits `size` bytes into ordered chunks of `chunk_size` bytes, the last one possibly shorter.
///
/// An empty file yields exactly one zero-length chunk so that the destination still gets created.
pub fn split(size: u64, chunk_size: ChunkSize) -> Vec<ChunkRange> {
    if size == 0 {
        return vec![ChunkRange {
            offset: 0,
            length: 0,
        }];
    }
    let chunk_size = chunk_size.get();
    let count = size.div_ceil(chunk_size);
    (0..count)
        .map(|index| {
            let offset = index * chunk_size;
            ChunkRange {
                offset,
                length: chunk_size.min(size - offset),
            }
        })
        .collect()
}
