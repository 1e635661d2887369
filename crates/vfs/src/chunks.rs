//! Chunked write buffers
//!
//! Files opened for writing accumulate into fixed-size chunks so that random
//! writes never reallocate the whole file. The logical length is tracked
//! separately; the final chunk is trimmed when the buffer is flattened.

use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use bytes::{Bytes, BytesMut};

use crate::error::{BridgeError, Result};
use crate::handle::FileHandle;

/// Default chunk size (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Largest logical length a buffer accepts (4 GiB); commits flatten the
/// whole file into one allocation
pub const MAX_FILE_SIZE: u64 = 1 << 32;

/// Fixed-size chunks, allocated on first write; missing chunks read as zeros
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkedBuffer {
    /// Written chunks by index
    chunks: BTreeMap<usize, Box<[u8]>>,
    chunk_size: usize,
    len: u64,
}

impl Default for ChunkedBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkedBuffer {
    pub fn new() -> Self {
        Self::with_chunk_size(CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: BTreeMap::new(),
            chunk_size: chunk_size.max(1),
            len: 0,
        }
    }

    /// Buffer preloaded with existing contents
    pub fn from_bytes(data: &[u8], chunk_size: usize) -> Self {
        let mut buffer = Self::with_chunk_size(chunk_size);
        buffer.chunks = data
            .chunks(buffer.chunk_size)
            .map(|part| {
                let mut chunk = vec![0; buffer.chunk_size];
                chunk[..part.len()].copy_from_slice(part);
                chunk.into_boxed_slice()
            })
            .enumerate()
            .collect();
        buffer.len = data.len() as u64;
        buffer
    }

    /// Logical length in bytes
    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Chunk slots up to the logical end, allocated or not
    pub fn chunk_count(&self) -> u64 {
        self.len.div_ceil(self.chunk_size as u64)
    }

    /// Chunks actually holding memory
    pub fn allocated_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Copy out `offset..offset + len`, clamped to the logical length
    pub fn read_at(&self, offset: u64, len: u64) -> Bytes {
        let Some(range) = crate::record::clamp_read(self.len, offset, len) else {
            return Bytes::new();
        };
        let size = self.chunk_size as u64;
        let mut out = BytesMut::with_capacity((range.end - range.start) as usize);
        let mut pos = range.start;
        while pos < range.end {
            let index = (pos / size) as usize;
            let within = (pos % size) as usize;
            let take = ((size - within as u64).min(range.end - pos)) as usize;
            match self.chunks.get(&index) {
                Some(chunk) => out.extend_from_slice(&chunk[within..within + take]),
                None => out.resize(out.len() + take, 0),
            }
            pos += take as u64;
        }
        out.freeze()
    }

    /// Write `data` at `offset`. Only the chunks the write touches are
    /// allocated; gaps read as zeros.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        if data.is_empty() {
            return Ok(0);
        }
        let out_of_range = || BridgeError::OutOfRange {
            offset,
            len: data.len(),
        };
        let end = offset
            .checked_add(data.len() as u64)
            .filter(|end| *end <= MAX_FILE_SIZE)
            .ok_or_else(out_of_range)?;
        let chunk_size = self.chunk_size;
        let size = chunk_size as u64;

        let mut pos = offset;
        let mut written = 0;
        while written < data.len() {
            let index = (pos / size) as usize;
            let within = (pos % size) as usize;
            let take = (chunk_size - within).min(data.len() - written);
            let chunk = self
                .chunks
                .entry(index)
                .or_insert_with(|| vec![0; chunk_size].into_boxed_slice());
            chunk[within..within + take].copy_from_slice(&data[written..written + take]);
            written += take;
            pos += take as u64;
        }
        self.len = self.len.max(end);
        Ok(written)
    }

    /// Concatenate chunks, trimming the final one to the logical length
    pub fn to_bytes(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(self.len as usize);
        let mut remaining = self.len as usize;
        let mut index = 0;
        while remaining > 0 {
            let take = self.chunk_size.min(remaining);
            match self.chunks.get(&index) {
                Some(chunk) => out.extend_from_slice(&chunk[..take]),
                None => out.resize(out.len() + take, 0),
            }
            remaining -= take;
            index += 1;
        }
        out.freeze()
    }
}

/// Write state shared by every clone of a record opened for writing
pub struct WriteBuffer {
    pub data: ChunkedBuffer,
    pub dirty: bool,
    /// Where `commit` flushes to
    pub sink: Option<Rc<dyn FileHandle>>,
    /// Bumped by every write
    generation: u64,
}

impl WriteBuffer {
    pub fn new(data: ChunkedBuffer, sink: Option<Rc<dyn FileHandle>>) -> Self {
        Self {
            data,
            dirty: true,
            sink,
            generation: 0,
        }
    }

    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<usize> {
        let written = self.data.write_at(offset, data)?;
        self.dirty = true;
        self.generation += 1;
        Ok(written)
    }

    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Clear `dirty` after a flush of the contents seen at `generation`.
    /// Returns false, leaving the buffer dirty, when writes landed since.
    pub fn mark_committed(&mut self, generation: u64) -> bool {
        if self.generation != generation {
            return false;
        }
        self.dirty = false;
        true
    }
}

impl fmt::Debug for WriteBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteBuffer")
            .field("len", &self.data.len())
            .field("chunks", &self.data.chunk_count())
            .field("dirty", &self.dirty)
            .field("generation", &self.generation)
            .field("sink", &self.sink.as_ref().map(|s| s.name().to_string()))
            .finish()
    }
}
