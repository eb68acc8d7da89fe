//! Byte-range partitions of an input file.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

/// Half-open byte range between two boundary offsets.
/// The terminator at `start` is not part of the partition, neither is the one at `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Partition {
    index: usize,
    start: u64,
    end: u64,
}

impl Partition {
    pub fn new(index: usize, start: u64, end: u64) -> Self {
        debug_assert!(start < end, "partition {} has an empty range", index);
        Partition { index, start, end }
    }

    /// Position of the partition in file order.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Offset of the boundary terminator opening the partition.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Offset of the boundary closing the partition.
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Offset of the first partition byte.
    pub fn data_offset(&self) -> u64 {
        self.start + 1
    }

    /// Number of bytes in the partition.
    pub fn len(&self) -> u64 {
        self.end - self.start - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Record stream of a single partition backed by its own file handle.
/// Dropping the reader closes the handle.
pub struct PartitionReader {
    partition: Partition,
    reader: io::Take<io::BufReader<fs::File>>,
}

impl PartitionReader {
    /// Opens an independent handle to `path` positioned at the partition data.
    ///
    /// # Arguments
    /// * `path` - Input file
    /// * `partition` - Byte range to be read
    /// * `buf_size` - Read buffer size, default buffer size is used if [`None`]
    pub fn open(path: &Path, partition: Partition, buf_size: Option<usize>) -> io::Result<Self> {
        let mut file = fs::File::open(path)?;
        file.seek(io::SeekFrom::Start(partition.data_offset()))?;

        let reader = match buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
            None => io::BufReader::new(file),
        };

        return Ok(PartitionReader {
            partition,
            reader: reader.take(partition.len()),
        });
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    /// Returns the number of bytes left to read.
    pub fn remaining(&self) -> u64 {
        self.reader.limit()
    }

    /// Releases the file handle.
    pub fn close(self) {
        log::trace!("partition {} closed", self.partition.index);
    }
}

impl Read for PartitionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl BufRead for PartitionReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        self.reader.fill_buf()
    }

    fn consume(&mut self, amt: usize) {
        self.reader.consume(amt)
    }
}
