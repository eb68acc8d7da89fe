//! Partition boundary discovery.
//!
//! The input is streamed once in small probes. The offset of the header terminator opens the
//! first partition, then every `records_per_partition`-th terminator closes one partition and
//! opens the next. The input length closes the last partition when bytes remain after the
//! final boundary.

use std::io;
use std::io::prelude::*;

use memchr::memchr_iter;

use crate::partition::Partition;
use crate::record::{Format, Schema};
use crate::CountError;

/// Default probe buffer size in bytes.
pub const DEFAULT_PROBE_SIZE: usize = 64;

/// Default number of records per partition.
pub const DEFAULT_RECORDS_PER_PARTITION: usize = 1000;

/// Result of a boundary scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Boundaries {
    /// Layout resolved from the header, [`None`] for an empty input.
    schema: Option<Schema>,
    /// Ascending boundary offsets.
    offsets: Vec<u64>,
}

impl Boundaries {
    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn offsets(&self) -> &[u64] {
        &self.offsets
    }

    /// Returns the number of partitions.
    pub fn len(&self) -> usize {
        self.offsets.len().saturating_sub(1)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns partitions in file order.
    pub fn partitions(&self) -> impl Iterator<Item = Partition> + '_ {
        self.offsets
            .windows(2)
            .enumerate()
            .map(|(index, bounds)| Partition::new(index, bounds[0], bounds[1]))
    }
}

/// Scans the input for partition boundaries.
///
/// # Arguments
/// * `reader` - Input stream, read sequentially from its current position
/// * `records_per_partition` - Number of record terminators per partition
/// * `probe_size` - Size of a single read
/// * `format` - Row format used to resolve the header
pub fn scan_boundaries<R: Read>(
    mut reader: R,
    records_per_partition: usize,
    probe_size: usize,
    format: &Format,
) -> Result<Boundaries, CountError> {
    let records_per_partition = records_per_partition.max(1);
    let mut probe = vec![0; probe_size.max(1)];

    let mut header = Vec::new();
    let mut schema = None;
    let mut offsets = Vec::new();
    // absolute offset of the first probe byte
    let mut offset: u64 = 0;
    let mut lines = 0;

    loop {
        let n = match reader.read(&mut probe) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(CountError::IO(err)),
        };

        let data = &probe[..n];
        let mut terminators = memchr_iter(format.terminator(), data);

        if schema.is_none() {
            match terminators.next() {
                Some(pos) => {
                    header.extend_from_slice(&data[..pos]);
                    schema = Some(Schema::from_header(&header, format)?);
                    offsets.push(offset + pos as u64);
                }
                None => {
                    header.extend_from_slice(data);
                    offset += n as u64;
                    continue;
                }
            }
        }

        for pos in terminators {
            lines += 1;
            if lines == records_per_partition {
                offsets.push(offset + pos as u64);
                lines = 0;
            }
        }

        offset += n as u64;
    }

    let schema = match schema {
        Some(schema) => schema,
        None if header.is_empty() => {
            log::debug!("empty input, no partitions");
            return Ok(Boundaries::default());
        }
        // header without a terminator, no data rows
        None => {
            return Ok(Boundaries {
                schema: Some(Schema::from_header(&header, format)?),
                offsets: Vec::new(),
            })
        }
    };

    if let Some(&last) = offsets.last() {
        if offset > last + 1 {
            offsets.push(offset);
        }
    }

    let boundaries = Boundaries {
        schema: Some(schema),
        offsets,
    };
    log::debug!(
        "boundary scan done (bytes: {}, partitions: {})",
        offset,
        boundaries.len()
    );

    return Ok(boundaries);
}
