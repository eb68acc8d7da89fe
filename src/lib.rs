//! `domain-tally` counts how many records of a large delimited file carry each key and returns
//! the keys ordered by count.
//!
//! The key is derived from one column of every record: the part of the field after a separator
//! character, e.g. the domain of an email address. The column is located by its header name.
//!
//! # Overview
//!
//! `domain-tally` supports the following features:
//!
//! * **Sequential counting:**
//!   any readable stream is counted in a single pass.
//! * **Concurrent partitioned counting:**
//!   a file is split into line-aligned byte ranges without being loaded into memory, every range is
//!   counted by a bounded pool of workers and the partial results are merged. The first failure
//!   cancels all outstanding work and is the only error reported.
//! * **Deterministic output:**
//!   entries are ordered by ascending count, ties by ascending key, whatever the number of
//!   workers or partitions.
//! * **Two record parsers:**
//!   rows are decoded either by the `csv` crate or by a plain delimiter splitter.
//!
//! # Example
//!
//! ```no_run
//! use domain_tally::{DomainCounter, DomainCounterBuilder, Format, Parser};
//!
//! fn main() {
//!     let counter: DomainCounter = DomainCounterBuilder::new()
//!         .with_threads_number(8)
//!         .with_records_per_partition(1000)
//!         .with_format(Format::new().with_key_field("email").with_parser(Parser::Split))
//!         .build()
//!         .unwrap();
//!
//!     for entry in counter.count_path("customers.csv").unwrap() {
//!         println!("{}", entry);
//!     }
//! }
//! ```

pub mod aggregate;
pub mod boundary;
pub mod counter;
pub mod error;
pub mod partition;
mod pool;
pub mod record;

pub use aggregate::{into_sorted, merge_counts, KeyCount};
pub use boundary::{scan_boundaries, Boundaries};
pub use counter::{DomainCounter, DomainCounterBuilder};
pub use error::CountError;
pub use partition::{Partition, PartitionReader};
pub use record::{count_keys, extract_key, CountMap, Format, Parser, Schema};
