//! Key counter.

use std::fs;
use std::io;
use std::io::prelude::*;
use std::path::Path;

use crate::aggregate::{into_sorted, merge_counts, KeyCount};
use crate::boundary::{scan_boundaries, DEFAULT_PROBE_SIZE, DEFAULT_RECORDS_PER_PARTITION};
use crate::pool::count_partitions;
use crate::record::{count_keys, read_header, CountMap, Format, Schema};
use crate::CountError;

/// Default number of workers.
pub const DEFAULT_THREADS_NUMBER: usize = 8;

/// Domain counter builder. Provides methods for [`DomainCounter`] initialization.
#[derive(Clone, Default)]
pub struct DomainCounterBuilder {
    /// Number of workers counting partitions in parallel.
    threads_number: Option<usize>,
    /// Number of records per partition.
    records_per_partition: Option<usize>,
    /// Boundary scan probe size.
    probe_size: Option<usize>,
    /// Input file read buffer size.
    rw_buf_size: Option<usize>,
    /// Row format.
    format: Format,
}

impl DomainCounterBuilder {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        DomainCounterBuilder::default()
    }

    /// Builds a [`DomainCounter`] instance using provided configuration.
    pub fn build(self) -> Result<DomainCounter, CountError> {
        DomainCounter::new(
            self.threads_number,
            self.records_per_partition,
            self.probe_size,
            self.rw_buf_size,
            self.format,
        )
    }

    /// Sets number of workers counting partitions in parallel.
    pub fn with_threads_number(mut self, threads_number: usize) -> DomainCounterBuilder {
        self.threads_number = Some(threads_number);
        return self;
    }

    /// Sets number of records per partition.
    pub fn with_records_per_partition(mut self, records_per_partition: usize) -> DomainCounterBuilder {
        self.records_per_partition = Some(records_per_partition);
        return self;
    }

    /// Sets boundary scan probe size.
    pub fn with_probe_size(mut self, probe_size: usize) -> DomainCounterBuilder {
        self.probe_size = Some(probe_size);
        return self;
    }

    /// Sets input file read buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> DomainCounterBuilder {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets row format.
    pub fn with_format(mut self, format: Format) -> DomainCounterBuilder {
        self.format = format;
        return self;
    }
}

/// Counts records per key and returns them ordered by count, then by key.
pub struct DomainCounter {
    /// Worker thread pool.
    thread_pool: rayon::ThreadPool,
    /// Number of records per partition.
    records_per_partition: usize,
    /// Boundary scan probe size.
    probe_size: usize,
    /// Input file read buffer size.
    rw_buf_size: Option<usize>,
    /// Row format.
    format: Format,
}

impl DomainCounter {
    /// Creates a new counter instance.
    ///
    /// # Arguments
    /// * `threads_number` - Number of workers. If the parameter is [`None`] 8 workers are used.
    /// * `records_per_partition` - Number of records per partition, 1000 if [`None`].
    /// * `probe_size` - Boundary scan probe size, 64 bytes if [`None`].
    /// * `rw_buf_size` - Input file read buffer size.
    /// * `format` - Row format.
    pub fn new(
        threads_number: Option<usize>,
        records_per_partition: Option<usize>,
        probe_size: Option<usize>,
        rw_buf_size: Option<usize>,
        format: Format,
    ) -> Result<Self, CountError> {
        return Ok(DomainCounter {
            thread_pool: Self::init_thread_pool(threads_number)?,
            records_per_partition: records_per_partition.unwrap_or(DEFAULT_RECORDS_PER_PARTITION).max(1),
            probe_size: probe_size.unwrap_or(DEFAULT_PROBE_SIZE).max(1),
            rw_buf_size,
            format,
        });
    }

    fn init_thread_pool(threads_number: Option<usize>) -> Result<rayon::ThreadPool, CountError> {
        let threads_number = threads_number.unwrap_or(DEFAULT_THREADS_NUMBER).max(1);
        log::info!("initializing thread-pool (threads: {})", threads_number);

        let thread_pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads_number)
            .thread_name(|idx| format!("domain-tally-{}", idx))
            .build()
            .map_err(|err| CountError::ThreadPoolBuildError(err))?;

        return Ok(thread_pool);
    }

    /// Returns the number of workers.
    pub fn threads_number(&self) -> usize {
        self.thread_pool.current_num_threads()
    }

    pub fn format(&self) -> &Format {
        &self.format
    }

    /// Counts keys of a stream in a single sequential pass.
    /// The first line is the header. An empty input yields an empty result.
    ///
    /// # Arguments
    /// * `input` - Input stream
    pub fn count_reader<R: Read>(&self, input: R) -> Result<Vec<KeyCount>, CountError> {
        let mut input = self.buffered(input);

        let header = match read_header(&mut input, &self.format)? {
            Some(header) => header,
            None => return Ok(Vec::new()),
        };
        let schema = Schema::from_header(&header, &self.format)?;

        let mut counts = CountMap::new();
        let records = count_keys(input, &schema, &self.format, &mut counts, || false)?;
        log::debug!("sequential count done (records: {}, keys: {})", records, counts.len());

        return Ok(self.sort(counts));
    }

    /// Counts keys of a file by splitting it into partitions counted concurrently.
    /// The result is identical to [`DomainCounter::count_reader`] over the same file.
    ///
    /// # Arguments
    /// * `path` - Input file
    pub fn count_path<P: AsRef<Path>>(&self, path: P) -> Result<Vec<KeyCount>, CountError> {
        let path = path.as_ref();

        let input = self.buffered(fs::File::open(path)?);
        let boundaries = scan_boundaries(input, self.records_per_partition, self.probe_size, &self.format)?;

        let schema = match boundaries.schema() {
            Some(schema) if !boundaries.is_empty() => *schema,
            _ => {
                log::debug!("{} has no data records", path.display());
                return Ok(Vec::new());
            }
        };

        log::info!(
            "counting {} (partitions: {}, workers: {})",
            path.display(),
            boundaries.len(),
            self.threads_number()
        );
        let partials = count_partitions(
            &self.thread_pool,
            path,
            &boundaries,
            &schema,
            &self.format,
            self.rw_buf_size,
        )?;

        log::debug!("merging {} partial results", partials.len());
        let counts = merge_counts(partials);

        return Ok(self.sort(counts));
    }

    fn buffered<R: Read>(&self, input: R) -> io::BufReader<R> {
        match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        }
    }

    fn sort(&self, counts: CountMap) -> Vec<KeyCount> {
        log::debug!("sorting {} keys", counts.len());
        self.thread_pool.install(|| into_sorted(counts))
    }
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;
    use std::io::prelude::*;

    use rand::rngs::StdRng;
    use rand::seq::SliceRandom;
    use rand::{Rng, SeedableRng};
    use rstest::*;

    use super::{DomainCounter, DomainCounterBuilder};
    use crate::aggregate::{compare, KeyCount};
    use crate::record::{Format, Parser};
    use crate::CountError;

    const RECORDS: &str = "first_name,last_name,email,gender,ip_address
M,H,mh@github.io,Female,38.194.51.128
B,O,bo@cyberchimps.com,Female,197.54.209.129
D,H,dh@cyberchimps.com,Male,155.75.186.217
J,H,jh@github.io,Male,251.166.224.119
C,G,cg@statcounter.com,Male,57.171.52.110
E,R,er@rediff.com,Male,243.219.170.46
G,H,gh@acquirethisname.com,Male,30.97.220.14
D,H,dh@chicagocyberchimpstribune.com,Male,27.122.100.11
N,A,na@acquirethisname.com,Female,168.67.162.1
L,L,ll@blogtalkradio.com,Female,190.106.124.105";

    const DOMAINS: &[&str] = &[
        "github.io",
        "cyberchimps.com",
        "statcounter.com",
        "rediff.com",
        "acquirethisname.com",
        "chicagocyberchimpstribune.com",
        "blogtalkradio.com",
        "example.org",
        "mail.example.co.uk",
    ];

    fn expected() -> Vec<KeyCount> {
        vec![
            KeyCount::new("blogtalkradio.com", 1),
            KeyCount::new("chicagocyberchimpstribune.com", 1),
            KeyCount::new("rediff.com", 1),
            KeyCount::new("statcounter.com", 1),
            KeyCount::new("acquirethisname.com", 2),
            KeyCount::new("cyberchimps.com", 2),
            KeyCount::new("github.io", 2),
        ]
    }

    fn write_input(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new_in("./").unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    fn counter(threads: usize, records_per_partition: usize, parser: Parser) -> DomainCounter {
        DomainCounterBuilder::new()
            .with_threads_number(threads)
            .with_records_per_partition(records_per_partition)
            .with_probe_size(20)
            .with_format(Format::new().with_parser(parser))
            .build()
            .unwrap()
    }

    /// Generates a customer file with the email column at a random position.
    fn customers(rows: usize, seed: u64) -> String {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut columns = vec!["first_name", "last_name", "email", "gender", "ip_address"];
        columns.shuffle(&mut rng);

        let mut content = columns.join(",");
        content.push('\n');
        for row in 0..rows {
            let fields: Vec<String> = columns
                .iter()
                .map(|&column| match column {
                    "email" if rng.gen_bool(0.02) => format!("user{}", row),
                    "email" => format!("user{}@{}", row, DOMAINS.choose(&mut rng).unwrap()),
                    "gender" => ["Male", "Female"].choose(&mut rng).unwrap().to_string(),
                    "ip_address" => format!("10.0.{}.{}", rng.gen_range(0..256), rng.gen_range(0..256)),
                    _ => format!("N{}", rng.gen_range(0..1000)),
                })
                .collect();
            content.push_str(&fields.join(","));
            content.push('\n');
        }
        content
    }

    #[rstest]
    fn test_example_sequential(#[values(Parser::Csv, Parser::Split)] parser: Parser) {
        let result = counter(2, 3, parser).count_reader(RECORDS.as_bytes()).unwrap();
        assert_eq!(result, expected());
    }

    #[rstest]
    fn test_example_concurrent(
        #[values(Parser::Csv, Parser::Split)] parser: Parser,
        #[values(1, 3, 8)] threads: usize,
        #[values(1, 3, 1000)] records_per_partition: usize,
    ) {
        let input = write_input(RECORDS);
        let result = counter(threads, records_per_partition, parser)
            .count_path(input.path())
            .unwrap();
        assert_eq!(result, expected());
    }

    #[rstest]
    fn test_sequential_matches_concurrent(
        #[values(1, 2, 8)] threads: usize,
        #[values(1, 7, 250, 1000)] records_per_partition: usize,
    ) {
        let content = customers(3000, 7);
        let input = write_input(&content);

        let counter = counter(threads, records_per_partition, Parser::Csv);
        let sequential = counter.count_reader(content.as_bytes()).unwrap();
        let concurrent = counter.count_path(input.path()).unwrap();

        assert_eq!(sequential, concurrent);
        assert!(concurrent.windows(2).all(|w| compare(&w[0], &w[1]).is_lt()));
        assert_eq!(concurrent.iter().map(|entry| entry.count).sum::<u64>(), 3000);

        let names: HashSet<&str> = concurrent.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names.len(), concurrent.len());
    }

    #[test]
    fn test_parsers_agree() {
        let content = customers(1500, 11);
        let input = write_input(&content);

        let csv = counter(4, 100, Parser::Csv).count_path(input.path()).unwrap();
        let split = counter(4, 100, Parser::Split).count_path(input.path()).unwrap();
        assert_eq!(csv, split);
    }

    #[test]
    fn test_idempotent() {
        let content = customers(2000, 3);
        let input = write_input(&content);
        let counter = counter(4, 64, Parser::Csv);

        let first = render(&counter.count_path(input.path()).unwrap());
        let second = render(&counter.count_path(input.path()).unwrap());
        assert_eq!(first, second);
    }

    fn render(entries: &[KeyCount]) -> String {
        entries.iter().map(KeyCount::to_string).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_missing_trailing_terminator() {
        let content = customers(101, 5);
        let input = write_input(content.trim_end());
        let counter = counter(3, 10, Parser::Csv);

        let concurrent = counter.count_path(input.path()).unwrap();
        assert_eq!(concurrent, counter.count_reader(content.as_bytes()).unwrap());
        assert_eq!(concurrent.iter().map(|entry| entry.count).sum::<u64>(), 101);
    }

    #[rstest]
    #[case("first_name,last_name,mail\na,b,c@d\n")]
    #[case("first_name,last_name,mail")]
    fn test_key_field_not_found(#[case] content: &str) {
        let input = write_input(content);
        let counter = counter(2, 10, Parser::Csv);

        let concurrent = counter.count_path(input.path());
        assert!(matches!(concurrent, Err(CountError::KeyFieldNotFound(ref field)) if field == "email"));

        let sequential = counter.count_reader(content.as_bytes());
        assert!(matches!(sequential, Err(CountError::KeyFieldNotFound(ref field)) if field == "email"));
    }

    #[rstest]
    #[case("first_name,last_name,email,gender,ip_address\n")]
    #[case("first_name,last_name,email,gender,ip_address")]
    #[case("")]
    fn test_no_data_rows(#[case] content: &str) {
        let input = write_input(content);
        let counter = counter(2, 10, Parser::Csv);

        assert_eq!(counter.count_path(input.path()).unwrap(), vec![]);
        assert_eq!(counter.count_reader(content.as_bytes()).unwrap(), vec![]);
    }

    #[rstest]
    fn test_malformed_record(#[values(Parser::Csv, Parser::Split)] parser: Parser) {
        let mut lines: Vec<&str> = Vec::new();
        let generated = customers(1000, 13);
        lines.extend(generated.lines());
        lines.insert(612, "too,few");
        let content = lines.join("\n");
        let input = write_input(&content);
        let counter = counter(4, 50, parser);

        let concurrent = counter.count_path(input.path()).unwrap_err();
        assert!(concurrent.is_data_error());
        assert!(matches!(concurrent, CountError::MalformedRecord { ref record, .. } if record == "too,few"));

        let sequential = counter.count_reader(content.as_bytes()).unwrap_err();
        assert!(matches!(sequential, CountError::MalformedRecord { fields: 2, expected: 5, .. }));
    }

    #[test]
    fn test_missing_file() {
        let result = counter(2, 10, Parser::Csv).count_path("./no-such-customers.csv");
        assert!(matches!(result, Err(err) if err.is_io_error()));
    }

    #[test]
    fn test_default_configuration() {
        let counter = DomainCounterBuilder::new().build().unwrap();
        assert_eq!(counter.threads_number(), 8);
        assert_eq!(counter.format().key_field(), "email");
        assert_eq!(counter.format().key_separator(), '@');
    }
}
