use std::fs;
use std::io::{self, prelude::*};
use std::process;

use bytesize::ByteSize;
use clap::ArgEnum;
use env_logger;
use log;

use domain_tally::{CountError, DomainCounter, DomainCounterBuilder, Format, KeyCount, Parser};

fn main() {
    let arg_parser = build_arg_parser();

    let log_level: LogLevel = arg_parser.value_of_t_or_exit("log_level");
    init_logger(log_level);

    let parser: ParserKind = arg_parser.value_of_t_or_exit("parser");
    let output_format: OutputFormat = arg_parser.value_of_t_or_exit("format");
    let key_field = arg_parser.value_of("key_field").expect("value has default");
    let delimiter = arg_parser.value_of("delimiter").expect("value has default");
    let sequential = arg_parser.is_present("sequential");
    let threads: Option<usize> = arg_parser
        .is_present("threads")
        .then(|| arg_parser.value_of_t_or_exit("threads"));
    let records_per_partition: Option<usize> = arg_parser
        .is_present("records_per_partition")
        .then(|| arg_parser.value_of_t_or_exit("records_per_partition"));
    let probe_size: Option<&str> = arg_parser.value_of("probe_size");

    let format = Format::new()
        .with_key_field(key_field)
        .with_delimiter(delimiter.as_bytes()[0])
        .with_parser(match parser {
            ParserKind::Csv => Parser::Csv,
            ParserKind::Split => Parser::Split,
        });

    let mut counter_builder = DomainCounterBuilder::new().with_format(format);
    if let Some(threads) = threads {
        counter_builder = counter_builder.with_threads_number(threads);
    }

    if let Some(records_per_partition) = records_per_partition {
        counter_builder = counter_builder.with_records_per_partition(records_per_partition);
    }

    if let Some(probe_size) = probe_size {
        counter_builder = counter_builder.with_probe_size(
            probe_size.parse::<ByteSize>().expect("value is pre-validated").as_u64() as usize,
        );
    }

    let counter: DomainCounter = match counter_builder.build() {
        Ok(counter) => counter,
        Err(err) => {
            log::error!("counter initialization error: {}", err);
            process::exit(1);
        }
    };

    let input = arg_parser.value_of("input").expect("value is required");
    let result = match (input, sequential) {
        ("-", _) => counter.count_reader(io::stdin().lock()),
        (path, true) => match fs::File::open(path) {
            Ok(file) => counter.count_reader(file),
            Err(err) => Err(CountError::IO(err)),
        },
        (path, false) => counter.count_path(path),
    };

    let entries = match result {
        Ok(entries) => entries,
        Err(err) if err.is_data_error() => {
            log::error!("input data error: {}", err);
            process::exit(1);
        }
        Err(err) => {
            log::error!("counting error: {}", err);
            process::exit(1);
        }
    };

    let mut output_stream = io::BufWriter::new(io::stdout().lock());
    if let Err(err) = write_entries(&mut output_stream, &entries, output_format) {
        log::error!("output writing error: {}", err);
        process::exit(1);
    }
}

fn write_entries(output: &mut impl Write, entries: &[KeyCount], format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Text => {
            for entry in entries {
                writeln!(output, "{}", entry)?;
            }
        }
        OutputFormat::Json => {
            serde_json::to_writer_pretty(&mut *output, entries)?;
            writeln!(output)?;
        }
    }

    output.flush()
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        Self::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <LogLevel as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum ParserKind {
    Csv,
    Split,
}

impl ParserKind {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        ParserKind::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for ParserKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <ParserKind as clap::ArgEnum>::from_str(s, false)
    }
}

#[derive(Copy, Clone, clap::ArgEnum)]
enum OutputFormat {
    Text,
    Json,
}

impl OutputFormat {
    pub fn possible_values() -> impl Iterator<Item = clap::PossibleValue<'static>> {
        OutputFormat::value_variants().iter().filter_map(|v| v.to_possible_value())
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        <OutputFormat as clap::ArgEnum>::from_str(s, false)
    }
}

fn build_arg_parser() -> clap::ArgMatches {
    clap::App::new("domain-tally")
        .about("counts records per email domain of a delimited file")
        .arg(
            clap::Arg::new("input")
                .short('i')
                .long("input")
                .help("file to be counted, '-' reads standard input sequentially")
                .required(true)
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("sequential")
                .short('s')
                .long("sequential")
                .help("count the file in a single pass without partitioning"),
        )
        .arg(
            clap::Arg::new("threads")
                .short('t')
                .long("threads")
                .help("number of workers counting partitions in parallel")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("records_per_partition")
                .short('r')
                .long("records-per-partition")
                .help("number of records per partition")
                .takes_value(true),
        )
        .arg(
            clap::Arg::new("probe_size")
                .short('p')
                .long("probe-size")
                .help("boundary scan read size")
                .takes_value(true)
                .validator(|v| match v.parse::<ByteSize>() {
                    Ok(size) if size.as_u64() > 0 => Ok(()),
                    Ok(_) => Err("Probe size must be positive".to_string()),
                    Err(err) => Err(format!("Probe size format incorrect: {}", err)),
                }),
        )
        .arg(
            clap::Arg::new("key_field")
                .short('k')
                .long("key-field")
                .help("header name of the field the key is extracted from")
                .takes_value(true)
                .default_value("email"),
        )
        .arg(
            clap::Arg::new("delimiter")
                .short('d')
                .long("delimiter")
                .help("field delimiter")
                .takes_value(true)
                .default_value(",")
                .validator(|v| match v.as_bytes() {
                    [b] if b.is_ascii() => Ok(()),
                    _ => Err("Delimiter must be a single ASCII character".to_string()),
                }),
        )
        .arg(
            clap::Arg::new("parser")
                .long("parser")
                .help("record parser")
                .takes_value(true)
                .default_value("csv")
                .possible_values(ParserKind::possible_values()),
        )
        .arg(
            clap::Arg::new("format")
                .short('f')
                .long("format")
                .help("output format")
                .takes_value(true)
                .default_value("text")
                .possible_values(OutputFormat::possible_values()),
        )
        .arg(
            clap::Arg::new("log_level")
                .short('l')
                .long("loglevel")
                .help("logging level")
                .takes_value(true)
                .default_value("warn")
                .possible_values(LogLevel::possible_values()),
        )
        .get_matches()
}

fn init_logger(log_level: LogLevel) {
    env_logger::Builder::new()
        .filter_level(match log_level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Trace => log::LevelFilter::Trace,
        })
        .format_timestamp_millis()
        .init();
}
