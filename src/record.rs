//! Record format, header resolution and per-key counting.

use std::collections::HashMap;
use std::io;
use std::io::prelude::*;

use memchr::memchr_iter;

use crate::CountError;

/// Mapping from a key to the number of records carrying it.
pub type CountMap = HashMap<String, u64>;

/// Number of records between two polls of the stop condition.
const STOP_CHECK_INTERVAL: u64 = 4096;

/// Returns the part of `field` strictly after the first `separator`.
/// A field without the separator yields an empty key, which is still counted.
///
/// ```
/// use domain_tally::extract_key;
///
/// assert_eq!(extract_key("mh@github.io", '@'), "github.io");
/// assert_eq!(extract_key("no-at-sign", '@'), "");
/// ```
#[inline]
pub fn extract_key(field: &str, separator: char) -> &str {
    match field.find(separator) {
        Some(pos) => &field[pos + separator.len_utf8()..],
        None => "",
    }
}

/// Record parser used to split rows into fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parser {
    /// Rows are decoded by the `csv` crate with quoting disabled.
    Csv,
    /// Rows are split on the delimiter byte without any decoding.
    Split,
}

impl Default for Parser {
    fn default() -> Self {
        Parser::Csv
    }
}

/// Row format description.
#[derive(Debug, Clone)]
pub struct Format {
    /// Field delimiter.
    delimiter: u8,
    /// Record terminator.
    terminator: u8,
    /// Header name of the field the key is extracted from.
    key_field: String,
    /// Character after which the key starts.
    key_separator: char,
    /// Record parser.
    parser: Parser,
}

impl Format {
    /// Creates a format with default parameters: comma delimited, newline terminated,
    /// keyed by the domain part of the `email` field.
    pub fn new() -> Self {
        Format::default()
    }

    /// Sets the field delimiter.
    pub fn with_delimiter(mut self, delimiter: u8) -> Format {
        self.delimiter = delimiter;
        return self;
    }

    /// Sets the record terminator.
    pub fn with_terminator(mut self, terminator: u8) -> Format {
        self.terminator = terminator;
        return self;
    }

    /// Sets the header name of the key field.
    pub fn with_key_field(mut self, key_field: impl Into<String>) -> Format {
        self.key_field = key_field.into();
        return self;
    }

    /// Sets the character after which the key starts.
    pub fn with_key_separator(mut self, key_separator: char) -> Format {
        self.key_separator = key_separator;
        return self;
    }

    /// Sets the record parser.
    pub fn with_parser(mut self, parser: Parser) -> Format {
        self.parser = parser;
        return self;
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    pub fn key_field(&self) -> &str {
        &self.key_field
    }

    pub fn key_separator(&self) -> char {
        self.key_separator
    }

    pub fn parser(&self) -> Parser {
        self.parser
    }
}

impl Default for Format {
    fn default() -> Self {
        Format {
            delimiter: b',',
            terminator: b'\n',
            key_field: "email".into(),
            key_separator: '@',
            parser: Parser::default(),
        }
    }
}

/// Header-derived layout shared by every record of one scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schema {
    key_index: usize,
    width: usize,
}

impl Schema {
    /// Resolves the key field position from a header line (without its terminator).
    /// Leading whitespace of header names is ignored, so `id, email` resolves `email`.
    pub fn from_header(header: &[u8], format: &Format) -> Result<Self, CountError> {
        let mut key_index = None;
        let mut width = 0;
        for (idx, name) in header.split(|&b| b == format.delimiter).enumerate() {
            width += 1;
            if key_index.is_none() && trim_leading_space(name) == format.key_field.as_bytes() {
                key_index = Some(idx);
            }
        }

        match key_index {
            Some(key_index) => Ok(Schema { key_index, width }),
            None => Err(CountError::KeyFieldNotFound(format.key_field.clone())),
        }
    }

    /// Position of the key field.
    pub fn key_index(&self) -> usize {
        self.key_index
    }

    /// Number of fields every record must have.
    pub fn width(&self) -> usize {
        self.width
    }
}

fn trim_leading_space(name: &[u8]) -> &[u8] {
    let start = name.iter().position(|b| !b.is_ascii_whitespace()).unwrap_or(name.len());
    &name[start..]
}

/// Reads the header line. Returns [`None`] for an empty input.
pub(crate) fn read_header<R: BufRead>(reader: &mut R, format: &Format) -> io::Result<Option<Vec<u8>>> {
    let mut header = Vec::new();
    if reader.read_until(format.terminator, &mut header)? == 0 {
        return Ok(None);
    }
    if header.last() == Some(&format.terminator) {
        header.pop();
    }

    return Ok(Some(header));
}

/// Counts keys of a headerless record stream into `counts`.
/// Returns the number of records counted.
///
/// `stop` is polled every few thousand records, the scan ends early once it returns `true`.
///
/// # Arguments
/// * `reader` - Buffered record stream, the header must already be consumed
/// * `schema` - Layout resolved from the header
/// * `format` - Row format
/// * `counts` - Map the counts are accumulated into
/// * `stop` - Early termination condition
pub fn count_keys<R, S>(
    reader: R,
    schema: &Schema,
    format: &Format,
    counts: &mut CountMap,
    stop: S,
) -> Result<u64, CountError>
where
    R: BufRead,
    S: Fn() -> bool,
{
    match format.parser {
        Parser::Csv => count_csv(reader, schema, format, counts, stop),
        Parser::Split => count_split(reader, schema, format, counts, stop),
    }
}

fn count_csv<R, S>(reader: R, schema: &Schema, format: &Format, counts: &mut CountMap, stop: S) -> Result<u64, CountError>
where
    R: Read,
    S: Fn() -> bool,
{
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .delimiter(format.delimiter)
        .terminator(csv::Terminator::Any(format.terminator))
        .quoting(false)
        .flexible(true)
        .from_reader(reader);

    let mut record = csv::ByteRecord::new();
    let mut rows = 0;

    while csv_reader.read_byte_record(&mut record)? {
        let key = match std::str::from_utf8(record.as_slice()) {
            Ok(text) if record.len() == schema.width => record.range(schema.key_index).and_then(|r| text.get(r)),
            _ => None,
        };
        let field = match key {
            Some(field) => field,
            None => return Err(malformed_record(&record, format.delimiter, schema.width)),
        };

        increment(counts, extract_key(field, format.key_separator));

        rows += 1;
        if rows % STOP_CHECK_INTERVAL == 0 && stop() {
            break;
        }
    }

    return Ok(rows);
}

fn count_split<R, S>(mut reader: R, schema: &Schema, format: &Format, counts: &mut CountMap, stop: S) -> Result<u64, CountError>
where
    R: BufRead,
    S: Fn() -> bool,
{
    let mut line = Vec::new();
    let mut rows = 0;

    loop {
        line.clear();
        if reader.read_until(format.terminator, &mut line)? == 0 {
            break;
        }
        if line.last() == Some(&format.terminator) {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }

        let field = key_field(&line, schema, format.delimiter)?;
        increment(counts, extract_key(field, format.key_separator));

        rows += 1;
        if rows % STOP_CHECK_INTERVAL == 0 && stop() {
            break;
        }
    }

    return Ok(rows);
}

/// Rebuilds the row content of a rejected csv record.
fn malformed_record(record: &csv::ByteRecord, delimiter: u8, expected: usize) -> CountError {
    let content = record.iter().collect::<Vec<_>>().join(&delimiter);
    CountError::malformed(String::from_utf8_lossy(&content), record.len(), expected)
}

/// Finds the key field of a single line and checks the field count.
fn key_field<'a>(line: &'a [u8], schema: &Schema, delimiter: u8) -> Result<&'a str, CountError> {
    let mut bounds = None;
    let mut fields = 0;
    let mut start = 0;
    for end in memchr_iter(delimiter, line).chain(std::iter::once(line.len())) {
        if fields == schema.key_index {
            bounds = Some(start..end);
        }
        fields += 1;
        start = end + 1;
    }

    let key = match std::str::from_utf8(line) {
        Ok(text) if fields == schema.width => bounds.and_then(|r| text.get(r)),
        _ => None,
    };

    key.ok_or_else(|| CountError::malformed(String::from_utf8_lossy(line), fields, schema.width))
}

#[inline]
fn increment(counts: &mut CountMap, key: &str) {
    match counts.get_mut(key) {
        Some(count) => *count += 1,
        None => {
            counts.insert(key.to_owned(), 1);
        }
    }
}
