//! Streaming parser for gzipped zone files
//!
//! Two read modes share the same line semantics:
//!
//! - [`ZoneParser::records`] yields one record at a time
//! - [`ZoneParser::chunks`] groups records into bounded chunks for the
//!   chunk processor and periodically hands buffer memory back
//!
//! Neither mode holds more than one line (plus one chunk) in memory.

use chrono::NaiveDate;
use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, trace};
use zonefeed_common::types::{RecordType, ZoneRecord};

use super::ParseError;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];
const LINE_BUFFER_CAPACITY: usize = 512;
const READ_BUFFER_CAPACITY: usize = 64 * 1024;

/// A single record line, before it is tagged with TLD and date
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub domain_name: String,
    pub ttl: u32,
    pub record_type: RecordType,
    pub record_data: String,
}

/// Split off the next whitespace-delimited token
fn next_token(input: &str) -> Option<(&str, &str)> {
    let input = input.trim_start();
    if input.is_empty() {
        return None;
    }
    let end = input.find(char::is_whitespace).unwrap_or(input.len());
    Some((&input[..end], &input[end..]))
}

/// Parse one zone file line
///
/// Expected layout is `<name> <ttl> IN <type> <rdata>`. Returns `None` for
/// blank lines, comments, `$` directives, malformed lines, bad TTLs and
/// record types that are not ingested.
pub fn parse_line(line: &str) -> Option<ParsedLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(';') || line.starts_with('$') {
        return None;
    }

    let Some((name, rest)) = next_token(line) else {
        return None;
    };
    let Some((ttl, rest)) = next_token(rest) else {
        trace!(line, "Skipping line without TTL");
        return None;
    };
    let Some((class, rest)) = next_token(rest) else {
        trace!(line, "Skipping line without class");
        return None;
    };
    if !class.eq_ignore_ascii_case("IN") {
        trace!(line, "Skipping line without IN class");
        return None;
    }
    let Some((rtype, rdata)) = next_token(rest) else {
        trace!(line, "Skipping line without record type");
        return None;
    };

    // Digits only; `u32::from_str` would also take a leading `+`
    let ttl = match ttl.parse::<u32>() {
        Ok(value) if ttl.bytes().all(|b| b.is_ascii_digit()) => value,
        _ => {
            trace!(line, ttl, "Skipping line with invalid TTL");
            return None;
        },
    };

    let record_type: RecordType = match rtype.parse() {
        Ok(record_type) => record_type,
        Err(_) => {
            trace!(record_type = rtype, "Skipping unsupported record type");
            return None;
        },
    };

    let rdata = rdata.trim();
    if rdata.is_empty() {
        trace!(line, "Skipping line without record data");
        return None;
    }

    Some(ParsedLine {
        domain_name: name.trim_end_matches('.').to_string(),
        ttl,
        record_type,
        record_data: rdata.trim_end_matches('.').to_string(),
    })
}

/// Chunking parameters for [`ZoneParser::chunks`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Records per chunk
    pub chunk_size: usize,
    /// Pause after each full chunk
    pub chunk_delay: Duration,
    /// Release buffer capacity every N chunks (0 disables)
    pub gc_interval: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 50_000,
            chunk_delay: Duration::from_millis(100),
            gc_interval: 5,
        }
    }
}

/// Parser bound to one TLD and download date
#[derive(Debug, Clone)]
pub struct ZoneParser {
    tld: String,
    download_date: NaiveDate,
}

impl ZoneParser {
    pub fn new(tld: impl Into<String>, download_date: NaiveDate) -> Self {
        Self {
            tld: tld.into(),
            download_date,
        }
    }

    pub fn tld(&self) -> &str {
        &self.tld
    }

    /// Tag a parsed line with this parser's TLD and date
    pub fn to_record(&self, parsed: ParsedLine) -> ZoneRecord {
        ZoneRecord {
            domain_name: parsed.domain_name,
            tld: self.tld.clone(),
            record_type: parsed.record_type,
            record_data: parsed.record_data,
            ttl: parsed.ttl,
            download_date: self.download_date,
        }
    }

    /// Lazily iterate over the records of a gzipped zone file
    ///
    /// The file is opened eagerly so that a missing or non-gzip file fails
    /// here rather than on the first `next()`.
    pub fn records(&self, path: impl AsRef<Path>) -> Result<ZoneRecords, ParseError> {
        let path = path.as_ref();
        let reader = open_gzip(path)?;
        Ok(ZoneRecords {
            parser: self.clone(),
            reader,
            path: path.to_path_buf(),
            line: Vec::with_capacity(LINE_BUFFER_CAPACITY),
            line_number: 0,
            finished: false,
        })
    }

    /// Iterate over the records of a zone file in chunks
    pub fn chunks(
        &self,
        path: impl AsRef<Path>,
        config: ChunkConfig,
    ) -> Result<ZoneChunks, ParseError> {
        let records = self.records(path)?;
        Ok(ZoneChunks {
            records,
            buffer: Vec::with_capacity(config.chunk_size.max(1)),
            config,
            chunk_number: 0,
            pause_pending: false,
        })
    }

    /// Count the records in a file without keeping them
    pub fn count_records(&self, path: impl AsRef<Path>) -> Result<u64, ParseError> {
        let mut count = 0u64;
        for record in self.records(path)? {
            record?;
            count += 1;
        }
        Ok(count)
    }
}

/// Rough record count from the compressed file size
///
/// Assumes a 10:1 compression ratio and about 100 bytes per record. Returns
/// 0 when the file cannot be inspected.
pub fn estimate_records(path: impl AsRef<Path>) -> u64 {
    std::fs::metadata(path)
        .map(|meta| meta.len().saturating_mul(10) / 100)
        .unwrap_or(0)
}

type GzipReader = BufReader<MultiGzDecoder<BufReader<File>>>;

fn open_gzip(path: &Path) -> Result<GzipReader, ParseError> {
    let file = File::open(path).map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    let mut raw = BufReader::with_capacity(READ_BUFFER_CAPACITY, file);

    let header = raw.fill_buf().map_err(|source| ParseError::Open {
        path: path.to_path_buf(),
        source,
    })?;
    if header.len() < GZIP_MAGIC.len() || header[..2] != GZIP_MAGIC {
        return Err(ParseError::NotGzip {
            path: path.to_path_buf(),
        });
    }

    Ok(BufReader::with_capacity(
        READ_BUFFER_CAPACITY,
        MultiGzDecoder::new(raw),
    ))
}

/// Single-pass record iterator returned by [`ZoneParser::records`]
///
/// Yields at most one error, after which it is exhausted.
pub struct ZoneRecords {
    parser: ZoneParser,
    reader: GzipReader,
    path: PathBuf,
    line: Vec<u8>,
    line_number: u64,
    finished: bool,
}

impl ZoneRecords {
    /// Lines read so far, including skipped ones
    pub fn lines_read(&self) -> u64 {
        self.line_number
    }

    /// Shrink the line buffer if a very long line made it grow
    fn release_buffers(&mut self) {
        if self.line.capacity() > LINE_BUFFER_CAPACITY {
            self.line = Vec::with_capacity(LINE_BUFFER_CAPACITY);
        }
    }
}

impl Iterator for ZoneRecords {
    type Item = Result<ZoneRecord, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            self.line.clear();
            match self.reader.read_until(b'\n', &mut self.line) {
                Ok(0) => {
                    self.finished = true;
                    debug!(
                        tld = %self.parser.tld,
                        lines = self.line_number,
                        "Reached end of zone file"
                    );
                },
                Ok(_) => {
                    self.line_number += 1;
                    let text = String::from_utf8_lossy(&self.line);
                    if let Some(parsed) = parse_line(&text) {
                        return Some(Ok(self.parser.to_record(parsed)));
                    }
                },
                Err(source) => {
                    self.finished = true;
                    return Some(Err(ParseError::Read {
                        path: self.path.clone(),
                        line: self.line_number + 1,
                        source,
                    }));
                },
            }
        }
        None
    }
}

/// Chunked record iterator returned by [`ZoneParser::chunks`]
///
/// Yields `(records, chunk_number)` with chunk numbers starting at 1. Every
/// chunk but the last holds exactly `chunk_size` records.
pub struct ZoneChunks {
    records: ZoneRecords,
    buffer: Vec<ZoneRecord>,
    config: ChunkConfig,
    chunk_number: usize,
    pause_pending: bool,
}

impl ZoneChunks {
    pub fn chunks_emitted(&self) -> usize {
        self.chunk_number
    }

    fn emit(&mut self) -> (Vec<ZoneRecord>, usize) {
        self.chunk_number += 1;
        let chunk = std::mem::replace(
            &mut self.buffer,
            Vec::with_capacity(self.config.chunk_size.max(1)),
        );

        if self.config.gc_interval > 0 && self.chunk_number % self.config.gc_interval == 0 {
            self.records.release_buffers();
            self.buffer.shrink_to_fit();
            debug!(
                tld = %self.records.parser.tld,
                chunk = self.chunk_number,
                "Released parser buffers"
            );
        }

        (chunk, self.chunk_number)
    }
}

impl Iterator for ZoneChunks {
    type Item = Result<(Vec<ZoneRecord>, usize), ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.pause_pending {
            self.pause_pending = false;
            if !self.config.chunk_delay.is_zero() {
                std::thread::sleep(self.config.chunk_delay);
            }
        }

        let chunk_size = self.config.chunk_size.max(1);
        loop {
            match self.records.next() {
                Some(Ok(record)) => {
                    self.buffer.push(record);
                    if self.buffer.len() >= chunk_size {
                        self.pause_pending = true;
                        return Some(Ok(self.emit()));
                    }
                },
                Some(Err(e)) => {
                    self.buffer = Vec::new();
                    return Some(Err(e));
                },
                None => {
                    if self.buffer.is_empty() {
                        return None;
                    }
                    return Some(Ok(self.emit()));
                },
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 15).unwrap()
    }

    fn write_gz(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(content.as_bytes()).unwrap();
        encoder.finish().unwrap();
        path
    }

    fn zone_lines(n: usize) -> String {
        (0..n)
            .map(|i| format!("domain{i}.com. 172800 IN NS ns{i}.example.net.\n"))
            .collect()
    }

    #[test]
    fn test_parse_line_ns_record() {
        let parsed = parse_line("example.com. 172800 IN NS ns1.example.net.").unwrap();
        assert_eq!(parsed.domain_name, "example.com");
        assert_eq!(parsed.ttl, 172800);
        assert_eq!(parsed.record_type, RecordType::Ns);
        assert_eq!(parsed.record_data, "ns1.example.net");
    }

    #[test]
    fn test_parse_line_is_case_insensitive() {
        let parsed = parse_line("example.com. 3600 in aaaa 2001:db8::1").unwrap();
        assert_eq!(parsed.record_type, RecordType::Aaaa);
        assert_eq!(parsed.record_data, "2001:db8::1");
    }

    #[test]
    fn test_parse_line_keeps_inner_whitespace_of_rdata() {
        let parsed =
            parse_line("com. 900 IN SOA a.gtld-servers.net. nstld.verisign-grs.com. 1 2 3 4 5")
                .unwrap();
        assert_eq!(parsed.record_type, RecordType::Soa);
        assert_eq!(
            parsed.record_data,
            "a.gtld-servers.net. nstld.verisign-grs.com. 1 2 3 4 5"
        );

        let parsed = parse_line("example.com.\t300\tIN\tTXT\t\"v=spf1  -all\"  ").unwrap();
        assert_eq!(parsed.record_data, "\"v=spf1  -all\"");
    }

    #[test]
    fn test_parse_line_mx_keeps_priority() {
        let parsed = parse_line("example.com. 3600 IN MX 10 mail.example.com.").unwrap();
        assert_eq!(parsed.record_data, "10 mail.example.com");
    }

    #[test]
    fn test_parse_line_skips() {
        assert!(parse_line("").is_none());
        assert!(parse_line("   ").is_none());
        assert!(parse_line("; comment").is_none());
        assert!(parse_line("$ORIGIN com.").is_none());
        assert!(parse_line("$TTL 86400").is_none());
        assert!(parse_line("example.com. 3600 IN DS 12345 8 2 ABCDEF").is_none());
        assert!(parse_line("example.com. 3600 IN RRSIG NS 8 2 86400").is_none());
        assert!(parse_line("example.com. abc IN NS ns1.example.net.").is_none());
        assert!(parse_line("example.com. -5 IN NS ns1.example.net.").is_none());
        assert!(parse_line("example.com. 99999999999 IN NS ns1.example.net.").is_none());
        assert!(parse_line("example.com. 3600 CH NS ns1.example.net.").is_none());
        assert!(parse_line("example.com. 3600 IN NS").is_none());
        assert!(parse_line("example.com. 3600").is_none());
        assert!(parse_line("garbage").is_none());
    }

    #[test]
    fn test_parse_line_ttl_must_be_plain_digits() {
        assert!(parse_line("example.com. +3600 IN NS ns1.example.net.").is_none());
        assert!(parse_line("example.com. 1h IN NS ns1.example.net.").is_none());
        let parsed = parse_line("example.com. 0003600 IN NS ns1.example.net.").unwrap();
        assert_eq!(parsed.ttl, 3600);
    }

    #[test]
    fn test_records_skips_unsupported_and_tags_records() {
        let dir = TempDir::new().unwrap();
        let content = "\
$ORIGIN com.
; comment
example.com. 172800 IN NS ns1.example.net.
example.com. 86400 IN DS 1 8 2 AAAA
example.com. 3600 IN A 192.0.2.1
broken line
";
        let path = write_gz(&dir, "com.zone.gz", content);
        let parser = ZoneParser::new("com", date());

        let records: Vec<_> = parser
            .records(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.tld == "com" && r.download_date == date()));
        assert_eq!(records[1].record_type, RecordType::A);
        assert_eq!(records[1].record_data, "192.0.2.1");
    }

    #[test]
    fn test_records_handles_invalid_utf8() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.zone.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder
            .write_all(b"caf\xe9.com. 3600 IN NS ns1.example.net.\n")
            .unwrap();
        encoder.finish().unwrap();

        let records: Vec<_> = ZoneParser::new("com", date())
            .records(&path)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].domain_name.contains('\u{FFFD}'));
    }

    #[test]
    fn test_open_missing_file() {
        let parser = ZoneParser::new("com", date());
        let err = parser.records("/nonexistent/com.zone.gz").err().unwrap();
        assert!(matches!(err, ParseError::Open { .. }));
    }

    #[test]
    fn test_open_plain_text_is_not_gzip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.zone");
        std::fs::write(&path, "example.com. 3600 IN NS ns1.example.net.\n").unwrap();

        let err = ZoneParser::new("com", date()).records(&path).err().unwrap();
        assert!(matches!(err, ParseError::NotGzip { .. }));
    }

    #[test]
    fn test_truncated_gzip_yields_single_error() {
        let dir = TempDir::new().unwrap();
        let full = write_gz(&dir, "full.zone.gz", &zone_lines(5_000));
        let bytes = std::fs::read(&full).unwrap();
        let truncated = dir.path().join("truncated.zone.gz");
        std::fs::write(&truncated, &bytes[..bytes.len() / 2]).unwrap();

        let results: Vec<_> = ZoneParser::new("com", date())
            .records(&truncated)
            .unwrap()
            .collect();
        let errors = results.iter().filter(|r| r.is_err()).count();
        assert_eq!(errors, 1);
        assert!(results.last().unwrap().is_err());
    }

    #[test]
    fn test_chunks_sizes_and_numbers() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "com.zone.gz", &zone_lines(25));
        let config = ChunkConfig {
            chunk_size: 10,
            chunk_delay: Duration::ZERO,
            gc_interval: 2,
        };

        let chunks: Vec<_> = ZoneParser::new("com", date())
            .chunks(&path, config)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();

        let sizes: Vec<_> = chunks.iter().map(|(c, _)| c.len()).collect();
        let numbers: Vec<_> = chunks.iter().map(|(_, n)| *n).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
        assert_eq!(numbers, vec![1, 2, 3]);
    }

    #[test]
    fn test_chunks_exact_multiple_has_no_empty_tail() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "com.zone.gz", &zone_lines(20));
        let config = ChunkConfig {
            chunk_size: 10,
            chunk_delay: Duration::ZERO,
            gc_interval: 0,
        };

        let chunks: Vec<_> = ZoneParser::new("com", date())
            .chunks(&path, config)
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(chunks.len(), 2);
    }

    #[test]
    fn test_count_and_estimate() {
        let dir = TempDir::new().unwrap();
        let path = write_gz(&dir, "com.zone.gz", &zone_lines(42));
        let parser = ZoneParser::new("com", date());

        assert_eq!(parser.count_records(&path).unwrap(), 42);
        let size = std::fs::metadata(&path).unwrap().len();
        assert_eq!(estimate_records(&path), size * 10 / 100);
        assert_eq!(estimate_records("/nonexistent"), 0);
    }
}
