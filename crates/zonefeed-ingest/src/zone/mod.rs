// Zone file parsing
//
// CZDS zone files are gzipped master files with one fully-qualified record
// per line:
//
//   example.com.  172800  in  ns  ns1.example.net.
//
// The parser streams the decompressed file line by line. Lines that do not
// describe a supported record are skipped, never reported as errors; only
// failures affecting the whole file (missing file, not gzip, broken stream)
// surface as ParseError.

pub mod parser;

pub use parser::{
    estimate_records, parse_line, ChunkConfig, ParsedLine, ZoneChunks, ZoneParser, ZoneRecords,
};

use std::path::PathBuf;

/// File-scoped parse failures
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("Cannot open zone file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid gzip file: {path}")]
    NotGzip { path: PathBuf },

    #[error("Cannot read zone file {path} at line {line}: {source}")]
    Read {
        path: PathBuf,
        line: u64,
        #[source]
        source: std::io::Error,
    },
}
