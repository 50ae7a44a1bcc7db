//! I/O utilities shared by readers, writers and resumers.
//!
//! All file I/O in csv-enrich flows through this module. It provides:
//!
//! - **Opening**: paths ending in `.gz` are transparently (de)compressed with
//!   `flate2`; the `-` path convention routes through standard streams.
//! - **Delimiter resolution**: extension-based detection (`.csv` → comma,
//!   `.tsv` → tab) with a simple first-line sniff for anything else.
//! - **Stream hygiene**: UTF-8 byte-order mark suppression and NUL byte
//!   stripping at the byte level.
//! - **Decoding**: input decoding via `encoding_rs`, defaulting to UTF-8.
//! - **Builders**: the single place where `csv` reader/writer dialects are
//!   configured.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, BufWriter, Read, Write},
    path::Path,
};

use csv::{QuoteStyle, Terminator};
use encoding_rs::{Encoding, UTF_8};
use flate2::{Compression, read::MultiGzDecoder, write::GzEncoder};

use crate::error::{CsvError, Result};

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const SNIFF_CANDIDATES: [u8; 4] = [b',', b'\t', b';', b'|'];

pub fn is_dash(path: &Path) -> bool {
    path == Path::new("-")
}

pub fn is_gzip_path(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"))
}

/// Extension of the path once a trailing `.gz` is ignored.
fn data_extension(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let name = name
        .strip_suffix(".gz")
        .or_else(|| name.strip_suffix(".GZ"))
        .unwrap_or(name);
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
}

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes()).ok_or_else(|| {
            CsvError::InvalidConfiguration(format!("unknown encoding '{value}'"))
        })
    } else {
        Ok(UTF_8)
    }
}

/// Delimiter implied by the file extension, if any.
pub fn delimiter_from_extension(path: &Path) -> Option<u8> {
    match data_extension(path).as_deref() {
        Some("tsv") | Some("tab") => Some(DEFAULT_TSV_DELIMITER),
        Some("csv") => Some(DEFAULT_CSV_DELIMITER),
        _ => None,
    }
}

/// Picks the most frequent candidate delimiter on the first line of `sample`,
/// ignoring anything between double quotes.
pub fn sniff_delimiter(sample: &[u8]) -> Option<u8> {
    let mut counts = [0usize; SNIFF_CANDIDATES.len()];
    let mut in_quotes = false;
    for &byte in sample {
        match byte {
            b'"' => in_quotes = !in_quotes,
            b'\n' if !in_quotes => break,
            _ if !in_quotes => {
                if let Some(pos) = SNIFF_CANDIDATES.iter().position(|c| *c == byte) {
                    counts[pos] += 1;
                }
            }
            _ => {}
        }
    }
    counts
        .iter()
        .enumerate()
        .filter(|(_, count)| **count > 0)
        .max_by_key(|(pos, count)| (**count, std::cmp::Reverse(*pos)))
        .map(|(pos, _)| SNIFF_CANDIDATES[pos])
}

/// Opens `path` for buffered reading, decompressing `.gz` files.
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    if is_dash(path) {
        return Ok(Box::new(BufReader::new(io::stdin().lock())));
    }
    let file = File::open(path)?;
    if is_gzip_path(path) {
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Opens `path` for writing, compressing `.gz` files.
pub fn open_output(path: &Path) -> Result<Box<dyn Write>> {
    if is_dash(path) {
        return Ok(Box::new(io::stdout()));
    }
    let file = BufWriter::new(File::create(path)?);
    if is_gzip_path(path) {
        Ok(Box::new(GzEncoder::new(file, Compression::default())))
    } else {
        Ok(Box::new(file))
    }
}

/// Reads a whole (possibly gzip-compressed) file into memory.
pub fn read_all(path: &Path) -> Result<Vec<u8>> {
    let mut input = open_input(path)?;
    let mut bytes = Vec::new();
    input.read_to_end(&mut bytes)?;
    Ok(bytes)
}

/// Consumes a leading UTF-8 byte-order mark, if present.
pub fn skip_bom<R: BufRead + ?Sized>(reader: &mut R) -> io::Result<()> {
    let starts_with_bom = {
        let buffer = reader.fill_buf()?;
        buffer.starts_with(UTF8_BOM)
    };
    if starts_with_bom {
        reader.consume(UTF8_BOM.len());
    }
    Ok(())
}

pub fn strip_bom(bytes: &[u8]) -> &[u8] {
    bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes)
}

/// Drops every NUL byte flowing through the wrapped reader.
pub struct NullByteStripper<R> {
    inner: R,
}

impl<R: Read> NullByteStripper<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

impl<R: Read> Read for NullByteStripper<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let read = self.inner.read(buf)?;
            if read == 0 {
                return Ok(0);
            }
            let mut kept = 0;
            for idx in 0..read {
                if buf[idx] != 0 {
                    buf[kept] = buf[idx];
                    kept += 1;
                }
            }
            if kept > 0 {
                return Ok(kept);
            }
        }
    }
}

pub fn has_null_byte(cell: &str) -> bool {
    cell.contains('\0')
}

pub fn strip_null_bytes(cell: &str) -> String {
    cell.replace('\0', "")
}

pub fn first_cell_with_null_byte<S: AsRef<str>>(row: &[S]) -> Option<usize> {
    row.iter().position(|cell| has_null_byte(cell.as_ref()))
}

/// Headers and data rows are both parsed as plain records; the header is
/// handled by the caller so that row lengths can be checked uniformly.
pub fn open_csv_reader<R>(reader: R, delimiter: u8, quote: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .quote(quote)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn csv_writer_builder(delimiter: u8, quote: u8) -> csv::WriterBuilder {
    let mut builder = csv::WriterBuilder::new();
    builder
        .has_headers(false)
        .delimiter(delimiter)
        .quote(quote)
        .quote_style(QuoteStyle::Necessary)
        .double_quote(true)
        .terminator(Terminator::Any(b'\n'))
        .flexible(true);
    builder
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    if encoding == UTF_8 {
        return std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CsvError::Decode(encoding.name()));
    }
    let (text, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        Err(CsvError::Decode(encoding.name()))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

/// Approximate heap footprint of a decoded row, used for prebuffer budgets.
pub fn size_of_row_in_memory(row: &[String]) -> usize {
    let container = 24 + std::mem::size_of::<String>() * row.len();
    container + row.iter().map(|cell| cell.len()).sum::<usize>()
}
