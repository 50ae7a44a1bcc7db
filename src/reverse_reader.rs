//! Backward CSV reader.
//!
//! The header is read forward once; data rows are then recovered last row
//! first by reading fixed-size chunks from the end of the source. Rows are
//! split on `\n` and lines are glued back together while their quote count
//! is odd, which recovers records with embedded newlines. Row lengths are
//! not checked.

use std::{
    collections::BTreeSet,
    fs::File,
    io::{Cursor, Read, Seek, SeekFrom},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;
use serde::Serialize;

use crate::{
    defaults::{NullBytes, defaults},
    error::{CsvError, Result},
    headers::{ColumnKey, Headers},
    io_utils,
    reader::Row,
};

pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024;
pub const DEFAULT_END_SYMBOL: &str = "end";

const SNIFF_SAMPLE: u64 = 4096;

trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Trailing rows of a file sharing one batch value, in forward order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Batch {
    pub value: String,
    /// The last row written for this value carried the end symbol.
    pub finished: bool,
    /// Last checkpoint cursor written for this value, if any.
    pub cursor: Option<String>,
    pub rows: Vec<Row>,
}

impl Batch {
    pub fn new(value: &str) -> Self {
        Batch {
            value: value.to_string(),
            ..Batch::default()
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Distinct values of one column across the batch rows.
    pub fn collect(&self, column: usize) -> BTreeSet<String> {
        self.rows
            .iter()
            .filter_map(|row| row.get(column).cloned())
            .collect()
    }
}

impl IntoIterator for Batch {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Batch {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

#[derive(Debug, Clone)]
pub struct ReverseReaderBuilder {
    delimiter: Option<u8>,
    quote: u8,
    no_headers: bool,
    chunk_size: usize,
    null_bytes: NullBytes,
    encoding: &'static Encoding,
}

impl Default for ReverseReaderBuilder {
    fn default() -> Self {
        ReverseReaderBuilder {
            delimiter: None,
            quote: b'"',
            no_headers: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            null_bytes: defaults().null_bytes_on_read,
            encoding: UTF_8,
        }
    }
}

impl ReverseReaderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = quote;
        self
    }

    pub fn no_headers(&mut self, yes: bool) -> &mut Self {
        self.no_headers = yes;
        self
    }

    pub fn chunk_size(&mut self, bytes: usize) -> &mut Self {
        self.chunk_size = bytes.max(1);
        self
    }

    pub fn null_bytes(&mut self, policy: NullBytes) -> &mut Self {
        self.null_bytes = policy;
        self
    }

    pub fn encoding(&mut self, encoding: &'static Encoding) -> &mut Self {
        self.encoding = encoding;
        self
    }

    /// Opens a path. Gzip files cannot be read backward and are
    /// decompressed into memory first.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> Result<ReverseReader> {
        let path = path.as_ref();
        let source: Box<dyn ReadSeek> = if io_utils::is_gzip_path(path) {
            debug!("Decompressing {path:?} in memory for reverse reading");
            Box::new(Cursor::new(io_utils::read_all(path)?))
        } else {
            Box::new(File::open(path)?)
        };
        let delimiter = self
            .delimiter
            .or_else(|| io_utils::delimiter_from_extension(path));
        ReverseReader::open(self, source, delimiter)
    }

    pub fn from_bytes(&self, bytes: Vec<u8>) -> Result<ReverseReader> {
        ReverseReader::open(self, Box::new(Cursor::new(bytes)), self.delimiter)
    }

    /// Last value of one column, or `None` for empty and header-only files.
    pub fn last_cell<P, K>(&self, path: P, key: K) -> Result<Option<String>>
    where
        P: AsRef<Path>,
        K: Into<ColumnKey>,
    {
        let Some(mut reader) = self.open_if_not_empty(path)? else {
            return Ok(None);
        };
        let key = key.into();
        let idx = reader.cell_column(key.clone())?;
        let Some(row) = reader.read_row()? else {
            return Ok(None);
        };
        if reader.headers().is_none() && idx >= row.len() {
            return Err(CsvError::MissingColumn {
                column: key.to_string(),
            });
        }
        Ok(Some(cell(&row, idx)))
    }

    /// Cells of the last row picked by a selection expression.
    pub fn last_cells<P: AsRef<Path>>(&self, path: P, selection: &str) -> Result<Option<Vec<String>>> {
        let Some(mut reader) = self.open_if_not_empty(path)? else {
            return Ok(None);
        };
        let Some(row) = reader.read_row()? else {
            return Ok(None);
        };
        let indices = match reader.headers() {
            Some(headers) => headers.select(selection)?,
            None => Headers::select_no_headers(row.len(), selection)?,
        };
        Ok(Some(indices.iter().map(|idx| cell(&row, *idx)).collect()))
    }

    /// Reads the last batch of rows sharing `value`'s column value.
    pub fn last_batch<P, V, C>(
        &self,
        path: P,
        value: V,
        cursor: C,
        end_symbol: &str,
    ) -> Result<Option<Batch>>
    where
        P: AsRef<Path>,
        V: Into<ColumnKey>,
        C: Into<ColumnKey>,
    {
        Ok(self
            .locate_last_batch(path, value.into(), cursor.into(), end_symbol)?
            .map(|(batch, _)| batch))
    }

    /// Like [`ReverseReaderBuilder::last_batch`], also returning the byte
    /// offset where the collected rows start.
    pub(crate) fn locate_last_batch<P: AsRef<Path>>(
        &self,
        path: P,
        value: ColumnKey,
        cursor: ColumnKey,
        end_symbol: &str,
    ) -> Result<Option<(Batch, Option<u64>)>> {
        let Some(mut reader) = self.open_if_not_empty(path)? else {
            return Ok(None);
        };
        let value_idx = reader.cell_column(value)?;
        let cursor_idx = reader.cell_column(cursor)?;
        reader.scan_last_batch(value_idx, cursor_idx, end_symbol)
    }

    fn open_if_not_empty<P: AsRef<Path>>(&self, path: P) -> Result<Option<ReverseReader>> {
        match self.from_path(path) {
            Ok(reader) => Ok(Some(reader)),
            Err(CsvError::EmptyFile) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

pub struct ReverseReader {
    source: Box<dyn ReadSeek>,
    headers: Option<Headers>,
    delimiter: u8,
    quote: u8,
    encoding: &'static Encoding,
    null_bytes: NullBytes,
    chunk_size: usize,
    /// Nothing before this offset is data.
    floor: u64,
    /// Offset of the first byte held in `buffer`.
    position: u64,
    buffer: Vec<u8>,
    exhausted: bool,
}

impl ReverseReader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<ReverseReader> {
        ReverseReaderBuilder::new().from_path(path)
    }

    pub fn last_cell<P, K>(path: P, key: K) -> Result<Option<String>>
    where
        P: AsRef<Path>,
        K: Into<ColumnKey>,
    {
        ReverseReaderBuilder::new().last_cell(path, key)
    }

    pub fn last_cells<P: AsRef<Path>>(path: P, selection: &str) -> Result<Option<Vec<String>>> {
        ReverseReaderBuilder::new().last_cells(path, selection)
    }

    pub fn last_batch<P, V, C>(path: P, value: V, cursor: C, end_symbol: &str) -> Result<Option<Batch>>
    where
        P: AsRef<Path>,
        V: Into<ColumnKey>,
        C: Into<ColumnKey>,
    {
        ReverseReaderBuilder::new().last_batch(path, value, cursor, end_symbol)
    }

    fn open(
        options: &ReverseReaderBuilder,
        mut source: Box<dyn ReadSeek>,
        delimiter: Option<u8>,
    ) -> Result<ReverseReader> {
        let len = source.seek(SeekFrom::End(0))?;
        if len == 0 {
            return Err(CsvError::EmptyFile);
        }

        source.seek(SeekFrom::Start(0))?;
        let mut head = Vec::with_capacity(SNIFF_SAMPLE as usize);
        source.by_ref().take(SNIFF_SAMPLE).read_to_end(&mut head)?;
        let bom_len = (head.len() - io_utils::strip_bom(&head).len()) as u64;
        let delimiter = delimiter.unwrap_or_else(|| {
            io_utils::sniff_delimiter(io_utils::strip_bom(&head))
                .unwrap_or(io_utils::DEFAULT_CSV_DELIMITER)
        });

        let mut headers = None;
        let mut floor = bom_len;
        if !options.no_headers {
            source.seek(SeekFrom::Start(bom_len))?;
            let mut csv_reader = io_utils::open_csv_reader(source.by_ref(), delimiter, options.quote);
            let mut record = csv::ByteRecord::new();
            if !csv_reader.read_byte_record(&mut record)? {
                return Err(CsvError::EmptyFile);
            }
            let mut fieldnames = io_utils::decode_record(&record, options.encoding)?;
            if matches!(options.null_bytes, NullBytes::Strip) {
                fieldnames = fieldnames
                    .iter()
                    .map(|name| io_utils::strip_null_bytes(name))
                    .collect();
            }
            floor = bom_len + csv_reader.position().byte();
            headers = Some(Headers::new(fieldnames));
        }

        debug!(
            "Reverse reader over {len} byte(s), data starts at {floor}, chunk size {}",
            options.chunk_size
        );

        Ok(ReverseReader {
            source,
            headers,
            delimiter,
            quote: options.quote,
            encoding: options.encoding,
            null_bytes: options.null_bytes,
            chunk_size: options.chunk_size,
            floor,
            position: len.max(floor),
            buffer: Vec::new(),
            exhausted: false,
        })
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    pub fn fieldnames(&self) -> Option<&[String]> {
        self.headers.as_ref().map(Headers::fieldnames)
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    pub fn column_index<K: Into<ColumnKey>>(&self, key: K) -> Result<usize> {
        let key = key.into();
        match (&self.headers, &key) {
            (Some(headers), _) => headers.resolve_key(&key),
            (None, ColumnKey::Index(index)) => Ok(*index),
            (None, other) => Err(CsvError::HeadersRequired(format!(
                "cannot find column '{other}' without headers"
            ))),
        }
    }

    fn cell_column(&self, key: ColumnKey) -> Result<usize> {
        self.column_index(&key)
            .map_err(|err| err.into_missing_column(&key.to_string()))
    }

    /// Cells of one column, last row first.
    pub fn cells<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<String>> + '_> {
        let idx = self.cell_column(key.into())?;
        Ok(self.column_cells(idx))
    }

    fn column_cells(&mut self, idx: usize) -> impl Iterator<Item = Result<String>> + '_ {
        self.by_ref().map(move |row| row.map(|row| cell(&row, idx)))
    }

    pub fn read_row(&mut self) -> Result<Option<Row>> {
        Ok(self.next_record()?.map(|(_, row)| row))
    }

    fn next_line(&mut self) -> Result<Option<(u64, Vec<u8>)>> {
        loop {
            if let Some(i) = self.buffer.iter().rposition(|&byte| byte == b'\n') {
                let line = self.buffer.split_off(i + 1);
                self.buffer.truncate(i);
                return Ok(Some((self.position + i as u64 + 1, line)));
            }

            if self.position > self.floor {
                let start = self
                    .position
                    .saturating_sub(self.chunk_size as u64)
                    .max(self.floor);
                let mut chunk = vec![0u8; (self.position - start) as usize];
                self.source.seek(SeekFrom::Start(start))?;
                self.source.read_exact(&mut chunk)?;
                chunk.extend_from_slice(&self.buffer);
                self.buffer = chunk;
                self.position = start;
                continue;
            }

            if self.buffer.is_empty() {
                return Ok(None);
            }
            return Ok(Some((self.position, std::mem::take(&mut self.buffer))));
        }
    }

    fn next_record(&mut self) -> Result<Option<(u64, Row)>> {
        if self.exhausted {
            return Ok(None);
        }
        loop {
            let Some((mut offset, mut line)) = self.next_line()? else {
                self.exhausted = true;
                return Ok(None);
            };
            strip_carriage_return(&mut line);
            if line.is_empty() {
                continue;
            }
            while count_quotes(&line, self.quote) % 2 == 1 {
                let Some((previous_offset, mut previous)) = self.next_line()? else {
                    break;
                };
                strip_carriage_return(&mut previous);
                previous.push(b'\n');
                previous.extend_from_slice(&line);
                line = previous;
                offset = previous_offset;
            }
            return self.parse(&line).map(|row| Some((offset, row)));
        }
    }

    fn parse(&self, line: &[u8]) -> Result<Row> {
        let mut csv_reader = io_utils::open_csv_reader(line, self.delimiter, self.quote);
        let mut record = csv::ByteRecord::new();
        if !csv_reader.read_byte_record(&mut record)? {
            return Ok(Vec::new());
        }
        let mut row = io_utils::decode_record(&record, self.encoding)?;
        match self.null_bytes {
            NullBytes::Keep => {}
            NullBytes::Strip => {
                for cell in row.iter_mut().filter(|cell| io_utils::has_null_byte(cell)) {
                    *cell = io_utils::strip_null_bytes(cell);
                }
            }
            NullBytes::Reject => {
                if let Some(column) = io_utils::first_cell_with_null_byte(&row) {
                    return Err(CsvError::NullByte { column });
                }
            }
        }
        Ok(row)
    }

    /// Scans backward: the first row fixes the batch value, a row with a
    /// different value stops, a cursor cell equal to `end_symbol` marks the
    /// batch finished and any other non-empty cursor is recorded. Rows seen
    /// before stopping are collected.
    fn scan_last_batch(
        &mut self,
        value_idx: usize,
        cursor_idx: usize,
        end_symbol: &str,
    ) -> Result<Option<(Batch, Option<u64>)>> {
        let mut batch: Option<Batch> = None;
        let mut earliest = None;

        while let Some((offset, row)) = self.next_record()? {
            let value = cell(&row, value_idx);
            let current = batch.get_or_insert_with(|| Batch::new(&value));
            if current.value != value {
                break;
            }
            let cursor = cell(&row, cursor_idx);
            if cursor == end_symbol {
                current.finished = true;
                break;
            }
            if !cursor.is_empty() {
                current.cursor = Some(cursor);
                break;
            }
            current.rows.push(row);
            earliest = Some(offset);
        }

        Ok(batch.map(|mut batch| {
            batch.rows.reverse();
            (batch, earliest)
        }))
    }
}

impl Iterator for ReverseReader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_record() {
            Ok(record) => record.map(|(_, row)| Ok(row)),
            Err(err) => {
                self.exhausted = true;
                Some(Err(err))
            }
        }
    }
}

fn cell(row: &[String], idx: usize) -> String {
    row.get(idx).cloned().unwrap_or_default()
}

fn strip_carriage_return(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}

fn count_quotes(line: &[u8], quote: u8) -> usize {
    line.iter().filter(|&&byte| byte == quote).count()
}
