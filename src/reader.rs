//! Forward, header-aware CSV reader.
//!
//! A [`Reader`] parses the header row once, checks every following row
//! against its length, and hands rows out lazily. Iteration is single-pass:
//! once exhausted, iterating again yields nothing.

use std::{
    collections::VecDeque,
    fmt,
    io::{BufRead, BufReader, Read},
    path::Path,
};

use encoding_rs::{Encoding, UTF_8};
use log::debug;

use crate::{
    defaults::{NullBytes, defaults},
    error::{CsvError, Result},
    headers::{ColumnKey, Headers, Projected, RowView, Template},
    io_utils,
};

pub type Row = Vec<String>;

/// Splits one column on a separator so a row yields one row per value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Multiplex {
    pub column: ColumnKey,
    pub separator: String,
    /// Header given to the split column in the produced rows.
    pub new_column: Option<String>,
}

impl Multiplex {
    pub fn new<K: Into<ColumnKey>>(column: K, separator: &str) -> Self {
        Multiplex {
            column: column.into(),
            separator: separator.to_string(),
            new_column: None,
        }
    }

    pub fn rename(mut self, new_column: &str) -> Self {
        self.new_column = Some(new_column.to_string());
        self
    }
}

#[derive(Debug, Clone)]
pub struct ReaderBuilder {
    delimiter: Option<u8>,
    quote: u8,
    no_headers: bool,
    prebuffer_bytes: Option<usize>,
    multiplex: Option<Multiplex>,
    null_bytes: NullBytes,
    encoding: &'static Encoding,
}

impl Default for ReaderBuilder {
    fn default() -> Self {
        let defaults = defaults();
        ReaderBuilder {
            delimiter: None,
            quote: b'"',
            no_headers: false,
            prebuffer_bytes: defaults.prebuffer_bytes,
            multiplex: None,
            null_bytes: defaults.null_bytes_on_read,
            encoding: UTF_8,
        }
    }
}

impl ReaderBuilder {
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

    /// Eagerly buffer rows up to roughly this many bytes of memory.
    pub fn prebuffer_bytes(&mut self, bytes: Option<usize>) -> &mut Self {
        self.prebuffer_bytes = bytes;
        self
    }

    pub fn multiplex(&mut self, multiplex: Multiplex) -> &mut Self {
        self.multiplex = Some(multiplex);
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

    pub fn has_headers(&self) -> bool {
        !self.no_headers
    }

    /// Opens a path; `.gz` files are decompressed and the delimiter is taken
    /// from the extension or sniffed from the first line when not set.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> Result<Reader> {
        let path = path.as_ref();
        let mut input = io_utils::open_input(path)?;
        io_utils::skip_bom(&mut input)?;
        let delimiter = match self.delimiter {
            Some(delimiter) => delimiter,
            None => match io_utils::delimiter_from_extension(path) {
                Some(delimiter) => delimiter,
                None => io_utils::sniff_delimiter(input.fill_buf()?)
                    .unwrap_or(io_utils::DEFAULT_CSV_DELIMITER),
            },
        };
        debug!(
            "Opening {:?} with delimiter '{}'",
            path,
            crate::printable_delimiter(delimiter)
        );
        self.from_buffered(input, delimiter)
    }

    pub fn from_reader<R: Read + 'static>(&self, reader: R) -> Result<Reader> {
        let mut input: Box<dyn BufRead> = Box::new(BufReader::new(reader));
        io_utils::skip_bom(&mut input)?;
        let delimiter = self.delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER);
        self.from_buffered(input, delimiter)
    }

    /// Reads pre-split rows; the first one is the header unless `no_headers`.
    pub fn from_rows<I, R, S>(&self, rows: I) -> Result<Reader>
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: 'static,
        R: IntoIterator<Item = S> + 'static,
        S: Into<String> + 'static,
    {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect::<Row>());
        Reader::build(
            self,
            Source::Rows(Box::new(rows)),
            self.delimiter.unwrap_or(io_utils::DEFAULT_CSV_DELIMITER),
        )
    }

    fn from_buffered(&self, input: Box<dyn BufRead>, delimiter: u8) -> Result<Reader> {
        let input: Box<dyn Read> = if matches!(self.null_bytes, NullBytes::Strip) {
            Box::new(io_utils::NullByteStripper::new(input))
        } else {
            Box::new(input)
        };
        let source = Source::Csv {
            reader: io_utils::open_csv_reader(input, delimiter, self.quote),
            record: csv::ByteRecord::new(),
            encoding: self.encoding,
        };
        Reader::build(self, source, delimiter)
    }

    /// Counts the data rows of a file. Counting is all-or-nothing: once more
    /// than `max_rows` rows are seen the count is reported as unknown.
    pub fn count<P: AsRef<Path>>(&self, path: P, max_rows: Option<usize>) -> Result<Option<usize>> {
        let path = path.as_ref();
        let mut input = io_utils::open_input(path)?;
        io_utils::skip_bom(&mut input)?;
        let delimiter = match self.delimiter {
            Some(delimiter) => delimiter,
            None => io_utils::delimiter_from_extension(path).unwrap_or_else(|| {
                input
                    .fill_buf()
                    .ok()
                    .and_then(io_utils::sniff_delimiter)
                    .unwrap_or(io_utils::DEFAULT_CSV_DELIMITER)
            }),
        };
        let mut reader = io_utils::open_csv_reader(input, delimiter, self.quote);
        let mut record = csv::ByteRecord::new();
        let mut seen = 0usize;
        let header_rows = usize::from(!self.no_headers);
        while reader.read_byte_record(&mut record)? {
            seen += 1;
            if let Some(limit) = max_rows
                && seen.saturating_sub(header_rows) > limit
            {
                debug!("Stopped counting {path:?} after {limit} row(s)");
                return Ok(None);
            }
        }
        Ok(Some(seen.saturating_sub(header_rows)))
    }
}

enum Source {
    Csv {
        reader: csv::Reader<Box<dyn Read>>,
        record: csv::ByteRecord,
        encoding: &'static Encoding,
    },
    Rows(Box<dyn Iterator<Item = Row>>),
}

impl Source {
    fn next_raw(&mut self) -> Result<Option<Row>> {
        match self {
            Source::Csv {
                reader,
                record,
                encoding,
            } => {
                if !reader.read_byte_record(record)? {
                    return Ok(None);
                }
                io_utils::decode_record(record, encoding).map(Some)
            }
            Source::Rows(rows) => Ok(rows.next()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReaderState {
    HeaderParsed,
    Empty,
    Iterating,
    Exhausted,
}

pub struct Reader {
    source: Source,
    headers: Option<Headers>,
    row_len: usize,
    delimiter: u8,
    state: ReaderState,
    /// First data row of a headerless source, read while sizing rows.
    lookahead: Option<Row>,
    /// Rows already multiplexed: prebuffered rows and peeked rows.
    buffer: VecDeque<Row>,
    expanded: VecDeque<Row>,
    multiplex: Option<(usize, String)>,
    null_bytes: NullBytes,
    total: Option<usize>,
    rows_read: usize,
}

impl fmt::Debug for Reader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reader")
            .field("headers", &self.headers)
            .field("row_len", &self.row_len)
            .field("state", &self.state)
            .field("total", &self.total)
            .finish_non_exhaustive()
    }
}

impl Reader {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Reader> {
        ReaderBuilder::new().from_path(path)
    }

    pub fn from_reader<R: Read + 'static>(reader: R) -> Result<Reader> {
        ReaderBuilder::new().from_reader(reader)
    }

    pub fn from_rows<I, R, S>(rows: I) -> Result<Reader>
    where
        I: IntoIterator<Item = R>,
        I::IntoIter: 'static,
        R: IntoIterator<Item = S> + 'static,
        S: Into<String> + 'static,
    {
        ReaderBuilder::new().from_rows(rows)
    }

    pub fn count<P: AsRef<Path>>(path: P, max_rows: Option<usize>) -> Result<Option<usize>> {
        ReaderBuilder::new().count(path, max_rows)
    }

    fn build(options: &ReaderBuilder, mut source: Source, delimiter: u8) -> Result<Reader> {
        let first = source.next_raw()?.ok_or(CsvError::EmptyFile)?;
        let (headers, lookahead) = if options.no_headers {
            (None, Some(first))
        } else {
            (Some(Headers::new(first)), None)
        };
        let row_len = match (&headers, &lookahead) {
            (Some(headers), _) => headers.len(),
            (None, Some(row)) => row.len(),
            (None, None) => 0,
        };

        let mut reader = Reader {
            source,
            headers,
            row_len,
            delimiter,
            state: ReaderState::HeaderParsed,
            lookahead,
            buffer: VecDeque::new(),
            expanded: VecDeque::new(),
            multiplex: None,
            null_bytes: options.null_bytes,
            total: None,
            rows_read: 0,
        };

        if let Some(multiplex) = &options.multiplex {
            reader.configure_multiplex(multiplex)?;
        }

        if let Some(budget) = options.prebuffer_bytes {
            reader.prebuffer(budget)?;
        }

        if reader.buffer.is_empty() {
            match reader.next_expanded()? {
                Some(row) => reader.buffer.push_back(row),
                None => reader.state = ReaderState::Empty,
            }
        }

        debug!(
            "Reader ready: {} column(s), headers: {}, buffered {} row(s), total {:?}",
            reader.row_len,
            reader.headers.is_some(),
            reader.buffer.len(),
            reader.total
        );
        Ok(reader)
    }

    fn configure_multiplex(&mut self, multiplex: &Multiplex) -> Result<()> {
        let column = multiplex.column.to_string();
        let idx = self
            .column_index(&multiplex.column)
            .map_err(|err| err.into_missing_column(&column))?;
        if multiplex.separator.is_empty() {
            return Err(CsvError::InvalidConfiguration(
                "multiplex separator cannot be empty".to_string(),
            ));
        }
        if let Some(new_column) = &multiplex.new_column {
            let headers = self.headers.as_ref().ok_or_else(|| {
                CsvError::HeadersRequired("cannot rename a multiplexed column".to_string())
            })?;
            let old = headers.nth(idx)?.to_string();
            self.headers = Some(headers.rename(&old, new_column));
        }
        self.multiplex = Some((idx, multiplex.separator.clone()));
        Ok(())
    }

    fn prebuffer(&mut self, budget: usize) -> Result<()> {
        let mut used = 0usize;
        loop {
            match self.next_expanded()? {
                Some(row) => {
                    used += io_utils::size_of_row_in_memory(&row);
                    self.buffer.push_back(row);
                    if used > budget {
                        return Ok(());
                    }
                }
                None => {
                    self.total = Some(self.buffer.len());
                    return Ok(());
                }
            }
        }
    }

    fn next_source_row(&mut self) -> Result<Option<Row>> {
        let row = match self.lookahead.take() {
            Some(row) => Some(row),
            None => self.source.next_raw()?,
        };
        let Some(mut row) = row else {
            return Ok(None);
        };
        self.rows_read += 1;
        if row.len() != self.row_len {
            debug!("Row {} has {} cell(s)", self.rows_read, row.len());
            return Err(CsvError::RowLengthMismatch {
                expected: self.row_len,
                actual: row.len(),
            });
        }
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
        Ok(Some(row))
    }

    fn next_expanded(&mut self) -> Result<Option<Row>> {
        if let Some(row) = self.expanded.pop_front() {
            return Ok(Some(row));
        }
        let Some(row) = self.next_source_row()? else {
            return Ok(None);
        };
        let Some((idx, separator)) = &self.multiplex else {
            return Ok(Some(row));
        };
        let idx = *idx;
        if !row[idx].contains(separator.as_str()) {
            return Ok(Some(row));
        }
        let values: Vec<String> = row[idx].split(separator.as_str()).map(str::to_string).collect();
        for value in values {
            let mut split = row.clone();
            split[idx] = value;
            self.expanded.push_back(split);
        }
        Ok(self.expanded.pop_front())
    }

    /// Next row, or `None` once the source is exhausted.
    pub fn read_row(&mut self) -> Result<Option<Row>> {
        match self.state {
            ReaderState::Empty | ReaderState::Exhausted => return Ok(None),
            ReaderState::HeaderParsed => self.state = ReaderState::Iterating,
            ReaderState::Iterating => {}
        }
        if let Some(row) = self.buffer.pop_front() {
            return Ok(Some(row));
        }
        match self.next_expanded() {
            Ok(Some(row)) => Ok(Some(row)),
            Ok(None) => {
                self.state = ReaderState::Exhausted;
                Ok(None)
            }
            Err(err) => {
                self.state = ReaderState::Exhausted;
                Err(err)
            }
        }
    }

    /// Looks at the next row without consuming it.
    pub fn peek(&mut self) -> Result<Option<&[String]>> {
        if matches!(self.state, ReaderState::Empty | ReaderState::Exhausted) {
            return Ok(None);
        }
        if self.buffer.is_empty() {
            match self.next_expanded()? {
                Some(row) => self.buffer.push_back(row),
                None => return Ok(None),
            }
        }
        Ok(self.buffer.front().map(Vec::as_slice))
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.headers.as_ref()
    }

    pub fn fieldnames(&self) -> Option<&[String]> {
        self.headers.as_ref().map(Headers::fieldnames)
    }

    pub fn row_len(&self) -> usize {
        self.row_len
    }

    pub fn delimiter(&self) -> u8 {
        self.delimiter
    }

    /// True when the source held at most a header row.
    pub fn is_empty(&self) -> bool {
        self.state == ReaderState::Empty
    }

    /// Number of rows, known only when the whole input fit the prebuffer.
    pub fn total(&self) -> Option<usize> {
        self.total
    }

    /// Resolves a column against the headers, or positionally when the
    /// source has none.
    pub fn column_index<K: Into<ColumnKey>>(&self, key: K) -> Result<usize> {
        let key = key.into();
        match (&self.headers, &key) {
            (Some(headers), _) => headers.resolve_key(&key),
            (None, ColumnKey::Index(index)) if *index < self.row_len => Ok(*index),
            (None, ColumnKey::Index(index)) => Err(CsvError::ColumnOutOfRange {
                index: *index,
                len: self.row_len,
            }),
            (None, other) => Err(CsvError::HeadersRequired(format!(
                "cannot find column '{other}' without headers"
            ))),
        }
    }

    /// Resolves a selection DSL string against this reader's columns.
    pub fn select(&self, selection: &str) -> Result<Vec<usize>> {
        match &self.headers {
            Some(headers) => headers.select(selection),
            None => Headers::select_no_headers(self.row_len, selection),
        }
    }

    fn cell_column(&self, key: ColumnKey) -> Result<usize> {
        self.column_index(&key)
            .map_err(|err| err.into_missing_column(&key.to_string()))
    }

    /// Lazily yields the cell of one column for every remaining row.
    pub fn cells<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<String>> + '_> {
        let idx = self.cell_column(key.into())?;
        Ok(self.column_cells(idx))
    }

    fn column_cells(&mut self, idx: usize) -> impl Iterator<Item = Result<String>> + '_ {
        self.by_ref()
            .map(move |row| row.map(|mut row| row.swap_remove(idx)))
    }

    pub fn cells_with_rows<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<(Row, String)>> + '_> {
        let idx = self.cell_column(key.into())?;
        Ok(self.column_rows(idx))
    }

    fn column_rows(&mut self, idx: usize) -> impl Iterator<Item = Result<(Row, String)>> + '_ {
        self.by_ref().map(move |row| {
            row.map(|row| {
                let cell = row[idx].clone();
                (row, cell)
            })
        })
    }

    /// Projects every remaining row through `template`.
    pub fn records(
        &mut self,
        template: &Template,
    ) -> Result<impl Iterator<Item = Result<Projected>> + '_> {
        let headers = self.headers.as_ref().ok_or_else(|| {
            CsvError::HeadersRequired("projections need a header row".to_string())
        })?;
        let projection = headers.project(template)?;
        Ok(self
            .by_ref()
            .map(move |row| row.map(|row| projection.apply(&row))))
    }

    /// Pairs rows with a running counter starting at `start`.
    pub fn enumerate_from(
        &mut self,
        start: usize,
    ) -> impl Iterator<Item = Result<(usize, Row)>> + '_ {
        self.by_ref()
            .zip(start..)
            .map(|(row, idx)| row.map(|row| (idx, row)))
    }

    pub fn wrap<'a>(&'a self, row: &'a [String]) -> Result<RowView<'a>> {
        let headers = self.headers.as_ref().ok_or_else(|| {
            CsvError::HeadersRequired("cannot wrap rows without headers".to_string())
        })?;
        Ok(headers.wrap(row))
    }
}

impl Iterator for Reader {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_row().transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn people() -> Cursor<Vec<u8>> {
        Cursor::new(b"name,surname\nJohn,Matthews\nMary,Sue\nJulia,Stone\n".to_vec())
    }

    #[test]
    fn empty_source_is_an_error_but_header_only_is_not() {
        assert!(matches!(
            Reader::from_reader(Cursor::new(Vec::new())),
            Err(CsvError::EmptyFile)
        ));
        let mut reader = Reader::from_reader(Cursor::new(b"name,surname\n".to_vec())).unwrap();
        assert!(reader.is_empty());
        assert!(reader.next().is_none());
    }

    #[test]
    fn peek_does_not_consume() {
        let mut reader = Reader::from_reader(people()).unwrap();
        assert_eq!(reader.peek().unwrap().unwrap()[0], "John");
        assert_eq!(reader.peek().unwrap().unwrap()[0], "John");
        let names: Vec<String> = reader.cells("name").unwrap().map(|c| c.unwrap()).collect();
        assert_eq!(names, vec!["John", "Mary", "Julia"]);
        assert!(reader.peek().unwrap().is_none());
    }

    #[test]
    fn second_iteration_yields_nothing() {
        let mut reader = Reader::from_reader(people()).unwrap();
        assert_eq!(reader.by_ref().count(), 3);
        assert_eq!(reader.by_ref().count(), 0);
    }

    #[test]
    fn rows_of_the_wrong_length_are_rejected() {
        let mut reader =
            Reader::from_reader(Cursor::new(b"a,b\n1,2\n3\n4,5\n".to_vec())).unwrap();
        assert!(reader.next().unwrap().is_ok());
        assert!(matches!(
            reader.next(),
            Some(Err(CsvError::RowLengthMismatch {
                expected: 2,
                actual: 1
            }))
        ));
        assert!(reader.next().is_none());
    }

    #[test]
    fn enumerate_from_offsets_counter() {
        let mut reader = Reader::from_reader(people()).unwrap();
        let pairs: Vec<(usize, String)> = reader
            .enumerate_from(10)
            .map(|item| item.map(|(i, row)| (i, row[0].clone())).unwrap())
            .collect();
        assert_eq!(
            pairs,
            vec![
                (10, "John".to_string()),
                (11, "Mary".to_string()),
                (12, "Julia".to_string())
            ]
        );
    }
}
