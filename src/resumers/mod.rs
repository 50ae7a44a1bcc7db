//! Resuming interrupted outputs.
//!
//! A resumer owns the path of an output file. Before a writer or enricher
//! starts, it inspects whatever a previous run left in that file and derives
//! how to continue: which input rows to skip, or which state to hand back to
//! the caller. The output file is then reopened in append mode.
//!
//! Strategies are matched to their consumers through marker traits:
//! [`WriterResumer`] for [`crate::writer::Writer`], [`EnricherResumer`] for
//! [`crate::enricher::Enricher`] and [`IndexedEnricherResumer`] for
//! [`crate::enricher::IndexedEnricher`]. The batch enricher takes a
//! [`BatchResumer`] directly.

mod basic;
mod batch;
mod indexed;
mod last_cell;
mod last_cell_comparison;
mod row_count;

use std::{
    fmt,
    fs::{self, File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use log::{debug, warn};

use crate::{
    error::{CsvError, Result},
    io_utils,
    reader::ReaderBuilder,
};

pub use basic::BasicResumer;
pub use batch::{BatchFilter, BatchResumer};
pub use indexed::IndexedResumer;
pub use last_cell::LastCellResumer;
pub use last_cell_comparison::LastCellComparisonResumer;
pub use row_count::RowCountResumer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResumerEvent {
    /// A row of the existing output was read back.
    OutputRowRead,
    /// An input row was skipped because its output already exists.
    InputRowFilter,
}

impl ResumerEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ResumerEvent::OutputRowRead => "output.row.read",
            ResumerEvent::InputRowFilter => "input.row.filter",
        }
    }
}

impl fmt::Display for ResumerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Listener = Box<dyn FnMut(ResumerEvent, &[String])>;

/// What the consumer expects the output to look like.
#[derive(Debug, Clone)]
pub struct OutputContext {
    /// Expected header row, `None` for headerless outputs.
    pub fieldnames: Option<Vec<String>>,
    pub delimiter: u8,
    /// Input column feeding each leading output column.
    pub selected: Vec<usize>,
    /// Output position of the `index` column of indexed enrichers.
    pub index_column: Option<usize>,
    /// Output position of the `cursor` column of batch enrichers.
    pub cursor_column: Option<usize>,
    pub end_symbol: String,
}

impl OutputContext {
    pub fn new(fieldnames: Option<Vec<String>>, delimiter: u8) -> Self {
        OutputContext {
            fieldnames,
            delimiter,
            selected: Vec::new(),
            index_column: None,
            cursor_column: None,
            end_symbol: crate::reverse_reader::DEFAULT_END_SYMBOL.to_string(),
        }
    }

    pub fn has_headers(&self) -> bool {
        self.fieldnames.is_some()
    }

    /// Output column position for `key`, resolved against the expected
    /// header row or positionally for headerless outputs.
    pub(crate) fn output_column(&self, key: &crate::headers::ColumnKey) -> Result<usize> {
        use crate::headers::{ColumnKey, Headers};

        match (&self.fieldnames, key) {
            (Some(fieldnames), _) => Headers::new(fieldnames.iter().cloned())
                .resolve_key(key)
                .map_err(|err| err.into_missing_column(&key.to_string())),
            (None, ColumnKey::Index(index)) => Ok(*index),
            (None, other) => Err(CsvError::HeadersRequired(format!(
                "cannot find output column '{other}' without headers"
            ))),
        }
    }

    /// Input column feeding output column `output_idx`.
    pub(crate) fn input_column(&self, output_idx: usize) -> Result<usize> {
        self.selected.get(output_idx).copied().ok_or_else(|| {
            CsvError::InvalidConfiguration(format!(
                "output column {output_idx} is not copied from the input"
            ))
        })
    }

    pub(crate) fn reader_builder(&self) -> ReaderBuilder {
        let mut builder = ReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .no_headers(!self.has_headers())
            .prebuffer_bytes(None);
        builder
    }

    pub(crate) fn reverse_reader_builder(&self) -> crate::reverse_reader::ReverseReaderBuilder {
        let mut builder = crate::reverse_reader::ReverseReaderBuilder::new();
        builder
            .delimiter(self.delimiter)
            .no_headers(!self.has_headers());
        builder
    }
}

/// State every strategy shares: the output path and an optional listener.
pub struct ResumerBase {
    path: PathBuf,
    listener: Option<Listener>,
}

impl fmt::Debug for ResumerBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumerBase")
            .field("path", &self.path)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

impl ResumerBase {
    /// Compressed outputs cannot be appended to, so they are refused.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if io_utils::is_gzip_path(path) {
            return Err(CsvError::NotResumable(format!(
                "{path:?} is gzip-compressed"
            )));
        }
        Ok(ResumerBase {
            path: path.to_path_buf(),
            listener: None,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn emit(&mut self, event: ResumerEvent, row: &[String]) {
        if let Some(listener) = self.listener.as_mut() {
            listener(event, row);
        }
    }
}

/// Common contract of every resuming strategy.
pub trait Resumer {
    fn base(&self) -> &ResumerBase;

    fn base_mut(&mut self) -> &mut ResumerBase;

    /// Reads the existing output and loads whatever state the strategy
    /// needs. Only called when [`Resumer::can_resume`] is true.
    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()>;

    fn path(&self) -> &Path {
        self.base().path()
    }

    /// True when the output exists and holds at least one byte.
    fn can_resume(&self) -> bool {
        fs::metadata(self.path()).is_ok_and(|meta| meta.len() > 0)
    }

    fn set_listener(&mut self, listener: Listener) {
        self.base_mut().listener = Some(listener);
    }

    /// Appends to a resumable output, creating the file otherwise.
    fn open_output_file(&mut self) -> Result<File> {
        open_output_file(self.path(), self.can_resume())
    }
}

/// Strategies deciding, input row by input row, what to skip.
pub trait RowFilter: Resumer {
    /// `true` when the row at `index` was already processed.
    fn filter_row(&mut self, index: usize, row: &[String]) -> Result<bool>;

    /// Called once the input is exhausted.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

pub trait WriterResumer: Resumer {}

pub trait EnricherResumer: RowFilter {}

pub trait IndexedEnricherResumer: RowFilter {}

pub(crate) fn open_output_file(path: &Path, resuming: bool) -> Result<File> {
    if !resuming {
        debug!("Creating output file {path:?}");
        return Ok(File::create(path)?);
    }

    let mut file = OpenOptions::new().read(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    if len > 0 {
        file.seek(SeekFrom::Start(len - 1))?;
        let mut last = [0u8; 1];
        file.read_exact(&mut last)?;
        if last[0] != b'\n' {
            warn!("Output {path:?} did not end with a newline, repairing it before appending");
            file.write_all(b"\n")?;
        }
    }
    debug!("Appending to existing output {path:?}");
    Ok(file)
}

/// Checks the header row of an existing output against the expected one.
pub(crate) fn validate_output_header(path: &Path, context: &OutputContext) -> Result<()> {
    let Some(expected) = &context.fieldnames else {
        return Ok(());
    };
    let mut reader = ReaderBuilder::new()
        .delimiter(context.delimiter)
        .no_headers(true)
        .prebuffer_bytes(None)
        .from_path(path)?;
    let found = reader.peek()?.map(<[String]>::to_vec).unwrap_or_default();
    if &found != expected {
        return Err(CsvError::ResumeError(format!(
            "output header {found:?} does not match the expected {expected:?}"
        )));
    }
    Ok(())
}
