//! Length-checked CSV writer.

use std::{
    fs::File,
    io::Write,
    path::Path,
};

use log::debug;

use crate::{
    defaults::{NullBytes, defaults},
    error::{CsvError, Result},
    io_utils,
    record::TabularRecord,
    resumers::{OutputContext, Resumer, WriterResumer},
};

#[derive(Debug, Clone)]
pub struct WriterBuilder {
    delimiter: u8,
    quote: u8,
    fieldnames: Option<Vec<String>>,
    record_fieldnames: Option<Vec<String>>,
    row_len: Option<usize>,
    write_header: bool,
    null_bytes: NullBytes,
}

impl Default for WriterBuilder {
    fn default() -> Self {
        WriterBuilder {
            delimiter: io_utils::DEFAULT_CSV_DELIMITER,
            quote: b'"',
            fieldnames: None,
            record_fieldnames: None,
            row_len: None,
            write_header: true,
            null_bytes: defaults().null_bytes_on_write,
        }
    }
}

impl WriterBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = delimiter;
        self
    }

    pub fn quote(&mut self, quote: u8) -> &mut Self {
        self.quote = quote;
        self
    }

    pub fn fieldnames<I, S>(&mut self, fieldnames: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fieldnames = Some(fieldnames.into_iter().map(Into::into).collect());
        self
    }

    /// Expected row length for headerless outputs.
    pub fn row_len(&mut self, row_len: usize) -> &mut Self {
        self.row_len = Some(row_len);
        self
    }

    /// Takes the header row from a record type.
    pub fn record_type<T: TabularRecord>(&mut self) -> &mut Self {
        self.record_fieldnames = Some(T::fieldnames());
        self
    }

    pub fn write_header(&mut self, yes: bool) -> &mut Self {
        self.write_header = yes;
        self
    }

    pub fn null_bytes(&mut self, policy: NullBytes) -> &mut Self {
        self.null_bytes = policy;
        self
    }

    /// Reconciles the declared fieldnames, record type and row length.
    fn shape(&self) -> Result<(Option<Vec<String>>, Option<usize>)> {
        let fieldnames = match (&self.fieldnames, &self.record_fieldnames) {
            (Some(explicit), Some(record)) if explicit != record => {
                return Err(CsvError::InvalidConfiguration(format!(
                    "fieldnames {explicit:?} conflict with the record type's {record:?}"
                )));
            }
            (Some(names), _) | (None, Some(names)) => Some(names.clone()),
            (None, None) => None,
        };
        let row_len = match (&fieldnames, self.row_len) {
            (Some(names), Some(len)) if names.len() != len => {
                return Err(CsvError::InvalidConfiguration(format!(
                    "{} fieldname(s) declared but row length is {len}",
                    names.len()
                )));
            }
            (Some(names), _) => Some(names.len()),
            (None, len) => len,
        };
        Ok((fieldnames, row_len))
    }

    pub fn output_context(&self) -> Result<OutputContext> {
        let (fieldnames, _) = self.shape()?;
        Ok(OutputContext::new(fieldnames, self.delimiter))
    }

    pub fn from_writer<W: Write>(&self, output: W) -> Result<Writer<W>> {
        self.build(output, self.write_header)
    }

    /// Creates (or truncates) a file; `.gz` paths are compressed.
    pub fn from_path<P: AsRef<Path>>(&self, path: P) -> Result<Writer<Box<dyn Write>>> {
        let path = path.as_ref();
        debug!("Writing CSV to {path:?}");
        self.from_writer(io_utils::open_output(path)?)
    }

    /// Appends to the resumer's output when it already holds rows, after
    /// letting the resumer read it; starts a fresh file otherwise.
    pub fn from_resumer<R: WriterResumer + ?Sized>(&self, resumer: &mut R) -> Result<Writer<File>> {
        let context = self.output_context()?;
        self.resume_with(resumer, &context)
    }

    pub(crate) fn resume_with<R: Resumer + ?Sized>(
        &self,
        resumer: &mut R,
        context: &OutputContext,
    ) -> Result<Writer<File>> {
        let resuming = resumer.can_resume();
        if resuming {
            debug!("Resuming output {:?}", resumer.path());
            resumer.get_insights_from_output(context)?;
        }
        let file = resumer.open_output_file()?;
        self.build(file, self.write_header && !resuming)
    }

    fn build<W: Write>(&self, output: W, write_header: bool) -> Result<Writer<W>> {
        let (fieldnames, row_len) = self.shape()?;
        let mut writer = Writer {
            inner: io_utils::csv_writer_builder(self.delimiter, self.quote).from_writer(output),
            fieldnames,
            row_len,
            null_bytes: self.null_bytes,
            rows_written: 0,
        };
        if write_header && writer.fieldnames.is_some() {
            writer.write_header()?;
        }
        Ok(writer)
    }
}

pub struct Writer<W: Write> {
    inner: csv::Writer<W>,
    fieldnames: Option<Vec<String>>,
    row_len: Option<usize>,
    null_bytes: NullBytes,
    rows_written: usize,
}

impl<W: Write> Writer<W> {
    pub fn from_writer(output: W) -> Result<Writer<W>> {
        WriterBuilder::new().from_writer(output)
    }

    pub fn fieldnames(&self) -> Option<&[String]> {
        self.fieldnames.as_deref()
    }

    /// Expected cells per row, fixed by the builder or the first row.
    pub fn row_len(&self) -> Option<usize> {
        self.row_len
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    pub fn write_header(&mut self) -> Result<()> {
        let fieldnames = self.fieldnames.clone().ok_or_else(|| {
            CsvError::HeadersRequired("no fieldnames were given to the writer".to_string())
        })?;
        self.emit(&fieldnames)
    }

    pub fn write_row<I, S>(&mut self, row: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let cells: Vec<S> = row.into_iter().collect();
        self.emit(&cells)?;
        self.rows_written += 1;
        Ok(())
    }

    /// Writes the concatenation of several cell sequences as one row.
    pub fn write_concat<I, P, S>(&mut self, parts: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.write_row(parts.into_iter().flatten())
    }

    pub fn write_record<T: TabularRecord>(&mut self, record: &T) -> Result<()> {
        self.write_row(record.as_csv_row())
    }

    pub fn write_rows<I, R, S>(&mut self, rows: I) -> Result<()>
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for row in rows {
            self.write_row(row)?;
        }
        Ok(())
    }

    fn emit<S: AsRef<str>>(&mut self, cells: &[S]) -> Result<()> {
        match self.row_len {
            Some(expected) if expected != cells.len() => {
                return Err(CsvError::RowLengthMismatch {
                    expected,
                    actual: cells.len(),
                });
            }
            Some(_) => {}
            None => self.row_len = Some(cells.len()),
        }
        match self.null_bytes {
            NullBytes::Keep => self
                .inner
                .write_record(cells.iter().map(|cell| cell.as_ref().as_bytes()))?,
            NullBytes::Strip => self.inner.write_record(
                cells
                    .iter()
                    .map(|cell| io_utils::strip_null_bytes(cell.as_ref())),
            )?,
            NullBytes::Reject => {
                if let Some(column) = io_utils::first_cell_with_null_byte(cells) {
                    return Err(CsvError::NullByte { column });
                }
                self.inner
                    .write_record(cells.iter().map(|cell| cell.as_ref().as_bytes()))?
            }
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    /// Flushes and returns the underlying sink.
    pub fn into_inner(self) -> Result<W> {
        self.inner
            .into_inner()
            .map_err(|err| CsvError::Io(err.into_error()))
    }
}
