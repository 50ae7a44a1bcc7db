//! Enrichers: read an input, copy a selection of its columns to an output
//! and append new columns computed by the caller.
//!
//! Three flavours share the same plumbing:
//!
//! - [`Enricher`] for sequential processing;
//! - [`IndexedEnricher`], whose output carries the input row index so rows
//!   can be written in any order (e.g. by a worker pool);
//! - [`BatchEnricher`], whose output carries a cursor column so paginated
//!   work can be checkpointed.
//!
//! Each can be resumed from a partial output through the matching resumer.

use std::{fs::File, io::Write};

use log::debug;

use crate::{
    defaults::NullBytes,
    error::{CsvError, Result},
    headers::{ColumnKey, Headers},
    reader::{Reader, Row},
    record::TabularRecord,
    resumers::{
        BatchFilter, BatchResumer, EnricherResumer, IndexedEnricherResumer, OutputContext,
        RowFilter,
    },
    reverse_reader::{Batch, DEFAULT_END_SYMBOL},
    writer::{Writer, WriterBuilder},
};

pub const INDEX_COLUMN: &str = "index";
pub const CURSOR_COLUMN: &str = "cursor";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
enum AddedColumns {
    #[default]
    None,
    Names(Vec<String>),
    Count(usize),
}

#[derive(Debug, Clone)]
pub struct EnricherBuilder {
    select: Option<String>,
    added: AddedColumns,
    delimiter: Option<u8>,
    null_bytes: Option<NullBytes>,
    end_symbol: String,
}

impl Default for EnricherBuilder {
    fn default() -> Self {
        EnricherBuilder {
            select: None,
            added: AddedColumns::None,
            delimiter: None,
            null_bytes: None,
            end_symbol: DEFAULT_END_SYMBOL.to_string(),
        }
    }
}

/// Output layout derived from the input and the builder options.
struct Plan {
    selected: Vec<usize>,
    added_len: usize,
    output_fieldnames: Option<Vec<String>>,
    extra_column: Option<usize>,
    output_len: usize,
}

impl EnricherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Input columns to copy, as a selection expression. All by default.
    pub fn select(&mut self, selection: &str) -> &mut Self {
        self.select = Some(selection.to_string());
        self
    }

    /// Names of the appended columns.
    pub fn add<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.added = AddedColumns::Names(names.into_iter().map(Into::into).collect());
        self
    }

    /// Number of appended columns, for headerless inputs.
    pub fn add_count(&mut self, count: usize) -> &mut Self {
        self.added = AddedColumns::Count(count);
        self
    }

    /// Appends the fields of a record type.
    pub fn record_type<T: TabularRecord>(&mut self) -> &mut Self {
        self.added = AddedColumns::Names(T::fieldnames());
        self
    }

    /// Output delimiter; the input's by default.
    pub fn delimiter(&mut self, delimiter: u8) -> &mut Self {
        self.delimiter = Some(delimiter);
        self
    }

    pub fn null_bytes(&mut self, policy: NullBytes) -> &mut Self {
        self.null_bytes = Some(policy);
        self
    }

    /// Cursor value marking a finished batch.
    pub fn end_symbol(&mut self, symbol: &str) -> &mut Self {
        self.end_symbol = symbol.to_string();
        self
    }

    fn plan(&self, reader: &Reader, extra: Option<&str>) -> Result<Plan> {
        let selected = match &self.select {
            Some(selection) => reader.select(selection)?,
            None => (0..reader.row_len()).collect(),
        };

        let (added_names, added_len) = match (&self.added, reader.headers()) {
            (AddedColumns::None, _) => (Vec::new(), 0),
            (AddedColumns::Names(names), Some(_)) => (names.clone(), names.len()),
            (AddedColumns::Names(_), None) => {
                return Err(CsvError::HeadersRequired(
                    "cannot add named columns to a headerless input".to_string(),
                ));
            }
            (AddedColumns::Count(_), Some(_)) => {
                return Err(CsvError::InvalidConfiguration(
                    "added columns need names when the input has headers".to_string(),
                ));
            }
            (AddedColumns::Count(count), None) => (Vec::new(), *count),
        };

        let output_fieldnames = reader.headers().map(|headers| {
            let mut names: Vec<String> = selected
                .iter()
                .map(|idx| headers.fieldnames()[*idx].clone())
                .collect();
            names.extend(extra.map(str::to_string));
            names.extend(added_names.iter().cloned());
            names
        });
        let extra_column = extra.map(|_| selected.len());
        let output_len = selected.len() + usize::from(extra.is_some()) + added_len;

        debug!(
            "Enrichment plan: {} selected column(s), {} added, output of {} column(s)",
            selected.len(),
            added_len,
            output_len
        );

        Ok(Plan {
            selected,
            added_len,
            output_fieldnames,
            extra_column,
            output_len,
        })
    }

    fn writer_builder(&self, reader: &Reader, plan: &Plan) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder.delimiter(self.delimiter.unwrap_or(reader.delimiter()));
        if let Some(policy) = self.null_bytes {
            builder.null_bytes(policy);
        }
        match &plan.output_fieldnames {
            Some(names) => builder.fieldnames(names.iter().cloned()),
            None => builder.row_len(plan.output_len),
        };
        builder
    }

    fn context(&self, reader: &Reader, plan: &Plan) -> OutputContext {
        let mut context = OutputContext::new(
            plan.output_fieldnames.clone(),
            self.delimiter.unwrap_or(reader.delimiter()),
        );
        context.selected = plan.selected.clone();
        context.end_symbol = self.end_symbol.clone();
        context
    }

    fn core<W: Write>(&self, reader: Reader, output: W, extra: Option<&str>) -> Result<Core<W>> {
        let plan = self.plan(&reader, extra)?;
        let writer = self.writer_builder(&reader, &plan).from_writer(output)?;
        Ok(Core::new(reader, writer, plan))
    }

    fn resumed_core<R>(
        &self,
        reader: Reader,
        resumer: &mut R,
        extra: Option<&str>,
        configure: impl FnOnce(&mut OutputContext, &Plan),
    ) -> Result<Core<File>>
    where
        R: crate::resumers::Resumer + ?Sized,
    {
        let plan = self.plan(&reader, extra)?;
        let mut context = self.context(&reader, &plan);
        configure(&mut context, &plan);
        let writer = self
            .writer_builder(&reader, &plan)
            .resume_with(resumer, &context)?;
        Ok(Core::new(reader, writer, plan))
    }

    pub fn build<W: Write>(&self, reader: Reader, output: W) -> Result<Enricher<W>> {
        Ok(Enricher {
            core: self.core(reader, output, None)?,
            resumer: None,
        })
    }

    pub fn build_resumable<R>(&self, reader: Reader, mut resumer: R) -> Result<Enricher<File>>
    where
        R: EnricherResumer + 'static,
    {
        let core = self.resumed_core(reader, &mut resumer, None, |_, _| {})?;
        Ok(Enricher {
            core,
            resumer: Some(Box::new(resumer)),
        })
    }

    pub fn build_indexed<W: Write>(&self, reader: Reader, output: W) -> Result<IndexedEnricher<W>> {
        Ok(IndexedEnricher {
            core: self.core(reader, output, Some(INDEX_COLUMN))?,
            resumer: None,
        })
    }

    pub fn build_indexed_resumable<R>(
        &self,
        reader: Reader,
        mut resumer: R,
    ) -> Result<IndexedEnricher<File>>
    where
        R: IndexedEnricherResumer + 'static,
    {
        let core = self.resumed_core(reader, &mut resumer, Some(INDEX_COLUMN), |ctx, plan| {
            ctx.index_column = plan.extra_column;
        })?;
        Ok(IndexedEnricher {
            core,
            resumer: Some(Box::new(resumer)),
        })
    }

    pub fn build_batch<W: Write>(&self, reader: Reader, output: W) -> Result<BatchEnricher<W>> {
        Ok(BatchEnricher {
            core: self.core(reader, output, Some(CURSOR_COLUMN))?,
            resumer: None,
            end_symbol: self.end_symbol.clone(),
        })
    }

    pub fn build_batch_resumable(
        &self,
        reader: Reader,
        mut resumer: BatchResumer,
    ) -> Result<BatchEnricher<File>> {
        let core = self.resumed_core(reader, &mut resumer, Some(CURSOR_COLUMN), |ctx, plan| {
            ctx.cursor_column = plan.extra_column;
        })?;
        Ok(BatchEnricher {
            core,
            resumer: Some(resumer),
            end_symbol: self.end_symbol.clone(),
        })
    }
}

struct Core<W: Write> {
    reader: Reader,
    writer: Writer<W>,
    selected: Vec<usize>,
    added_len: usize,
    output_fieldnames: Option<Vec<String>>,
    next_index: usize,
    finished: bool,
}

impl<W: Write> Core<W> {
    fn new(reader: Reader, writer: Writer<W>, plan: Plan) -> Self {
        Core {
            reader,
            writer,
            selected: plan.selected,
            added_len: plan.added_len,
            output_fieldnames: plan.output_fieldnames,
            next_index: 0,
            finished: false,
        }
    }

    /// Next input row with its 0-based position in the input.
    fn next_input(&mut self) -> Option<Result<(usize, Row)>> {
        let row = self.reader.next()?;
        let index = self.next_index;
        self.next_index += 1;
        Some(row.map(|row| (index, row)))
    }

    /// True the first time the input is found exhausted.
    fn mark_finished(&mut self) -> bool {
        !std::mem::replace(&mut self.finished, true)
    }

    fn emit<S: AsRef<str>>(&mut self, row: &[String], extra: Option<&str>, addendum: &[S]) -> Result<()> {
        let mut cells: Vec<&str> =
            Vec::with_capacity(self.selected.len() + 1 + addendum.len());
        for &idx in &self.selected {
            let cell = row.get(idx).ok_or(CsvError::RowLengthMismatch {
                expected: self.reader.row_len(),
                actual: row.len(),
            })?;
            cells.push(cell);
        }
        cells.extend(extra);
        cells.extend(addendum.iter().map(AsRef::as_ref));
        self.writer.write_row(cells)
    }

    fn padding(&self) -> Vec<&'static str> {
        vec![""; self.added_len]
    }

    fn output_headers(&self) -> Option<Headers> {
        self.output_fieldnames
            .as_ref()
            .map(|names| Headers::new(names.iter().cloned()))
    }
}

/// Sequential enricher.
pub struct Enricher<W: Write> {
    core: Core<W>,
    resumer: Option<Box<dyn EnricherResumer>>,
}

impl<W: Write> Enricher<W> {
    pub fn fieldnames(&self) -> Option<&[String]> {
        self.core.reader.fieldnames()
    }

    pub fn headers(&self) -> Option<&Headers> {
        self.core.reader.headers()
    }

    pub fn output_fieldnames(&self) -> Option<&[String]> {
        self.core.output_fieldnames.as_deref()
    }

    pub fn output_headers(&self) -> Option<Headers> {
        self.core.output_headers()
    }

    /// Input columns copied to the output, in output order.
    pub fn selected(&self) -> &[usize] {
        &self.core.selected
    }

    pub fn total(&self) -> Option<usize> {
        self.core.reader.total()
    }

    pub fn write_row<I, S>(&mut self, row: &[String], addendum: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addendum: Vec<S> = addendum.into_iter().collect();
        self.core.emit(row, None, &addendum)
    }

    /// Writes the row with every appended column left empty.
    pub fn write_row_padded(&mut self, row: &[String]) -> Result<()> {
        let padding = self.core.padding();
        self.core.emit(row, None, &padding)
    }

    pub fn write_record<T: TabularRecord>(&mut self, row: &[String], record: &T) -> Result<()> {
        self.core.emit(row, None, &record.as_csv_row())
    }

    /// Appends the concatenation of several cell sequences.
    pub fn write_concat<I, P, S>(&mut self, row: &[String], parts: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.write_row(row, parts.into_iter().flatten())
    }

    /// Writes one output row per addendum.
    pub fn write_batch<I, A, S>(&mut self, row: &[String], addenda: I) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addendum in addenda {
            self.write_row(row, addendum)?;
        }
        Ok(())
    }

    /// Cells of one input column for every remaining (unskipped) row.
    pub fn cells<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<String>> + '_> {
        let key = key.into();
        let idx = self
            .core
            .reader
            .column_index(&key)
            .map_err(|err| err.into_missing_column(&key.to_string()))?;
        Ok(self.column_cells(idx))
    }

    pub fn cells_with_rows<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<(Row, String)>> + '_> {
        let key = key.into();
        let idx = self
            .core
            .reader
            .column_index(&key)
            .map_err(|err| err.into_missing_column(&key.to_string()))?;
        Ok(self.column_rows(idx))
    }

    fn column_cells(&mut self, idx: usize) -> impl Iterator<Item = Result<String>> + '_ {
        self.column_rows(idx).map(|item| item.map(|(_, cell)| cell))
    }

    fn column_rows(&mut self, idx: usize) -> impl Iterator<Item = Result<(Row, String)>> + '_ {
        self.by_ref().map(move |row| {
            row.map(|row| {
                let cell = row[idx].clone();
                (row, cell)
            })
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.core.writer.flush()
    }

    pub fn into_inner(self) -> Result<W> {
        self.core.writer.into_inner()
    }
}

impl<W: Write> Iterator for Enricher<W> {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.core.next_input() else {
                if self.core.mark_finished()
                    && let Some(resumer) = self.resumer.as_mut()
                    && let Err(err) = resumer.finish()
                {
                    return Some(Err(err));
                }
                return None;
            };
            let (index, row) = match item {
                Ok(pair) => pair,
                Err(err) => return Some(Err(err)),
            };
            if let Some(resumer) = self.resumer.as_mut() {
                match resumer.filter_row(index, &row) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            return Some(Ok(row));
        }
    }
}

/// Enricher whose output carries the input row index, so rows may be
/// written in any order.
pub struct IndexedEnricher<W: Write> {
    core: Core<W>,
    resumer: Option<Box<dyn IndexedEnricherResumer>>,
}

impl<W: Write> IndexedEnricher<W> {
    pub fn fieldnames(&self) -> Option<&[String]> {
        self.core.reader.fieldnames()
    }

    pub fn output_fieldnames(&self) -> Option<&[String]> {
        self.core.output_fieldnames.as_deref()
    }

    pub fn output_headers(&self) -> Option<Headers> {
        self.core.output_headers()
    }

    pub fn total(&self) -> Option<usize> {
        self.core.reader.total()
    }

    pub fn write_row<I, S>(&mut self, index: usize, row: &[String], addendum: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addendum: Vec<S> = addendum.into_iter().collect();
        self.core.emit(row, Some(&index.to_string()), &addendum)
    }

    pub fn write_row_padded(&mut self, index: usize, row: &[String]) -> Result<()> {
        let padding = self.core.padding();
        self.core.emit(row, Some(&index.to_string()), &padding)
    }

    pub fn write_record<T: TabularRecord>(
        &mut self,
        index: usize,
        row: &[String],
        record: &T,
    ) -> Result<()> {
        self.core
            .emit(row, Some(&index.to_string()), &record.as_csv_row())
    }

    pub fn write_concat<I, P, S>(&mut self, index: usize, row: &[String], parts: I) -> Result<()>
    where
        I: IntoIterator<Item = P>,
        P: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.write_row(index, row, parts.into_iter().flatten())
    }

    pub fn write_batch<I, A, S>(&mut self, index: usize, row: &[String], addenda: I) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for addendum in addenda {
            self.write_row(index, row, addendum)?;
        }
        Ok(())
    }

    /// Cells of one input column, each paired with its input index.
    pub fn cells<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<(usize, String)>> + '_> {
        let idx = self.input_column(key.into())?;
        Ok(self
            .column_rows(idx)
            .map(|item| item.map(|(index, _, cell)| (index, cell))))
    }

    pub fn cells_with_rows<K: Into<ColumnKey>>(
        &mut self,
        key: K,
    ) -> Result<impl Iterator<Item = Result<(usize, Row, String)>> + '_> {
        let idx = self.input_column(key.into())?;
        Ok(self.column_rows(idx))
    }

    fn input_column(&self, key: ColumnKey) -> Result<usize> {
        self.core
            .reader
            .column_index(&key)
            .map_err(|err| err.into_missing_column(&key.to_string()))
    }

    fn column_rows(
        &mut self,
        idx: usize,
    ) -> impl Iterator<Item = Result<(usize, Row, String)>> + '_ {
        self.by_ref().map(move |item| {
            item.map(|(index, row)| {
                let cell = row[idx].clone();
                (index, row, cell)
            })
        })
    }

    pub fn flush(&mut self) -> Result<()> {
        self.core.writer.flush()
    }

    pub fn into_inner(self) -> Result<W> {
        self.core.writer.into_inner()
    }
}

impl<W: Write> Iterator for IndexedEnricher<W> {
    type Item = Result<(usize, Row)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.core.next_input() else {
                if self.core.mark_finished()
                    && let Some(resumer) = self.resumer.as_mut()
                    && let Err(err) = resumer.finish()
                {
                    return Some(Err(err));
                }
                return None;
            };
            let (index, row) = match item {
                Ok(pair) => pair,
                Err(err) => return Some(Err(err)),
            };
            if let Some(resumer) = self.resumer.as_mut() {
                match resumer.filter_row(index, &row) {
                    Ok(true) => continue,
                    Ok(false) => {}
                    Err(err) => return Some(Err(err)),
                }
            }
            return Some(Ok((index, row)));
        }
    }
}

/// Input row handed out by a [`BatchEnricher`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchRow {
    pub index: usize,
    pub row: Row,
    /// Interrupted batch to continue from, when resuming.
    pub resume: Option<Batch>,
}

/// Enricher for paginated work: each page is written with a cursor so an
/// interrupted run can continue from the last checkpoint.
pub struct BatchEnricher<W: Write> {
    core: Core<W>,
    resumer: Option<BatchResumer>,
    end_symbol: String,
}

impl<W: Write> BatchEnricher<W> {
    pub fn fieldnames(&self) -> Option<&[String]> {
        self.core.reader.fieldnames()
    }

    pub fn output_fieldnames(&self) -> Option<&[String]> {
        self.core.output_fieldnames.as_deref()
    }

    pub fn output_headers(&self) -> Option<Headers> {
        self.core.output_headers()
    }

    pub fn end_symbol(&self) -> &str {
        &self.end_symbol
    }

    /// Writes one page: one row per addendum, the cursor cell being empty
    /// except on the last row, which gets `cursor` or the end symbol when
    /// the batch is complete. An empty page still writes one padded row.
    pub fn write_batch<I, A, S>(&mut self, row: &[String], addenda: I, cursor: Option<&str>) -> Result<()>
    where
        I: IntoIterator<Item = A>,
        A: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let last_cursor = cursor.unwrap_or(self.end_symbol.as_str()).to_string();
        let addenda: Vec<Vec<S>> = addenda
            .into_iter()
            .map(|addendum| addendum.into_iter().collect())
            .collect();

        if addenda.is_empty() {
            let padding = self.core.padding();
            return self.core.emit(row, Some(&last_cursor), &padding);
        }

        let last = addenda.len() - 1;
        for (i, addendum) in addenda.iter().enumerate() {
            let cursor_cell = if i == last { last_cursor.as_str() } else { "" };
            self.core.emit(row, Some(cursor_cell), addendum)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.core.writer.flush()
    }

    pub fn into_inner(self) -> Result<W> {
        self.core.writer.into_inner()
    }
}

impl<W: Write> Iterator for BatchEnricher<W> {
    type Item = Result<BatchRow>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let Some(item) = self.core.next_input() else {
                if self.core.mark_finished()
                    && let Some(resumer) = self.resumer.as_mut()
                    && let Err(err) = resumer.finish()
                {
                    return Some(Err(err));
                }
                return None;
            };
            let (index, row) = match item {
                Ok(pair) => pair,
                Err(err) => return Some(Err(err)),
            };
            let resume = match self.resumer.as_mut() {
                None => None,
                Some(resumer) => match resumer.filter_batch_row(&row) {
                    Ok(BatchFilter::Skip) => continue,
                    Ok(BatchFilter::Offer(batch)) => batch,
                    Err(err) => return Some(Err(err)),
                },
            };
            return Some(Ok(BatchRow { index, row, resume }));
        }
    }
}
