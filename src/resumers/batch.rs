use std::{fs::OpenOptions, path::Path};

use log::{debug, warn};

use crate::{
    error::{CsvError, Result},
    headers::ColumnKey,
    reverse_reader::Batch,
};

use super::{OutputContext, Resumer, ResumerBase, ResumerEvent, validate_output_header};

/// Decision taken for one input row while resuming a batch enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchFilter {
    Skip,
    /// Process the row; carries the interrupted batch for the row that
    /// owns it.
    Offer(Option<Batch>),
}

/// Resumes paginated enrichments whose output rows carry a cursor column.
///
/// The last batch of the output tells which input row was being processed.
/// Rows written after its last cursor checkpoint belong to a page that was
/// not fully flushed; they are cut from the output and regenerated once the
/// input reaches that batch. The output is left untouched otherwise.
#[derive(Debug)]
pub struct BatchResumer {
    base: ResumerBase,
    value_column: ColumnKey,
    input_column: usize,
    batch: Option<Batch>,
    /// Offset where the partially flushed page starts.
    truncate_at: Option<u64>,
    searching: bool,
}

impl BatchResumer {
    /// `value_column` names the output column, copied from the input, whose
    /// value identifies a batch.
    pub fn new<P: AsRef<Path>, K: Into<ColumnKey>>(path: P, value_column: K) -> Result<Self> {
        Ok(BatchResumer {
            base: ResumerBase::new(path)?,
            value_column: value_column.into(),
            input_column: 0,
            batch: None,
            truncate_at: None,
            searching: false,
        })
    }

    /// The interrupted batch, until it is handed back by
    /// [`BatchResumer::filter_batch_row`].
    pub fn batch(&self) -> Option<&Batch> {
        self.batch.as_ref()
    }

    pub fn filter_batch_row(&mut self, row: &[String]) -> Result<BatchFilter> {
        if !self.searching {
            return Ok(BatchFilter::Offer(None));
        }
        let Some(batch) = self.batch.as_ref() else {
            return Ok(BatchFilter::Offer(None));
        };
        let value = row.get(self.input_column).map(String::as_str).unwrap_or_default();
        if value != batch.value {
            self.base.emit(ResumerEvent::InputRowFilter, row);
            return Ok(BatchFilter::Skip);
        }
        let finished = batch.finished;
        self.searching = false;
        self.drop_partial_page()?;
        if finished {
            self.base.emit(ResumerEvent::InputRowFilter, row);
            self.batch = None;
            return Ok(BatchFilter::Skip);
        }
        Ok(BatchFilter::Offer(self.batch.take()))
    }

    fn drop_partial_page(&mut self) -> Result<()> {
        let Some(offset) = self.truncate_at.take() else {
            return Ok(());
        };
        if let Some(batch) = self.batch.as_mut() {
            warn!(
                "Dropping {} row(s) of batch '{}' written after its last checkpoint",
                batch.rows.len(),
                batch.value
            );
            batch.rows.clear();
        }
        OpenOptions::new()
            .write(true)
            .open(self.base.path())?
            .set_len(offset)?;
        Ok(())
    }

    pub fn finish(&mut self) -> Result<()> {
        if self.searching {
            let value = self
                .batch
                .as_ref()
                .map(|batch| batch.value.clone())
                .unwrap_or_default();
            return Err(CsvError::ResumeError(format!(
                "the input never reached the last written batch '{value}'"
            )));
        }
        Ok(())
    }
}

impl Resumer for BatchResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)?;
        let value_idx = context.output_column(&self.value_column)?;
        self.input_column = context.input_column(value_idx)?;
        let cursor_idx = context.cursor_column.ok_or_else(|| {
            CsvError::InvalidConfiguration("the output has no cursor column".to_string())
        })?;

        let located = context.reverse_reader_builder().locate_last_batch(
            self.base.path(),
            ColumnKey::Index(value_idx),
            ColumnKey::Index(cursor_idx),
            &context.end_symbol,
        )?;
        let Some((batch, partial_from)) = located else {
            debug!("Output {:?} holds no batch yet", self.base.path());
            return Ok(());
        };
        for row in &batch.rows {
            self.base.emit(ResumerEvent::OutputRowRead, row);
        }

        debug!(
            "Resuming batch '{}' (finished: {}, cursor: {:?})",
            batch.value, batch.finished, batch.cursor
        );
        self.batch = Some(batch);
        self.truncate_at = partial_from;
        self.searching = true;
        Ok(())
    }
}
