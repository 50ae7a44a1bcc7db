use std::path::Path;

use log::debug;

use crate::{
    error::{CsvError, Result},
    headers::ColumnKey,
};

use super::{
    EnricherResumer, OutputContext, Resumer, ResumerBase, ResumerEvent, RowFilter,
    validate_output_header,
};

/// Skips input rows until the one whose cell matches the last cell written
/// in the output, then skips that one too.
#[derive(Debug)]
pub struct LastCellComparisonResumer {
    base: ResumerBase,
    column: ColumnKey,
    last_cell: Option<String>,
    input_column: usize,
    matched: bool,
}

impl LastCellComparisonResumer {
    /// `column` names an output column copied from the input.
    pub fn new<P: AsRef<Path>, K: Into<ColumnKey>>(path: P, column: K) -> Result<Self> {
        Ok(LastCellComparisonResumer {
            base: ResumerBase::new(path)?,
            column: column.into(),
            last_cell: None,
            input_column: 0,
            matched: true,
        })
    }

    pub fn last_cell(&self) -> Option<&str> {
        self.last_cell.as_deref()
    }
}

impl Resumer for LastCellComparisonResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)?;
        let output_idx = context.output_column(&self.column)?;
        self.input_column = context.input_column(output_idx)?;
        self.last_cell = context
            .reverse_reader_builder()
            .last_cell(self.base.path(), output_idx)?;
        self.matched = self.last_cell.is_none();
        debug!(
            "Resuming {:?} after '{}' = {:?}",
            self.base.path(),
            self.column,
            self.last_cell
        );
        Ok(())
    }
}

impl RowFilter for LastCellComparisonResumer {
    fn filter_row(&mut self, _index: usize, row: &[String]) -> Result<bool> {
        if self.matched {
            return Ok(false);
        }
        self.base.emit(ResumerEvent::InputRowFilter, row);
        if row.get(self.input_column).map(String::as_str) == self.last_cell.as_deref() {
            self.matched = true;
        }
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        if !self.matched {
            return Err(CsvError::ResumeError(format!(
                "the input never reached the last written '{}' value {:?}",
                self.column, self.last_cell
            )));
        }
        Ok(())
    }
}

impl EnricherResumer for LastCellComparisonResumer {}
