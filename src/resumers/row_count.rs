use std::path::Path;

use log::debug;

use crate::error::{CsvError, Result};

use super::{
    EnricherResumer, OutputContext, Resumer, ResumerBase, ResumerEvent, RowFilter,
    validate_output_header,
};

/// Skips as many input rows as the output already holds.
#[derive(Debug)]
pub struct RowCountResumer {
    base: ResumerBase,
    row_count: usize,
    skipped: usize,
}

impl RowCountResumer {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(RowCountResumer {
            base: ResumerBase::new(path)?,
            row_count: 0,
            skipped: 0,
        })
    }

    /// Rows found in the existing output.
    pub fn row_count(&self) -> usize {
        self.row_count
    }
}

impl Resumer for RowCountResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)?;
        let reader = context.reader_builder().from_path(self.base.path())?;
        let mut count = 0usize;
        for row in reader {
            let row = row?;
            self.base.emit(ResumerEvent::OutputRowRead, &row);
            count += 1;
        }
        debug!("Output {:?} already holds {count} row(s)", self.base.path());
        self.row_count = count;
        self.skipped = 0;
        Ok(())
    }
}

impl RowFilter for RowCountResumer {
    fn filter_row(&mut self, _index: usize, row: &[String]) -> Result<bool> {
        if self.skipped >= self.row_count {
            return Ok(false);
        }
        self.skipped += 1;
        self.base.emit(ResumerEvent::InputRowFilter, row);
        Ok(true)
    }

    fn finish(&mut self) -> Result<()> {
        if self.skipped < self.row_count {
            return Err(CsvError::ResumeError(format!(
                "output holds {} row(s) but the input only has {}",
                self.row_count, self.skipped
            )));
        }
        Ok(())
    }
}

impl EnricherResumer for RowCountResumer {}
