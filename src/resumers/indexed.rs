use std::path::Path;

use log::debug;

use crate::{
    error::{CsvError, Result},
    range_set::ContiguousRangeSet,
};

use super::{
    IndexedEnricherResumer, OutputContext, Resumer, ResumerBase, ResumerEvent, RowFilter,
    validate_output_header,
};

/// Skips every input index already present in the output's `index` column,
/// whatever order the rows were written in.
#[derive(Debug)]
pub struct IndexedResumer {
    base: ResumerBase,
    done: ContiguousRangeSet,
}

impl IndexedResumer {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(IndexedResumer {
            base: ResumerBase::new(path)?,
            done: ContiguousRangeSet::new(),
        })
    }

    /// Indices found in the existing output.
    pub fn already_done(&self) -> &ContiguousRangeSet {
        &self.done
    }
}

impl Resumer for IndexedResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)?;
        let index_column = context.index_column.ok_or_else(|| {
            CsvError::InvalidConfiguration("the output has no index column".to_string())
        })?;
        let reader = context.reader_builder().from_path(self.base.path())?;
        let mut done = ContiguousRangeSet::new();
        for (row_number, row) in reader.enumerate() {
            let row = row?;
            self.base.emit(ResumerEvent::OutputRowRead, &row);
            let cell = row.get(index_column).map(String::as_str).unwrap_or_default();
            let index = cell
                .parse::<usize>()
                .map_err(|_| CsvError::CorruptedIndexColumn {
                    value: cell.to_string(),
                    row: row_number,
                })?;
            done.add(index);
        }
        debug!(
            "Output {:?} already covers {} index(es): {done}",
            self.base.path(),
            done.len()
        );
        self.done = done;
        Ok(())
    }
}

impl RowFilter for IndexedResumer {
    fn filter_row(&mut self, index: usize, row: &[String]) -> Result<bool> {
        if !self.done.contains(index) {
            return Ok(false);
        }
        self.base.emit(ResumerEvent::InputRowFilter, row);
        Ok(true)
    }
}

impl IndexedEnricherResumer for IndexedResumer {}
