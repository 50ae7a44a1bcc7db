use std::path::Path;

use log::debug;

use crate::{error::Result, headers::ColumnKey};

use super::{OutputContext, Resumer, ResumerBase, WriterResumer, validate_output_header};

/// Remembers the last value written in one column so the caller can restart
/// its own upstream from there.
#[derive(Debug)]
pub struct LastCellResumer {
    base: ResumerBase,
    column: ColumnKey,
    state: Option<String>,
}

impl LastCellResumer {
    pub fn new<P: AsRef<Path>, K: Into<ColumnKey>>(path: P, column: K) -> Result<Self> {
        Ok(LastCellResumer {
            base: ResumerBase::new(path)?,
            column: column.into(),
            state: None,
        })
    }

    pub fn get_state(&self) -> Option<&str> {
        self.state.as_deref()
    }

    pub fn pop_state(&mut self) -> Option<String> {
        self.state.take()
    }
}

impl Resumer for LastCellResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)?;
        let idx = context.output_column(&self.column)?;
        let state = context
            .reverse_reader_builder()
            .last_cell(self.base.path(), idx)?;
        debug!("Last '{}' written to {:?}: {state:?}", self.column, self.base.path());
        self.state = state;
        Ok(())
    }
}

impl WriterResumer for LastCellResumer {}
