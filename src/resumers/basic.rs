use std::path::Path;

use crate::error::Result;

use super::{OutputContext, Resumer, ResumerBase, WriterResumer, validate_output_header};

/// Appends to an existing output without writing its header again.
#[derive(Debug)]
pub struct BasicResumer {
    base: ResumerBase,
}

impl BasicResumer {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        Ok(BasicResumer {
            base: ResumerBase::new(path)?,
        })
    }
}

impl Resumer for BasicResumer {
    fn base(&self) -> &ResumerBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut ResumerBase {
        &mut self.base
    }

    fn get_insights_from_output(&mut self, context: &OutputContext) -> Result<()> {
        validate_output_header(self.base.path(), context)
    }
}

impl WriterResumer for BasicResumer {}
