//! Process-wide default configuration.
//!
//! Builders snapshot these values when they are created, so changing a
//! default only affects readers and writers built afterwards. Tests that
//! touch them must call [`reset_defaults`] when done.

use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// What to do with NUL bytes met while reading or writing cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NullBytes {
    /// Pass them through untouched.
    #[default]
    Keep,
    /// Remove them.
    Strip,
    /// Fail with [`crate::CsvError::NullByte`].
    Reject,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Defaults {
    pub prebuffer_bytes: Option<usize>,
    pub null_bytes_on_read: NullBytes,
    pub null_bytes_on_write: NullBytes,
}

static DEFAULTS: RwLock<Defaults> = RwLock::new(Defaults {
    prebuffer_bytes: None,
    null_bytes_on_read: NullBytes::Keep,
    null_bytes_on_write: NullBytes::Keep,
});

/// Snapshot of the current defaults.
pub fn defaults() -> Defaults {
    match DEFAULTS.read() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

fn update(f: impl FnOnce(&mut Defaults)) {
    let mut guard = match DEFAULTS.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard);
}

pub fn set_default_prebuffer_bytes(bytes: Option<usize>) {
    update(|d| d.prebuffer_bytes = bytes);
}

pub fn set_default_null_bytes_on_read(policy: NullBytes) {
    update(|d| d.null_bytes_on_read = policy);
}

pub fn set_default_null_bytes_on_write(policy: NullBytes) {
    update(|d| d.null_bytes_on_write = policy);
}

pub fn reset_defaults() {
    update(|d| *d = Defaults::default());
}
