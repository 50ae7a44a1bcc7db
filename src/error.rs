use thiserror::Error;

/// Convenience result type used across the library.
pub type Result<T> = std::result::Result<T, CsvError>;

/// Every failure the toolkit can report. None of these are swallowed: the
/// only soft outcomes are an empty iteration and the `None` returned by the
/// reverse reader's `last_*` helpers.
#[derive(Debug, Error)]
pub enum CsvError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// The source holds no bytes at all, not even a header row.
    #[error("the input is empty")]
    EmptyFile,

    /// A header-dependent operation was attempted on a headerless source.
    #[error("headers are required: {0}")]
    HeadersRequired(String),

    /// A column configured on a reader, writer or resumer does not exist.
    #[error("missing column '{column}'")]
    MissingColumn { column: String },

    #[error("unknown column '{name}'")]
    UnknownColumn { name: String },

    #[error("column '{name}' has {available} occurrence(s), cannot get occurrence {occurrence}")]
    OccurrenceOutOfRange {
        name: String,
        occurrence: usize,
        available: usize,
    },

    #[error("column {index} is out of range (row has {len} column(s))")]
    ColumnOutOfRange { index: usize, len: usize },

    #[error("invalid selection '{selection}': {message} near '{fragment}'")]
    SelectionSyntax {
        selection: String,
        fragment: String,
        message: String,
    },

    #[error("row length mismatch: expected {expected} cell(s), got {actual}")]
    RowLengthMismatch { expected: usize, actual: usize },

    /// A cell holds a NUL byte and the configured policy forbids it.
    #[error(
        "cell {column} contains a null byte that this sink cannot carry; configure NullBytes::Strip to remove it"
    )]
    NullByte { column: usize },

    #[error("failed to decode text with encoding {0}")]
    Decode(&'static str),

    #[error("output cannot be resumed: {0}")]
    NotResumable(String),

    /// Stored resume state cannot be reconciled with the fresh input.
    #[error("resume error: {0}")]
    ResumeError(String),

    #[error("corrupted index column: cannot parse '{value}' on output row {row}")]
    CorruptedIndexColumn { value: String, row: usize },

    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
}

impl CsvError {
    pub(crate) fn syntax(selection: &str, fragment: &str, message: &str) -> Self {
        CsvError::SelectionSyntax {
            selection: selection.to_string(),
            fragment: fragment.to_string(),
            message: message.to_string(),
        }
    }

    /// Header lookups report `UnknownColumn`; callers configuring a named
    /// column surface it as `MissingColumn` instead.
    pub(crate) fn into_missing_column(self, column: &str) -> Self {
        match self {
            CsvError::UnknownColumn { .. }
            | CsvError::OccurrenceOutOfRange { .. }
            | CsvError::ColumnOutOfRange { .. } => CsvError::MissingColumn {
                column: column.to_string(),
            },
            other => other,
        }
    }
}
