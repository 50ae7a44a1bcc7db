use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(author, version, about = "Stream, enrich and tail CSV files", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Count the data rows of a CSV file
    Count(CountArgs),
    /// Copy a selection of columns to a new CSV file
    Select(SelectArgs),
    /// Write the rows of a CSV file last row first
    Reverse(ReverseArgs),
    /// Print the last value of a column
    LastCell(LastCellArgs),
    /// Print the last batch of rows sharing a value, as JSON
    LastBatch(LastBatchArgs),
}

/// Options shared by every command reading a CSV input.
#[derive(Debug, Args)]
pub struct InputArgs {
    /// Input CSV file (`.gz` files are decompressed)
    #[arg(short = 'i', long = "input")]
    pub input: PathBuf,
    /// CSV delimiter character (supports ',', 'tab', ';', '|'); guessed when omitted
    #[arg(long, value_parser = parse_delimiter)]
    pub delimiter: Option<u8>,
    /// Treat the first row as data
    #[arg(long = "no-headers")]
    pub no_headers: bool,
}

#[derive(Debug, Args)]
pub struct CountArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Give up once this many rows have been counted
    #[arg(long = "max-rows")]
    pub max_rows: Option<usize>,
}

#[derive(Debug, Args)]
pub struct SelectArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Columns to keep, e.g. `name,3-5,"Date - Opening",!id`
    #[arg(short = 'C', long = "columns")]
    pub columns: String,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Continue an interrupted run by skipping rows already in the output
    #[arg(long, requires = "output")]
    pub resume: bool,
    /// Character encoding of the input file (defaults to utf-8)
    #[arg(long = "input-encoding")]
    pub input_encoding: Option<String>,
}

#[derive(Debug, Args)]
pub struct ReverseArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Output CSV file (stdout if omitted)
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,
    /// Size of the chunks read backward, in bytes
    #[arg(long = "chunk-size", default_value_t = crate::reverse_reader::DEFAULT_CHUNK_SIZE)]
    pub chunk_size: usize,
}

#[derive(Debug, Args)]
pub struct LastCellArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Column to read (a name, or a 1-based position with --no-headers)
    #[arg(short = 'c', long = "column")]
    pub column: String,
}

#[derive(Debug, Args)]
pub struct LastBatchArgs {
    #[command(flatten)]
    pub input: InputArgs,
    /// Column holding the batch value
    #[arg(long = "value")]
    pub value: String,
    /// Column holding the cursor checkpoints
    #[arg(long = "cursor")]
    pub cursor: String,
    /// Cursor value marking a finished batch
    #[arg(long = "end-symbol", default_value = crate::reverse_reader::DEFAULT_END_SYMBOL)]
    pub end_symbol: String,
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err("Delimiter must be a single character".to_string());
            }
            if !first.is_ascii() {
                return Err("Delimiter must be ASCII".to_string());
            }
            Ok(first as u8)
        }
    }
}
