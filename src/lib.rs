pub mod cli;
pub mod commands;
pub mod defaults;
pub mod enricher;
pub mod error;
pub mod headers;
pub mod io_utils;
pub mod range_set;
pub mod reader;
pub mod record;
pub mod resumers;
pub mod reverse_reader;
pub mod writer;

use std::{env, sync::OnceLock};

use anyhow::Result;
use clap::Parser;
use log::LevelFilter;

use crate::cli::{Cli, Commands};

pub use crate::{
    defaults::NullBytes,
    enricher::{BatchEnricher, BatchRow, Enricher, EnricherBuilder, IndexedEnricher},
    error::CsvError,
    headers::{ColumnKey, Headers, Projected, RowView, Selection, Selector, Template},
    range_set::ContiguousRangeSet,
    reader::{Multiplex, Reader, ReaderBuilder, Row},
    record::{SerializerOptions, TabularRecord, ToCell},
    resumers::{
        BasicResumer, BatchResumer, IndexedResumer, LastCellComparisonResumer, LastCellResumer,
        Resumer, ResumerEvent, RowCountResumer,
    },
    reverse_reader::{Batch, ReverseReader, ReverseReaderBuilder},
    writer::{Writer, WriterBuilder},
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_enrich", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Count(args) => commands::count(&args),
        Commands::Select(args) => commands::select(&args),
        Commands::Reverse(args) => commands::reverse(&args),
        Commands::LastCell(args) => commands::last_cell(&args),
        Commands::LastBatch(args) => commands::last_batch(&args),
    }
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}
