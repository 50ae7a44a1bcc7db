//! Handlers behind the `csv-enrich` subcommands.

use std::{
    io::{self, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use log::{debug, info};

use crate::{
    cli::{CountArgs, InputArgs, LastBatchArgs, LastCellArgs, ReverseArgs, SelectArgs},
    enricher::EnricherBuilder,
    headers::{ColumnKey, Selection, Selector},
    io_utils,
    reader::ReaderBuilder,
    resumers::RowCountResumer,
    reverse_reader::ReverseReaderBuilder,
    writer::WriterBuilder,
};

fn reader_builder(args: &InputArgs) -> ReaderBuilder {
    let mut builder = ReaderBuilder::new();
    builder.no_headers(args.no_headers);
    if let Some(delimiter) = args.delimiter {
        builder.delimiter(delimiter);
    }
    builder
}

fn reverse_reader_builder(args: &InputArgs) -> ReverseReaderBuilder {
    let mut builder = ReverseReaderBuilder::new();
    builder.no_headers(args.no_headers);
    if let Some(delimiter) = args.delimiter {
        builder.delimiter(delimiter);
    }
    builder
}

/// Parses a single column reference with the selection syntax.
fn column_key(spec: &str) -> Result<ColumnKey> {
    let selection = Selection::parse(spec).with_context(|| format!("Parsing column '{spec}'"))?;
    match (selection.is_inverted(), selection.selectors()) {
        (false, [Selector::Single(key)]) => Ok(key.clone()),
        (false, [Selector::Indexed { name, occurrence }]) => {
            Ok(ColumnKey::Nth(name.clone(), *occurrence))
        }
        _ => Err(anyhow!("'{spec}' must designate exactly one column")),
    }
}

fn output_sink(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => io_utils::open_output(path)
            .with_context(|| format!("Opening output {path:?}")),
        None => Ok(Box::new(io::stdout())),
    }
}

pub fn count(args: &CountArgs) -> Result<()> {
    let path = &args.input.input;
    let count = reader_builder(&args.input)
        .count(path, args.max_rows)
        .with_context(|| format!("Counting rows of {path:?}"))?;
    match count {
        Some(count) => {
            info!("{path:?} holds {count} row(s)");
            println!("{count}");
        }
        None => {
            let max_rows = args.max_rows.unwrap_or_default();
            info!("{path:?} holds more than {max_rows} row(s)");
            println!(">{max_rows}");
        }
    }
    Ok(())
}

pub fn select(args: &SelectArgs) -> Result<()> {
    let path = &args.input.input;
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref())?;
    let reader = reader_builder(&args.input)
        .encoding(encoding)
        .from_path(path)
        .with_context(|| format!("Opening {path:?}"))?;
    info!(
        "Selecting '{}' from '{}' (delimiter '{}')",
        args.columns,
        path.display(),
        crate::printable_delimiter(reader.delimiter())
    );

    let mut builder = EnricherBuilder::new();
    builder.select(&args.columns);

    let written = match (&args.output, args.resume) {
        (Some(output), true) => {
            let resumer = RowCountResumer::new(output)?;
            let mut enricher = builder
                .build_resumable(reader, resumer)
                .with_context(|| format!("Resuming {output:?}"))?;
            let mut written = 0usize;
            while let Some(row) = enricher.next() {
                enricher.write_row_padded(&row?)?;
                written += 1;
            }
            enricher.flush()?;
            written
        }
        (output, _) => {
            let sink = output_sink(output.as_deref())?;
            let mut enricher = builder
                .build(reader, sink)
                .with_context(|| format!("Selecting '{}'", args.columns))?;
            let mut written = 0usize;
            while let Some(row) = enricher.next() {
                enricher.write_row_padded(&row?)?;
                written += 1;
            }
            enricher.flush()?;
            written
        }
    };
    info!("Wrote {written} row(s)");
    Ok(())
}

pub fn reverse(args: &ReverseArgs) -> Result<()> {
    let path = &args.input.input;
    let mut reader = reverse_reader_builder(&args.input)
        .chunk_size(args.chunk_size)
        .from_path(path)
        .with_context(|| format!("Opening {path:?} for reverse reading"))?;
    let mut builder = WriterBuilder::new();
    builder.delimiter(reader.delimiter());
    if let Some(fieldnames) = reader.fieldnames() {
        builder.fieldnames(fieldnames.iter().cloned());
    }
    let mut writer = builder.from_writer(output_sink(args.output.as_deref())?)?;
    let mut rows = 0usize;
    for row in reader.by_ref() {
        writer
            .write_row(row.with_context(|| format!("Reading {path:?} backward"))?)
            .context("Writing reversed row")?;
        rows += 1;
    }
    writer.flush()?;
    info!("Reversed {rows} row(s) of '{}'", path.display());
    Ok(())
}

pub fn last_cell(args: &LastCellArgs) -> Result<()> {
    let path = &args.input.input;
    let key = column_key(&args.column)?;
    debug!("Looking up the last '{key}' of {path:?}");
    let value = reverse_reader_builder(&args.input)
        .last_cell(path, key)
        .with_context(|| format!("Reading the last '{}' of {path:?}", args.column))?;
    if let Some(value) = value {
        println!("{value}");
    }
    Ok(())
}

pub fn last_batch(args: &LastBatchArgs) -> Result<()> {
    let path = &args.input.input;
    let value = column_key(&args.value)?;
    let cursor = column_key(&args.cursor)?;
    let batch = reverse_reader_builder(&args.input)
        .last_batch(path, value, cursor, &args.end_symbol)
        .with_context(|| format!("Reading the last batch of {path:?}"))?;
    println!("{}", serde_json::to_string_pretty(&batch)?);
    Ok(())
}
