//! CSV reading, decoding and atomic writing.
//!
//! All file I/O of the pipeline flows through this module:
//!
//! - **Delimiter resolution**: extension-based (`.tsv` → tab, otherwise comma)
//!   unless the configuration names one.
//! - **Encoding**: records are read as bytes and decoded via `encoding_rs`,
//!   defaulting to UTF-8.
//! - **Atomic output**: tables and manifests are written to a sibling temp
//!   file and renamed over the destination, so readers never observe a
//!   partially written file.

use std::{
    fs::{self, File},
    io::{BufReader, BufWriter, Read, Write},
    path::Path,
};

use anyhow::{Context, Result, anyhow};
use csv::QuoteStyle;
use encoding_rs::{Encoding, UTF_8};
use tempfile::NamedTempFile;

pub const DEFAULT_CSV_DELIMITER: u8 = b',';
pub const DEFAULT_TSV_DELIMITER: u8 = b'\t';

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    if let Some(value) = label {
        Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| anyhow!("Unknown encoding '{value}'"))
    } else {
        Ok(UTF_8)
    }
}

pub fn resolve_input_delimiter(path: &Path, provided: Option<u8>) -> u8 {
    provided.unwrap_or_else(|| match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("tsv") => DEFAULT_TSV_DELIMITER,
        _ => DEFAULT_CSV_DELIMITER,
    })
}

/// Short rows are tolerated; absent cells read as empty.
pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(true);
    builder.from_reader(reader)
}

pub fn open_csv_reader_from_path(
    path: &Path,
    delimiter: u8,
) -> Result<csv::Reader<BufReader<File>>> {
    let file = File::open(path).with_context(|| format!("Opening input file {path:?}"))?;
    Ok(open_csv_reader(BufReader::new(file), delimiter))
}

pub fn decode_bytes(bytes: &[u8], encoding: &'static Encoding) -> Result<String> {
    let (text, _, had_errors) = encoding.decode(bytes);
    if had_errors {
        Err(anyhow!(
            "Failed to decode text with encoding {}",
            encoding.name()
        ))
    } else {
        Ok(text.into_owned())
    }
}

pub fn decode_record(record: &csv::ByteRecord, encoding: &'static Encoding) -> Result<Vec<String>> {
    record
        .iter()
        .map(|field| decode_bytes(field, encoding))
        .collect()
}

pub fn reader_headers<R>(
    reader: &mut csv::Reader<R>,
    encoding: &'static Encoding,
) -> Result<Vec<String>>
where
    R: Read,
{
    let headers = reader.byte_headers()?.clone();
    decode_record(&headers, encoding)
}

/// Writes bytes produced by `fill` to `path` via a temp file in the same directory.
pub fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> Result<()>,
{
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).with_context(|| format!("Creating directory {parent:?}"))?;
    let tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("Creating temporary file in {parent:?}"))?;
    {
        let mut writer = BufWriter::new(tmp.as_file());
        fill(&mut writer)?;
        writer.flush().context("Flushing temporary file")?;
    }
    tmp.as_file()
        .sync_all()
        .context("Syncing temporary file")?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("Replacing {path:?}"))?;
    Ok(())
}

/// Atomically writes a UTF-8 CSV table with the given header and rows.
pub fn write_csv_atomic<I>(path: &Path, headers: &[String], rows: I) -> Result<usize>
where
    I: IntoIterator<Item = Vec<String>>,
{
    let mut written = 0usize;
    write_atomic(path, |out| {
        let mut writer = csv::WriterBuilder::new()
            .quote_style(QuoteStyle::Necessary)
            .double_quote(true)
            .from_writer(out);
        writer
            .write_record(headers)
            .with_context(|| format!("Writing header to {path:?}"))?;
        for row in rows {
            writer
                .write_record(&row)
                .with_context(|| format!("Writing row to {path:?}"))?;
            written += 1;
        }
        writer.flush()?;
        Ok(())
    })?;
    Ok(written)
}
