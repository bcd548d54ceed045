//! Staging: one normalized row table per dataset, read from manifest files.
//!
//! Every row gets a synthetic 1-based `row_id`, unique within its dataset and
//! assigned in manifest file order, plus three derived match keys
//! (`mac_norm`, `randmac_norm`, `ip_norm`).

use std::{net::IpAddr, path::Path};

use anyhow::{Context, Result, bail};

use crate::{
    config::{DatasetSpec, LoadedConfig},
    error::{PipelineError, StaleReason},
    headers,
    io_utils,
    manifest::{FileEntry, ManifestDataset},
    rules::Rule,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedRow {
    pub row_id: u64,
    pub source: String,
    pub file: String,
    /// Values aligned with [`StagedTable::fields`].
    pub values: Vec<String>,
    pub mac_norm: String,
    pub randmac_norm: String,
    pub ip_norm: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedTable {
    pub dataset: String,
    pub fields: Vec<String>,
    pub rows: Vec<StagedRow>,
}

impl StagedTable {
    pub fn header(&self) -> Vec<String> {
        let mut header = vec!["row_id".to_string(), "source".to_string(), "file".to_string()];
        header.extend(self.fields.iter().cloned());
        header.extend(["mac_norm", "randmac_norm", "ip_norm"].map(String::from));
        header
    }

    pub fn write(&self, path: &Path) -> Result<usize> {
        let rows = self.rows.iter().map(|row| {
            let mut record = Vec::with_capacity(self.fields.len() + 6);
            record.push(row.row_id.to_string());
            record.push(row.source.clone());
            record.push(row.file.clone());
            record.extend(row.values.iter().cloned());
            record.push(row.mac_norm.clone());
            record.push(row.randmac_norm.clone());
            record.push(row.ip_norm.clone());
            record
        });
        io_utils::write_csv_atomic(path, &self.header(), rows)
    }
}

/// Canonical `AA:BB:CC:DD:EE:FF` form, or empty when the value is not a MAC.
pub fn normalize_mac(raw: &str) -> String {
    let digits: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, ':' | '-' | '.' | ' '))
        .collect();
    if digits.len() != 12 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        return String::new();
    }
    digits
        .to_ascii_uppercase()
        .as_bytes()
        .chunks(2)
        .map(|pair| String::from_utf8_lossy(pair).into_owned())
        .collect::<Vec<_>>()
        .join(":")
}

/// Canonical textual form of an IPv4/IPv6 address, or empty.
pub fn normalize_ip(raw: &str) -> String {
    raw.trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_string())
        .unwrap_or_default()
}

#[derive(Clone, Copy)]
enum KeyKind {
    Mac,
    Ip,
}

/// Derives one match key from a canonical field, honouring its rule's literals.
struct KeySource<'a> {
    column: usize,
    rule: &'a Rule,
    kind: KeyKind,
}

impl KeySource<'_> {
    fn derive(&self, values: &[String]) -> String {
        let raw = values.get(self.column).map(String::as_str).unwrap_or("");
        if raw.trim().is_empty() || self.rule.allows_literal(raw) {
            return String::new();
        }
        match self.kind {
            KeyKind::Mac => normalize_mac(raw),
            KeyKind::Ip => normalize_ip(raw),
        }
    }
}

fn key_source<'a>(
    config: &'a LoadedConfig,
    spec: &'a DatasetSpec,
    fields: &[String],
    canonical: &str,
    kind: KeyKind,
) -> Option<KeySource<'a>> {
    let column = fields.iter().position(|f| f == canonical)?;
    let field = spec.fields.get(canonical)?;
    let (_, rule) = config.rules.resolve(field.rule.as_deref());
    Some(KeySource { column, rule, kind })
}

fn derive_key(source: Option<&KeySource<'_>>, values: &[String]) -> String {
    source.map(|s| s.derive(values)).unwrap_or_default()
}

pub fn stage_dataset(
    config: &LoadedConfig,
    name: &str,
    dataset: &ManifestDataset,
) -> Result<StagedTable> {
    let spec = config
        .datasets()
        .get(name)
        .with_context(|| format!("Dataset '{name}' is not declared in the schema configuration"))?;
    let fields: Vec<String> = spec.fields.keys().cloned().collect();
    let match_fields = &config.settings().match_fields;
    let mac = key_source(config, spec, &fields, &match_fields.mac, KeyKind::Mac);
    let randmac = key_source(config, spec, &fields, &match_fields.randmac, KeyKind::Mac);
    let ip = key_source(config, spec, &fields, &match_fields.ip, KeyKind::Ip);

    let mut table = StagedTable {
        dataset: name.to_string(),
        fields,
        rows: Vec::new(),
    };
    let mut next_id = 1u64;
    for entry in &dataset.files {
        for values in read_canonical_rows(config, entry, &table.fields)? {
            table.rows.push(StagedRow {
                row_id: next_id,
                source: name.to_string(),
                file: entry.path.clone(),
                mac_norm: derive_key(mac.as_ref(), &values),
                randmac_norm: derive_key(randmac.as_ref(), &values),
                ip_norm: derive_key(ip.as_ref(), &values),
                values,
            });
            next_id += 1;
        }
    }
    Ok(table)
}

/// Reads `entry` and projects every row onto `fields` via its header map.
fn read_canonical_rows(
    config: &LoadedConfig,
    entry: &FileEntry,
    fields: &[String],
) -> Result<Vec<Vec<String>>> {
    let settings = config.settings();
    let opts = &settings.header_normalization;
    let encoding = io_utils::resolve_encoding(settings.encoding.as_deref())?;
    let path = config.resolve_path(&entry.path);
    let delimiter = io_utils::resolve_input_delimiter(&path, settings.delimiter_byte());
    let mut reader = io_utils::open_csv_reader_from_path(&path, delimiter)?;
    let raw_headers = io_utils::reader_headers(&mut reader, encoding)?;
    let real_headers: Vec<&str> = raw_headers
        .iter()
        .enumerate()
        .map(|(idx, raw)| headers::strip_bom(raw, idx == 0, opts))
        .collect();

    let mut positions = Vec::with_capacity(fields.len());
    for field in fields {
        let position = match entry.headers_map.get(field) {
            Some(real) => match real_headers.iter().position(|h| *h == real.as_str()) {
                Some(pos) => Some(pos),
                None => bail!(PipelineError::StaleManifest(StaleReason::HeaderMissing {
                    path: entry.path.clone(),
                    header: real.clone(),
                })),
            },
            None => None,
        };
        positions.push(position);
    }

    let mut rows = Vec::new();
    let mut record = csv::ByteRecord::new();
    while reader
        .read_byte_record(&mut record)
        .with_context(|| format!("Reading {path:?}"))?
    {
        let decoded = io_utils::decode_record(&record, encoding)
            .with_context(|| format!("Decoding row {} of {path:?}", rows.len() + 2))?;
        rows.push(
            positions
                .iter()
                .map(|pos| {
                    pos.and_then(|p| decoded.get(p))
                        .cloned()
                        .unwrap_or_default()
                })
                .collect(),
        );
    }
    Ok(rows)
}
