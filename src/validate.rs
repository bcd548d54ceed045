//! Schema validation of dataset directories.
//!
//! A run walks every declared dataset through inventory, header check and
//! content check, collecting every [`Issue`] it finds rather than stopping at
//! the first. Only when the configured stop policy finds no blocking issues
//! is a [`Manifest`] produced.

use std::{collections::BTreeMap, fmt, path::Path};

use anyhow::{Context, Result, bail};
use encoding_rs::Encoding;
use itertools::Itertools;
use log::{debug, error, info, warn};

use crate::{
    cli::ValidateArgs,
    config::{DatasetSpec, FieldSpec, LoadedConfig, Role},
    confusables::{self, ConfusableTable},
    error::PipelineError,
    fingerprint::Fingerprint,
    headers::{self, AliasTable},
    inventory,
    io_utils,
    manifest::{DatasetStatus, FileEntry, Manifest, ManifestDataset, ManifestStore},
    rules::{Rule, Violation},
};

/// A problem found in one file. Every variant is reported; none aborts the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Issue {
    MissingField {
        dataset: String,
        file: String,
        field: String,
        aliases: Vec<String>,
        suggestion: Option<String>,
    },
    Content {
        dataset: String,
        file: String,
        line: u64,
        field: String,
        violation: Violation,
        value: String,
    },
    Confusable {
        dataset: String,
        file: String,
        line: u64,
        field: String,
        ch: char,
        suggestion: String,
    },
}

impl Issue {
    pub fn is_missing_field(&self) -> bool {
        matches!(self, Issue::MissingField { .. })
    }

    pub fn file(&self) -> &str {
        match self {
            Issue::MissingField { file, .. }
            | Issue::Content { file, .. }
            | Issue::Confusable { file, .. } => file,
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Issue::MissingField {
                dataset,
                file,
                field,
                aliases,
                suggestion,
            } => {
                write!(
                    f,
                    "{dataset}: {file}: missing required field '{field}' (aliases: {})",
                    aliases.join(", ")
                )?;
                if let Some(header) = suggestion {
                    write!(f, "; did you mean '{header}'?")?;
                }
                Ok(())
            }
            Issue::Content {
                dataset,
                file,
                line,
                field,
                violation,
                value,
            } => write!(
                f,
                "{dataset}: {file}:{line}: {field}: {violation} (value '{value}')"
            ),
            Issue::Confusable {
                dataset,
                file,
                line,
                field,
                ch,
                suggestion,
            } => write!(
                f,
                "{dataset}: {file}:{line}: {field}: confusable_char {} '{ch}' (use '{suggestion}')",
                confusables::code_point(*ch)
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetReport {
    pub dir: String,
    pub role: Role,
    pub status: DatasetStatus,
    pub files_found: usize,
    /// Files that passed every check.
    pub files: Vec<FileEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub datasets: BTreeMap<String, DatasetReport>,
    pub issues: Vec<Issue>,
}

impl ValidationReport {
    pub fn missing_count(&self) -> usize {
        self.issues.iter().filter(|i| i.is_missing_field()).count()
    }

    pub fn content_count(&self) -> usize {
        self.issues.len() - self.missing_count()
    }

    /// Whether the configured stop policy forbids writing a manifest.
    pub fn is_blocking(&self, config: &LoadedConfig) -> bool {
        let settings = config.settings();
        (settings.stop_on_missing_required && self.missing_count() > 0)
            || (settings.stop_on_content_error && self.content_count() > 0)
    }

    pub fn into_manifest(self, config: &LoadedConfig) -> Manifest {
        let datasets = self
            .datasets
            .into_iter()
            .map(|(name, report)| {
                (
                    name,
                    ManifestDataset {
                        dir: report.dir,
                        role: report.role,
                        status: report.status,
                        files: report.files,
                    },
                )
            })
            .collect();
        Manifest::new(config, datasets)
    }
}

pub fn execute(args: &ValidateArgs) -> Result<()> {
    let workspace = &args.workspace;
    let config = LoadedConfig::load(&workspace.root, &workspace.config_path())?;
    let manifest = run(&config)?;
    let store = ManifestStore::new(workspace.state_path(), config.settings().history_limit);
    store.persist(&manifest)?;
    Ok(())
}

/// Validates all datasets and, if nothing blocks, returns the manifest to persist.
pub fn run(config: &LoadedConfig) -> Result<Manifest> {
    let report = validate(config)?;
    let missing = report.missing_count();
    let content = report.content_count();
    if report.is_blocking(config) {
        error!("validate: failed with {missing} missing field(s) and {content} content issue(s)");
        bail!(PipelineError::ValidationFailed { missing, content });
    }
    if missing + content > 0 {
        warn!(
            "validate: {missing} missing field(s) and {content} content issue(s) tolerated by policy"
        );
    }
    info!("validate: ok");
    Ok(report.into_manifest(config))
}

struct Inventory<'a> {
    name: &'a str,
    spec: &'a DatasetSpec,
    files: Vec<std::path::PathBuf>,
}

/// Runs inventory, header and content checks without applying the stop policy.
pub fn validate(config: &LoadedConfig) -> Result<ValidationReport> {
    let settings = config.settings();
    let encoding = io_utils::resolve_encoding(settings.encoding.as_deref())?;
    let confusables = ConfusableTable::from_settings(&settings.confusables);

    let mut inventories = Vec::with_capacity(config.datasets().len());
    for (name, spec) in config.datasets() {
        let dir = config.resolve_path(&spec.dir);
        let files = inventory::list_csv_in_dir(&dir, &settings.ignore_suffixes, settings.recursive)
            .with_context(|| format!("Inventory of dataset '{name}'"))?;
        if files.is_empty() {
            info!("validate: no csv in: {}", spec.dir.display());
        } else {
            info!(
                "validate: files in {}: {}",
                spec.dir.display(),
                files
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy())
                    .join(", ")
            );
        }
        inventories.push(Inventory { name, spec, files });
    }

    check_primary_presence(config, &inventories)?;

    let mut report = ValidationReport::default();
    for inventory in inventories {
        let checker = DatasetChecker::new(
            config,
            inventory.name,
            inventory.spec,
            encoding,
            confusables.as_ref(),
        );
        let dataset = checker.check(&inventory.files, &mut report.issues)?;
        info!(
            "validate: {}: status={:?}, files={}/{} passed",
            inventory.name,
            dataset.status,
            dataset.files.len(),
            dataset.files_found
        );
        report.datasets.insert(inventory.name.to_string(), dataset);
    }

    for issue in &report.issues {
        match issue {
            Issue::MissingField { .. } => error!("validate: {issue}"),
            Issue::Content { .. } => error!("validate: {issue}"),
            Issue::Confusable { .. } => warn!("validate: {issue}"),
        }
    }
    Ok(report)
}

fn check_primary_presence(config: &LoadedConfig, inventories: &[Inventory<'_>]) -> Result<()> {
    let primaries = config.primary_names();
    if primaries.is_empty() {
        warn!("validate: no primary dataset configured; collect will have nothing to match against");
        return Ok(());
    }
    let primary_files: usize = inventories
        .iter()
        .filter(|inv| config.is_primary(inv.name))
        .map(|inv| inv.files.len())
        .sum();
    if primary_files == 0 {
        error!("validate: primary dataset(s) have no csv files");
        bail!(PipelineError::NoPrimaryData(primaries.join(", ")));
    }
    Ok(())
}

struct FieldPlan<'a> {
    canonical: &'a str,
    spec: &'a FieldSpec,
    rule_name: &'a str,
    rule: &'a Rule,
}

struct DatasetChecker<'a> {
    config: &'a LoadedConfig,
    name: &'a str,
    spec: &'a DatasetSpec,
    plans: Vec<FieldPlan<'a>>,
    aliases: AliasTable,
    encoding: &'static Encoding,
    confusables: Option<&'a ConfusableTable>,
}

impl<'a> DatasetChecker<'a> {
    fn new(
        config: &'a LoadedConfig,
        name: &'a str,
        spec: &'a DatasetSpec,
        encoding: &'static Encoding,
        confusables: Option<&'a ConfusableTable>,
    ) -> Self {
        let plans = spec
            .fields
            .iter()
            .map(|(canonical, field)| {
                let (rule_name, rule) = config.rules.resolve(field.rule.as_deref());
                FieldPlan {
                    canonical,
                    spec: field,
                    rule_name,
                    rule,
                }
            })
            .collect();
        let aliases = AliasTable::build(
            name,
            &spec.fields,
            &config.settings().header_normalization,
        );
        Self {
            config,
            name,
            spec,
            plans,
            aliases,
            encoding,
            confusables,
        }
    }

    fn check(&self, files: &[std::path::PathBuf], issues: &mut Vec<Issue>) -> Result<DatasetReport> {
        let mut report = DatasetReport {
            dir: self.spec.dir.to_string_lossy().replace('\\', "/"),
            role: self.config.role_of(self.name),
            status: DatasetStatus::Empty,
            files_found: files.len(),
            files: Vec::new(),
        };
        if self.plans.is_empty() {
            info!("validate: {}: no fields configured, skipped", self.name);
            report.status = DatasetStatus::Skipped;
            return Ok(report);
        }
        if files.is_empty() {
            return Ok(report);
        }
        for path in files {
            if let Some(entry) = self.check_file(path, issues)? {
                report.files.push(entry);
            }
        }
        report.status = if report.files.is_empty() {
            DatasetStatus::Rejected
        } else {
            DatasetStatus::Ok
        };
        Ok(report)
    }

    /// Returns the manifest entry when the file raised no issues.
    fn check_file(&self, path: &Path, issues: &mut Vec<Issue>) -> Result<Option<FileEntry>> {
        let settings = self.config.settings();
        let opts = &settings.header_normalization;
        let display = self.config.display_path(path);
        let fingerprint = Fingerprint::of(path)?;

        let delimiter = io_utils::resolve_input_delimiter(path, settings.delimiter_byte());
        let mut reader = io_utils::open_csv_reader_from_path(path, delimiter)?;
        let header_bytes = reader
            .byte_headers()
            .with_context(|| format!("Reading headers of {path:?}"))?
            .clone();
        let raw_headers = match io_utils::decode_record(&header_bytes, self.encoding) {
            Ok(values) => values,
            Err(_) => {
                issues.push(Issue::Content {
                    dataset: self.name.to_string(),
                    file: display,
                    line: 1,
                    field: "*".to_string(),
                    violation: Violation::DecodeError,
                    value: String::new(),
                });
                return Ok(None);
            }
        };
        let resolution =
            headers::resolve_headers(&raw_headers, &self.spec.fields, &self.aliases, opts);
        debug!(
            "validate: {}: {} headers: {:?}",
            self.name, display, resolution.headers_map
        );
        for duplicate in &resolution.duplicates {
            debug!("validate: {}: {}: ignoring duplicate header '{duplicate}'", self.name, display);
        }

        let issues_before = issues.len();
        for field in &resolution.missing_required {
            let aliases = self
                .spec
                .fields
                .get(field)
                .map(|spec| spec.effective_aliases(field))
                .unwrap_or_default();
            issues.push(Issue::MissingField {
                dataset: self.name.to_string(),
                file: display.clone(),
                field: field.clone(),
                aliases: aliases.iter().map(|a| a.to_string()).collect(),
                suggestion: headers::suggest_header(&aliases, &resolution.unresolved, opts),
            });
        }

        let active: Vec<(&FieldPlan<'_>, usize)> = self
            .plans
            .iter()
            .filter_map(|plan| {
                resolution
                    .positions
                    .get(plan.canonical)
                    .map(|pos| (plan, *pos))
            })
            .collect();

        let mut record = csv::ByteRecord::new();
        let mut rows = 0u64;
        while reader
            .read_byte_record(&mut record)
            .with_context(|| format!("Reading {path:?}"))?
        {
            rows += 1;
            let line = record.position().map(|p| p.line()).unwrap_or(rows + 1);
            let decoded = match io_utils::decode_record(&record, self.encoding) {
                Ok(values) => values,
                Err(_) => {
                    issues.push(Issue::Content {
                        dataset: self.name.to_string(),
                        file: display.clone(),
                        line,
                        field: "*".to_string(),
                        violation: Violation::DecodeError,
                        value: String::new(),
                    });
                    continue;
                }
            };
            for (plan, pos) in &active {
                let value = decoded.get(*pos).map(String::as_str).unwrap_or("");
                self.check_value(plan, value, &display, line, issues);
            }
        }

        if issues.len() > issues_before {
            return Ok(None);
        }
        Ok(Some(FileEntry {
            path: display,
            fingerprint,
            rows,
            headers_map: resolution.headers_map,
            columns_present: resolution.columns_present,
            columns_missing: resolution.columns_missing,
        }))
    }

    fn check_value(
        &self,
        plan: &FieldPlan<'_>,
        value: &str,
        file: &str,
        line: u64,
        issues: &mut Vec<Issue>,
    ) {
        if let Some(violation) =
            plan.rule
                .apply(value, plan.spec.required, plan.canonical, plan.rule_name)
        {
            issues.push(Issue::Content {
                dataset: self.name.to_string(),
                file: file.to_string(),
                line,
                field: plan.canonical.to_string(),
                violation,
                value: value.to_string(),
            });
        }
        if let Some(table) = self.confusables
            && plan.rule.is_mac()
        {
            for hit in table.scan(value) {
                issues.push(Issue::Confusable {
                    dataset: self.name.to_string(),
                    file: file.to_string(),
                    line,
                    field: plan.canonical.to_string(),
                    ch: hit.ch,
                    suggestion: hit.suggestion,
                });
            }
        }
    }
}
