//! Schema configuration: dataset declarations, validation rules and run settings.
//!
//! The configuration lives in a YAML file (`configs/schemas.yml` by default)
//! under a top-level `validate:` key:
//!
//! ```yaml
//! validate:
//!   settings:
//!     roles: { primary: [dhcp] }
//!   rules:
//!     mac: { kind: mac }
//!     ip: { kind: ip, version: 4, allow_literals: ["-"] }
//!   datasets:
//!     dhcp:
//!       dir: data/raw/dhcp
//!       fields:
//!         mac: { aliases: [sourcMACAddress, mac], required: true, rule: mac }
//! ```
//!
//! A [`LoadedConfig`] is built once per run and handed to every stage by
//! reference. It carries the content hash of the file (`schemas_hash`) and a
//! fingerprint of the effective settings and rules, both of which end up in
//! the manifest.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{confusables, error::PipelineError, rules::RuleBook};

pub const DEFAULT_CONFIG_PATH: &str = "configs/schemas.yml";
pub const DEFAULT_STATE_DIR: &str = ".pscope";
pub const DEFAULT_COLLECT_DIR: &str = "data/stage/collect";
pub const DEFAULT_IGNORE_SUFFIX: &str = "example.csv";
pub const DEFAULT_HISTORY_LIMIT: usize = 20;

#[derive(Debug, Clone, Deserialize)]
struct SchemaFile {
    #[serde(default)]
    validate: Option<ValidateSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateSection {
    #[serde(default)]
    pub settings: Settings,
    #[serde(default)]
    pub rules: BTreeMap<String, RuleSpec>,
    #[serde(default)]
    pub datasets: BTreeMap<String, DatasetSpec>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Secondary,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Primary => "primary",
            Role::Secondary => "secondary",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetSpec {
    pub dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Header spellings accepted for this field, in priority order.
    #[serde(default, alias = "headers")]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
}

impl FieldSpec {
    /// Declared aliases, or the canonical name itself when none are listed.
    pub fn effective_aliases<'a>(&'a self, canonical: &'a str) -> Vec<&'a str> {
        if self.aliases.is_empty() {
            vec![canonical]
        } else {
            self.aliases.iter().map(String::as_str).collect()
        }
    }
}

/// Declarative rule as written in the configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RuleSpec {
    Any,
    Ip {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<u8>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow_literals: Vec<String>,
    },
    Mac {
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow_literals: Vec<String>,
    },
    Nonempty,
    Regex {
        pattern: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        allow_literals: Vec<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderNormalization {
    pub strip_bom: bool,
    pub trim: bool,
    pub collapse_whitespace: bool,
    pub casefold: bool,
}

impl Default for HeaderNormalization {
    fn default() -> Self {
        Self {
            strip_bom: true,
            trim: true,
            collapse_whitespace: true,
            casefold: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfusableSettings {
    pub enabled: bool,
    /// Look-alike character → suggested replacement.
    pub map: BTreeMap<String, String>,
}

impl Default for ConfusableSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            map: confusables::default_map(),
        }
    }
}

/// Role lists by dataset name. Primary membership is decided by `primary`
/// and each dataset's own `role`; `secondary` only documents intent and is
/// checked against them at load time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Roles {
    pub primary: Vec<String>,
    pub secondary: Vec<String>,
}

/// Canonical field names that feed the derived match keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchFields {
    pub mac: String,
    pub randmac: String,
    pub ip: String,
}

impl Default for MatchFields {
    fn default() -> Self {
        Self {
            mac: "mac".to_string(),
            randmac: "randmac".to_string(),
            ip: "ip".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delimiter: Option<char>,
    pub header_normalization: HeaderNormalization,
    pub ignore_suffixes: Vec<String>,
    pub recursive: bool,
    pub stop_on_missing_required: bool,
    pub stop_on_content_error: bool,
    pub confusables: ConfusableSettings,
    pub roles: Roles,
    pub match_fields: MatchFields,
    pub history_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            encoding: None,
            delimiter: None,
            header_normalization: HeaderNormalization::default(),
            ignore_suffixes: vec![DEFAULT_IGNORE_SUFFIX.to_string()],
            recursive: false,
            stop_on_missing_required: true,
            stop_on_content_error: true,
            confusables: ConfusableSettings::default(),
            roles: Roles::default(),
            match_fields: MatchFields::default(),
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

impl Settings {
    pub fn delimiter_byte(&self) -> Option<u8> {
        self.delimiter.map(|c| c as u8)
    }
}

/// Configuration resolved for one run.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub root: PathBuf,
    pub path: PathBuf,
    pub section: ValidateSection,
    pub rules: RuleBook,
    pub schemas_hash: String,
    pub settings_fingerprint: String,
}

impl LoadedConfig {
    pub fn load(root: &Path, path: &Path) -> Result<Self> {
        if !path.is_file() {
            bail!(PipelineError::ConfigMissing(path.to_path_buf()));
        }
        let bytes =
            fs::read(path).with_context(|| format!("Reading schema configuration {path:?}"))?;
        Self::from_bytes(root, path, &bytes)
    }

    pub fn from_bytes(root: &Path, path: &Path, bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|err| PipelineError::ConfigInvalid(format!("{path:?} is not UTF-8: {err}")))?;
        let parsed: SchemaFile = serde_yaml::from_str(text)
            .map_err(|err| PipelineError::ConfigInvalid(format!("{path:?}: {err}")))?;
        let section = parsed.validate.unwrap_or_default();
        if section.datasets.is_empty() {
            bail!(PipelineError::NoDatasets(path.to_path_buf()));
        }
        check_settings(&section.settings)?;
        let rules = RuleBook::compile(&section.rules)
            .map_err(|err| PipelineError::ConfigInvalid(format!("{err:#}")))?;
        warn_unknown_rule_references(&section, &rules);
        for conflict in role_conflicts(&section) {
            warn!("config: {conflict}");
        }

        Ok(Self {
            root: root.to_path_buf(),
            path: path.to_path_buf(),
            schemas_hash: sha256_hex(bytes),
            settings_fingerprint: settings_fingerprint(&section)?,
            section,
            rules,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.section.settings
    }

    pub fn datasets(&self) -> &BTreeMap<String, DatasetSpec> {
        &self.section.datasets
    }

    pub fn role_of(&self, name: &str) -> Role {
        let declared = self
            .section
            .datasets
            .get(name)
            .and_then(|spec| spec.role)
            .unwrap_or(Role::Secondary);
        if declared == Role::Primary
            || self.settings().roles.primary.iter().any(|p| p == name)
        {
            Role::Primary
        } else {
            Role::Secondary
        }
    }

    pub fn is_primary(&self, name: &str) -> bool {
        self.role_of(name) == Role::Primary
    }

    pub fn primary_names(&self) -> Vec<&str> {
        self.section
            .datasets
            .keys()
            .map(String::as_str)
            .filter(|name| self.is_primary(name))
            .collect()
    }

    /// Resolves a configured path against the workspace root.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        resolve_under(&self.root, path.as_ref())
    }

    /// Renders `path` relative to the workspace root for persisted records.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

pub fn resolve_under(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn settings_fingerprint(section: &ValidateSection) -> Result<String> {
    let payload = serde_json::json!({
        "settings": section.settings,
        "rules": section.rules,
    });
    let bytes = serde_json::to_vec(&payload).context("Serializing settings fingerprint")?;
    Ok(sha256_hex(&bytes))
}

fn check_settings(settings: &Settings) -> Result<()> {
    if let Some(delimiter) = settings.delimiter
        && !delimiter.is_ascii()
    {
        bail!(PipelineError::ConfigInvalid(format!(
            "delimiter '{delimiter}' must be a single ASCII character"
        )));
    }
    if let Some(label) = settings.encoding.as_deref()
        && encoding_rs::Encoding::for_label(label.trim().as_bytes()).is_none()
    {
        bail!(PipelineError::ConfigInvalid(format!(
            "unknown encoding '{label}'"
        )));
    }
    for key in settings.confusables.map.keys() {
        if key.chars().count() != 1 {
            bail!(PipelineError::ConfigInvalid(format!(
                "confusables key '{key}' must be a single character"
            )));
        }
    }
    Ok(())
}

/// Role list entries that name no dataset or contradict the resolved role.
fn role_conflicts(section: &ValidateSection) -> Vec<String> {
    let roles = &section.settings.roles;
    let mut conflicts = Vec::new();
    for (list, names) in [("primary", &roles.primary), ("secondary", &roles.secondary)] {
        for name in names {
            if !section.datasets.contains_key(name) {
                conflicts.push(format!("roles.{list} names undeclared dataset '{name}'"));
            }
        }
    }
    for name in &roles.secondary {
        let declared_primary = section
            .datasets
            .get(name)
            .is_some_and(|spec| spec.role == Some(Role::Primary));
        if declared_primary || roles.primary.contains(name) {
            conflicts.push(format!(
                "roles.secondary lists '{name}', but it is primary; treating it as primary"
            ));
        }
    }
    conflicts
}

fn warn_unknown_rule_references(section: &ValidateSection, rules: &RuleBook) {
    for (dataset, spec) in &section.datasets {
        for (field, field_spec) in &spec.fields {
            if let Some(rule) = field_spec.rule.as_deref()
                && !rules.contains(rule)
            {
                warn!(
                    "config: {dataset}.{field} references unknown rule '{rule}'; treating as 'any'"
                );
            }
        }
    }
}
