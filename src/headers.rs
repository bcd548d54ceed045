//! Header normalization and alias resolution.
//!
//! Real-world exports spell the same column many ways (`MAC`, ` mac  address`,
//! `sourcMACAddress`). Each header token is normalized, then looked up in an
//! alias table that maps normalized spellings to canonical field names.

use std::collections::{BTreeMap, HashMap};

use log::warn;
use similar::TextDiff;

use crate::config::{FieldSpec, HeaderNormalization};

const BOM: char = '\u{feff}';
const SUGGESTION_THRESHOLD: f32 = 0.75;

/// Removes a leading byte-order mark from the first header when enabled.
pub fn strip_bom<'a>(raw: &'a str, first: bool, opts: &HeaderNormalization) -> &'a str {
    if first && opts.strip_bom {
        raw.strip_prefix(BOM).unwrap_or(raw)
    } else {
        raw
    }
}

pub fn normalize_header(raw: &str, first: bool, opts: &HeaderNormalization) -> String {
    let mut value = strip_bom(raw, first, opts).to_string();
    if opts.trim {
        value = value.trim().to_string();
    }
    if opts.collapse_whitespace {
        value = value.split_whitespace().collect::<Vec<_>>().join(" ");
    }
    if opts.casefold {
        value = value.to_lowercase();
    }
    value
}

/// Normalized alias → canonical field name.
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    lookup: HashMap<String, String>,
}

impl AliasTable {
    pub fn build(
        dataset: &str,
        fields: &BTreeMap<String, FieldSpec>,
        opts: &HeaderNormalization,
    ) -> Self {
        let mut lookup: HashMap<String, String> = HashMap::new();
        for (canonical, spec) in fields {
            for alias in spec.effective_aliases(canonical) {
                let key = normalize_header(alias, false, opts);
                match lookup.get(&key) {
                    Some(existing) if existing != canonical => warn!(
                        "config: {dataset}: alias '{alias}' claimed by both '{existing}' and '{canonical}'; keeping '{existing}'"
                    ),
                    Some(_) => {}
                    None => {
                        lookup.insert(key, canonical.clone());
                    }
                }
            }
        }
        Self { lookup }
    }

    pub fn canonical_for(&self, normalized: &str) -> Option<&str> {
        self.lookup.get(normalized).map(String::as_str)
    }
}

/// Outcome of matching one file's header row against a dataset schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderResolution {
    /// Canonical name → header exactly as found (BOM removed).
    pub headers_map: BTreeMap<String, String>,
    /// Canonical name → zero-based column position.
    pub positions: BTreeMap<String, usize>,
    /// Canonical names in header order.
    pub columns_present: Vec<String>,
    /// Declared canonical names with no matching header.
    pub columns_missing: Vec<String>,
    pub missing_required: Vec<String>,
    /// Headers that matched no alias.
    pub unresolved: Vec<String>,
    /// Later headers that mapped to an already resolved field.
    pub duplicates: Vec<String>,
}

pub fn resolve_headers(
    headers: &[String],
    fields: &BTreeMap<String, FieldSpec>,
    aliases: &AliasTable,
    opts: &HeaderNormalization,
) -> HeaderResolution {
    let mut resolution = HeaderResolution::default();
    for (idx, raw) in headers.iter().enumerate() {
        let normalized = normalize_header(raw, idx == 0, opts);
        let real = strip_bom(raw, idx == 0, opts).to_string();
        match aliases.canonical_for(&normalized) {
            Some(canonical) if resolution.positions.contains_key(canonical) => {
                resolution.duplicates.push(real);
            }
            Some(canonical) => {
                resolution.positions.insert(canonical.to_string(), idx);
                resolution.headers_map.insert(canonical.to_string(), real);
                resolution.columns_present.push(canonical.to_string());
            }
            None => resolution.unresolved.push(real),
        }
    }
    for (canonical, spec) in fields {
        if resolution.positions.contains_key(canonical) {
            continue;
        }
        resolution.columns_missing.push(canonical.clone());
        if spec.required {
            resolution.missing_required.push(canonical.clone());
        }
    }
    resolution
}

/// Closest unresolved header to any of `aliases`, if it is similar enough.
pub fn suggest_header(
    aliases: &[&str],
    unresolved: &[String],
    opts: &HeaderNormalization,
) -> Option<String> {
    let mut best: Option<(f32, &String)> = None;
    for header in unresolved {
        let candidate = normalize_header(header, false, opts);
        for alias in aliases {
            let target = normalize_header(alias, false, opts);
            let ratio = TextDiff::from_chars(target.as_str(), candidate.as_str()).ratio();
            if ratio >= SUGGESTION_THRESHOLD && best.is_none_or(|(score, _)| ratio > score) {
                best = Some((ratio, header));
            }
        }
    }
    best.map(|(_, header)| header.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> BTreeMap<String, FieldSpec> {
        let mut fields = BTreeMap::new();
        fields.insert(
            "mac".to_string(),
            FieldSpec {
                aliases: vec!["MAC Address".into(), "sourcMACAddress".into()],
                required: true,
                rule: Some("mac".into()),
            },
        );
        fields.insert(
            "ip".to_string(),
            FieldSpec {
                aliases: vec!["IP".into()],
                required: false,
                rule: Some("ip".into()),
            },
        );
        fields.insert(
            "owner".to_string(),
            FieldSpec {
                aliases: Vec::new(),
                required: true,
                rule: None,
            },
        );
        fields
    }

    #[test]
    fn normalization_strips_bom_trims_collapses_and_folds() {
        let opts = HeaderNormalization::default();
        assert_eq!(
            normalize_header("\u{feff}  MAC \t  Address ", true, &opts),
            "mac address"
        );
        // BOM is only stripped from the first header.
        assert_eq!(normalize_header("\u{feff}IP", false, &opts), "\u{feff}ip");
    }

    #[test]
    fn normalization_flags_can_be_disabled() {
        let opts = HeaderNormalization {
            strip_bom: false,
            trim: false,
            collapse_whitespace: false,
            casefold: false,
        };
        assert_eq!(normalize_header(" Mac  Id", true, &opts), " Mac  Id");
    }

    #[test]
    fn resolves_aliases_and_reports_missing_required() {
        let opts = HeaderNormalization::default();
        let fields = fields();
        let table = AliasTable::build("arm", &fields, &opts);
        let headers = vec![
            "\u{feff}mac  address".to_string(),
            "Hostname".to_string(),
            "ip".to_string(),
        ];
        let resolution = resolve_headers(&headers, &fields, &table, &opts);
        assert_eq!(resolution.positions["mac"], 0);
        assert_eq!(resolution.positions["ip"], 2);
        assert_eq!(resolution.headers_map["mac"], "mac  address");
        assert_eq!(resolution.columns_present, vec!["mac", "ip"]);
        assert_eq!(resolution.columns_missing, vec!["owner"]);
        assert_eq!(resolution.missing_required, vec!["owner"]);
        assert_eq!(resolution.unresolved, vec!["Hostname"]);
    }

    #[test]
    fn first_duplicate_header_wins() {
        let opts = HeaderNormalization::default();
        let fields = fields();
        let table = AliasTable::build("dhcp", &fields, &opts);
        let headers = vec![
            "sourcMACAddress".to_string(),
            "MAC Address".to_string(),
            "owner".to_string(),
        ];
        let resolution = resolve_headers(&headers, &fields, &table, &opts);
        assert_eq!(resolution.positions["mac"], 0);
        assert_eq!(resolution.duplicates, vec!["MAC Address"]);
        assert!(resolution.missing_required.is_empty());
    }

    #[test]
    fn suggests_close_header_for_missing_field() {
        let opts = HeaderNormalization::default();
        let unresolved = vec!["Ownr".to_string(), "notes".to_string()];
        assert_eq!(
            suggest_header(&["owner"], &unresolved, &opts),
            Some("Ownr".to_string())
        );
        assert_eq!(suggest_header(&["mac"], &unresolved, &opts), None);
    }
}
