//! Field-level validation rules.
//!
//! Rules are compiled once from their [`RuleSpec`] form and applied to raw
//! cell values. Application is pure: the verdict depends only on the value,
//! the rule and whether the field is required.

use std::{collections::BTreeMap, fmt, net::IpAddr};

use anyhow::{Context, Result, bail};
use regex::Regex;

use crate::config::RuleSpec;

pub const ANY_RULE_NAME: &str = "any";

static ANY: Rule = Rule::Any;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpVersion {
    V4,
    V6,
}

impl IpVersion {
    fn matches(self, addr: &IpAddr) -> bool {
        matches!(
            (self, addr),
            (IpVersion::V4, IpAddr::V4(_)) | (IpVersion::V6, IpAddr::V6(_))
        )
    }
}

/// Literal values (such as `-`) accepted in place of a well-formed address.
///
/// Comparison trims the value and ignores case.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Literals(Vec<String>);

impl Literals {
    pub fn new(values: &[String]) -> Self {
        Self(values.iter().map(|v| v.trim().to_lowercase()).collect())
    }

    pub fn contains(&self, value: &str) -> bool {
        if self.0.is_empty() {
            return false;
        }
        let needle = value.trim().to_lowercase();
        self.0.iter().any(|literal| *literal == needle)
    }
}

#[derive(Debug, Clone)]
pub enum Rule {
    Any,
    Ip {
        version: Option<IpVersion>,
        allow: Literals,
    },
    Mac {
        allow: Literals,
    },
    NonEmpty,
    Regex {
        pattern: Regex,
        allow: Literals,
    },
}

/// Reason a value failed its rule. `Display` renders the error code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    EmptyValue { field: String },
    InvalidIp,
    InvalidMac,
    InvalidPattern { rule: String },
    DecodeError,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Violation::EmptyValue { field } => write!(f, "empty_value:{field}"),
            Violation::InvalidIp => f.write_str("invalid_ip"),
            Violation::InvalidMac => f.write_str("invalid_mac"),
            Violation::InvalidPattern { rule } => write!(f, "invalid_{rule}"),
            Violation::DecodeError => f.write_str("decode_error"),
        }
    }
}

impl Rule {
    pub fn compile(name: &str, spec: &RuleSpec) -> Result<Self> {
        let rule = match spec {
            RuleSpec::Any => Rule::Any,
            RuleSpec::Nonempty => Rule::NonEmpty,
            RuleSpec::Ip {
                version,
                allow_literals,
            } => {
                let version = match version {
                    None => None,
                    Some(4) => Some(IpVersion::V4),
                    Some(6) => Some(IpVersion::V6),
                    Some(other) => bail!("rule '{name}': unsupported ip version {other}"),
                };
                Rule::Ip {
                    version,
                    allow: Literals::new(allow_literals),
                }
            }
            RuleSpec::Mac { allow_literals } => Rule::Mac {
                allow: Literals::new(allow_literals),
            },
            RuleSpec::Regex {
                pattern,
                allow_literals,
            } => {
                let anchored = Regex::new(&format!("^(?:{pattern})$"))
                    .with_context(|| format!("rule '{name}': invalid pattern '{pattern}'"))?;
                Rule::Regex {
                    pattern: anchored,
                    allow: Literals::new(allow_literals),
                }
            }
        };
        Ok(rule)
    }

    pub fn is_mac(&self) -> bool {
        matches!(self, Rule::Mac { .. })
    }

    /// True when `value` is one of the rule's allow-listed literals.
    pub fn allows_literal(&self, value: &str) -> bool {
        match self {
            Rule::Ip { allow, .. } | Rule::Mac { allow } | Rule::Regex { allow, .. } => {
                allow.contains(value)
            }
            Rule::Any | Rule::NonEmpty => false,
        }
    }

    pub fn apply(
        &self,
        value: &str,
        required: bool,
        field: &str,
        rule_name: &str,
    ) -> Option<Violation> {
        let trimmed = value.trim();
        let empty = || Violation::EmptyValue {
            field: field.to_string(),
        };
        match self {
            Rule::Any => None,
            Rule::NonEmpty => trimmed.is_empty().then(empty),
            Rule::Ip { version, allow } => {
                if trimmed.is_empty() {
                    return required.then(empty);
                }
                if allow.contains(trimmed) {
                    return None;
                }
                match trimmed.parse::<IpAddr>() {
                    Ok(addr) if version.is_none_or(|v| v.matches(&addr)) => None,
                    _ => Some(Violation::InvalidIp),
                }
            }
            Rule::Mac { allow } => {
                if trimmed.is_empty() {
                    return required.then(empty);
                }
                if allow.contains(trimmed) || is_mac_address(trimmed) {
                    None
                } else {
                    Some(Violation::InvalidMac)
                }
            }
            Rule::Regex { pattern, allow } => {
                if trimmed.is_empty() {
                    return required.then(empty);
                }
                if allow.contains(trimmed) || pattern.is_match(trimmed) {
                    None
                } else {
                    Some(Violation::InvalidPattern {
                        rule: rule_name.to_string(),
                    })
                }
            }
        }
    }
}

/// Twelve hexadecimal digits once `:` and `-` separators are removed.
pub fn is_mac_address(value: &str) -> bool {
    let mut digits = 0usize;
    for ch in value.chars().filter(|c| !matches!(c, ':' | '-')) {
        if !ch.is_ascii_hexdigit() {
            return false;
        }
        digits += 1;
    }
    digits == 12
}

/// Compiled rules addressable by name.
#[derive(Debug, Clone, Default)]
pub struct RuleBook {
    rules: BTreeMap<String, Rule>,
}

impl RuleBook {
    pub fn compile(specs: &BTreeMap<String, RuleSpec>) -> Result<Self> {
        let rules = specs
            .iter()
            .map(|(name, spec)| Ok((name.clone(), Rule::compile(name, spec)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        Ok(Self { rules })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules.contains_key(name)
    }

    /// Looks up a rule by name, falling back to the permissive `any` rule.
    pub fn resolve<'a>(&'a self, name: Option<&'a str>) -> (&'a str, &'a Rule) {
        match name.and_then(|n| self.rules.get_key_value(n)) {
            Some((name, rule)) => (name.as_str(), rule),
            None => (ANY_RULE_NAME, &ANY),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn ip_rule(version: Option<u8>, literals: &[&str]) -> Rule {
        Rule::compile(
            "ip",
            &RuleSpec::Ip {
                version,
                allow_literals: literals.iter().map(|s| s.to_string()).collect(),
            },
        )
        .unwrap()
    }

    fn mac_rule() -> Rule {
        Rule::compile(
            "mac",
            &RuleSpec::Mac {
                allow_literals: Vec::new(),
            },
        )
        .unwrap()
    }

    #[test]
    fn mac_accepts_common_separators() {
        let rule = mac_rule();
        for value in ["AA:BB:CC:DD:EE:FF", "aabbccddeeff", "AA-BB-CC-DD-EE-FF"] {
            assert_eq!(rule.apply(value, true, "mac", "mac"), None, "{value}");
        }
        assert_eq!(
            rule.apply("AA:BB:CC:DD:EE", true, "mac", "mac"),
            Some(Violation::InvalidMac)
        );
        assert_eq!(
            rule.apply("AA:BB:CC:DD:EE:FG", true, "mac", "mac"),
            Some(Violation::InvalidMac)
        );
    }

    #[test]
    fn ip_parses_and_checks_version() {
        let v4 = ip_rule(Some(4), &[]);
        assert_eq!(v4.apply("192.168.1.1", true, "ip", "ip"), None);
        assert_eq!(
            v4.apply("192.168.1.999", true, "ip", "ip"),
            Some(Violation::InvalidIp)
        );
        assert_eq!(v4.apply("fe80::1", true, "ip", "ip"), Some(Violation::InvalidIp));

        let any_version = ip_rule(None, &[]);
        assert_eq!(any_version.apply("fe80::1", true, "ip", "ip"), None);
    }

    #[test]
    fn allow_literals_bypass_format_checks() {
        let strict = ip_rule(Some(4), &[]);
        assert_eq!(strict.apply("-", false, "ip", "ip"), Some(Violation::InvalidIp));

        let lenient = ip_rule(Some(4), &["-", "N/A"]);
        assert_eq!(lenient.apply("-", false, "ip", "ip"), None);
        assert_eq!(lenient.apply(" n/a ", false, "ip", "ip"), None);
        assert!(lenient.allows_literal("N/A"));
    }

    #[test]
    fn empty_values_depend_on_required_except_nonempty() {
        let rule = mac_rule();
        assert_eq!(rule.apply("  ", false, "mac", "mac"), None);
        assert_eq!(
            rule.apply("", true, "mac", "mac").map(|v| v.to_string()),
            Some("empty_value:mac".to_string())
        );

        let nonempty = Rule::compile("owner", &RuleSpec::Nonempty).unwrap();
        assert_eq!(
            nonempty.apply(" ", false, "owner", "owner"),
            Some(Violation::EmptyValue {
                field: "owner".to_string()
            })
        );
        assert_eq!(Rule::Any.apply("", true, "x", "any"), None);
    }

    #[test]
    fn regex_is_full_match_and_names_rule_in_code() {
        let rule = Rule::compile(
            "hostname",
            &RuleSpec::Regex {
                pattern: "[a-z]+-[0-9]+".to_string(),
                allow_literals: Vec::new(),
            },
        )
        .unwrap();
        assert_eq!(rule.apply("pc-12", true, "name", "hostname"), None);
        let verdict = rule.apply("xpc-12x!", true, "name", "hostname");
        assert_eq!(verdict.map(|v| v.to_string()), Some("invalid_hostname".into()));
    }

    #[test]
    fn unsupported_ip_version_fails_to_compile() {
        let err = Rule::compile(
            "ip",
            &RuleSpec::Ip {
                version: Some(5),
                allow_literals: Vec::new(),
            },
        )
        .expect_err("version 5");
        assert!(err.to_string().contains("unsupported ip version"));
    }

    #[test]
    fn rulebook_falls_back_to_any() {
        let book = RuleBook::compile(&BTreeMap::new()).unwrap();
        let (name, rule) = book.resolve(Some("missing"));
        assert_eq!(name, ANY_RULE_NAME);
        assert!(matches!(rule, Rule::Any));
        assert!(matches!(book.resolve(None).1, Rule::Any));
    }

    proptest! {
        #[test]
        fn apply_is_pure(value in ".{0,24}", required in any::<bool>()) {
            let rules = [mac_rule(), ip_rule(Some(4), &["-"]), Rule::NonEmpty, Rule::Any];
            for rule in &rules {
                let first = rule.apply(&value, required, "f", "r");
                let second = rule.apply(&value, required, "f", "r");
                prop_assert_eq!(first, second);
            }
        }

        #[test]
        fn mac_separator_style_does_not_matter(bytes in proptest::array::uniform6(any::<u8>())) {
            let rule = mac_rule();
            let plain: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
            let colon = bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":");
            let dash = bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join("-");
            prop_assert_eq!(rule.apply(&plain, true, "mac", "mac"), None);
            prop_assert_eq!(rule.apply(&colon, true, "mac", "mac"), None);
            prop_assert_eq!(rule.apply(&dash, true, "mac", "mac"), None);
        }
    }
}
