//! Detection of look-alike characters in MAC address values.
//!
//! Registry exports are often typed by hand on Cyrillic keyboards, so a MAC
//! such as `АА:ВВ:...` can look correct while containing no Latin letters.

use std::collections::{BTreeMap, HashMap};

use crate::config::ConfusableSettings;

const DEFAULT_CONFUSABLES: &[(char, &str)] = &[
    // Cyrillic
    ('А', "A"),
    ('В', "B"),
    ('С', "C"),
    ('Е', "E"),
    ('О', "0"),
    ('а', "a"),
    ('в', "b"),
    ('с', "c"),
    ('е', "e"),
    ('о', "0"),
    ('З', "3"),
    ('І', "1"),
    ('б', "6"),
    // Greek
    ('Α', "A"),
    ('Β', "B"),
    ('Ε', "E"),
    ('Ο', "0"),
    ('ο', "0"),
    // Latin
    ('O', "0"),
    ('o', "0"),
    ('I', "1"),
    ('l', "1"),
    ('\u{00A0}', " "),
    ('\u{2010}', "-"),
    ('\u{2013}', "-"),
    ('\u{2212}', "-"),
    ('\u{FF1A}', ":"),
];

pub fn default_map() -> BTreeMap<String, String> {
    DEFAULT_CONFUSABLES
        .iter()
        .map(|(ch, replacement)| (ch.to_string(), replacement.to_string()))
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfusableHit {
    pub ch: char,
    pub suggestion: String,
}

/// `U+XXXX` notation of `ch`.
pub fn code_point(ch: char) -> String {
    format!("U+{:04X}", ch as u32)
}

#[derive(Debug, Clone, Default)]
pub struct ConfusableTable {
    map: HashMap<char, String>,
}

impl ConfusableTable {
    /// Builds the lookup table, or `None` when detection is disabled.
    pub fn from_settings(settings: &ConfusableSettings) -> Option<Self> {
        if !settings.enabled {
            return None;
        }
        let map = settings
            .map
            .iter()
            .filter_map(|(key, replacement)| {
                let mut chars = key.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some((ch, replacement.clone())),
                    _ => None,
                }
            })
            .collect();
        Some(Self { map })
    }

    /// Characters outside the MAC alphabet that have a known replacement.
    pub fn scan(&self, value: &str) -> Vec<ConfusableHit> {
        value
            .chars()
            .filter(|ch| !is_mac_char(*ch))
            .filter_map(|ch| {
                self.map.get(&ch).map(|suggestion| ConfusableHit {
                    ch,
                    suggestion: suggestion.clone(),
                })
            })
            .collect()
    }
}

fn is_mac_char(ch: char) -> bool {
    ch.is_ascii_hexdigit() || matches!(ch, ':' | '-' | ' ')
}
