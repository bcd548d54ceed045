use std::collections::{BTreeSet, HashMap};

use crate::stage::{StagedRow, StagedTable};

/// Reference to a staged row of a primary dataset.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowRef {
    pub dataset: String,
    pub row_id: u64,
}

/// Lookup of primary rows by normalized MAC and IP.
///
/// Secondary rows look up the MAC index with both their `mac_norm` and their
/// `randmac_norm`; there is no separate randomized-MAC index.
#[derive(Debug, Clone, Default)]
pub struct MatchIndex {
    mac: HashMap<String, BTreeSet<RowRef>>,
    ip: HashMap<String, BTreeSet<RowRef>>,
}

impl MatchIndex {
    pub fn build<'a, I>(tables: I) -> Self
    where
        I: IntoIterator<Item = &'a StagedTable>,
    {
        let mut index = Self::default();
        for table in tables {
            for row in &table.rows {
                index.insert(&table.dataset, row);
            }
        }
        index
    }

    pub fn insert(&mut self, dataset: &str, row: &StagedRow) {
        let row_ref = RowRef {
            dataset: dataset.to_string(),
            row_id: row.row_id,
        };
        if !row.mac_norm.is_empty() {
            self.mac
                .entry(row.mac_norm.clone())
                .or_default()
                .insert(row_ref.clone());
        }
        if !row.ip_norm.is_empty() {
            self.ip.entry(row.ip_norm.clone()).or_default().insert(row_ref);
        }
    }

    pub fn by_mac(&self, key: &str) -> impl Iterator<Item = &RowRef> {
        lookup(&self.mac, key)
    }

    pub fn by_ip(&self, key: &str) -> impl Iterator<Item = &RowRef> {
        lookup(&self.ip, key)
    }

    pub fn mac_keys(&self) -> usize {
        self.mac.len()
    }

    pub fn ip_keys(&self) -> usize {
        self.ip.len()
    }
}

fn lookup<'a>(
    map: &'a HashMap<String, BTreeSet<RowRef>>,
    key: &str,
) -> impl Iterator<Item = &'a RowRef> + use<'a> {
    let bucket = if key.is_empty() { None } else { map.get(key) };
    bucket.into_iter().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(row_id: u64, mac: &str, ip: &str) -> StagedRow {
        StagedRow {
            row_id,
            source: "dhcp".into(),
            file: "leases.csv".into(),
            values: Vec::new(),
            mac_norm: mac.into(),
            randmac_norm: String::new(),
            ip_norm: ip.into(),
        }
    }

    #[test]
    fn indexes_non_empty_keys_per_row() {
        let table = StagedTable {
            dataset: "dhcp".into(),
            fields: Vec::new(),
            rows: vec![
                row(1, "AA:BB:CC:DD:EE:FF", "10.0.0.5"),
                row(2, "AA:BB:CC:DD:EE:FF", ""),
                row(3, "", "10.0.0.6"),
            ],
        };
        let index = MatchIndex::build([&table]);
        assert_eq!(index.mac_keys(), 1);
        assert_eq!(index.ip_keys(), 2);
        let ids: Vec<u64> = index.by_mac("AA:BB:CC:DD:EE:FF").map(|r| r.row_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(index.by_ip("10.0.0.6").count(), 1);
        assert_eq!(index.by_mac("").count(), 0);
        assert_eq!(index.by_ip("10.0.0.7").count(), 0);
    }
}
