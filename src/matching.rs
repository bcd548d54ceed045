//! Candidate scoring and link tables.
//!
//! Each secondary row is looked up in the primary [`MatchIndex`] by its
//! `mac_norm` and `randmac_norm` (both against the MAC index) and by its
//! `ip_norm`. Every distinct primary row hit becomes a [`Candidate`] scored as
//! `2·mac + 1·randmac + 1·ip`. Candidates scoring the maximum are marked best;
//! when more than one candidate shares that maximum, the best rows are
//! flagged ambiguous.

use std::{collections::BTreeMap, path::Path};

use anyhow::Result;

use crate::{
    index::{MatchIndex, RowRef},
    io_utils,
    stage::{StagedRow, StagedTable},
};

pub const MAC_WEIGHT: u32 = 2;
pub const RANDMAC_WEIGHT: u32 = 1;
pub const IP_WEIGHT: u32 = 1;

pub const UNMATCHED_LABEL: &str = "unmatched";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub primary: RowRef,
    pub mac_match: bool,
    pub randmac_match: bool,
    pub ip_match: bool,
}

impl Candidate {
    fn new(primary: RowRef) -> Self {
        Self {
            primary,
            mac_match: false,
            randmac_match: false,
            ip_match: false,
        }
    }

    pub fn score(&self) -> u32 {
        u32::from(self.mac_match) * MAC_WEIGHT
            + u32::from(self.randmac_match) * RANDMAC_WEIGHT
            + u32::from(self.ip_match) * IP_WEIGHT
    }

    /// Matched keys joined with `+`, e.g. `mac+ip`.
    pub fn combo_label(&self) -> String {
        [
            (self.mac_match, "mac"),
            (self.randmac_match, "randmac"),
            (self.ip_match, "ip"),
        ]
        .into_iter()
        .filter_map(|(hit, label)| hit.then_some(label))
        .collect::<Vec<_>>()
        .join("+")
    }
}

/// All primary rows matching `row`, ordered by score descending, then primary
/// dataset, then primary row id.
pub fn candidates_for(row: &StagedRow, index: &MatchIndex) -> Vec<Candidate> {
    let mut found: BTreeMap<RowRef, Candidate> = BTreeMap::new();
    let mut mark = |hit: &RowRef, apply: fn(&mut Candidate)| {
        let candidate = found
            .entry(hit.clone())
            .or_insert_with(|| Candidate::new(hit.clone()));
        apply(candidate);
    };
    for hit in index.by_mac(&row.mac_norm) {
        mark(hit, |c| c.mac_match = true);
    }
    for hit in index.by_mac(&row.randmac_norm) {
        mark(hit, |c| c.randmac_match = true);
    }
    for hit in index.by_ip(&row.ip_norm) {
        mark(hit, |c| c.ip_match = true);
    }

    let mut candidates: Vec<Candidate> = found.into_values().collect();
    // Stable sort keeps the (dataset, row_id) order of the map within a score.
    candidates.sort_by(|a, b| b.score().cmp(&a.score()));
    candidates
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub secondary_row_id: u64,
    pub candidate: Option<Candidate>,
    pub is_best: bool,
    pub ambiguous: bool,
}

impl LinkRow {
    fn record(&self) -> Vec<String> {
        let mut record = vec![self.secondary_row_id.to_string()];
        match &self.candidate {
            Some(c) => record.extend([
                c.primary.dataset.clone(),
                c.primary.row_id.to_string(),
                c.mac_match.to_string(),
                c.randmac_match.to_string(),
                c.ip_match.to_string(),
                c.combo_label(),
                c.score().to_string(),
            ]),
            None => record.extend([
                String::new(),
                String::new(),
                false.to_string(),
                false.to_string(),
                false.to_string(),
                UNMATCHED_LABEL.to_string(),
                "0".to_string(),
            ]),
        }
        record.push(self.is_best.to_string());
        record.push(self.ambiguous.to_string());
        record
    }
}

/// Per-dataset link counts. `matched`, `unmatched` and `ambiguous` count
/// secondary rows, not link rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSummary {
    pub rows: usize,
    pub matched: usize,
    pub unmatched: usize,
    pub ambiguous: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkTable {
    pub dataset: String,
    pub rows: Vec<LinkRow>,
    pub summary: LinkSummary,
}

impl LinkTable {
    pub fn header(&self) -> Vec<String> {
        let mut header = vec![format!("{}_row_id", self.dataset)];
        header.extend(
            [
                "primary_dataset",
                "primary_row_id",
                "mac_match",
                "randmac_match",
                "ip_match",
                "match_combo",
                "score",
                "is_best",
                "ambiguous",
            ]
            .map(String::from),
        );
        header
    }

    pub fn write(&self, path: &Path) -> Result<usize> {
        io_utils::write_csv_atomic(path, &self.header(), self.rows.iter().map(LinkRow::record))
    }
}

/// Links every row of a secondary `table` against the primary `index`.
pub fn link_table(table: &StagedTable, index: &MatchIndex) -> LinkTable {
    let mut rows = Vec::new();
    let mut summary = LinkSummary::default();
    for staged in &table.rows {
        summary.rows += 1;
        let candidates = candidates_for(staged, index);
        let Some(best) = candidates.first().map(Candidate::score) else {
            summary.unmatched += 1;
            rows.push(LinkRow {
                secondary_row_id: staged.row_id,
                candidate: None,
                is_best: false,
                ambiguous: false,
            });
            continue;
        };
        summary.matched += 1;
        let tied = candidates.iter().filter(|c| c.score() == best).count();
        if tied > 1 {
            summary.ambiguous += 1;
        }
        rows.extend(candidates.into_iter().map(|candidate| {
            let is_best = candidate.score() == best;
            LinkRow {
                secondary_row_id: staged.row_id,
                candidate: Some(candidate),
                is_best,
                ambiguous: is_best && tied > 1,
            }
        }));
    }
    LinkTable {
        dataset: table.dataset.clone(),
        rows,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn staged(row_id: u64, mac: &str, randmac: &str, ip: &str) -> StagedRow {
        StagedRow {
            row_id,
            source: "test".into(),
            file: "test.csv".into(),
            values: Vec::new(),
            mac_norm: mac.into(),
            randmac_norm: randmac.into(),
            ip_norm: ip.into(),
        }
    }

    fn table(dataset: &str, rows: Vec<StagedRow>) -> StagedTable {
        StagedTable {
            dataset: dataset.into(),
            fields: Vec::new(),
            rows,
        }
    }

    const MAC_A: &str = "AA:BB:CC:DD:EE:FF";
    const MAC_B: &str = "11:22:33:44:55:66";

    #[test]
    fn mac_match_outranks_ip_match() {
        let dhcp = table(
            "dhcp",
            vec![staged(1, "", "", "10.0.0.5"), staged(2, MAC_A, "", "10.0.0.9")],
        );
        let index = MatchIndex::build([&dhcp]);
        let arm = table("arm", vec![staged(1, MAC_A, "", "10.0.0.5")]);
        let links = link_table(&arm, &index);

        assert_eq!(links.rows.len(), 2);
        let first = links.rows[0].candidate.as_ref().unwrap();
        assert_eq!(first.primary.row_id, 2);
        assert_eq!(first.score(), 2);
        assert!(links.rows[0].is_best);
        assert!(!links.rows[0].ambiguous);
        let second = links.rows[1].candidate.as_ref().unwrap();
        assert_eq!(second.score(), 1);
        assert_eq!(second.combo_label(), "ip");
        assert!(!links.rows[1].is_best);
        assert_eq!(links.summary.ambiguous, 0);
    }

    #[test]
    fn two_mac_matches_are_both_ambiguous() {
        let dhcp = table("dhcp", vec![staged(1, MAC_A, "", ""), staged(2, MAC_A, "", "")]);
        let index = MatchIndex::build([&dhcp]);
        let arm = table("arm", vec![staged(1, MAC_A, "", "")]);
        let links = link_table(&arm, &index);

        assert_eq!(links.rows.len(), 2);
        assert!(links.rows.iter().all(|r| r.is_best && r.ambiguous));
        assert_eq!(links.summary.ambiguous, 1);
        assert_eq!(links.summary.matched, 1);
    }

    #[test]
    fn non_best_ties_are_not_ambiguous() {
        let dhcp = table(
            "dhcp",
            vec![
                staged(1, MAC_A, "", ""),
                staged(2, "", "", "10.0.0.5"),
                staged(3, "", "", "10.0.0.5"),
            ],
        );
        let index = MatchIndex::build([&dhcp]);
        let arm = table("arm", vec![staged(7, MAC_A, "", "10.0.0.5")]);
        let links = link_table(&arm, &index);

        let flags: Vec<(u64, bool, bool)> = links
            .rows
            .iter()
            .map(|r| (r.candidate.as_ref().unwrap().primary.row_id, r.is_best, r.ambiguous))
            .collect();
        assert_eq!(flags, vec![(1, true, false), (2, false, false), (3, false, false)]);
    }

    #[test]
    fn randomized_mac_is_looked_up_in_the_mac_index() {
        let wifi = table("wifi", vec![staged(4, MAC_B, "", "10.0.0.5")]);
        let index = MatchIndex::build([&wifi]);
        let arm = table("arm", vec![staged(1, "", MAC_B, "10.0.0.5")]);
        let candidates = candidates_for(&arm.rows[0], &index);

        assert_eq!(candidates.len(), 1);
        assert!(!candidates[0].mac_match);
        assert!(candidates[0].randmac_match);
        assert!(candidates[0].ip_match);
        assert_eq!(candidates[0].score(), 2);
        assert_eq!(candidates[0].combo_label(), "randmac+ip");
    }

    #[test]
    fn same_mac_different_ip_links_once_with_score_two() {
        let dhcp = table("dhcp", vec![staged(1, MAC_A, "", "10.0.0.5")]);
        let index = MatchIndex::build([&dhcp]);
        let arm = table("arm", vec![staged(1, MAC_A, "", "10.0.0.77")]);
        let links = link_table(&arm, &index);

        assert_eq!(links.rows.len(), 1);
        let row = &links.rows[0];
        let candidate = row.candidate.as_ref().unwrap();
        assert_eq!(candidate.primary.dataset, "dhcp");
        assert!(candidate.mac_match);
        assert!(!candidate.ip_match);
        assert_eq!(candidate.score(), 2);
        assert!(row.is_best);
        assert!(!row.ambiguous);
    }

    #[test]
    fn row_without_hits_is_unmatched() {
        let dhcp = table("dhcp", vec![staged(1, MAC_A, "", "10.0.0.5")]);
        let index = MatchIndex::build([&dhcp]);
        let arm = table("arm", vec![staged(3, MAC_B, "", "10.9.9.9"), staged(4, "", "", "")]);
        let links = link_table(&arm, &index);

        assert_eq!(links.summary.unmatched, 2);
        assert_eq!(links.rows.len(), 2);
        let record = links.rows[0].record();
        assert_eq!(
            record,
            vec!["3", "", "", "false", "false", "false", "unmatched", "0", "false", "false"]
        );
    }

    #[test]
    fn candidates_order_by_dataset_then_row_within_score() {
        let dhcp = table("dhcp", vec![staged(5, MAC_A, "", "")]);
        let arp = table("arp", vec![staged(9, MAC_A, "", ""), staged(2, MAC_A, "", "")]);
        let index = MatchIndex::build([&dhcp, &arp]);
        let candidates = candidates_for(&staged(1, MAC_A, "", ""), &index);
        let order: Vec<(&str, u64)> = candidates
            .iter()
            .map(|c| (c.primary.dataset.as_str(), c.primary.row_id))
            .collect();
        assert_eq!(order, vec![("arp", 2), ("arp", 9), ("dhcp", 5)]);
    }

    #[test]
    fn header_is_prefixed_with_dataset() {
        let links = link_table(&table("arm", Vec::new()), &MatchIndex::default());
        assert_eq!(links.header()[0], "arm_row_id");
        assert_eq!(links.header().len(), 10);
        assert_eq!(links.summary, LinkSummary::default());
    }
}
