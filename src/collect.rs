//! Collect: stage validated inputs and link secondary rows to primary rows.

use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, bail};
use itertools::{Either, Itertools};
use log::{debug, info, warn};

use crate::{
    cli::{CleanArgs, CollectArgs},
    config::{self, LoadedConfig, Role},
    error::PipelineError,
    index::MatchIndex,
    inventory,
    manifest::{Manifest, ManifestStore},
    matching::{self, LinkSummary},
    stage::{self, StagedTable},
};

pub const STAGED_DIR: &str = "staged";
pub const LINKS_DIR: &str = "links";

/// What a collect run wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectSummary {
    pub run_id: String,
    /// Row count of every staged dataset.
    pub staged: BTreeMap<String, usize>,
    /// Link counts of every secondary dataset.
    pub links: BTreeMap<String, LinkSummary>,
}

pub fn execute(args: &CollectArgs) -> Result<()> {
    let workspace = &args.workspace;
    let config = LoadedConfig::load(&workspace.root, &workspace.config_path())?;
    let manifest = match &args.manifest {
        Some(path) => {
            let path = config::resolve_under(&workspace.root, path);
            if !path.is_file() {
                bail!(PipelineError::ManifestMissing(path));
            }
            Manifest::load(&path)?
        }
        None => ManifestStore::new(workspace.state_path(), config.settings().history_limit)
            .load_latest()?,
    };
    let out_dir = config::resolve_under(&workspace.root, &args.out_dir);
    collect(&config, &manifest, &out_dir)?;
    Ok(())
}

/// Stages every dataset of `manifest` and writes link tables into `out_dir`.
///
/// The manifest is re-verified first; a stale manifest is never staged.
pub fn collect(config: &LoadedConfig, manifest: &Manifest, out_dir: &Path) -> Result<CollectSummary> {
    manifest.verify(config)?;
    info!(
        "collect: manifest {} ({} file(s))",
        manifest.run_id,
        manifest.file_count()
    );

    let (primaries, secondaries): (Vec<&str>, Vec<&str>) = manifest
        .datasets
        .iter()
        .filter(|(_, dataset)| dataset.has_files())
        .map(|(name, dataset)| (name.as_str(), dataset.role))
        .partition_map(|(name, role)| match role {
            Role::Primary => Either::Left(name),
            Role::Secondary => Either::Right(name),
        });
    if primaries.is_empty() {
        let configured = config.primary_names();
        let names = if configured.is_empty() {
            "<none configured>".to_string()
        } else {
            configured.join(", ")
        };
        bail!(PipelineError::NoPrimaryData(names));
    }
    info!(
        "collect: primary: {}; secondary: {}",
        primaries.join(", "),
        if secondaries.is_empty() {
            "<none>".to_string()
        } else {
            secondaries.join(", ")
        }
    );

    let mut summary = CollectSummary {
        run_id: manifest.run_id.clone(),
        ..CollectSummary::default()
    };
    let mut tables: BTreeMap<&str, StagedTable> = BTreeMap::new();
    for name in primaries.iter().chain(secondaries.iter()) {
        let dataset = &manifest.datasets[*name];
        let table = stage::stage_dataset(config, name, dataset)
            .with_context(|| format!("Staging dataset '{name}'"))?;
        let path = out_dir.join(STAGED_DIR).join(format!("{name}.csv"));
        let written = table.write(&path)?;
        info!("collect: staged {name}: {written} row(s) -> {}", path.display());
        summary.staged.insert(name.to_string(), written);
        tables.insert(*name, table);
    }

    let index = MatchIndex::build(primaries.iter().filter_map(|name| tables.get(name)));
    debug!(
        "collect: index has {} mac key(s), {} ip key(s)",
        index.mac_keys(),
        index.ip_keys()
    );

    for name in &secondaries {
        let Some(table) = tables.get(name) else {
            continue;
        };
        let links = matching::link_table(table, &index);
        let path = out_dir.join(LINKS_DIR).join(format!("{name}.csv"));
        links.write(&path)?;
        let counts = links.summary;
        info!(
            "collect: {name}: rows={} matched={} unmatched={} ambiguous={}",
            counts.rows, counts.matched, counts.unmatched, counts.ambiguous
        );
        summary.links.insert(name.to_string(), counts);
    }
    if secondaries.is_empty() {
        warn!("collect: no secondary dataset has files; nothing to link");
    }
    info!("collect: done");
    Ok(summary)
}

pub fn execute_clean(args: &CleanArgs) -> Result<()> {
    let out_dir = config::resolve_under(&args.root, &args.out_dir);
    let removed = clean_outputs(&out_dir)?;
    info!("clean: removed {} file(s) from {}", removed.len(), out_dir.display());
    Ok(())
}

/// Deletes generated CSVs below `out_dir`, keeping any `*.example.csv`.
pub fn clean_outputs(out_dir: &Path) -> Result<Vec<PathBuf>> {
    let keep = [config::DEFAULT_IGNORE_SUFFIX.to_string()];
    let files = inventory::list_csv_in_dir(out_dir, &keep, true)?;
    for path in &files {
        fs::remove_file(path).with_context(|| format!("Removing {path:?}"))?;
        debug!("clean: removed {}", path.display());
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_keeps_example_files() {
        let dir = tempfile::tempdir().unwrap();
        let staged = dir.path().join(STAGED_DIR);
        fs::create_dir_all(&staged).unwrap();
        fs::write(staged.join("dhcp.csv"), "row_id\n").unwrap();
        fs::write(staged.join("dhcp.example.csv"), "row_id\n").unwrap();
        fs::write(dir.path().join("README.txt"), "keep").unwrap();

        let removed = clean_outputs(dir.path()).unwrap();
        assert_eq!(removed, vec![staged.join("dhcp.csv")]);
        assert!(staged.join("dhcp.example.csv").exists());
        assert!(dir.path().join("README.txt").exists());
    }

    #[test]
    fn clean_of_missing_dir_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        assert!(clean_outputs(&dir.path().join("absent")).unwrap().is_empty());
    }
}
