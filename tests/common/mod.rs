#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use primescope::config::LoadedConfig;
use tempfile::{TempDir, tempdir};

pub const DHCP_LEASES: &str = "\u{feff}sourceMACAddress,sourceIPAddress,hostname\n\
AA:BB:CC:DD:EE:FF,10.0.0.5,printer-1\n\
11-22-33-44-55-66,10.0.0.6,laptop-7\n";

pub const ARM_INVENTORY: &str = "MAC,Random MAC,IP,Власник\n\
aa:bb:cc:dd:ee:ff,-,10.0.0.77,Accounting\n\
de:ad:be:ef:00:01,-,10.9.9.9,Warehouse\n\
-,11:22:33:44:55:66,10.0.0.6,Lab\n";

/// Returns the absolute path to a fixture under `tests/data`.
pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("data")
        .join(name)
}

/// Scratch inventory workspace that cleans up files automatically on drop.
pub struct TestWorkspace {
    temp_dir: TempDir,
}

impl TestWorkspace {
    /// Creates an empty workspace carrying the shared schema configuration.
    pub fn new() -> Self {
        let workspace = Self {
            temp_dir: tempdir().expect("temp dir"),
        };
        let schemas = fs::read_to_string(fixture_path("schemas.yml")).expect("read fixture");
        workspace.write("configs/schemas.yml", &schemas);
        workspace
    }

    /// Workspace with one primary and one secondary export that validate cleanly.
    pub fn with_inventory() -> Self {
        let workspace = Self::new();
        workspace.write("data/raw/dhcp/leases.csv", DHCP_LEASES);
        workspace.write("data/raw/arm/arm.csv", ARM_INVENTORY);
        workspace
    }

    /// Returns the root path for all files owned by this workspace.
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Writes `contents` under the workspace, creating parent directories.
    pub fn write(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.temp_dir.path().join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("create parent dirs");
        }
        fs::write(&path, contents).expect("write temp file contents");
        path
    }

    pub fn read(&self, name: &str) -> String {
        fs::read_to_string(self.path().join(name)).expect("read workspace file")
    }

    pub fn config(&self) -> LoadedConfig {
        LoadedConfig::load(self.path(), &self.path().join("configs/schemas.yml"))
            .expect("load schema configuration")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.path().join(".pscope")
    }

    pub fn out_dir(&self) -> PathBuf {
        self.path().join("data/stage/collect")
    }
}

/// Parses CSV text into header and records.
pub fn read_table(contents: &str) -> (Vec<String>, Vec<Vec<String>>) {
    let mut reader = csv::Reader::from_reader(contents.as_bytes());
    let header = reader
        .headers()
        .expect("csv header")
        .iter()
        .map(str::to_string)
        .collect();
    let rows = reader
        .records()
        .map(|record| {
            record
                .expect("csv record")
                .iter()
                .map(str::to_string)
                .collect()
        })
        .collect();
    (header, rows)
}
