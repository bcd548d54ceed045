use std::{
    fs::{self, Metadata},
    path::Path,
    time::UNIX_EPOCH,
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Size and whole-second modification time of a source file.
///
/// Two fingerprints are equal only when both fields match exactly.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    pub size: u64,
    pub mtime: i64,
}

impl Fingerprint {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata =
            fs::metadata(path).with_context(|| format!("Reading metadata for {path:?}"))?;
        Self::from_metadata(&metadata).with_context(|| format!("Fingerprinting {path:?}"))
    }

    pub fn from_metadata(metadata: &Metadata) -> Result<Self> {
        let modified = metadata.modified()?;
        let mtime = match modified.duration_since(UNIX_EPOCH) {
            Ok(elapsed) => elapsed.as_secs() as i64,
            Err(before) => -(before.duration().as_secs() as i64),
        };
        Ok(Self {
            size: metadata.len(),
            mtime,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn fingerprint_changes_with_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("leases.csv");
        fs::write(&path, "mac,ip\n").unwrap();
        let before = Fingerprint::of(&path).unwrap();
        assert_eq!(before.size, 7);
        assert_eq!(before, Fingerprint::of(&path).unwrap());

        let mut file = fs::OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "AA:BB:CC:DD:EE:FF,10.0.0.5").unwrap();
        drop(file);
        assert_ne!(before, Fingerprint::of(&path).unwrap());
    }
}
