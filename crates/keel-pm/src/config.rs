//! Workspace configuration: file locations and the mirror table.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::mirrors::{Mirrors, MirrorsFile};
use crate::tools_version::ToolsVersion;
use crate::util::atomic_write;

pub const PINS_FILE: &str = "keel.lock";
pub const MANIFEST_FILE: &str = "keel.json";
pub const MIRRORS_FILE: &str = "mirrors.json";
pub const CONFIG_DIR: &str = ".keel";
pub const CHECKOUTS_DIR: &str = "checkouts";

/// Locations and toolchain facts a workspace is assembled from.
#[derive(Debug, Clone)]
pub struct Config {
    pub working_dir: PathBuf,
    pub tools_version: ToolsVersion,
}

impl Config {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            tools_version: ToolsVersion::CURRENT,
        }
    }

    pub fn pins_path(&self) -> PathBuf {
        self.working_dir.join(PINS_FILE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.working_dir.join(MANIFEST_FILE)
    }

    pub fn config_dir(&self) -> PathBuf {
        self.working_dir.join(CONFIG_DIR)
    }

    pub fn mirrors_path(&self) -> PathBuf {
        self.config_dir().join(MIRRORS_FILE)
    }

    pub fn checkouts_dir(&self) -> PathBuf {
        self.config_dir().join(CHECKOUTS_DIR)
    }

    /// Load the mirror table; a missing file yields an empty table.
    pub fn load_mirrors(&self) -> Result<Mirrors> {
        load_mirrors_from(&self.mirrors_path())
    }

    /// Persist the mirror table, removing the file when the table is empty.
    pub fn save_mirrors(&self, mirrors: &Mirrors) -> Result<()> {
        save_mirrors_to(&self.mirrors_path(), mirrors)
    }
}

pub fn load_mirrors_from(path: &Path) -> Result<Mirrors> {
    match fs::read_to_string(path) {
        Ok(contents) => {
            let file: MirrorsFile =
                serde_json::from_str(&contents).map_err(|e| Error::MalformedLockfile {
                    path: path.to_path_buf(),
                    reason: e.to_string(),
                })?;
            Ok(file.into())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Mirrors::new()),
        Err(e) => Err(Error::Io(e)),
    }
}

pub fn save_mirrors_to(path: &Path, mirrors: &Mirrors) -> Result<()> {
    if mirrors.is_empty() {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        return Ok(());
    }
    let file = MirrorsFile::from(mirrors);
    let mut contents = serde_json::to_string_pretty(&file)?;
    contents.push('\n');
    atomic_write(path, contents.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_paths() {
        let config = Config::new("/work/app");
        assert_eq!(config.pins_path(), PathBuf::from("/work/app/keel.lock"));
        assert_eq!(
            config.mirrors_path(),
            PathBuf::from("/work/app/.keel/mirrors.json")
        );
        assert_eq!(
            config.checkouts_dir(),
            PathBuf::from("/work/app/.keel/checkouts")
        );
    }

    #[test]
    fn test_mirrors_round_trip() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());

        // Missing file yields an empty table
        assert!(config.load_mirrors().unwrap().is_empty());

        let mut mirrors = Mirrors::new();
        mirrors.set("https://a.example.com/x.git", "https://b.example.com/x.git");
        config.save_mirrors(&mirrors).unwrap();

        let reloaded = config.load_mirrors().unwrap();
        assert_eq!(
            reloaded.resolve("https://a.example.com/x.git"),
            "https://b.example.com/x.git"
        );

        // Saving an empty table removes the file
        config.save_mirrors(&Mirrors::new()).unwrap();
        assert!(!config.mirrors_path().exists());
    }

    #[test]
    fn test_malformed_mirrors_file() {
        let dir = TempDir::new().unwrap();
        let config = Config::new(dir.path());
        fs::create_dir_all(config.config_dir()).unwrap();
        fs::write(config.mirrors_path(), "not json").unwrap();

        assert!(matches!(
            config.load_mirrors().unwrap_err(),
            Error::MalformedLockfile { .. }
        ));
    }
}
