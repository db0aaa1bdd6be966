use anyhow::{bail, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

const DPKG_INFO_DIR: &str = "var/lib/dpkg/info";

/// Installed package contents, as recorded by the Debian package database.
pub struct PackageIndex {
    info_dir: PathBuf,
}

impl PackageIndex {
    pub fn new(root: &Path) -> Self {
        Self {
            info_dir: root.join(DPKG_INFO_DIR),
        }
    }

    /// Locate `<name>.list`, or `<name>:<arch>.list` for multi-arch packages.
    fn list_file(&self, name: &str) -> Result<PathBuf> {
        let plain = self.info_dir.join(format!("{}.list", name));
        if plain.is_file() {
            return Ok(plain);
        }

        let prefix = format!("{}:", name);
        let entries = fs::read_dir(&self.info_dir)
            .with_context(|| format!("Failed to read package database at {:?}", self.info_dir))?;

        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| {
                p.extension().is_some_and(|ext| ext == "list")
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .is_some_and(|n| n.starts_with(&prefix))
            })
            .collect();
        candidates.sort();

        match candidates.into_iter().next() {
            Some(p) => Ok(p),
            None => bail!("Package \"{}\" is not installed", name),
        }
    }

    /// Image paths owned by the package. Directories are included.
    pub fn contents(&self, name: &str) -> Result<Vec<PathBuf>> {
        let list = self.list_file(name)?;
        log::debug!("Reading contents of package \"{}\" from {:?}", name, list);

        let content = fs::read_to_string(&list)
            .with_context(|| format!("Failed to read package list {:?}", list))?;

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && *l != "/." && l.starts_with('/'))
            .map(PathBuf::from)
            .collect())
    }
}
