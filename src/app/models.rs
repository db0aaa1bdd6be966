use crate::app::profile::Profile;
use std::path::PathBuf;

pub const DEFAULT_LOCKFILE: &str = "/.tinted.lock";

/// Represents the final configuration after merging presets, CLI args and the profile.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub profile: Profile,
    pub root: PathBuf,
    pub dry_run: bool,
    pub check_only: bool,
    pub show_removed: bool,
    pub settings: ScanSettings,
}

/// How the image is walked.
#[derive(Debug, Clone)]
pub struct ScanSettings {
    pub keep_tmp: bool,
    pub lockfile: PathBuf,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            keep_tmp: false,
            lockfile: PathBuf::from(DEFAULT_LOCKFILE),
        }
    }
}

/// Represents a single entry discovered inside the image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: PathBuf,       // Location on the host
    pub image_path: PathBuf, // Location as seen from inside the image
    pub is_dir: bool,
    pub is_symlink: bool,
    pub link_target: Option<PathBuf>,
    pub size: u64,
}

/// Outcome of planning: which non-directory entries stay and which go.
#[derive(Debug, Default)]
pub struct Plan {
    pub kept: Vec<FileEntry>,
    pub removed: Vec<FileEntry>,
}

impl Plan {
    pub fn kept_size(&self) -> u64 {
        self.kept.iter().map(|e| e.size).sum()
    }

    pub fn removed_size(&self) -> u64 {
        self.removed.iter().map(|e| e.size).sum()
    }
}
