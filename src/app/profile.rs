use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::Deserialize;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("Failed to read profile {0:?}: {1}")]
    Read(PathBuf, #[source] std::io::Error),
    #[error("Invalid profile document: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("Profile has no targets")]
    NoTargets,
    #[error("Target {0:?} is not an absolute path")]
    RelativeTarget(PathBuf),
    #[error("Unknown filter tag \"{0}\" (expected one of: l10n, i18n, doc, man, log, dir, junk)")]
    UnknownFilter(String),
    #[error("Invalid glob pattern \"{0}\": {1}")]
    InvalidGlob(String, #[source] globset::Error),
}

/// Category of data that is considered removable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FilterTag {
    L10n,
    I18n,
    Doc,
    Man,
    Log,
    Dir,
    Junk,
}

impl FilterTag {
    pub const ALL: [FilterTag; 7] = [
        FilterTag::L10n,
        FilterTag::I18n,
        FilterTag::Doc,
        FilterTag::Man,
        FilterTag::Log,
        FilterTag::Dir,
        FilterTag::Junk,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterTag::L10n => "l10n",
            FilterTag::I18n => "i18n",
            FilterTag::Doc => "doc",
            FilterTag::Man => "man",
            FilterTag::Log => "log",
            FilterTag::Dir => "dir",
            FilterTag::Junk => "junk",
        }
    }
}

impl fmt::Display for FilterTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterTag {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterTag::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| ProfileError::UnknownFilter(s.to_string()))
    }
}

/// On-disk shape of a profile, before validation.
#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct ProfileFile {
    targets: Option<Vec<PathBuf>>,
    #[serde(default)]
    packages: Vec<String>,
    #[serde(default)]
    config: ProfileConfig,
}

#[derive(Deserialize, Debug, Default)]
#[serde(deny_unknown_fields)]
struct ProfileConfig {
    #[serde(default)]
    filters: Vec<String>,
    #[serde(default)]
    prune: Vec<String>,
    #[serde(default)]
    keep: Vec<String>,
}

/// A validated profile.
#[derive(Debug, Clone, Default)]
pub struct Profile {
    targets: Vec<PathBuf>,
    packages: Vec<String>,
    filters: BTreeSet<FilterTag>,
    prune: Vec<String>,
    keep: Vec<String>,
}

impl Profile {
    pub fn load(path: &Path) -> Result<Self, ProfileError> {
        let content =
            fs::read_to_string(path).map_err(|e| ProfileError::Read(path.to_path_buf(), e))?;
        Profile::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ProfileError> {
        let raw: ProfileFile = serde_yaml::from_str(content)?;

        let targets = dedup(raw.targets.unwrap_or_default());
        if targets.is_empty() {
            return Err(ProfileError::NoTargets);
        }
        if let Some(t) = targets.iter().find(|t| !t.is_absolute()) {
            return Err(ProfileError::RelativeTarget(t.clone()));
        }

        let filters = raw
            .config
            .filters
            .iter()
            .map(|f| f.parse())
            .collect::<Result<BTreeSet<FilterTag>, _>>()?;

        let profile = Profile {
            targets,
            packages: dedup(raw.packages),
            filters,
            prune: dedup(raw.config.prune),
            keep: dedup(raw.config.keep),
        };
        profile.check_globs()?;

        Ok(profile)
    }

    /// Extend the profile with extra keep/prune patterns and filter tags.
    pub fn with_overrides(
        mut self,
        keep: Vec<String>,
        prune: Vec<String>,
        filters: Vec<FilterTag>,
    ) -> Result<Self, ProfileError> {
        self.keep.extend(keep);
        self.keep = dedup(self.keep);
        self.prune.extend(prune);
        self.prune = dedup(self.prune);
        self.filters.extend(filters);
        self.check_globs()?;

        Ok(self)
    }

    fn check_globs(&self) -> Result<(), ProfileError> {
        PathRules::new(&self.keep)?;
        PathRules::new(&self.prune)?;
        Ok(())
    }

    pub fn targets(&self) -> &[PathBuf] {
        &self.targets
    }

    pub fn packages(&self) -> &[String] {
        &self.packages
    }

    pub fn filters(&self) -> &BTreeSet<FilterTag> {
        &self.filters
    }

    /// Whether data of this category should still be removed.
    pub fn is_filtered(&self, tag: FilterTag) -> bool {
        self.filters.contains(&tag)
    }

    pub fn keep_patterns(&self) -> &[String] {
        &self.keep
    }

    pub fn prune_patterns(&self) -> &[String] {
        &self.prune
    }

    pub fn keep_rules(&self) -> Result<PathRules, ProfileError> {
        PathRules::new(&self.keep)
    }

    pub fn prune_rules(&self) -> Result<PathRules, ProfileError> {
        PathRules::new(&self.prune)
    }
}

fn dedup<T: Clone + Eq + std::hash::Hash>(mut items: Vec<T>) -> Vec<T> {
    let mut seen = HashSet::new();
    items.retain(|item| seen.insert(item.clone()));
    items
}

/// Compiled glob patterns matched against image-absolute paths.
///
/// `*` stays within one path component, `**` spans directories. A path
/// matches when it or any of its parent directories matches.
#[derive(Debug, Clone)]
pub struct PathRules {
    set: GlobSet,
}

impl PathRules {
    pub fn new<S: AsRef<str>>(patterns: &[S]) -> Result<Self, ProfileError> {
        let mut builder = GlobSetBuilder::new();
        for pat in patterns {
            let pat = pat.as_ref();
            let glob = GlobBuilder::new(pat)
                .literal_separator(true)
                .build()
                .map_err(|e| ProfileError::InvalidGlob(pat.to_string(), e))?;
            builder.add(glob);
        }
        let set = builder
            .build()
            .map_err(|e| ProfileError::InvalidGlob(String::new(), e))?;

        Ok(PathRules { set })
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn matches(&self, path: &Path) -> bool {
        !self.set.is_empty() && path.ancestors().any(|p| self.set.is_match(p))
    }
}
