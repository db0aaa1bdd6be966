use crate::app::profile::{FilterTag, PathRules, Profile};
use anyhow::{Context, Result};
use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

const L10N_PATTERNS: &[&str] = &[
    "/usr/share/locale/**",
    "/usr/share/locale-langpack/**",
    "/usr/share/X11/locale/**",
    "/usr/share/man/[a-z][a-z]/**",
    "/usr/share/man/[a-z][a-z]_*/**",
    "/usr/share/man/*.UTF-8/**",
    "**/*.mo",
];

const I18N_PATTERNS: &[&str] = &[
    "/usr/share/i18n/**",
    "/usr/lib/locale/**",
    "/usr/lib/gconv/**",
    "/usr/lib/*/gconv/**",
    "/usr/lib64/gconv/**",
];

const DOC_PATTERNS: &[&str] = &[
    "/usr/share/doc/**",
    "/usr/share/doc-base/**",
    "/usr/share/gtk-doc/**",
    "/usr/share/help/**",
    "/usr/share/common-licenses/**",
    "/usr/local/share/doc/**",
    "**/*.md",
    "**/*.rst",
    "**/*.pdf",
    "**/*.rtf",
    "**/README",
    "**/README.*",
    "**/CHANGELOG*",
    "**/ChangeLog*",
    "**/NEWS",
    "**/AUTHORS",
    "**/THANKS",
    "**/COPYING*",
    "**/LICENSE*",
];

const MAN_PATTERNS: &[&str] = &[
    "/usr/share/man/**",
    "/usr/share/info/**",
    "/usr/local/share/man/**",
    "/usr/local/share/info/**",
    "/usr/man/**",
];

const LOG_PATTERNS: &[&str] = &["/var/log/**", "**/*.log", "**/*.log.[0-9]*"];

const DIR_PATTERNS: &[&str] = &[
    "/var/cache/**",
    "/var/backups/**",
    "/var/lib/apt/lists/**",
    "/usr/share/bug/**",
    "/usr/share/lintian/**",
    "/usr/share/linda/**",
    "/usr/share/menu/**",
    "/usr/share/bash-completion/**",
    "/usr/share/zsh/**",
    "/usr/share/fish/**",
];

const JUNK_PATTERNS: &[&str] = &[
    "/usr/include/**",
    "/usr/local/include/**",
    "**/*.h",
    "**/*.hh",
    "**/*.hpp",
    "**/*.a",
    "**/*.la",
    "**/*.pc",
    "**/pkgconfig/**",
    "**/cmake/**",
    "**/__pycache__/**",
    "**/*.pyc",
    "**/*.pyo",
    "**/*~",
    "**/*.bak",
    "**/*.orig",
    "**/*.rej",
    "**/*.swp",
    "**/.git/**",
];

fn patterns_for(tag: FilterTag) -> &'static [&'static str] {
    match tag {
        FilterTag::L10n => L10N_PATTERNS,
        FilterTag::I18n => I18N_PATTERNS,
        FilterTag::Doc => DOC_PATTERNS,
        FilterTag::Man => MAN_PATTERNS,
        FilterTag::Log => LOG_PATTERNS,
        FilterTag::Dir => DIR_PATTERNS,
        FilterTag::Junk => JUNK_PATTERNS,
    }
}

/// Filters narrow down a set of paths scheduled to be kept.
pub trait DataFilter {
    fn filter(&self, data: &mut BTreeSet<PathBuf>);
}

/// Detects which data categories an image path belongs to.
pub struct Classifier {
    rules: Vec<(FilterTag, PathRules)>,
}

impl Classifier {
    pub fn for_tags(tags: &[FilterTag]) -> Result<Self> {
        let mut rules = Vec::with_capacity(tags.len());
        for tag in tags {
            let set = PathRules::new(patterns_for(*tag))
                .with_context(|| format!("Built-in patterns for \"{}\" are broken", tag))?;
            rules.push((*tag, set));
        }
        Ok(Self { rules })
    }

    /// A path may fall into several categories, e.g. a localized man page.
    pub fn tags(&self, path: &Path) -> Vec<FilterTag> {
        self.rules
            .iter()
            .filter(|(_, rules)| rules.matches(path))
            .map(|(tag, _)| *tag)
            .collect()
    }
}

/// Removes paths of every category the profile enables.
pub struct CategoryFilter {
    classifier: Classifier,
    protected: HashSet<PathBuf>,
}

impl CategoryFilter {
    pub fn new(profile: &Profile, protected: HashSet<PathBuf>) -> Result<Self> {
        let tags: Vec<FilterTag> = FilterTag::ALL
            .into_iter()
            .filter(|t| profile.is_filtered(*t))
            .collect();
        for tag in &tags {
            log::debug!("Removing data of category \"{}\"", tag);
        }

        Ok(Self {
            classifier: Classifier::for_tags(&tags)?,
            protected,
        })
    }
}

impl DataFilter for CategoryFilter {
    fn filter(&self, data: &mut BTreeSet<PathBuf>) {
        data.retain(|p| {
            if self.protected.contains(p) {
                return true;
            }
            let tags = self.classifier.tags(p);
            if tags.is_empty() {
                return true;
            }
            log::trace!("Filtered out {:?} ({:?})", p, tags);
            false
        });
    }
}
