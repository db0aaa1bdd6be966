use crate::app::cli::Cli;
use crate::app::models::{RuntimeConfig, ScanSettings};
use crate::app::profile::{FilterTag, Profile};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Deserialize, Debug)]
struct PresetsFile {
    #[serde(flatten)]
    presets: HashMap<String, PresetConfig>,
}

/// Extra rules layered on top of a profile.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct PresetConfig {
    keep: Option<Vec<String>>,
    prune: Option<Vec<String>>,
    filters: Option<Vec<String>>,
}

fn presets_path() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    Ok(home.join(".config").join("tint").join("presets.toml"))
}

fn load_presets_file(config_path: &Path) -> Result<HashMap<String, PresetConfig>> {
    if !config_path.exists() {
        return Ok(HashMap::new());
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read presets at {:?}", config_path))?;

    let parsed: PresetsFile = toml::from_str(&content).context("Failed to parse presets.toml")?;

    Ok(parsed.presets)
}

fn merge_vecs(preset_vec: Option<Vec<String>>, cli_vec: Option<Vec<String>>) -> Vec<String> {
    let mut combined = preset_vec.unwrap_or_default();
    if let Some(mut cli_items) = cli_vec {
        combined.append(&mut cli_items);
    }
    // Deduplicate while keeping order
    let mut seen = std::collections::HashSet::new();
    combined.retain(|item| seen.insert(item.clone()));
    combined
}

pub fn resolve_config(cli: Cli) -> Result<RuntimeConfig> {
    let presets = load_presets_file(&presets_path()?)?;
    resolve_with_presets(cli, &presets)
}

fn resolve_with_presets(cli: Cli, presets: &HashMap<String, PresetConfig>) -> Result<RuntimeConfig> {
    let profile = Profile::load(&cli.profile)?;

    // Determine preset to use: CLI flag > profile file name > None
    let stem = cli.profile.file_stem().and_then(|s| s.to_str());
    let preset_key = cli.preset.as_deref().or(stem);
    let preset = match preset_key.and_then(|k| presets.get(k)) {
        Some(p) => {
            log::debug!("Using preset \"{}\"", preset_key.unwrap_or_default());
            p.clone()
        }
        None => {
            if let Some(name) = cli.preset.as_deref() {
                log::warn!("Preset \"{}\" not found, ignoring", name);
            }
            PresetConfig::default()
        }
    };

    let filters = merge_vecs(preset.filters, cli.filter)
        .iter()
        .map(|f| f.parse::<FilterTag>())
        .collect::<Result<Vec<_>, _>>()?;

    let profile = profile
        .with_overrides(
            merge_vecs(preset.keep, cli.keep),
            merge_vecs(preset.prune, cli.prune),
            filters,
        )
        .with_context(|| format!("Invalid overrides for profile {:?}", cli.profile))?;

    Ok(RuntimeConfig {
        profile,
        root: cli.root,
        dry_run: !cli.apply,
        check_only: cli.check,
        show_removed: cli.show_removed,
        settings: ScanSettings {
            keep_tmp: cli.keep_tmp,
            lockfile: cli.lockfile,
        },
    })
}
