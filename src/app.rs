// Declare modules
pub mod cli;
pub mod config;
pub mod filters;
pub mod formatter;
pub mod models;
pub mod packages;
pub mod processor;
pub mod profile;
pub mod scanner;

use anyhow::Result;
use clap::Parser;

use self::cli::Cli;
use self::config::resolve_config;
use self::formatter::OutputGenerator;
use self::processor::TintProcessor;
use self::scanner::RootFs;

/// Initializes components and orchestrates data flow.
pub fn run() -> Result<()> {
    // 1. Parse Args
    let args = Cli::parse();

    let level = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    // 2. Resolve Configuration (profile + presets + CLI)
    let config = resolve_config(args)?;
    let profile = &config.profile;

    if config.check_only {
        let filters: Vec<String> = profile.filters().iter().map(|f| f.to_string()).collect();
        println!(
            "Profile OK: {} targets, {} packages, filters: [{}], {} keep rules, {} prune rules",
            profile.targets().len(),
            profile.packages().len(),
            filters.join(", "),
            profile.keep_patterns().len(),
            profile.prune_patterns().len()
        );
        return Ok(());
    }

    // 3. Plan against the image
    let rootfs = RootFs::new(config.root.clone(), &config.settings)?;
    let processor = TintProcessor::new(rootfs, config.profile.clone(), config.settings.lockfile.clone());
    let plan = processor.plan()?;

    if plan.kept.is_empty() {
        log::warn!("Nothing would be preserved in {:?}", config.root);
    }

    // 4. Report or apply
    if config.dry_run {
        let tree = OutputGenerator::generate_tree(&plan.kept);
        let removed = config
            .show_removed
            .then(|| OutputGenerator::generate_removed(&plan.removed));
        let summary = OutputGenerator::summary(&plan);
        println!("{}", OutputGenerator::format_report(&tree, removed.as_deref(), &summary));
    } else {
        log::info!("Removing {} files from {:?}", plan.removed.len(), config.root);
        processor.apply(&plan)?;
        log::info!("{}", OutputGenerator::summary(&plan));
    }

    Ok(())
}
