use anyhow::Context;
use clap::Parser;
use rootpack_lib::{Config, merge_configs};
use std::{collections::HashMap, env, fs};
mod fs_utils;
mod packaging;
mod sink;

use crate::fs_utils::{compile_patterns, encode_size, parse_size};
use crate::packaging::{ArchiveJob, build_archive, plan_archive};

#[derive(Parser, Debug)]
#[command(author, version, about = "Packages a site directory into a deploy ZIP", long_about = None)]
pub struct Cli {
    /// Directory to package (default: deploy/ksp-hub-github-io-root)
    #[arg(long)]
    pub source: Option<String>,

    /// Archive path (default: deploy/packages/ksp-hub-github-io-root.zip)
    #[arg(short, long)]
    pub output: Option<String>,

    /// Configuration file (YAML or JSON)
    #[arg(short, long)]
    pub config: Option<String>,

    /// Dry run (just list files and parameters)
    #[arg(short, long, action = clap::ArgAction::SetTrue)]
    pub dry: bool,

    /// Max total size of packaged files, e.g. 512Mi or 2GB (0 = unlimited)
    #[arg(short, long)]
    pub max_size: Option<String>,

    /// Patterns to skip, matched against archive names (can be specified multiple times)
    #[arg(short = 's', long)]
    pub skip: Vec<String>,

    /// Generate YAML config to stdout
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub generate_yaml_config: bool,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    // Step 1: Read environment
    let env_config = read_env();

    // Step 2: Read config file (if exists)
    let mut file_config = Config::default();
    if let Some(path) = cli.config.clone().or(env_config.config.clone()) {
        file_config = read_config_file(&path)?;
    }

    // Step 3: Merge configs: env < file < CLI, then fill defaults
    let merged = merge_configs(env_config, file_config, cli_to_config(&cli)).with_defaults();
    log::debug!("resolved config: {merged:?}");

    if cli.generate_yaml_config {
        let yaml = serde_yaml::to_string(&merged)?;
        println!("{yaml}");
        return Ok(());
    }

    let job = job_from_config(&merged)?;

    if merged.dry.unwrap_or(false) {
        println!("--- DRY RUN ---");
        println!("{}", serde_yaml::to_string(&merged)?);
        let files = plan_archive(&job)?;
        let total: u64 = files.iter().map(|f| f.len).sum();
        println!("Total files: {}", files.len());
        println!("Total size: {}", encode_size(total));
        for f in files {
            println!("  {} -> {}", f.path.display(), f.name_in_archive);
        }
        return Ok(());
    }

    let summary = build_archive(&job)?;
    println!(
        "Archive created: {} ({} files, {})",
        summary.destination.display(),
        summary.entries,
        encode_size(summary.bytes)
    );
    Ok(())
}

fn job_from_config(config: &Config) -> anyhow::Result<ArchiveJob> {
    let source = config.source.as_deref().context("source directory is not set")?;
    let output = config.output.as_deref().context("output path is not set")?;

    let mut job = ArchiveJob::new(source, output);
    job.skip = compile_patterns(config.skip.as_deref().unwrap_or_default())?;
    job.max_size = config.max_size.as_deref().map(parse_size).transpose()?;
    Ok(job)
}

/// Reads environment variables prefixed with ROOTPACK_
fn read_env() -> Config {
    let vars: HashMap<String, String> = env::vars().collect();
    config_from_vars(&vars)
}

fn config_from_vars(vars: &HashMap<String, String>) -> Config {
    macro_rules! get_env {
        ($key:expr) => {
            vars.get(&format!("ROOTPACK_{}", $key)).cloned()
        };
    }

    Config {
        source: get_env!("SOURCE"),
        output: get_env!("OUTPUT"),
        config: get_env!("CONFIG"),
        max_size: get_env!("MAX_SIZE"),
        dry: get_env!("DRY").map(|v| v == "true" || v == "1" || v.eq_ignore_ascii_case("yes")),
        skip: get_env!("SKIP").map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        }),
    }
}

/// Reads YAML or JSON config from file
fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let content =
        fs::read_to_string(path).with_context(|| format!("reading config file {path}"))?;
    let lower = path.to_lowercase();
    let cfg = if lower.ends_with(".json") {
        serde_json::from_str(&content).with_context(|| format!("parsing {path}"))?
    } else {
        serde_yaml::from_str(&content).with_context(|| format!("parsing {path}"))?
    };
    Ok(cfg)
}

/// Converts CLI struct into Config
fn cli_to_config(cli: &Cli) -> Config {
    Config {
        source: cli.source.clone(),
        output: cli.output.clone(),
        config: cli.config.clone(),
        dry: cli.dry.then_some(true),
        max_size: cli.max_size.clone(),
        skip: if cli.skip.is_empty() {
            None
        } else {
            Some(cli.skip.clone())
        },
    }
}
