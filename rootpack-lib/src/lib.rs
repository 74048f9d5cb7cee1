use serde::{Deserialize, Serialize};

/// Directory packaged when no source is configured.
pub const DEFAULT_SOURCE: &str = "deploy/ksp-hub-github-io-root";
/// Directory the archive is written into when no output is configured.
pub const DEFAULT_DEST_DIR: &str = "deploy/packages";
/// File name of the archive inside [`DEFAULT_DEST_DIR`].
pub const DEFAULT_ARCHIVE_NAME: &str = "ksp-hub-github-io-root.zip";

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub source: Option<String>,
    pub output: Option<String>,
    pub config: Option<String>,
    pub dry: Option<bool>,
    pub max_size: Option<String>,
    pub skip: Option<Vec<String>>,
}

impl Config {
    /// Fills every unset field that has a production default.
    pub fn with_defaults(mut self) -> Self {
        if self.source.is_none() {
            self.source = Some(DEFAULT_SOURCE.to_string());
        }
        if self.output.is_none() {
            self.output = Some(format!("{DEFAULT_DEST_DIR}/{DEFAULT_ARCHIVE_NAME}"));
        }
        if self.dry.is_none() {
            self.dry = Some(false);
        }
        self
    }
}

/// Merge configs by priority: env < file < cli
pub fn merge_configs(env: Config, file: Config, cli: Config) -> Config {
    fn pick<T>(env: Option<T>, file: Option<T>, cli: Option<T>) -> Option<T> {
        cli.or(file).or(env)
    }

    Config {
        source: pick(env.source, file.source, cli.source),
        output: pick(env.output, file.output, cli.output),
        config: pick(env.config, file.config, cli.config),
        dry: pick(env.dry, file.dry, cli.dry),
        max_size: pick(env.max_size, file.max_size, cli.max_size),
        skip: pick(env.skip, file.skip, cli.skip),
    }
}
