use anyhow::Result;
use clap::ArgMatches;
use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

pub const DEFAULT_CONFIG_FILE: &str = "./folio.toml";

/// Complete configuration that merges CLI args, env vars, config files, and defaults
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FolioConfig {
    /// Paths and server options
    pub build: BuildConfig,
    /// Settings passed through to folio-core
    #[serde(flatten)]
    pub site: folio_core::Config,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BuildConfig {
    /// Directory holding header.json, about.json, ...
    pub data: String,
    /// Template directory
    pub templates: String,
    /// Output directory for the rendered site
    pub output: String,
    /// Configuration file path
    pub config: String,
    /// Host for the preview server
    pub host: String,
    /// Port for the preview server
    pub port: u16,
    /// Open browser automatically
    pub open: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            data: "./json_data".to_string(),
            templates: "./templates".to_string(),
            output: "./build".to_string(),
            config: DEFAULT_CONFIG_FILE.to_string(),
            host: "127.0.0.1".to_string(),
            port: 3000,
            open: false,
        }
    }
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            build: BuildConfig::default(),
            site: folio_core::Config::default(),
        }
    }
}

impl FolioConfig {
    /// Load configuration with cascading precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Environment variables (FOLIO_*)
    /// 3. Configuration file
    /// 4. Defaults (lowest priority)
    pub fn load(args: &ArgMatches) -> Result<Self> {
        let config_file = arg(args, "config").unwrap_or_else(|| DEFAULT_CONFIG_FILE.to_string());

        let mut builder = ConfigBuilder::builder();

        builder = builder.add_source(ConfigBuilder::try_from(&Self::default())?);

        if Path::new(&config_file).exists() {
            builder = builder.add_source(File::new(&config_file, FileFormat::Toml));
        }

        builder = builder.add_source(
            Environment::with_prefix("FOLIO")
                .prefix_separator("_")
                .separator("__"), // Use double underscore for nested keys
        );

        builder = builder.add_source(ConfigBuilder::try_from(&cli_overrides(args))?);

        let folio_config: FolioConfig = builder.build()?.try_deserialize()?;

        Ok(folio_config)
    }

    pub fn build_config(&self) -> &BuildConfig {
        &self.build
    }
}

// Only args defined on the current subcommand are looked at.
fn cli_overrides(args: &ArgMatches) -> HashMap<String, String> {
    let mut overrides = HashMap::new();

    for (arg_name, key) in [
        ("data", "build.data"),
        ("templates", "build.templates"),
        ("output", "build.output"),
        ("config", "build.config"),
        ("host", "build.host"),
        ("on-malformed", "data.on_malformed"),
    ] {
        if let Some(value) = arg(args, arg_name) {
            overrides.insert(key.to_string(), value);
        }
    }

    if let Ok(Some(port)) = args.try_get_one::<u16>("port") {
        overrides.insert("build.port".to_string(), port.to_string());
    }
    if let Ok(Some(true)) = args.try_get_one::<bool>("open") {
        overrides.insert("build.open".to_string(), "true".to_string());
    }

    overrides
}

fn arg(args: &ArgMatches, name: &str) -> Option<String> {
    args.try_get_one::<String>(name).ok().flatten().cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::{Arg, Command};
    use folio_core::MalformedPolicy;

    fn command() -> Command {
        Command::new("test")
            .arg(Arg::new("data").long("data").value_name("DIR"))
            .arg(Arg::new("output").long("output").value_name("DIR"))
            .arg(Arg::new("config").long("config").value_name("FILE"))
            .arg(Arg::new("on-malformed").long("on-malformed"))
            .arg(
                Arg::new("port")
                    .long("port")
                    .value_parser(clap::value_parser!(u16)),
            )
    }

    #[test]
    fn test_port_override() {
        let matches = command()
            .try_get_matches_from(vec!["test", "--config", "/does/not/exist.toml", "--port", "4000"])
            .unwrap();

        let config = FolioConfig::load(&matches).unwrap();
        assert_eq!(config.build.port, 4000);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        assert!(command().try_get_matches_from(vec!["test", "--port", "abc"]).is_err());
        assert!(command().try_get_matches_from(vec!["test", "--port", "70000"]).is_err());
    }

    #[test]
    fn test_default_config() {
        let config = FolioConfig::default();
        assert_eq!(config.build.data, "./json_data");
        assert_eq!(config.build.templates, "./templates");
        assert_eq!(config.build.output, "./build");
        assert_eq!(config.build.port, 3000);
        assert_eq!(config.site.data.on_malformed, MalformedPolicy::Fail);
    }

    #[test]
    fn test_cli_args_override() {
        let matches = command()
            .try_get_matches_from(vec![
                "test",
                "--data",
                "/custom/data",
                "--output",
                "/custom/output",
                "--config",
                "/does/not/exist.toml",
            ])
            .unwrap();

        let config = FolioConfig::load(&matches).unwrap();
        assert_eq!(config.build.data, "/custom/data");
        assert_eq!(config.build.output, "/custom/output");
        // Should still have defaults for non-overridden values
        assert_eq!(config.build.templates, "./templates");
        assert_eq!(config.build.port, 3000);
    }

    #[test]
    fn test_on_malformed_override() {
        let matches = command()
            .try_get_matches_from(vec![
                "test",
                "--config",
                "/does/not/exist.toml",
                "--on-malformed",
                "use-default",
            ])
            .unwrap();

        let config = FolioConfig::load(&matches).unwrap();
        assert_eq!(config.site.data.on_malformed, MalformedPolicy::UseDefault);
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("folio.toml");
        std::fs::write(
            &file,
            "[build]\ntemplates = \"./site-templates\"\n\n[data]\non_malformed = \"use-default\"\n",
        )
        .unwrap();

        let matches = command()
            .try_get_matches_from(vec!["test", "--config", file.to_str().unwrap()])
            .unwrap();

        let config = FolioConfig::load(&matches).unwrap();
        assert_eq!(config.build.templates, "./site-templates");
        assert_eq!(config.site.data.on_malformed, MalformedPolicy::UseDefault);
    }
}
