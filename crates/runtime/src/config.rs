//! Loads `Config` from a TOML file, falling back to an all-defaults
//! configuration when none is present. Mirrors the gateway's own
//! `SA_CONFIG`-env-var-or-`config.toml` convention.

use anyhow::Context;
use sa_domain::config::Config;

/// Reads the config path from `SA_CONFIG`, defaulting to `config.toml` in
/// the working directory. A missing file is not an error — `Config`'s
/// `Default` is a valid (if provider-less) configuration.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("SA_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path).with_context(|| format!("reading {config_path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing {config_path}"))?
    } else {
        Config::default()
    };

    Ok((config, config_path))
}
