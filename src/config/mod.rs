mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {:?}", path))?;

    let config: Config =
        toml::from_str(&content).with_context(|| format!("failed to parse config file: {:?}", path))?;

    validate_config(&config)?;
    Ok(config)
}

/// Load config from `custom_path`, or the first of a handful of default
/// locations that exists, or a default config if none do.
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = ["./watchstate.toml", "~/.config/watchstate/config.toml", "/etc/watchstate/config.toml"];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

fn validate_config(config: &Config) -> Result<()> {
    for backend in &config.backends {
        if backend.enabled && backend.api_key.is_empty() {
            anyhow::bail!("backend '{}' is enabled but has no api_key", backend.name);
        }
        if backend.enabled && backend.url.is_empty() {
            anyhow::bail!("backend '{}' is enabled but has no url", backend.name);
        }
    }

    if config.export_allowed_time_diff < 0 {
        anyhow::bail!("export_allowed_time_diff must not be negative");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_parses_minimal_toml() {
        let toml = r#"
            [[backends]]
            name = "jellyfin-main"
            type = "jellyfin"
            url = "http://jellyfin.local:8096"
            api_key = "secret"
            enabled = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.backends.len(), 1);
        assert_eq!(config.backends[0].kind, BackendKind::Jellyfin);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_rejects_enabled_backend_without_api_key() {
        let toml = r#"
            [[backends]]
            name = "jellyfin-main"
            type = "jellyfin"
            url = "http://jellyfin.local:8096"
            api_key = ""
            enabled = true
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(validate_config(&config).is_err());
    }
}
