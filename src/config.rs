use crate::error::{GatewayError, Result};
use crate::vendors::Vendor;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub images: ImageConfig,
    /// Extra model names, registered after the built-in ones.
    #[serde(default)]
    pub models: Vec<ModelAlias>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AwsConfig {
    /// Falls back to the SDK's region provider chain when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    /// Named profile from the shared AWS config files.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_image_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_image_max_bytes")]
    pub max_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelAlias {
    pub name: String,
    pub vendor: Vendor,
    pub model_id: String,
}

fn default_port() -> u16 {
    4333
}

fn default_image_timeout() -> u64 {
    30
}

fn default_image_max_bytes() -> usize {
    20 * 1024 * 1024
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_image_timeout(),
            max_bytes: default_image_max_bytes(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            aws: AwsConfig::default(),
            images: ImageConfig::default(),
            models: Vec::new(),
        }
    }
}

impl GatewayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir > built-in defaults.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in &config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn validate(&self) -> Result<()> {
        for alias in &self.models {
            if alias.name.trim().is_empty() || alias.model_id.trim().is_empty() {
                return Err(GatewayError::config(format!(
                    "Model alias for vendor '{}' needs both a name and a model_id",
                    alias.vendor
                )));
            }
        }
        if self.images.max_bytes == 0 {
            return Err(GatewayError::config("images.max_bytes must be positive"));
        }
        Ok(())
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // CWD
    paths.push(PathBuf::from("bedrock-relay.toml"));

    // XDG / platform config dir
    if cfg!(target_os = "macos") {
        if let Some(home) = dirs_path() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join("bedrock-relay")
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join("bedrock-relay").join("config.toml"));
        }
        if let Some(home) = dirs_path() {
            paths.push(home.join(".config").join("bedrock-relay").join("config.toml"));
        }
    }

    // Home directory fallback
    if let Some(home) = dirs_path() {
        paths.push(home.join(".bedrock-relay.toml"));
    }

    paths
}

fn dirs_path() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[aws]
region = "eu-west-1"

[images]
timeout_secs = 5

[[models]]
name = "nova"
vendor = "nova"
model_id = "eu.amazon.nova-lite-v1:0"
"#
        )
        .unwrap();

        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.aws.region.as_deref(), Some("eu-west-1"));
        assert_eq!(config.images.timeout_secs, 5);
        assert_eq!(config.images.max_bytes, 20 * 1024 * 1024);
        assert_eq!(config.models.len(), 1);
        assert_eq!(config.models[0].vendor, Vendor::Nova);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = GatewayConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 4333);
        assert!(config.aws.region.is_none());
        assert!(config.models.is_empty());
    }

    #[test]
    fn test_unknown_vendor_rejected() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[[models]]
name = "x"
vendor = "mistral"
model_id = "mistral.x"
"#
        )
        .unwrap();

        assert!(matches!(
            GatewayConfig::load(f.path()),
            Err(GatewayError::Toml(_))
        ));
    }

    #[test]
    fn test_blank_alias_rejected() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
[[models]]
name = ""
vendor = "claude"
model_id = "anthropic.claude-v2"
"#
        )
        .unwrap();

        assert!(matches!(
            GatewayConfig::load(f.path()),
            Err(GatewayError::Config { .. })
        ));
    }

    #[test]
    fn test_missing_explicit_path_is_an_error() {
        let result = GatewayConfig::find_and_load(Some(Path::new("/nonexistent/relay.toml")));
        assert!(matches!(result, Err(GatewayError::Config { .. })));
    }
}
