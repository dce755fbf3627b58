//! Inspector configuration: TOML file plus API key lookup.
//!
//! Values come from, in order: an explicit `--config` path, the user file at
//! `<config dir>/pcb-inspector/config.toml`, or built-in defaults. Missing
//! sections and keys fall back to the defaults individually.

use std::path::{Path, PathBuf};

use keyring::Entry;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

/// Annotated default configuration, shipped in the binary.
const DEFAULT_CONFIG: &str = include_str!("../config/default.toml");

const APP_DIR_NAME: &str = "pcb-inspector";
const KEYRING_USER: &str = "pcb-inspector";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("No API key configured for '{0}'. Set {1} or store it in the system keychain.")]
    MissingApiKey(String, &'static str),

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("No data directory available on this platform")]
    NoDataDir,
}

/// Vision-language providers the describer can talk to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAi,
    Claude,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::OpenAi => "openai",
            Provider::Claude => "claude",
        }
    }

    /// Environment variable checked before the keychain.
    pub fn env_var(&self) -> &'static str {
        match self {
            Provider::OpenAi => "OPENAI_API_KEY",
            Provider::Claude => "ANTHROPIC_API_KEY",
        }
    }

    /// Keychain service name for this provider's API key.
    pub fn keychain_service(&self) -> &'static str {
        match self {
            Provider::OpenAi => "pcb-inspector-openai-api",
            Provider::Claude => "pcb-inspector-claude-api",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Provider::OpenAi => "gpt-4o",
            Provider::Claude => "claude-sonnet-4-20250514",
        }
    }
}

impl std::str::FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "openai" => Ok(Provider::OpenAi),
            "claude" | "anthropic" => Ok(Provider::Claude),
            other => Err(format!(
                "Unsupported AI provider: '{}'. Supported: openai, claude",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root for samples and history. Defaults to the platform data dir.
    pub data_dir: Option<PathBuf>,
    pub samples_dir: String,
    pub history_db: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            samples_dir: "qa_samples".to_string(),
            history_db: "inspections.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardDetectionConfig {
    /// Smallest bounding-box area (px) accepted as a board.
    pub min_board_area: u32,
    /// Candidates scoring below this are rejected.
    pub confidence_threshold: f32,
    /// Margin kept around the board when cropping.
    pub crop_margin: u32,
}

impl Default for BoardDetectionConfig {
    fn default() -> Self {
        Self {
            min_board_area: 10_000,
            confidence_threshold: 0.7,
            crop_margin: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    pub max_features: usize,
    /// FAST-9 intensity threshold.
    pub fast_threshold: u8,
    /// Lowe ratio for the k=2 match filter.
    pub ratio_test: f32,
    pub min_matches: usize,
    /// RANSAC reprojection threshold in pixels.
    pub ransac_threshold: f64,
    pub ransac_iterations: usize,
    pub seed: u64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            max_features: 2000,
            fast_threshold: 20,
            ratio_test: 0.75,
            min_matches: 4,
            ransac_threshold: 5.0,
            ransac_iterations: 2000,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComparisonConfig {
    /// Global pass threshold and per-pixel SSIM cut for the difference mask.
    pub threshold: f64,
    /// Difference regions at or below this area (px) are treated as noise.
    pub min_region_area: u32,
    /// Regions scoring below this are reported as defects.
    pub region_defect_threshold: f64,
    /// Fixed grid of extra regions; 0 disables the grid.
    pub grid_rows: u32,
    pub grid_cols: u32,
}

impl Default for ComparisonConfig {
    fn default() -> Self {
        Self {
            threshold: 0.95,
            min_region_area: 100,
            region_defect_threshold: 0.9,
            grid_rows: 0,
            grid_cols: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: Provider,
    /// Model name; the provider's default model when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout_secs: u64,
    /// Upper bound on regions sent for description per inspection.
    pub max_regions: usize,
    /// Context kept around each region crop, in pixels.
    pub region_padding: u32,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: Provider::OpenAi,
            model: None,
            max_tokens: 1000,
            temperature: 0.1,
            timeout_secs: 60,
            max_regions: 5,
            region_padding: 16,
        }
    }
}

impl AiConfig {
    /// The configured model, or the provider's default.
    pub fn model_name(&self) -> &str {
        match self.model.as_deref().map(str::trim) {
            Some(m) if !m.is_empty() => m,
            _ => self.provider.default_model(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InspectorConfig {
    pub storage: StorageConfig,
    pub board_detection: BoardDetectionConfig,
    pub alignment: AlignmentConfig,
    pub comparison: ComparisonConfig,
    pub ai: AiConfig,
}

impl InspectorConfig {
    /// Load configuration from `path`, or the user config file, or defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let candidate = match path {
            Some(p) => Some(p.to_path_buf()),
            None => user_config_path().filter(|p| p.exists()),
        };

        match candidate {
            Some(p) => {
                let config = Self::from_file(&p)?;
                info!("Loaded config from {:?}", p);
                Ok(config)
            }
            None => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// The annotated default config file, for `config init`.
    pub fn default_toml() -> &'static str {
        DEFAULT_CONFIG
    }

    /// Directory holding samples and the history database.
    pub fn data_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join(APP_DIR_NAME))
                .ok_or(ConfigError::NoDataDir),
        }
    }

    pub fn samples_root(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.storage.samples_dir))
    }

    pub fn history_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_dir()?.join(&self.storage.history_db))
    }
}

/// `<config dir>/pcb-inspector/config.toml`, if the platform has a config dir.
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join(APP_DIR_NAME).join("config.toml"))
}

/// Resolve the API key for `provider`: environment first, then the keychain.
pub fn resolve_api_key(provider: Provider) -> Result<String, ConfigError> {
    if let Ok(key) = std::env::var(provider.env_var()) {
        if !key.trim().is_empty() {
            debug!("Using API key from {}", provider.env_var());
            return Ok(key);
        }
    }

    let entry = Entry::new(provider.keychain_service(), KEYRING_USER)
        .map_err(|e| ConfigError::Keychain(e.to_string()))?;
    match entry.get_password() {
        Ok(key) => Ok(key),
        Err(keyring::Error::NoEntry) => Err(ConfigError::MissingApiKey(
            provider.as_str().to_string(),
            provider.env_var(),
        )),
        Err(e) => Err(ConfigError::Keychain(format!(
            "Failed to read API key for '{}': {}",
            provider.as_str(),
            e
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_embedded_default_matches_code_defaults() {
        let parsed: InspectorConfig = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(parsed, InspectorConfig::default());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[comparison]\nthreshold = 0.9\n\n[ai]\nprovider = \"claude\"\n",
        )
        .unwrap();

        let config = InspectorConfig::load(Some(&path)).unwrap();
        assert_eq!(config.comparison.threshold, 0.9);
        assert_eq!(config.comparison.min_region_area, 100);
        assert_eq!(config.ai.provider, Provider::Claude);
        assert_eq!(config.alignment, AlignmentConfig::default());
    }

    #[test]
    fn test_invalid_file_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        std::fs::write(&path, "[comparison\nthreshold = ").unwrap();

        let err = InspectorConfig::load(Some(&path)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("broken.toml"));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let err = InspectorConfig::load(Some(Path::new("/nonexistent/pcb.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_explicit_data_dir_drives_paths() {
        let mut config = InspectorConfig::default();
        config.storage.data_dir = Some(PathBuf::from("/srv/qa"));
        assert_eq!(
            config.samples_root().unwrap(),
            PathBuf::from("/srv/qa/qa_samples")
        );
        assert_eq!(
            config.history_path().unwrap(),
            PathBuf::from("/srv/qa/inspections.db")
        );
    }

    #[test]
    fn test_provider_alone_selects_its_default_model() {
        let config: InspectorConfig = toml::from_str("[ai]\nprovider = \"claude\"\n").unwrap();
        assert_eq!(config.ai.provider, Provider::Claude);
        assert_eq!(config.ai.model_name(), Provider::Claude.default_model());

        assert_eq!(AiConfig::default().model_name(), "gpt-4o");
    }

    #[test]
    fn test_explicit_model_wins() {
        let config: InspectorConfig =
            toml::from_str("[ai]\nprovider = \"claude\"\nmodel = \"claude-opus-4\"\n").unwrap();
        assert_eq!(config.ai.model_name(), "claude-opus-4");

        let blank = AiConfig {
            model: Some("  ".to_string()),
            ..AiConfig::default()
        };
        assert_eq!(blank.model_name(), "gpt-4o");
    }

    #[test]
    fn test_provider_from_str() {
        assert_eq!("openai".parse::<Provider>().unwrap(), Provider::OpenAi);
        assert_eq!("Claude".parse::<Provider>().unwrap(), Provider::Claude);
        let err = "gemini".parse::<Provider>().unwrap_err();
        assert!(err.contains("Unsupported AI provider"));
    }
}
