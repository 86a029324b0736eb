//! Engine Configuration - TOML
//!
//! Every section is optional. Relative paths resolve against the directory
//! holding the config file.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::profile::{SigningPolicy, SigningProfile};
use crate::signing::{SigningError, SigningIdentity};

const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
pub const DEFAULT_PASSPHRASE_ENV: &str = "PASSFORGE_P12_PASSPHRASE";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(String),

    #[error("config parse error: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub engine: EngineSection,
    pub pass: PassSection,
    pub signing: SigningSection,
    pub assets: AssetsSection,
    pub output: OutputSection,
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    /// Size of the generation worker pool.
    pub worker_threads: usize,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            worker_threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2)
                .min(8),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PassSection {
    pub pass_type_identifier: String,
    pub team_identifier: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SigningSection {
    pub profile: SigningProfile,
    pub allow_placeholder_signature: bool,
    pub pkcs12_path: Option<PathBuf>,
    /// Name of the environment variable holding the PKCS#12 passphrase.
    pub passphrase_env: String,
}

impl Default for SigningSection {
    fn default() -> Self {
        Self {
            profile: SigningProfile::Production,
            allow_placeholder_signature: false,
            pkcs12_path: None,
            passphrase_env: DEFAULT_PASSPHRASE_ENV.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AssetsSection {
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputSection {
    pub directory: PathBuf,
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("out"),
        }
    }
}

impl EngineConfig {
    /// Loads and validates configuration from disk.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)
            .map_err(|err| ConfigError::Io(format!("{}: {err}", path.display())))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config = Self::from_toml_str(content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.worker_threads == 0 {
            return Err(ConfigError::Invalid(
                "engine.worker_threads must be at least 1".to_string(),
            ));
        }
        self.signing_policy()?;
        if self.signing.passphrase_env.trim().is_empty() {
            return Err(ConfigError::Invalid("signing.passphrase_env must be set".to_string()));
        }
        Ok(())
    }

    pub fn signing_policy(&self) -> Result<SigningPolicy, ConfigError> {
        SigningPolicy::new(self.signing.profile, self.signing.allow_placeholder_signature)
            .map_err(|err| ConfigError::Invalid(err.to_string()))
    }

    /// Resolve a configured path against the config file's directory.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base) if path.is_relative() => base.join(path),
            _ => path.to_path_buf(),
        }
    }

    pub fn asset_root(&self) -> Option<PathBuf> {
        self.assets.root.as_deref().map(|p| self.resolve_path(p))
    }

    pub fn output_dir(&self) -> PathBuf {
        self.resolve_path(&self.output.directory)
    }

    /// Load the PKCS#12 identity named by `[signing]`, reading the passphrase
    /// from the configured environment variable.
    pub fn load_identity(&self) -> Result<SigningIdentity, SigningError> {
        let path = self
            .signing
            .pkcs12_path
            .as_deref()
            .ok_or(SigningError::NotConfigured)?;
        let passphrase = std::env::var(&self.signing.passphrase_env)
            .map_err(|_| SigningError::PassphraseUnset(self.signing.passphrase_env.clone()))?;
        SigningIdentity::from_pkcs12_file(&self.resolve_path(path), &passphrase)
    }
}
