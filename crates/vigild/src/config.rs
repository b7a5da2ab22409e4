use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use vigil_core::VerificationConfig;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {value:?}")]
    Env { key: &'static str, value: String },

    #[error(transparent)]
    Invalid(#[from] vigil_core::ConfigError),
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker threads; 0 means one per available core.
    pub workers: usize,
    /// Request queue depth per worker.
    pub queue_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_depth: 64,
        }
    }
}

impl EngineConfig {
    pub fn worker_count(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }
}

/// Optional learned spoof classifier.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// ONNX model path. Texture analysis uses the frequency domain when unset.
    pub model_path: Option<PathBuf>,
    /// Pinned SHA-256 of the model file.
    pub sha256: Option<String>,
    /// Feed the model NCHW instead of NHWC.
    pub channels_first: bool,
}

/// Daemon configuration: TOML file (path in `VIGIL_CONFIG`) overlaid with
/// `VIGIL_*` environment variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    #[serde(flatten)]
    pub verification: VerificationConfig,
    pub engine: EngineConfig,
    pub classifier: ClassifierConfig,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os("VIGIL_CONFIG") {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.verification.validate()?;
        Ok(())
    }

    /// Apply `VIGIL_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let v = &mut self.verification;
        env_parse(&lookup, "VIGIL_EAR_THRESHOLD", &mut v.blink.ear_threshold)?;
        env_parse(&lookup, "VIGIL_CONSECUTIVE_FRAMES", &mut v.blink.consecutive_frames)?;
        env_parse(&lookup, "VIGIL_TIME_WINDOW_SECS", &mut v.blink.time_window_secs)?;
        env_parse(&lookup, "VIGIL_MIN_BLINKS", &mut v.blink.min_blinks)?;
        env_parse(&lookup, "VIGIL_MAX_BLINKS", &mut v.blink.max_blinks)?;
        env_parse(&lookup, "VIGIL_TEXTURE_THRESHOLD", &mut v.fraud.texture_threshold)?;
        env_parse(&lookup, "VIGIL_HISTORY_CAPACITY", &mut v.fraud.history_capacity)?;
        env_bool(&lookup, "VIGIL_CHALLENGE_ENABLED", &mut v.challenge.enabled)?;
        env_parse(&lookup, "VIGIL_CHALLENGE_TIMEOUT_SECS", &mut v.challenge.timeout_secs)?;
        env_parse(&lookup, "VIGIL_ATTEMPT_TTL_SECS", &mut v.attempt.ttl_secs)?;
        env_parse(&lookup, "VIGIL_WORKERS", &mut self.engine.workers)?;

        if let Some(path) = lookup("VIGIL_MODEL_PATH") {
            self.classifier.model_path = Some(PathBuf::from(path));
        }
        if let Some(digest) = lookup("VIGIL_MODEL_SHA256") {
            self.classifier.sha256 = Some(digest);
        }
        Ok(())
    }
}

fn env_parse<F, T>(lookup: &F, key: &'static str, slot: &mut T) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    if let Some(value) = lookup(key) {
        *slot = value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Env { key, value })?;
    }
    Ok(())
}

fn env_bool<F>(lookup: &F, key: &'static str, slot: &mut bool) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(value) = lookup(key) {
        *slot = match value.trim() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::Env { key, value }),
        };
    }
    Ok(())
}
