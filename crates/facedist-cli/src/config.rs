use facedist_core::alignment::DEFAULT_CHIP_PADDING;
use facedist_core::detector::SCRFD_MODEL_FILE;
use facedist_core::landmarks::LANDMARK_MODEL_FILE;
use facedist_core::recognizer::DESCRIPTOR_MODEL_FILE;
use facedist_core::DEFAULT_SAME_PERSON_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Tool configuration: defaults, then a TOML file, then `FACEDIST_*`
/// environment variables. Command-line flags are applied by the caller.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Model file overrides; relative paths resolve against `model_dir`.
    pub detector_model: Option<PathBuf>,
    pub landmark_model: Option<PathBuf>,
    pub descriptor_model: Option<PathBuf>,
    /// Descriptor distance below which two faces are the same person.
    /// Calibrated per descriptor model.
    pub same_person_threshold: f64,
    /// 2× upsampling steps before detection, per subcommand.
    pub detect_upsample: u32,
    pub recognize_upsample: u32,
    /// Minimum detector score for a face.
    pub detection_confidence: f32,
    /// Padding around the aligned face chip.
    pub chip_padding: f32,
    /// ONNX Runtime intra-op threads per model.
    pub intra_threads: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facedist_core::default_model_dir(),
            detector_model: None,
            landmark_model: None,
            descriptor_model: None,
            same_person_threshold: DEFAULT_SAME_PERSON_THRESHOLD,
            detect_upsample: 1,
            recognize_upsample: 0,
            detection_confidence: 0.5,
            chip_padding: DEFAULT_CHIP_PADDING,
            intra_threads: 2,
        }
    }
}

impl Config {
    /// Load from `explicit`, else `$FACEDIST_CONFIG`, else the default
    /// location if it exists, then apply environment overrides.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |key: &str| std::env::var(key).ok();

        let path = explicit
            .map(Path::to_path_buf)
            .or_else(|| env("FACEDIST_CONFIG").map(PathBuf::from))
            .or_else(|| Some(default_config_path()).filter(|p| p.exists()));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_env(env);
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "config file loaded");
        Ok(config)
    }

    /// Override fields from `FACEDIST_*` variables. Unparsable values are
    /// logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACEDIST_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        override_parsed(&lookup, "FACEDIST_THRESHOLD", &mut self.same_person_threshold);
        override_parsed(&lookup, "FACEDIST_UPSAMPLE", &mut self.detect_upsample);
        override_parsed(&lookup, "FACEDIST_INTRA_THREADS", &mut self.intra_threads);
    }

    pub fn detector_model_path(&self) -> PathBuf {
        self.resolve(self.detector_model.as_deref(), SCRFD_MODEL_FILE)
    }

    pub fn landmark_model_path(&self) -> PathBuf {
        self.resolve(self.landmark_model.as_deref(), LANDMARK_MODEL_FILE)
    }

    pub fn descriptor_model_path(&self) -> PathBuf {
        self.resolve(self.descriptor_model.as_deref(), DESCRIPTOR_MODEL_FILE)
    }

    fn resolve(&self, custom: Option<&Path>, default_file: &str) -> PathBuf {
        match custom {
            Some(path) if path.is_absolute() => path.to_path_buf(),
            Some(path) => self.model_dir.join(path),
            None => self.model_dir.join(default_file),
        }
    }
}

/// `$XDG_CONFIG_HOME/facedist/config.toml`, falling back to `~/.config`.
pub fn default_config_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("facedist")
        .join("config.toml")
}

fn override_parsed<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}
