use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    completion::CompletionSettings,
    measurement::{Calibration, MeasurementConfig},
    pipeline::segmenter::SegmenterConfig,
};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_BASE_URL";
pub const LISTEN_ENV: &str = "BODY_SCAN_LISTEN";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub segmentation: SegmenterConfig,
    pub measurement: MeasurementConfig,
    pub calibration: Calibration,
    pub completion: CompletionSettings,
    pub server: ServerConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Index into the list printed by `body-scan cameras`.
    pub index: u32,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:3000".to_string(),
        }
    }
}

impl AppConfig {
    /// Reads the TOML file when given, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(key) = env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.completion.api_key = Some(key);
            }
        }
        if let Ok(url) = env::var(BASE_URL_ENV) {
            if !url.trim().is_empty() {
                self.completion.base_url = url;
            }
        }
        if let Ok(addr) = env::var(LISTEN_ENV) {
            if !addr.trim().is_empty() {
                self.server.listen_addr = addr;
            }
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.measurement.validate()?;
        self.segmentation.validate()?;
        if let Some(inches) = self.calibration.user_height_inches {
            if inches <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "calibration.user_height_inches must be positive, got {inches}"
                )));
            }
        }
        if self.calibration.factor <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "calibration.factor must be positive, got {}",
                self.calibration.factor
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::segmenter::ModelVariant;

    #[test]
    fn empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config.camera.index, 0);
        assert_eq!(config.measurement, MeasurementConfig::default());
        assert_eq!(config.segmentation.threshold, 0.5);
        assert!(config.segmentation.flip_horizontal);
        assert_eq!(config.completion.temperature, 0.7);
        assert_eq!(config.completion.max_tokens, 500);
        assert_eq!(config.server.listen_addr, "127.0.0.1:3000");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn sections_override_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [segmentation]
            variant = "landscape"
            threshold = 0.6
            flip_horizontal = false

            [measurement]
            window_radius = 2
            min_valid_bands = 4
            bands = [
                { fraction = 0.2, min_pixels = 10 },
                { fraction = 0.3, min_pixels = 10 },
                { fraction = 0.5, min_pixels = 20 },
                { fraction = 0.7, min_pixels = 20 },
            ]

            [calibration]
            user_height_inches = 68.0

            [completion]
            model = "gpt-4o"
            "#,
        )
        .unwrap();

        assert_eq!(config.segmentation.variant, ModelVariant::Landscape);
        assert_eq!(config.segmentation.threshold, 0.6);
        assert!(!config.segmentation.flip_horizontal);
        assert_eq!(config.measurement.window_radius, 2);
        assert_eq!(config.measurement.bands[2].min_pixels, 20);
        assert_eq!(config.calibration.user_height_inches, Some(68.0));
        assert_eq!(config.calibration.factor, 1.0);
        assert_eq!(config.completion.model, "gpt-4o");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let config = AppConfig::from_toml("[calibration]\nfactor = 0.0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let config = AppConfig::from_toml("[segmentation]\nthreshold = 1.5\n").unwrap();
        assert!(config.validate().is_err());

        assert!(matches!(
            AppConfig::from_toml("[camera]\nindex = \"front\"\n"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let path = env::temp_dir().join("body_scan_missing_config.toml");
        let _ = fs::remove_file(&path);
        assert!(matches!(
            AppConfig::load(Some(&path)),
            Err(ConfigError::Io { .. })
        ));
    }
}
