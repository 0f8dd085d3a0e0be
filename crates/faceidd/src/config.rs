use crate::session::SessionTimings;
use faceid_core::Thresholds;
use faceid_hw::CropWindow;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidEnv { key: String, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Accepted pump cadence; the frame period must stay representable.
const MIN_FRAME_RATE_HZ: f32 = 0.01;
const MAX_FRAME_RATE_HZ: f32 = 1000.0;

/// Which similarity model backs the station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Siamese network exported to ONNX (`model_path`).
    #[default]
    Onnx,
    /// Artifact-free L1 similarity.
    L1,
}

impl FromStr for ModelKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onnx" => Ok(Self::Onnx),
            "l1" => Ok(Self::L1),
            _ => Err(()),
        }
    }
}

/// Daemon configuration: defaults, then an optional TOML file, then
/// `FACEID_*` environment variables.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Replay images from this directory instead of opening the camera.
    pub replay_dir: Option<PathBuf>,
    /// Crop window applied to every frame.
    pub crop_x: u32,
    pub crop_y: u32,
    pub crop_size: u32,
    /// Frame pump cadence.
    pub frame_rate_hz: f32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    pub model_kind: ModelKind,
    /// ONNX siamese model file.
    pub model_path: PathBuf,
    /// ONNX Runtime intra-op threads.
    pub intra_threads: usize,
    /// Directory of enrolled reference images.
    pub gallery_dir: PathBuf,
    /// Where each attempt's probe frame is written for auditing.
    pub input_image_path: PathBuf,
    pub detection_threshold: f32,
    pub verification_threshold: f32,
    /// Delay between the trigger and the start of scoring.
    pub start_delay_ms: u64,
    /// How long a verdict stays on screen.
    pub cooldown_ms: u64,
    /// Upper bound on one verify attempt.
    pub verify_timeout_secs: u64,
    /// Frames older than this are not used as probes.
    pub max_frame_age_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("application_data");
        let thresholds = Thresholds::default();
        let crop = CropWindow::default();
        Self {
            camera_device: "/dev/video0".to_string(),
            replay_dir: None,
            crop_x: crop.x,
            crop_y: crop.y,
            crop_size: crop.size,
            frame_rate_hz: 33.0,
            warmup_frames: 4,
            model_kind: ModelKind::Onnx,
            model_path: PathBuf::from("siamese_model.onnx"),
            intra_threads: 2,
            gallery_dir: data_dir.join("verification_images"),
            input_image_path: data_dir.join("input_image").join("input_image.jpg"),
            detection_threshold: thresholds.detection,
            verification_threshold: thresholds.verification,
            start_delay_ms: 500,
            cooldown_ms: 5000,
            verify_timeout_secs: 30,
            max_frame_age_ms: 1000,
        }
    }
}

impl Config {
    /// Load configuration from `file` (if given) and `FACEID_*` environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEID_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = lookup("FACEID_REPLAY_DIR") {
            self.replay_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEID_MODEL_PATH") {
            self.model_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEID_GALLERY_DIR") {
            self.gallery_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEID_INPUT_IMAGE_PATH") {
            self.input_image_path = PathBuf::from(v);
        }

        env_parse(&lookup, "FACEID_CROP_X", &mut self.crop_x)?;
        env_parse(&lookup, "FACEID_CROP_Y", &mut self.crop_y)?;
        env_parse(&lookup, "FACEID_CROP_SIZE", &mut self.crop_size)?;
        env_parse(&lookup, "FACEID_FRAME_RATE_HZ", &mut self.frame_rate_hz)?;
        env_parse(&lookup, "FACEID_WARMUP_FRAMES", &mut self.warmup_frames)?;
        env_parse(&lookup, "FACEID_MODEL_KIND", &mut self.model_kind)?;
        env_parse(&lookup, "FACEID_INTRA_THREADS", &mut self.intra_threads)?;
        env_parse(&lookup, "FACEID_DETECTION_THRESHOLD", &mut self.detection_threshold)?;
        env_parse(&lookup, "FACEID_VERIFICATION_THRESHOLD", &mut self.verification_threshold)?;
        env_parse(&lookup, "FACEID_START_DELAY_MS", &mut self.start_delay_ms)?;
        env_parse(&lookup, "FACEID_COOLDOWN_MS", &mut self.cooldown_ms)?;
        env_parse(&lookup, "FACEID_VERIFY_TIMEOUT_SECS", &mut self.verify_timeout_secs)?;
        env_parse(&lookup, "FACEID_MAX_FRAME_AGE_MS", &mut self.max_frame_age_ms)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("detection_threshold", self.detection_threshold),
            ("verification_threshold", self.verification_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be in [0, 1], got {value}"
                )));
            }
        }
        if !(MIN_FRAME_RATE_HZ..=MAX_FRAME_RATE_HZ).contains(&self.frame_rate_hz) {
            return Err(ConfigError::Invalid(format!(
                "frame_rate_hz must be in [{MIN_FRAME_RATE_HZ}, {MAX_FRAME_RATE_HZ}], got {}",
                self.frame_rate_hz
            )));
        }
        if self.crop_size == 0 {
            return Err(ConfigError::Invalid("crop_size must be non-zero".into()));
        }
        if self.intra_threads == 0 {
            return Err(ConfigError::Invalid("intra_threads must be non-zero".into()));
        }
        if self.verify_timeout_secs == 0 {
            return Err(ConfigError::Invalid("verify_timeout_secs must be non-zero".into()));
        }
        Ok(())
    }

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            detection: self.detection_threshold,
            verification: self.verification_threshold,
        }
    }

    pub fn crop_window(&self) -> CropWindow {
        CropWindow {
            x: self.crop_x,
            y: self.crop_y,
            size: self.crop_size,
        }
    }

    pub fn frame_period(&self) -> Duration {
        Duration::from_secs_f32(1.0 / self.frame_rate_hz)
    }

    pub fn max_frame_age(&self) -> Duration {
        Duration::from_millis(self.max_frame_age_ms)
    }

    pub fn session_timings(&self) -> SessionTimings {
        SessionTimings {
            start_delay: Duration::from_millis(self.start_delay_ms),
            cooldown: Duration::from_millis(self.cooldown_ms),
            verify_timeout: Duration::from_secs(self.verify_timeout_secs),
        }
    }

    /// Path to the ONNX model as the runtime wants it.
    pub fn model_path_str(&self) -> String {
        self.model_path.to_string_lossy().into_owned()
    }
}

fn env_parse<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    let Some(value) = lookup(key) else {
        return Ok(());
    };
    *target = value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        config.validate().unwrap();
        assert_eq!(config.thresholds(), Thresholds::default());
        let expected = CropWindow {
            x: 200,
            y: 120,
            size: 250,
        };
        assert_eq!(config.crop_window(), expected);
        assert_eq!(config.session_timings().cooldown, Duration::from_secs(5));
        assert_eq!(config.session_timings().start_delay, Duration::from_millis(500));
        assert_eq!(config.frame_period().as_millis(), 30);
    }

    #[test]
    fn test_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceid.toml");
        std::fs::write(
            &path,
            r#"
                gallery_dir = "/srv/faceid/gallery"
                detection_threshold = 0.5
                model_kind = "l1"
                cooldown_ms = 2000
            "#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.gallery_dir, PathBuf::from("/srv/faceid/gallery"));
        assert_eq!(config.detection_threshold, 0.5);
        assert_eq!(config.verification_threshold, 0.7);
        assert_eq!(config.model_kind, ModelKind::L1);
        assert_eq!(config.session_timings().cooldown, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        // Unknown keys are ignored so older configs keep loading.
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceid.toml");
        std::fs::write(&path, "legacy_option = true\n").unwrap();
        assert_eq!(Config::from_file(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("faceid.toml");
        std::fs::write(&path, "detection_threshold = \"high\"\n").unwrap();
        assert!(matches!(Config::from_file(&path), Err(ConfigError::Parse { .. })));
    }

    #[test]
    fn test_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/faceid.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("FACEID_VERIFICATION_THRESHOLD", "0.8"),
                ("FACEID_REPLAY_DIR", "/tmp/frames"),
                ("FACEID_MODEL_KIND", "L1"),
                ("FACEID_COOLDOWN_MS", " 100 "),
            ]))
            .unwrap();

        assert_eq!(config.verification_threshold, 0.8);
        assert_eq!(config.replay_dir, Some(PathBuf::from("/tmp/frames")));
        assert_eq!(config.model_kind, ModelKind::L1);
        assert_eq!(config.cooldown_ms, 100);
    }

    #[test]
    fn test_env_invalid_number() {
        let mut config = Config::default();
        let err = config
            .apply_env(env(&[("FACEID_DETECTION_THRESHOLD", "lots")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv { ref key, .. } if key == "FACEID_DETECTION_THRESHOLD"
        ));
    }

    #[test]
    fn test_threshold_out_of_range() {
        let config = Config {
            detection_threshold: 1.5,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_zero_frame_rate_rejected() {
        let config = Config {
            frame_rate_hz: 0.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_extreme_frame_rates_rejected() {
        for rate in ["1e-20", "5000", "NaN", "inf"] {
            let mut config = Config::default();
            config
                .apply_env(env(&[("FACEID_FRAME_RATE_HZ", rate)]))
                .unwrap();
            assert!(config.validate().is_err(), "rate {rate} accepted");
        }
    }

    #[test]
    fn test_frame_rate_bounds_accepted() {
        for rate in [MIN_FRAME_RATE_HZ, MAX_FRAME_RATE_HZ] {
            let config = Config {
                frame_rate_hz: rate,
                ..Config::default()
            };
            config.validate().unwrap();
            assert!(config.frame_period() > Duration::ZERO);
        }
    }

    #[test]
    fn test_zero_crop_rejected() {
        let config = Config {
            crop_size: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }
}
