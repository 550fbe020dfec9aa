use crate::client::PayloadFormat;
use crate::session::LoopSettings;
use crate::supervisor::BackendCommand;
use facecam_core::Locale;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Client configuration: TOML file first, then `FACECAM_*` environment
/// variables on top.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Base URL of the analysis backend (default: http://127.0.0.1:8000).
    pub backend_url: String,
    /// Request body encoding for `/analyze` and `/register`.
    pub payload: PayloadFormat,
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub capture_width: u32,
    pub capture_height: u32,
    /// Frames discarded after opening the camera (AGC/AE settling).
    pub warmup_frames: usize,
    pub jpeg_quality: u8,
    pub min_request_interval_ms: u64,
    pub analysis_interval_ms: u64,
    pub request_timeout_ms: u64,
    pub start_delay_ms: u64,
    pub camera_retry_ms: u64,
    pub auto_mode: bool,
    pub locale: Locale,
    /// Backend program to launch and supervise. Unset means the backend
    /// is managed elsewhere.
    pub backend_program: Option<PathBuf>,
    pub backend_args: Vec<String>,
    pub backend_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: "http://127.0.0.1:8000".to_string(),
            payload: PayloadFormat::Json,
            camera_device: "/dev/video0".to_string(),
            capture_width: 1280,
            capture_height: 720,
            warmup_frames: 4,
            jpeg_quality: 90,
            min_request_interval_ms: 500,
            analysis_interval_ms: 700,
            request_timeout_ms: 10_000,
            start_delay_ms: 1500,
            camera_retry_ms: 2000,
            auto_mode: true,
            locale: Locale::En,
            backend_program: None,
            backend_args: Vec::new(),
            backend_dir: None,
        }
    }
}

impl Config {
    /// Load from `path` (or `FACECAM_CONFIG`), falling back to defaults, then
    /// apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var("FACECAM_CONFIG").ok().map(PathBuf::from));

        let mut config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Overlay `FACECAM_*` values. Unparseable values are ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FACECAM_BACKEND_URL") {
            self.backend_url = url;
        }
        if let Some(payload) = lookup("FACECAM_PAYLOAD").and_then(|v| PayloadFormat::parse(&v)) {
            self.payload = payload;
        }
        if let Some(device) = lookup("FACECAM_CAMERA_DEVICE") {
            self.camera_device = device;
        }
        override_parsed(&lookup, "FACECAM_CAPTURE_WIDTH", &mut self.capture_width);
        override_parsed(&lookup, "FACECAM_CAPTURE_HEIGHT", &mut self.capture_height);
        override_parsed(&lookup, "FACECAM_WARMUP_FRAMES", &mut self.warmup_frames);
        override_parsed(&lookup, "FACECAM_JPEG_QUALITY", &mut self.jpeg_quality);
        override_parsed(&lookup, "FACECAM_MIN_REQUEST_INTERVAL_MS", &mut self.min_request_interval_ms);
        override_parsed(&lookup, "FACECAM_ANALYSIS_INTERVAL_MS", &mut self.analysis_interval_ms);
        override_parsed(&lookup, "FACECAM_REQUEST_TIMEOUT_MS", &mut self.request_timeout_ms);
        override_parsed(&lookup, "FACECAM_START_DELAY_MS", &mut self.start_delay_ms);
        override_parsed(&lookup, "FACECAM_CAMERA_RETRY_MS", &mut self.camera_retry_ms);
        if let Some(auto) = lookup("FACECAM_AUTO_MODE") {
            self.auto_mode = auto != "0";
        }
        if let Some(locale) = lookup("FACECAM_LOCALE").and_then(|v| Locale::parse(&v)) {
            self.locale = locale;
        }
        if let Some(program) = lookup("FACECAM_BACKEND_PROGRAM") {
            self.backend_program = Some(PathBuf::from(program));
        }
        if let Some(args) = lookup("FACECAM_BACKEND_ARGS") {
            self.backend_args = args.split_whitespace().map(str::to_string).collect();
        }
        if let Some(dir) = lookup("FACECAM_BACKEND_DIR") {
            self.backend_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn loop_settings(&self) -> LoopSettings {
        LoopSettings {
            min_request_interval: Duration::from_millis(self.min_request_interval_ms),
            analysis_interval: Duration::from_millis(self.analysis_interval_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            start_delay: Duration::from_millis(self.start_delay_ms),
            camera_retry: Duration::from_millis(self.camera_retry_ms),
            jpeg_quality: self.jpeg_quality,
            auto_mode: self.auto_mode,
        }
    }

    /// The supervised backend command, if one is configured.
    pub fn backend_command(&self) -> Option<BackendCommand> {
        self.backend_program.as_ref().map(|program| BackendCommand {
            program: program.clone(),
            args: self.backend_args.clone(),
            working_dir: self.backend_dir.clone(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

fn override_parsed<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) {
    if let Some(value) = lookup(key).and_then(|v| v.trim().parse().ok()) {
        *slot = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_loop_timing() {
        let settings = Config::default().loop_settings();
        assert_eq!(settings.min_request_interval, Duration::from_millis(500));
        assert_eq!(settings.analysis_interval, Duration::from_millis(700));
        assert_eq!(settings.start_delay, Duration::from_millis(1500));
        assert!(settings.auto_mode);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            backend_url = "http://10.0.0.5:9000"
            payload = "multipart"
            locale = "uz"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend_url, "http://10.0.0.5:9000");
        assert_eq!(config.payload, PayloadFormat::Multipart);
        assert_eq!(config.locale, Locale::Uz);
        assert_eq!(config.capture_width, 1280);
        assert!(config.backend_command().is_none());
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("FACECAM_ANALYSIS_INTERVAL_MS", "1200"),
            ("FACECAM_AUTO_MODE", "0"),
            ("FACECAM_LOCALE", "UZ"),
            ("FACECAM_BACKEND_PROGRAM", "/usr/bin/python3"),
            ("FACECAM_BACKEND_ARGS", "-m uvicorn main:app"),
        ]));
        assert_eq!(config.analysis_interval_ms, 1200);
        assert!(!config.auto_mode);
        assert_eq!(config.locale, Locale::Uz);

        let command = config.backend_command().unwrap();
        assert_eq!(command.program, PathBuf::from("/usr/bin/python3"));
        assert_eq!(command.args, vec!["-m", "uvicorn", "main:app"]);
    }

    #[test]
    fn test_bad_env_values_ignored() {
        let mut config = Config::default();
        config.apply_overrides(vars(&[
            ("FACECAM_CAPTURE_WIDTH", "wide"),
            ("FACECAM_PAYLOAD", "xml"),
        ]));
        assert_eq!(config.capture_width, 1280);
        assert_eq!(config.payload, PayloadFormat::Json);
    }

    #[test]
    fn test_unknown_toml_type_is_parse_error() {
        let dir = std::env::temp_dir().join(format!("facecam-config-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("bad.toml");
        std::fs::write(&path, "capture_width = \"wide\"\n").unwrap();
        assert!(matches!(
            Config::from_file(&path),
            Err(ConfigError::Parse { .. })
        ));
        assert!(matches!(
            Config::from_file(&dir.join("missing.toml")),
            Err(ConfigError::Io { .. })
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
