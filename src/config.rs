use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::frame::{FrameDimensions, DEFAULT_JPEG_QUALITY};
use crate::history::DEFAULT_RECENT_WINDOW;
use crate::ingest::Facing;

const DEFAULT_BASE_URL: &str = "http://localhost:8000";
const DEFAULT_TOKEN_PATH: &str = "/auth/token";
const DEFAULT_DETECT_PATH: &str = "/detect";
const DEFAULT_AUTH_HEADER: &str = crate::detect::DEFAULT_AUTH_HEADER;
const DEFAULT_TARGET_CLASS: &str = "patriota";
const DEFAULT_CAPTURE_DEVICE: &str = "stub://environment_camera";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_GRAB_FPS: u32 = 10;
const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

#[derive(Debug, Deserialize, Default)]
struct EngineConfigFile {
    service: Option<ServiceConfigFile>,
    capture: Option<CaptureConfigFile>,
    polling: Option<PollingConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    base_url: Option<String>,
    token_path: Option<String>,
    detect_path: Option<String>,
    auth_header: Option<String>,
    target_class: Option<String>,
    request_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
    device: Option<String>,
    user_device: Option<String>,
    facing: Option<Facing>,
    width: Option<u32>,
    height: Option<u32>,
    grab_fps: Option<u32>,
    jpeg_quality: Option<u8>,
}

#[derive(Debug, Deserialize, Default)]
struct PollingConfigFile {
    interval_ms: Option<u64>,
    recent_window: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub service: ServiceSettings,
    pub capture: CaptureSettings,
    pub polling: PollingSettings,
}

#[derive(Debug, Clone)]
pub struct ServiceSettings {
    pub base_url: String,
    pub token_path: String,
    pub detect_path: String,
    pub auth_header: String,
    pub target_class: String,
    /// Transport-level timeout; `None` leaves calls unbounded.
    pub request_timeout: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub device: String,
    /// Device used when the front camera is requested.
    pub user_device: Option<String>,
    pub facing: Facing,
    pub width: u32,
    pub height: u32,
    pub grab_fps: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub interval: Duration,
    pub recent_window: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_file(EngineConfigFile::default())
    }
}

impl EngineConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("COCKADE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: EngineConfigFile) -> Self {
        let service = file.service.unwrap_or_default();
        let capture = file.capture.unwrap_or_default();
        let polling = file.polling.unwrap_or_default();
        Self {
            service: ServiceSettings {
                base_url: service
                    .base_url
                    .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
                token_path: service
                    .token_path
                    .unwrap_or_else(|| DEFAULT_TOKEN_PATH.to_string()),
                detect_path: service
                    .detect_path
                    .unwrap_or_else(|| DEFAULT_DETECT_PATH.to_string()),
                auth_header: service
                    .auth_header
                    .unwrap_or_else(|| DEFAULT_AUTH_HEADER.to_string()),
                target_class: service
                    .target_class
                    .unwrap_or_else(|| DEFAULT_TARGET_CLASS.to_string()),
                request_timeout: service.request_timeout_ms.map(Duration::from_millis),
            },
            capture: CaptureSettings {
                device: capture
                    .device
                    .unwrap_or_else(|| DEFAULT_CAPTURE_DEVICE.to_string()),
                user_device: capture.user_device,
                facing: capture.facing.unwrap_or_default(),
                width: capture.width.unwrap_or(DEFAULT_WIDTH),
                height: capture.height.unwrap_or(DEFAULT_HEIGHT),
                grab_fps: capture.grab_fps.unwrap_or(DEFAULT_GRAB_FPS),
                jpeg_quality: capture.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            },
            polling: PollingSettings {
                interval: Duration::from_millis(
                    polling.interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
                ),
                recent_window: polling.recent_window.unwrap_or(DEFAULT_RECENT_WINDOW),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("COCKADE_BACKEND_URL") {
            if !url.trim().is_empty() {
                self.service.base_url = url.trim().to_string();
            }
        }
        if let Ok(class) = std::env::var("COCKADE_TARGET_CLASS") {
            if !class.trim().is_empty() {
                self.service.target_class = class.trim().to_string();
            }
        }
        if let Ok(header) = std::env::var("COCKADE_AUTH_HEADER") {
            if !header.trim().is_empty() {
                self.service.auth_header = header.trim().to_string();
            }
        }
        if let Ok(device) = std::env::var("COCKADE_CAPTURE_DEVICE") {
            if !device.trim().is_empty() {
                self.capture.device = device;
            }
        }
        if let Ok(facing) = std::env::var("COCKADE_FACING") {
            self.capture.facing = facing
                .parse()
                .map_err(|e: String| anyhow!("COCKADE_FACING: {}", e))?;
        }
        if let Ok(interval) = std::env::var("COCKADE_POLL_INTERVAL_MS") {
            let ms: u64 = interval.trim().parse().map_err(|_| {
                anyhow!("COCKADE_POLL_INTERVAL_MS must be an integer number of milliseconds")
            })?;
            self.polling.interval = Duration::from_millis(ms);
        }
        if let Ok(timeout) = std::env::var("COCKADE_REQUEST_TIMEOUT_MS") {
            let ms: u64 = timeout.trim().parse().map_err(|_| {
                anyhow!("COCKADE_REQUEST_TIMEOUT_MS must be an integer number of milliseconds")
            })?;
            self.service.request_timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let base = url::Url::parse(&self.service.base_url)
            .with_context(|| format!("invalid backend url '{}'", self.service.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(anyhow!(
                "backend url must use http or https, got '{}'",
                base.scheme()
            ));
        }
        if self.service.target_class.trim().is_empty() {
            return Err(anyhow!("target class must not be empty"));
        }
        if self.service.auth_header.trim().is_empty() {
            return Err(anyhow!("auth header name must not be empty"));
        }
        if self.polling.interval.is_zero() {
            return Err(anyhow!("poll interval must be greater than zero"));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(anyhow!(
                "jpeg quality must be between 1 and 100, got {}",
                self.capture.jpeg_quality
            ));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(anyhow!("ideal capture resolution must be non-zero"));
        }
        Ok(())
    }
}

impl ServiceSettings {
    pub fn token_url(&self) -> Result<String> {
        join_url(&self.base_url, &self.token_path)
    }

    pub fn detect_url(&self) -> Result<String> {
        join_url(&self.base_url, &self.detect_path)
    }
}

impl CaptureSettings {
    pub fn ideal_dimensions(&self) -> Result<FrameDimensions> {
        FrameDimensions::new(self.width, self.height)
            .ok_or_else(|| anyhow!("ideal capture resolution must be non-zero"))
    }
}

fn join_url(base: &str, path: &str) -> Result<String> {
    let base = url::Url::parse(base).with_context(|| format!("invalid backend url '{}'", base))?;
    let joined = base
        .join(path)
        .with_context(|| format!("cannot join '{}' onto '{}'", path, base))?;
    Ok(joined.to_string())
}

fn read_config_file(path: &Path) -> Result<EngineConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg: EngineConfigFile = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
