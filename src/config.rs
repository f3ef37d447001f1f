//! Runtime configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the file named by
//! `ZONE_NOTIFIER_CONFIG` (JSON, or TOML when the extension is `.toml`),
//! environment variables, then command-line overrides. The merged result is
//! validated once all layers are applied.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::Device;
use crate::error::{NotifierError, Result};
use crate::frame::{parse_input_size, PreprocessOptions};
use crate::occupancy::DEFAULT_CONFIDENCE_THRESHOLD;
use crate::publisher::DEFAULT_PUBLISH_INTERVAL;
use crate::region::Region;
use crate::scheduler::SchedulingMode;
use crate::transport::{DEFAULT_KEEPALIVE_SECS, DEFAULT_TOPIC};

pub const CONFIG_ENV: &str = "ZONE_NOTIFIER_CONFIG";
const DEFAULT_DEVICE: &str = "CPU";
const DEFAULT_BROKER: &str = "localhost:1883";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct NotifierConfigFile {
    model: Option<ModelConfigFile>,
    roi: Option<RoiConfigFile>,
    mqtt: Option<MqttConfigFile>,
    #[serde(default)]
    inputs: Vec<InputConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ModelConfigFile {
    path: Option<String>,
    device: Option<String>,
    threshold: Option<f32>,
    mode: Option<String>,
    /// `WIDTHxHEIGHT`, only used when the model input shape is symbolic.
    input_size: Option<String>,
    channel_order: Option<String>,
    input_scale: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RoiConfigFile {
    x: Option<i32>,
    y: Option<i32>,
    #[serde(alias = "width")]
    w: Option<i32>,
    #[serde(alias = "height")]
    h: Option<i32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
    keepalive_secs: Option<u64>,
    publish_interval_secs: Option<u64>,
    username: Option<String>,
    password: Option<String>,
    use_tls: Option<bool>,
    tls_ca_path: Option<PathBuf>,
    tls_client_cert_path: Option<PathBuf>,
    tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InputConfigFile {
    video: String,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    snapshot_dir: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub model: String,
    pub device: String,
    pub threshold: f32,
    pub mode: SchedulingMode,
    /// `(width, height)` fallback for models without a concrete input shape.
    pub model_input_size: Option<(usize, usize)>,
    pub preprocess: PreprocessOptions,
    pub region: Region,
    pub input: String,
    pub publish_interval: Duration,
    pub mqtt: MqttConfig,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct MqttConfig {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
    pub keep_alive: Duration,
    pub username: Option<String>,
    pub password: Option<String>,
    pub use_tls: bool,
    pub tls_ca_path: Option<PathBuf>,
    pub tls_client_cert_path: Option<PathBuf>,
    pub tls_client_key_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default)]
pub struct DisplaySettings {
    pub snapshot_dir: Option<PathBuf>,
    pub snapshot_every: u64,
}

/// Values given on the command line. `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Config file; takes precedence over `ZONE_NOTIFIER_CONFIG`.
    pub config_path: Option<PathBuf>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub threshold: Option<f32>,
    pub mode: Option<String>,
    pub model_input_size: Option<String>,
    pub channel_order: Option<String>,
    pub roi_x: Option<i32>,
    pub roi_y: Option<i32>,
    pub roi_width: Option<i32>,
    pub roi_height: Option<i32>,
    pub input: Option<String>,
    pub publish_interval_secs: Option<u64>,
    pub mqtt_broker: Option<String>,
    pub mqtt_topic: Option<String>,
    pub mqtt_use_tls: bool,
    pub snapshot_dir: Option<PathBuf>,
}

impl NotifierConfig {
    pub fn load() -> Result<Self> {
        Self::load_with(&ConfigOverrides::default())
    }

    pub fn load_with(overrides: &ConfigOverrides) -> Result<Self> {
        let config_path = overrides
            .config_path
            .clone()
            .or_else(|| env_value(CONFIG_ENV).map(PathBuf::from));
        let file_cfg = match config_path {
            Some(path) => read_config_file(&path)?,
            None => NotifierConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.apply_overrides(overrides)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NotifierConfigFile) -> Result<Self> {
        let model = file.model.unwrap_or_default();
        let roi = file.roi.unwrap_or_default();
        let mqtt = file.mqtt.unwrap_or_default();
        let display = file.display.unwrap_or_default();

        let mode = match model.mode.as_deref() {
            Some(mode) => mode.parse()?,
            None => SchedulingMode::default(),
        };
        let mut preprocess = PreprocessOptions::default();
        if let Some(order) = model.channel_order.as_deref() {
            preprocess.channel_order = order.parse()?;
        }
        if let Some(scale) = model.input_scale {
            preprocess.scale = scale;
        }
        Ok(Self {
            model: model.path.unwrap_or_default(),
            device: model.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
            threshold: model.threshold.unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
            mode,
            model_input_size: model.input_size.as_deref().map(parse_input_size).transpose()?,
            preprocess,
            region: Region::new(
                roi.x.unwrap_or(0),
                roi.y.unwrap_or(0),
                roi.w.unwrap_or(0),
                roi.h.unwrap_or(0),
            ),
            // Several inputs may be listed; the last one is used.
            input: file
                .inputs
                .into_iter()
                .last()
                .map(|input| input.video)
                .unwrap_or_default(),
            publish_interval: mqtt
                .publish_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PUBLISH_INTERVAL),
            mqtt: MqttConfig {
                broker: mqtt.broker.unwrap_or_else(|| DEFAULT_BROKER.to_string()),
                topic: mqtt.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string()),
                client_id: mqtt
                    .client_id
                    .unwrap_or_else(|| format!("zone-notifier-{}", std::process::id())),
                keep_alive: Duration::from_secs(
                    mqtt.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
                ),
                username: mqtt.username,
                password: mqtt.password,
                use_tls: mqtt.use_tls.unwrap_or(false),
                tls_ca_path: mqtt.tls_ca_path,
                tls_client_cert_path: mqtt.tls_client_cert_path,
                tls_client_key_path: mqtt.tls_client_key_path,
            },
            display: DisplaySettings {
                snapshot_dir: display.snapshot_dir,
                snapshot_every: display.snapshot_every.unwrap_or(30),
            },
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(model) = env_value("ZONE_NOTIFIER_MODEL") {
            self.model = model;
        }
        if let Some(device) = env_value("ZONE_NOTIFIER_DEVICE") {
            self.device = device;
        }
        if let Some(input) = env_value("ZONE_NOTIFIER_INPUT") {
            self.input = input;
        }
        if let Some(mode) = env_value("ZONE_NOTIFIER_MODE") {
            self.mode = mode.parse()?;
        }
        if let Some(threshold) = env_value("ZONE_NOTIFIER_THRESHOLD") {
            self.threshold = threshold.parse().map_err(|_| {
                config_error("ZONE_NOTIFIER_THRESHOLD must be a number between 0 and 1")
            })?;
        }
        if let Some(secs) = env_value("ZONE_NOTIFIER_PUBLISH_INTERVAL_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                config_error("ZONE_NOTIFIER_PUBLISH_INTERVAL_SECS must be an integer number of seconds")
            })?;
            self.publish_interval = Duration::from_secs(secs);
        }
        if let Some(broker) = env_value("MQTT_BROKER_ADDR") {
            self.mqtt.broker = broker;
        }
        if let Some(topic) = env_value("MQTT_TOPIC") {
            self.mqtt.topic = topic;
        }
        if let Some(username) = env_value("MQTT_USERNAME") {
            self.mqtt.username = Some(username);
        }
        if let Some(password) = env_value("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    fn apply_overrides(&mut self, overrides: &ConfigOverrides) -> Result<()> {
        if let Some(model) = &overrides.model {
            self.model = model.clone();
        }
        if let Some(device) = &overrides.device {
            self.device = device.clone();
        }
        if let Some(threshold) = overrides.threshold {
            self.threshold = threshold;
        }
        if let Some(mode) = &overrides.mode {
            self.mode = mode.parse()?;
        }
        if let Some(size) = &overrides.model_input_size {
            self.model_input_size = Some(parse_input_size(size)?);
        }
        if let Some(order) = &overrides.channel_order {
            self.preprocess.channel_order = order.parse()?;
        }
        if let Some(x) = overrides.roi_x {
            self.region.x = x;
        }
        if let Some(y) = overrides.roi_y {
            self.region.y = y;
        }
        if let Some(width) = overrides.roi_width {
            self.region.width = width;
        }
        if let Some(height) = overrides.roi_height {
            self.region.height = height;
        }
        if let Some(input) = &overrides.input {
            self.input = input.clone();
        }
        if let Some(secs) = overrides.publish_interval_secs {
            self.publish_interval = Duration::from_secs(secs);
        }
        if let Some(broker) = &overrides.mqtt_broker {
            self.mqtt.broker = broker.clone();
        }
        if let Some(topic) = &overrides.mqtt_topic {
            self.mqtt.topic = topic.clone();
        }
        if overrides.mqtt_use_tls {
            self.mqtt.use_tls = true;
        }
        if let Some(dir) = &overrides.snapshot_dir {
            self.display.snapshot_dir = Some(dir.clone());
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.model.trim().is_empty() {
            return Err(config_error("model path is required (-m/--model)"));
        }
        if self.input.trim().is_empty() {
            return Err(config_error("video input is required (-i/--input)"));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(config_error(format!(
                "confidence threshold {} is outside [0, 1]",
                self.threshold
            )));
        }
        if self.publish_interval.is_zero() {
            return Err(config_error("publish interval must be greater than zero"));
        }
        if !(self.preprocess.scale.is_finite() && self.preprocess.scale > 0.0) {
            return Err(config_error(format!(
                "model input scale {} must be a positive number",
                self.preprocess.scale
            )));
        }
        if self.mqtt.topic.trim().is_empty() {
            return Err(config_error("MQTT topic must not be empty"));
        }
        self.region.check_extent().map_err(config_error)?;
        self.parsed_device()?;
        Ok(())
    }

    pub fn parsed_device(&self) -> Result<Device> {
        self.device.parse()
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn config_error(message: impl Into<String>) -> NotifierError {
    NotifierError::Configuration(message.into())
}

fn read_config_file(path: &Path) -> Result<NotifierConfigFile> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        config_error(format!("failed to read config file {}: {}", path.display(), e))
    })?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let parsed = if is_toml {
        toml::from_str(&raw).map_err(|e| e.to_string())
    } else {
        serde_json::from_str(&raw).map_err(|e| e.to_string())
    };
    parsed.map_err(|e| config_error(format!("invalid config file {}: {}", path.display(), e)))
}
