use crate::decision::{PowerState, Thresholds};
use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Live PM feed. Without it the service runs on synthetic data only.
    #[serde(default)]
    pub kafka: Option<KafkaConfig>,
    #[serde(default)]
    pub coordinator: Option<CoordinatorConfig>,
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
    #[serde(default)]
    pub thresholds: ThresholdConfig,
    #[serde(default)]
    pub synthetic: SyntheticConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    /// Fixed topic; replaced by the delivery topic when a coordinator is configured
    #[serde(default)]
    pub topic: Option<String>,
    pub group_id: String,
    #[serde(default = "default_auto_offset_reset")]
    pub auto_offset_reset: String,
    /// Seconds without a message before the live feed is considered exhausted
    #[serde(default = "default_quiet_period_secs")]
    pub quiet_period_secs: u64,
}

fn default_auto_offset_reset() -> String {
    "latest".into()
}

fn default_quiet_period_secs() -> u64 {
    5
}

impl KafkaConfig {
    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    pub url: String,
    pub consumer_id: String,
    /// Base URL the coordinator uses for job result and status callbacks
    pub callback_base_url: String,
    #[serde(default = "default_info_type")]
    pub info_type: String,
    /// Topic requested for PM delivery; the live source subscribes to it once the job is accepted
    #[serde(default = "default_delivery_topic")]
    pub delivery_topic: String,
}

fn default_info_type() -> String {
    "PmData".into()
}

fn default_delivery_topic() -> String {
    "rapp-topic".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    pub url: String,
    pub ric_id: String,
    pub service_id: String,
    #[serde(default = "default_policy_type_id")]
    pub policy_type_id: String,
}

fn default_policy_type_id() -> String {
    "2".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(default = "default_low")]
    pub low: f64,
    #[serde(default = "default_high")]
    pub high: f64,
    /// State assumed for a cell the first time it is observed
    #[serde(default)]
    pub initial_state: PowerState,
}

fn default_low() -> f64 {
    20.0
}

fn default_high() -> f64 {
    70.0
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            low: default_low(),
            high: default_high(),
            initial_state: PowerState::On,
        }
    }
}

impl ThresholdConfig {
    pub fn thresholds(&self) -> Result<Thresholds> {
        Thresholds::new(self.low, self.high)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyntheticConfig {
    #[serde(default = "default_groups")]
    pub groups: usize,
    #[serde(default = "default_cells_per_group")]
    pub cells_per_group: usize,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
    /// Maximum deviation from the base level on each tick
    #[serde(default = "default_jitter")]
    pub jitter: f64,
    /// Chance per cell and tick of a full-range random value
    #[serde(default = "default_spike_probability")]
    pub spike_probability: f64,
    #[serde(default = "default_base_levels")]
    pub base_levels: Vec<f64>,
}

fn default_groups() -> usize {
    5
}

fn default_cells_per_group() -> usize {
    3
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_jitter() -> f64 {
    15.0
}

fn default_spike_probability() -> f64 {
    0.05
}

fn default_base_levels() -> Vec<f64> {
    vec![15.0, 45.0, 75.0]
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            groups: default_groups(),
            cells_per_group: default_cells_per_group(),
            tick_millis: default_tick_millis(),
            jitter: default_jitter(),
            spike_probability: default_spike_probability(),
            base_levels: default_base_levels(),
        }
    }
}

impl SyntheticConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_millis)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    /// Pending messages per subscriber before it is dropped as too slow
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Bridge capacity; unbounded when absent
    #[serde(default)]
    pub bridge_capacity: Option<usize>,
}

fn default_sync_interval_secs() -> u64 {
    10
}

fn default_subscriber_buffer() -> usize {
    256
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            sync_interval_secs: default_sync_interval_secs(),
            subscriber_buffer: default_subscriber_buffer(),
            bridge_capacity: None,
        }
    }
}

impl BroadcastConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
}

impl Config {
    /// Load configuration from a YAML file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML text, then apply env overrides and validate
    pub fn from_yaml(content: &str) -> Result<Self> {
        // Expand environment variables in the format $(VAR_NAME)
        let expanded = expand_env_vars(content)?;

        let mut config: Config = serde_yaml::from_str(&expanded)?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(brokers) = std::env::var("KAFKA_BROKERS") {
            if let Some(kafka) = self.kafka.as_mut() {
                kafka.brokers = brokers;
            }
        }
        if let Some(low) = env_f64("LOW_UTIL_THRESHOLD")? {
            self.thresholds.low = low;
        }
        if let Some(high) = env_f64("HIGH_UTIL_THRESHOLD")? {
            self.thresholds.high = high;
        }
        Ok(())
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        self.thresholds.thresholds()?;

        if let Some(kafka) = &self.kafka {
            if kafka.brokers.is_empty() {
                return Err(AppError::Config(
                    "Kafka brokers cannot be empty".to_string(),
                ));
            }
            if kafka.group_id.is_empty() {
                return Err(AppError::Config(
                    "Kafka group_id cannot be empty".to_string(),
                ));
            }
            if kafka.quiet_period_secs == 0 {
                return Err(AppError::Config(
                    "Kafka quiet_period_secs must be greater than 0".to_string(),
                ));
            }
        }

        if self.server.port == 0 {
            return Err(AppError::Config("Server port cannot be 0".to_string()));
        }

        if self.broadcast.sync_interval_secs == 0 {
            return Err(AppError::Config(
                "Broadcast sync_interval_secs must be greater than 0".to_string(),
            ));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(AppError::Config(
                "Broadcast subscriber_buffer must be greater than 0".to_string(),
            ));
        }
        if self.broadcast.bridge_capacity == Some(0) {
            return Err(AppError::Config(
                "Broadcast bridge_capacity must be greater than 0 when set".to_string(),
            ));
        }

        let synthetic = &self.synthetic;
        if synthetic.groups == 0 || synthetic.cells_per_group == 0 {
            return Err(AppError::Config(
                "Synthetic source needs at least one group and one cell per group".to_string(),
            ));
        }
        if synthetic.tick_millis == 0 {
            return Err(AppError::Config(
                "Synthetic tick_millis must be greater than 0".to_string(),
            ));
        }
        if synthetic.base_levels.is_empty() {
            return Err(AppError::Config(
                "Synthetic base_levels cannot be empty".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&synthetic.spike_probability) {
            return Err(AppError::Config(format!(
                "Synthetic spike_probability must be within [0, 1], got {}",
                synthetic.spike_probability
            )));
        }
        if !synthetic.jitter.is_finite() || synthetic.jitter < 0.0 {
            return Err(AppError::Config(format!(
                "Synthetic jitter must be a non-negative number, got {}",
                synthetic.jitter
            )));
        }

        Ok(())
    }
}

fn env_f64(name: &str) -> Result<Option<f64>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .map(Some)
            .map_err(|e| AppError::Config(format!("{} is not a number ({}): {}", name, raw, e))),
        Err(_) => Ok(None),
    }
}

/// Expand environment variables in the format $(VAR_NAME)
fn expand_env_vars(content: &str) -> Result<String> {
    let mut result = content.to_string();

    let re = regex::Regex::new(r"\$\(([A-Z_][A-Z0-9_]*)\)")
        .map_err(|e| AppError::Internal(format!("invalid placeholder pattern: {}", e)))?;

    for cap in re.captures_iter(content) {
        let full_match = &cap[0];
        let var_name = &cap[1];

        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(full_match, &value);
        }
    }

    Ok(result)
}
