use anyhow::{Context, Result};
use directories::UserDirs;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

use crate::engine::ActuatorTopics;

const CONFIG_FILE_NAME: &str = "config.toml";
const CONFIG_DIR_ENV: &str = "ROBOT_TASKD_CONFIG_DIR";

// ── Top-level config ────────────────────────────────────────────

/// Top-level `robot-taskd` configuration, loaded from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct Config {
    /// Path to config.toml. Computed from the config directory, not serialized.
    #[serde(skip)]
    pub config_path: PathBuf,

    /// MQTT broker connection (`[mqtt]`).
    #[serde(default)]
    pub mqtt: MqttConfig,

    /// Inbound and outbound topic names (`[topics]`).
    #[serde(default)]
    pub topics: TopicsConfig,

    /// Executor timing (`[engine]`).
    #[serde(default)]
    pub engine: EngineConfig,

    /// Daemon supervision and state file (`[daemon]`).
    #[serde(default)]
    pub daemon: DaemonConfig,
}

// ── MQTT ────────────────────────────────────────────────────────

/// MQTT broker connection (`[mqtt]` section).
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`.
    #[serde(default = "default_broker_url")]
    pub broker_url: String,
    /// MQTT client identifier. Default: `robot_taskd`.
    #[serde(default = "default_client_id")]
    pub client_id: String,
    /// Subscription QoS for inbound topics (0, 1 or 2). Default: `1`.
    #[serde(default = "default_qos")]
    pub qos: u8,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Must match the URL scheme: `true` for `mqtts://`.
    #[serde(default)]
    pub use_tls: bool,
    /// Keep-alive interval in seconds. Default: `60`.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,
}

fn default_broker_url() -> String {
    "mqtt://127.0.0.1:1883".into()
}

fn default_client_id() -> String {
    "robot_taskd".into()
}

fn default_qos() -> u8 {
    1
}

fn default_keep_alive_secs() -> u64 {
    60
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_url: default_broker_url(),
            client_id: default_client_id(),
            qos: default_qos(),
            username: None,
            password: None,
            use_tls: false,
            keep_alive_secs: default_keep_alive_secs(),
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Result<()> {
        if self.qos > 2 {
            anyhow::bail!("mqtt.qos must be 0, 1, or 2 (got {})", self.qos);
        }

        let is_tls_scheme = self.broker_url.starts_with("mqtts://");
        let is_plain_scheme = self.broker_url.starts_with("mqtt://");
        if !is_tls_scheme && !is_plain_scheme {
            anyhow::bail!(
                "mqtt.broker_url must start with mqtt:// or mqtts:// (got {})",
                self.broker_url
            );
        }
        if is_plain_scheme && self.use_tls {
            anyhow::bail!("mqtt.use_tls is true but broker_url uses mqtt:// (expected mqtts://)");
        }
        if is_tls_scheme && !self.use_tls {
            anyhow::bail!("mqtt.broker_url uses mqtts:// but use_tls is false");
        }

        if self.client_id.trim().is_empty() {
            anyhow::bail!("mqtt.client_id must not be empty");
        }
        if self.client_id.starts_with(char::is_whitespace) {
            anyhow::bail!("mqtt.client_id must not start with whitespace");
        }
        if self.keep_alive_secs == 0 {
            anyhow::bail!("mqtt.keep_alive_secs must be greater than 0");
        }
        Ok(())
    }

    /// Extract host from a broker URL like `mqtt://host:port`.
    pub fn broker_host(&self) -> String {
        strip_scheme(&self.broker_url)
            .split(':')
            .next()
            .filter(|host| !host.is_empty())
            .unwrap_or("localhost")
            .to_string()
    }

    /// Broker port, defaulting to 1883 for `mqtt://` and 8883 for `mqtts://`.
    pub fn broker_port(&self) -> u16 {
        let default_port: u16 = if self.broker_url.starts_with("mqtts://") {
            8883
        } else {
            1883
        };
        strip_scheme(&self.broker_url)
            .split_once(':')
            .and_then(|(_, port)| port.trim_end_matches('/').parse().ok())
            .unwrap_or(default_port)
    }
}

fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("mqtts://"))
        .unwrap_or(url)
}

// ── Topics ──────────────────────────────────────────────────────

/// Topic names (`[topics]` section).
///
/// Inbound topics are subscribed; outbound topics carry actuator commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TopicsConfig {
    /// Navigation goals (bare fields).
    #[serde(default = "default_navigation_topic")]
    pub navigation: String,
    /// Arm preset pose codes.
    #[serde(default = "default_arm_control_topic")]
    pub arm_control: String,
    /// Arm Cartesian poses.
    #[serde(default = "default_arm_coordinate_topic")]
    pub arm_coordinate: String,
    /// Gripper open/close codes.
    #[serde(default = "default_gripper_topic")]
    pub gripper: String,
    /// Kind-tagged commands of any type.
    #[serde(default = "default_commands_topic")]
    pub commands: String,
    #[serde(default = "default_navigation_status_topic")]
    pub navigation_status: String,
    #[serde(default = "default_arm_status_topic")]
    pub arm_status: String,
    /// Operator control: resume, pause, set_cooldown.
    #[serde(default = "default_queue_control_topic")]
    pub queue_control: String,

    #[serde(default = "default_nav_goal_topic")]
    pub nav_goal: String,
    #[serde(default = "default_arm_pose_topic")]
    pub arm_pose: String,
    #[serde(default = "default_gripper_out_topic")]
    pub gripper_out: String,
}

fn default_navigation_topic() -> String {
    "robot/navigation".into()
}

fn default_arm_control_topic() -> String {
    "robot/arm/control".into()
}

fn default_arm_coordinate_topic() -> String {
    "robot/arm/coordinate".into()
}

fn default_gripper_topic() -> String {
    "robot/gripper/control".into()
}

fn default_commands_topic() -> String {
    "robot/commands".into()
}

fn default_navigation_status_topic() -> String {
    "robot/navigation_status".into()
}

fn default_arm_status_topic() -> String {
    "robot/arm_status".into()
}

fn default_queue_control_topic() -> String {
    "robot/queue/control".into()
}

fn default_nav_goal_topic() -> String {
    "actuator/move_base_simple/goal".into()
}

fn default_arm_pose_topic() -> String {
    "actuator/arm_position_drive".into()
}

fn default_gripper_out_topic() -> String {
    "actuator/cmdeffector".into()
}

impl Default for TopicsConfig {
    fn default() -> Self {
        Self {
            navigation: default_navigation_topic(),
            arm_control: default_arm_control_topic(),
            arm_coordinate: default_arm_coordinate_topic(),
            gripper: default_gripper_topic(),
            commands: default_commands_topic(),
            navigation_status: default_navigation_status_topic(),
            arm_status: default_arm_status_topic(),
            queue_control: default_queue_control_topic(),
            nav_goal: default_nav_goal_topic(),
            arm_pose: default_arm_pose_topic(),
            gripper_out: default_gripper_out_topic(),
        }
    }
}

impl TopicsConfig {
    /// Subscribed topics, labelled by config key.
    pub fn inbound(&self) -> [(&'static str, &str); 8] {
        [
            ("navigation", &self.navigation),
            ("arm_control", &self.arm_control),
            ("arm_coordinate", &self.arm_coordinate),
            ("gripper", &self.gripper),
            ("commands", &self.commands),
            ("navigation_status", &self.navigation_status),
            ("arm_status", &self.arm_status),
            ("queue_control", &self.queue_control),
        ]
    }

    pub fn outbound(&self) -> [(&'static str, &str); 3] {
        [
            ("nav_goal", &self.nav_goal),
            ("arm_pose", &self.arm_pose),
            ("gripper_out", &self.gripper_out),
        ]
    }

    pub fn actuator_topics(&self) -> ActuatorTopics {
        ActuatorTopics {
            nav_goal: self.nav_goal.clone(),
            arm_pose: self.arm_pose.clone(),
            gripper: self.gripper_out.clone(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        for (key, topic) in self.inbound().into_iter().chain(self.outbound()) {
            if topic.trim().is_empty() {
                anyhow::bail!("topics.{key} must not be empty");
            }
        }

        let mut seen = HashSet::new();
        for (key, topic) in self.inbound() {
            if !seen.insert(topic) {
                anyhow::bail!("topics.{key} duplicates another inbound topic ({topic})");
            }
        }
        Ok(())
    }
}

// ── Engine ──────────────────────────────────────────────────────

/// Executor timing (`[engine]` section). All durations in seconds unless
/// the key says otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct EngineConfig {
    /// Executor tick period. Default: `100` (10 Hz).
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Pause after each completed task before the next dispatch. Default: `0.5`.
    #[serde(default = "default_completion_cooldown_secs")]
    pub completion_cooldown_secs: f64,
    /// Navigation status is ignored for this long after dispatch. Default: `2.0`.
    #[serde(default = "default_settle_secs")]
    pub navigation_settle_secs: f64,
    /// Arm status is ignored for this long after dispatch. Default: `2.0`.
    #[serde(default = "default_settle_secs")]
    pub arm_settle_secs: f64,
    /// Gripper tasks complete after this fixed dwell. Default: `1.5`.
    #[serde(default = "default_gripper_dwell_secs")]
    pub gripper_dwell_secs: f64,
    /// Optional ceiling for navigation and arm tasks. Exceeding it pauses and
    /// drains the queue like a hardware fault. Unset by default.
    #[serde(default)]
    pub max_task_wait_secs: Option<f64>,
    /// Frame id stamped on navigation goals. Default: `map`.
    #[serde(default = "default_frame_id")]
    pub frame_id: String,
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_completion_cooldown_secs() -> f64 {
    0.5
}

fn default_settle_secs() -> f64 {
    2.0
}

fn default_gripper_dwell_secs() -> f64 {
    1.5
}

fn default_frame_id() -> String {
    "map".into()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            completion_cooldown_secs: default_completion_cooldown_secs(),
            navigation_settle_secs: default_settle_secs(),
            arm_settle_secs: default_settle_secs(),
            gripper_dwell_secs: default_gripper_dwell_secs(),
            max_task_wait_secs: None,
            frame_id: default_frame_id(),
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            anyhow::bail!("engine.tick_interval_ms must be greater than 0");
        }

        let windows = [
            ("completion_cooldown_secs", self.completion_cooldown_secs),
            ("navigation_settle_secs", self.navigation_settle_secs),
            ("arm_settle_secs", self.arm_settle_secs),
            ("gripper_dwell_secs", self.gripper_dwell_secs),
        ];
        for (key, value) in windows {
            if !value.is_finite() || value < 0.0 {
                anyhow::bail!("engine.{key} must be a finite, non-negative number (got {value})");
            }
            if Duration::try_from_secs_f64(value).is_err() {
                anyhow::bail!("engine.{key} is too large to represent as a duration (got {value})");
            }
        }

        if let Some(max_wait) = self.max_task_wait_secs {
            if !max_wait.is_finite() {
                anyhow::bail!("engine.max_task_wait_secs must be finite (got {max_wait})");
            }
            if Duration::try_from_secs_f64(max_wait).is_err() {
                anyhow::bail!(
                    "engine.max_task_wait_secs is too large to represent as a duration (got {max_wait})"
                );
            }
            let longest_settle = self.navigation_settle_secs.max(self.arm_settle_secs);
            if max_wait <= longest_settle {
                anyhow::bail!(
                    "engine.max_task_wait_secs ({max_wait}) must exceed the settle windows ({longest_settle})"
                );
            }
        }

        if self.frame_id.trim().is_empty() {
            anyhow::bail!("engine.frame_id must not be empty");
        }
        Ok(())
    }
}

// ── Daemon ──────────────────────────────────────────────────────

/// Daemon supervision (`[daemon]` section).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DaemonConfig {
    /// State snapshot file, relative to the config directory.
    #[serde(default = "default_state_file")]
    pub state_file: String,
    /// Seconds between state snapshot writes. Default: `5`.
    #[serde(default = "default_state_flush_secs")]
    pub state_flush_secs: u64,
    /// First restart delay for a failed component. Default: `2`.
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Restart delay ceiling. Default: `60`.
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
}

fn default_state_file() -> String {
    "daemon_state.json".into()
}

fn default_state_flush_secs() -> u64 {
    5
}

fn default_initial_backoff_secs() -> u64 {
    2
}

fn default_max_backoff_secs() -> u64 {
    60
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
            state_flush_secs: default_state_flush_secs(),
            initial_backoff_secs: default_initial_backoff_secs(),
            max_backoff_secs: default_max_backoff_secs(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> Result<()> {
        if self.state_file.trim().is_empty() {
            anyhow::bail!("daemon.state_file must not be empty");
        }
        if self.state_flush_secs == 0 {
            anyhow::bail!("daemon.state_flush_secs must be greater than 0");
        }
        if self.initial_backoff_secs == 0 {
            anyhow::bail!("daemon.initial_backoff_secs must be greater than 0");
        }
        if self.max_backoff_secs < self.initial_backoff_secs {
            anyhow::bail!("daemon.max_backoff_secs must be >= initial_backoff_secs");
        }
        Ok(())
    }
}

// ── Loading ─────────────────────────────────────────────────────

fn default_config_dir() -> Result<PathBuf> {
    let home = UserDirs::new()
        .map(|u| u.home_dir().to_path_buf())
        .context("Could not find home directory")?;
    Ok(home.join(".robot-taskd"))
}

/// Config directory: explicit override, then `ROBOT_TASKD_CONFIG_DIR`, then
/// `~/.robot-taskd`.
pub fn resolve_config_dir(explicit: Option<&Path>) -> Result<PathBuf> {
    if let Some(dir) = explicit {
        return Ok(dir.to_path_buf());
    }
    match std::env::var(CONFIG_DIR_ENV) {
        Ok(dir) if !dir.trim().is_empty() => Ok(PathBuf::from(dir)),
        _ => default_config_dir(),
    }
}

impl Config {
    /// Load `config.toml` from the resolved directory, writing defaults first
    /// if it does not exist.
    pub async fn load_or_init(config_dir: Option<&Path>) -> Result<Self> {
        let dir = resolve_config_dir(config_dir)?;
        let config_path = dir.join(CONFIG_FILE_NAME);

        fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create config directory: {}", dir.display()))?;

        let initialized = !config_path.exists();
        let mut config = if initialized {
            let mut config = Config::default();
            config.config_path = config_path.clone();
            config.save().await?;

            // May hold broker credentials.
            #[cfg(unix)]
            {
                use std::{fs::Permissions, os::unix::fs::PermissionsExt};
                let _ = fs::set_permissions(&config_path, Permissions::from_mode(0o600)).await;
            }
            config
        } else {
            let contents = fs::read_to_string(&config_path)
                .await
                .with_context(|| format!("Failed to read config file {}", config_path.display()))?;
            let mut config = Self::from_toml(&contents)?;
            config.config_path = config_path.clone();
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        tracing::info!(
            path = %config.config_path.display(),
            initialized,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents).context("Failed to parse config file")
    }

    /// Directory holding config.toml and the daemon state file.
    pub fn config_dir(&self) -> &Path {
        self.config_path.parent().unwrap_or_else(|| Path::new("."))
    }

    pub fn state_file_path(&self) -> PathBuf {
        self.config_dir().join(&self.daemon.state_file)
    }

    /// Validate values that would otherwise fail at runtime.
    pub fn validate(&self) -> Result<()> {
        self.mqtt.validate()?;
        self.topics.validate()?;
        self.engine.validate()?;
        self.daemon.validate()?;
        Ok(())
    }

    /// Apply environment variable overrides to config.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("ROBOT_TASKD_BROKER_URL") {
            let url = url.trim();
            if !url.is_empty() {
                self.mqtt.broker_url = url.to_string();
                self.mqtt.use_tls = url.starts_with("mqtts://");
            }
        }

        if let Ok(user) = std::env::var("ROBOT_TASKD_MQTT_USERNAME") {
            if !user.is_empty() {
                self.mqtt.username = Some(user);
            }
        }

        if let Ok(pass) = std::env::var("ROBOT_TASKD_MQTT_PASSWORD") {
            if !pass.is_empty() {
                self.mqtt.password = Some(pass);
            }
        }

        if let Ok(raw) = std::env::var("ROBOT_TASKD_COMPLETION_COOLDOWN_SECS") {
            match raw.trim().parse::<f64>() {
                Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                    self.engine.completion_cooldown_secs = secs;
                }
                _ => tracing::warn!(
                    value = %raw,
                    "Ignoring invalid ROBOT_TASKD_COMPLETION_COOLDOWN_SECS"
                ),
            }
        }
    }

    /// Copy safe to print: credentials masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if config.mqtt.password.is_some() {
            config.mqtt.password = Some("***".into());
        }
        config
    }

    /// Write atomically: temp file, fsync, rename.
    pub async fn save(&self) -> Result<()> {
        let toml_str = toml::to_string_pretty(self).context("Failed to serialize config")?;

        let parent_dir = self
            .config_path
            .parent()
            .context("Config path must have a parent directory")?;

        fs::create_dir_all(parent_dir).await.with_context(|| {
            format!(
                "Failed to create config directory: {}",
                parent_dir.display()
            )
        })?;

        let file_name = self
            .config_path
            .file_name()
            .and_then(|v| v.to_str())
            .unwrap_or(CONFIG_FILE_NAME);
        let temp_path = parent_dir.join(format!(".{file_name}.tmp-{}", std::process::id()));

        let mut temp_file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to create temporary config file: {}",
                    temp_path.display()
                )
            })?;
        temp_file
            .write_all(toml_str.as_bytes())
            .await
            .context("Failed to write temporary config contents")?;
        temp_file
            .sync_all()
            .await
            .context("Failed to fsync temporary config file")?;
        drop(temp_file);

        if let Err(e) = fs::rename(&temp_path, &self.config_path).await {
            let _ = fs::remove_file(&temp_path).await;
            anyhow::bail!("Failed to atomically replace config file: {e}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mqtt(broker_url: &str, use_tls: bool) -> MqttConfig {
        MqttConfig {
            broker_url: broker_url.into(),
            use_tls,
            ..MqttConfig::default()
        }
    }

    #[test]
    fn mqtt_config_validation_rejects_bad_qos() {
        let config = MqttConfig {
            qos: 3,
            ..MqttConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("qos must be 0, 1, or 2"));
    }

    #[test]
    fn mqtt_config_validation_rejects_bad_url() {
        let err = mqtt("http://localhost:1883", false).validate().unwrap_err();
        assert!(err.to_string().contains("mqtt://"));
    }

    #[test]
    fn mqtt_config_validation_rejects_empty_client_id() {
        let config = MqttConfig {
            client_id: String::new(),
            ..MqttConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("client_id must not be empty"));
    }

    #[test]
    fn mqtt_tls_flag_must_match_scheme() {
        let err = mqtt("mqtt://localhost:1883", true).validate().unwrap_err();
        assert!(err.to_string().contains("use_tls is true"));

        let err = mqtt("mqtts://localhost:8883", false).validate().unwrap_err();
        assert!(err.to_string().contains("mqtts://"));

        assert!(mqtt("mqtts://localhost:8883", true).validate().is_ok());
    }

    #[test]
    fn broker_host_and_port() {
        let plain = mqtt("mqtt://myhost:1884", false);
        assert_eq!(plain.broker_host(), "myhost");
        assert_eq!(plain.broker_port(), 1884);

        let secure = mqtt("mqtts://secure.example.com", true);
        assert_eq!(secure.broker_host(), "secure.example.com");
        assert_eq!(secure.broker_port(), 8883);

        assert_eq!(mqtt("mqtt://localhost", false).broker_port(), 1883);
    }

    #[test]
    fn default_config_is_valid() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn empty_toml_yields_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.mqtt.client_id, "robot_taskd");
        assert_eq!(config.topics.nav_goal, "actuator/move_base_simple/goal");
        assert_eq!(config.engine.tick_interval_ms, 100);
        assert!((config.engine.completion_cooldown_secs - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.engine.max_task_wait_secs, None);
        assert_eq!(config.daemon.state_file, "daemon_state.json");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::from_toml(
            r#"
[engine]
completion_cooldown_secs = 1.0
max_task_wait_secs = 120.0

[topics]
navigation = "fleet/7/navigation"
"#,
        )
        .unwrap();
        assert!((config.engine.completion_cooldown_secs - 1.0).abs() < f64::EPSILON);
        assert_eq!(config.engine.max_task_wait_secs, Some(120.0));
        assert!((config.engine.gripper_dwell_secs - 1.5).abs() < f64::EPSILON);
        assert_eq!(config.topics.navigation, "fleet/7/navigation");
        assert_eq!(config.topics.gripper, "robot/gripper/control");
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_inbound_topics_rejected() {
        let topics = TopicsConfig {
            arm_status: "robot/navigation_status".into(),
            ..TopicsConfig::default()
        };
        let err = topics.validate().unwrap_err();
        assert!(err.to_string().contains("arm_status"));
    }

    #[test]
    fn empty_topic_rejected() {
        let topics = TopicsConfig {
            gripper_out: "  ".into(),
            ..TopicsConfig::default()
        };
        let err = topics.validate().unwrap_err();
        assert!(err.to_string().contains("topics.gripper_out"));
    }

    #[test]
    fn engine_rejects_negative_and_nan_windows() {
        let negative = EngineConfig {
            completion_cooldown_secs: -0.1,
            ..EngineConfig::default()
        };
        assert!(negative.validate().is_err());

        let nan = EngineConfig {
            gripper_dwell_secs: f64::NAN,
            ..EngineConfig::default()
        };
        assert!(nan.validate().is_err());

        let zero_tick = EngineConfig {
            tick_interval_ms: 0,
            ..EngineConfig::default()
        };
        assert!(zero_tick.validate().is_err());
    }

    #[test]
    fn max_wait_must_exceed_settle_windows() {
        let too_short = EngineConfig {
            max_task_wait_secs: Some(2.0),
            ..EngineConfig::default()
        };
        let err = too_short.validate().unwrap_err();
        assert!(err.to_string().contains("max_task_wait_secs"));

        let ok = EngineConfig {
            max_task_wait_secs: Some(30.0),
            ..EngineConfig::default()
        };
        ok.validate().unwrap();
    }

    #[test]
    fn engine_rejects_windows_beyond_duration_range() {
        let huge_wait = EngineConfig {
            max_task_wait_secs: Some(1e30),
            ..EngineConfig::default()
        };
        let err = huge_wait.validate().unwrap_err();
        assert!(err.to_string().contains("too large"));

        let huge_settle = EngineConfig {
            navigation_settle_secs: 1e30,
            ..EngineConfig::default()
        };
        let err = huge_settle.validate().unwrap_err();
        assert!(err.to_string().contains("engine.navigation_settle_secs"));

        let long_but_valid = EngineConfig {
            max_task_wait_secs: Some(86_400.0 * 365.0),
            ..EngineConfig::default()
        };
        long_but_valid.validate().unwrap();
    }

    #[test]
    fn daemon_backoff_ordering() {
        let config = DaemonConfig {
            initial_backoff_secs: 10,
            max_backoff_secs: 5,
            ..DaemonConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn redacted_masks_password_only() {
        let mut config = Config::default();
        config.mqtt.username = Some("operator".into());
        config.mqtt.password = Some("hunter2".into());
        let redacted = config.redacted();
        assert_eq!(redacted.mqtt.username.as_deref(), Some("operator"));
        assert_eq!(redacted.mqtt.password.as_deref(), Some("***"));
    }

    #[test]
    fn actuator_topics_follow_outbound_keys() {
        let topics = TopicsConfig::default().actuator_topics();
        assert_eq!(topics.nav_goal, "actuator/move_base_simple/goal");
        assert_eq!(topics.arm_pose, "actuator/arm_position_drive");
        assert_eq!(topics.gripper, "actuator/cmdeffector");
    }

    #[tokio::test]
    async fn load_or_init_creates_then_reloads() {
        let tmp = tempfile::TempDir::new().unwrap();

        let created = Config::load_or_init(Some(tmp.path())).await.unwrap();
        assert!(tmp.path().join("config.toml").exists());
        assert_eq!(created.config_path, tmp.path().join("config.toml"));
        assert_eq!(
            created.state_file_path(),
            tmp.path().join("daemon_state.json")
        );

        let mut edited = created.clone();
        edited.engine.frame_id = "odom".into();
        edited.save().await.unwrap();

        let reloaded = Config::load_or_init(Some(tmp.path())).await.unwrap();
        assert_eq!(reloaded.engine.frame_id, "odom");
    }

    #[tokio::test]
    async fn load_or_init_rejects_invalid_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[mqtt]\nbroker_url = \"tcp://nowhere\"\n",
        )
        .unwrap();

        let err = Config::load_or_init(Some(tmp.path())).await.unwrap_err();
        assert!(err.to_string().contains("mqtt://"));
    }
}
