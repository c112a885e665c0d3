//! ---
//! sw_section: "01-core-functionality"
//! sw_subsection: "module"
//! sw_type: "source"
//! sw_scope: "code"
//! sw_description: "Shared primitives and utilities for the harness runtime."
//! sw_version: "v0.1.0"
//! sw_owner: "tbd"
//! ---
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSecondsWithFrac};
use tracing::{debug, info};

use crate::logging::LogFormat;

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_bridge_program() -> String {
    "rosservice".to_owned()
}

fn default_call_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_model_state_service() -> String {
    "/gazebo/get_model_state".to_owned()
}

fn default_startup_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_readiness_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_readiness_poll() -> Duration {
    Duration::from_millis(250)
}

fn default_stop_grace() -> Duration {
    Duration::from_secs(10)
}

fn default_supervision_poll() -> Duration {
    Duration::from_millis(100)
}

fn default_pause_service() -> String {
    "/gazebo/pause_physics".to_owned()
}

fn default_unpause_service() -> String {
    "/gazebo/unpause_physics".to_owned()
}

fn default_settle_after_pause() -> f64 {
    5.0
}

fn default_enabled() -> bool {
    true
}

fn default_runner() -> String {
    "rosrun".to_owned()
}

fn default_package() -> String {
    "talos-torque-control".to_owned()
}

fn default_model_name() -> String {
    "talos".to_owned()
}

fn default_expected_position() -> [f64; 3] {
    [0.0, 0.0038, 1.00152]
}

fn default_tolerance() -> f64 {
    0.07
}

fn default_report_path() -> PathBuf {
    PathBuf::from("/tmp/output.dat")
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|part| (*part).to_owned()).collect()
}

/// Primary configuration object for a harness run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct HarnessConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub physics: PhysicsConfig,
    #[serde(default)]
    pub subsystems: SubsystemsConfig,
    #[serde(default)]
    pub test_process: TestProcessConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

/// Metadata describing where a [`HarnessConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedHarnessConfig {
    pub config: HarnessConfig,
    /// `None` when no candidate existed and the built-in defaults apply.
    pub source: Option<PathBuf>,
}

impl HarnessConfig {
    pub const ENV_CONFIG_PATH: &'static str = "SIMWALK_CONFIG";

    /// Load configuration together with the effective source path.
    ///
    /// An explicit `SIMWALK_CONFIG` path must exist. Candidates are probed in
    /// order and skipped when absent; if none exist the defaults are used.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedHarnessConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedHarnessConfig {
                    config,
                    source: Some(path),
                });
            }
        }

        info!(
            inspected = %candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", "),
            "no configuration file found; using built-in defaults"
        );
        let config = Self::default();
        config.validate()?;
        Ok(LoadedHarnessConfig {
            config,
            source: None,
        })
    }

    fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<HarnessConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.timeouts.validate()?;
        self.physics.validate()?;
        for (stage, subsystem) in self.subsystems.iter() {
            subsystem.validate(stage)?;
        }
        self.test_process.validate()?;
        self.validation.validate()?;
        if self.bridge.program.trim().is_empty() {
            return Err(anyhow!("bridge program must not be empty"));
        }
        Ok(())
    }
}

impl std::str::FromStr for HarnessConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: HarnessConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// Dependency stages in their strict start order.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Master,
    SimulationCore,
    Spawn,
    Bringup,
    Controller,
    TestProcess,
}

impl Stage {
    /// Stages started before the test process, in order.
    pub const DEPENDENCIES: [Stage; 5] = [
        Stage::Master,
        Stage::SimulationCore,
        Stage::Spawn,
        Stage::Bringup,
        Stage::Controller,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Master => "master",
            Stage::SimulationCore => "simulation_core",
            Stage::Spawn => "spawn",
            Stage::Bringup => "bringup",
            Stage::Controller => "controller",
            Stage::TestProcess => "test_process",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

/// Command-line tool used to reach simulator services.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_program")]
    pub program: String,
    #[serde(default = "default_call_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub call_timeout: Duration,
    #[serde(default = "default_model_state_service")]
    pub model_state_service: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            program: default_bridge_program(),
            call_timeout: default_call_timeout(),
            model_state_service: default_model_state_service(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Upper bound for spawning a subsystem process. Liveness after the spawn
    /// is checked during and after its readiness chain.
    #[serde(default = "default_startup_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub startup: Duration,
    #[serde(default = "default_readiness_timeout")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub readiness: Duration,
    #[serde(default = "default_readiness_poll")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub readiness_poll: Duration,
    #[serde(default = "default_stop_grace")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub stop_grace: Duration,
    #[serde(default = "default_supervision_poll")]
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub supervision_poll: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup: default_startup_timeout(),
            readiness: default_readiness_timeout(),
            readiness_poll: default_readiness_poll(),
            stop_grace: default_stop_grace(),
            supervision_poll: default_supervision_poll(),
        }
    }
}

impl TimeoutConfig {
    pub fn validate(&self) -> Result<()> {
        if self.supervision_poll.is_zero() {
            return Err(anyhow!("timeouts.supervision_poll must be greater than zero"));
        }
        if self.readiness_poll.is_zero() {
            return Err(anyhow!("timeouts.readiness_poll must be greater than zero"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhysicsConfig {
    #[serde(default = "default_pause_service")]
    pub pause_service: String,
    #[serde(default = "default_unpause_service")]
    pub unpause_service: String,
    /// Settle time after pausing physics, before the model is spawned.
    #[serde(default = "default_settle_after_pause")]
    pub settle_after_pause_secs: f64,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            pause_service: default_pause_service(),
            unpause_service: default_unpause_service(),
            settle_after_pause_secs: default_settle_after_pause(),
        }
    }
}

impl PhysicsConfig {
    pub fn settle_after_pause(&self) -> Duration {
        Duration::try_from_secs_f64(self.settle_after_pause_secs).unwrap_or_default()
    }

    pub fn validate(&self) -> Result<()> {
        if self.pause_service.trim().is_empty() || self.unpause_service.trim().is_empty() {
            return Err(anyhow!("physics pause/unpause services must be named"));
        }
        validate_seconds("physics.settle_after_pause_secs", self.settle_after_pause_secs)
    }
}

/// A single readiness condition as written in configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PreconditionConfig {
    /// Wait until the named service becomes callable.
    Service { service: String },
    /// Wait a fixed amount of time.
    Settle { settle_secs: f64 },
}

impl PreconditionConfig {
    fn validate(&self, stage: Stage) -> Result<()> {
        match self {
            PreconditionConfig::Service { service } if service.trim().is_empty() => Err(anyhow!(
                "subsystem '{}' has a readiness precondition with an empty service name",
                stage
            )),
            PreconditionConfig::Service { .. } => Ok(()),
            PreconditionConfig::Settle { settle_secs } => {
                validate_seconds(&format!("subsystems.{}.readiness", stage), *settle_secs)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub readiness: Vec<PreconditionConfig>,
    #[serde(default)]
    pub env: IndexMap<String, String>,
}

impl SubsystemConfig {
    pub fn new(command: Vec<String>, readiness: Vec<PreconditionConfig>) -> Self {
        Self {
            enabled: true,
            command,
            readiness,
            env: IndexMap::new(),
        }
    }

    pub fn validate(&self, stage: Stage) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.command.first().map_or(true, |program| program.trim().is_empty()) {
            return Err(anyhow!("subsystem '{}' must declare a command", stage));
        }
        for precondition in &self.readiness {
            precondition.validate(stage)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SubsystemsConfig {
    pub master: SubsystemConfig,
    pub simulation_core: SubsystemConfig,
    pub spawn: SubsystemConfig,
    pub bringup: SubsystemConfig,
    pub controller: SubsystemConfig,
}

impl SubsystemsConfig {
    /// Configuration for a dependency stage; `None` for the test process.
    pub fn get(&self, stage: Stage) -> Option<&SubsystemConfig> {
        match stage {
            Stage::Master => Some(&self.master),
            Stage::SimulationCore => Some(&self.simulation_core),
            Stage::Spawn => Some(&self.spawn),
            Stage::Bringup => Some(&self.bringup),
            Stage::Controller => Some(&self.controller),
            Stage::TestProcess => None,
        }
    }

    /// Iterate over dependency stages in start order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, &SubsystemConfig)> + '_ {
        Stage::DEPENDENCIES
            .into_iter()
            .filter_map(move |stage| self.get(stage).map(|cfg| (stage, cfg)))
    }
}

impl Default for SubsystemsConfig {
    fn default() -> Self {
        Self {
            master: SubsystemConfig::new(
                argv(&["roscore"]),
                vec![PreconditionConfig::Settle { settle_secs: 1.0 }],
            ),
            simulation_core: SubsystemConfig::new(
                argv(&[
                    "roslaunch",
                    "talos_data",
                    "talos_gazebo_alone.launch",
                    "world:=empty_forced",
                    "enable_leg_passive:=false",
                ]),
                vec![PreconditionConfig::Service {
                    service: default_pause_service(),
                }],
            ),
            spawn: SubsystemConfig::new(
                argv(&["roslaunch", "talos_data", "talos_gazebo_spawn_hs.launch"]),
                vec![
                    PreconditionConfig::Service {
                        service: "/gains/arm_left_1_joint/set_parameters".to_owned(),
                    },
                    PreconditionConfig::Settle { settle_secs: 5.0 },
                ],
            ),
            bringup: SubsystemConfig::new(
                argv(&["roslaunch", "talos_data", "talos_bringup.launch"]),
                Vec::new(),
            ),
            controller: SubsystemConfig::new(
                argv(&[
                    "roslaunch",
                    "roscontrol_sot_talos",
                    "sot_talos_controller_gazebo_effort.launch",
                ]),
                vec![PreconditionConfig::Settle { settle_secs: 5.0 }],
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestProcessConfig {
    #[serde(default = "default_runner")]
    pub runner: String,
    #[serde(default = "default_package")]
    pub package: String,
}

impl Default for TestProcessConfig {
    fn default() -> Self {
        Self {
            runner: default_runner(),
            package: default_package(),
        }
    }
}

impl TestProcessConfig {
    pub fn validate(&self) -> Result<()> {
        if self.runner.trim().is_empty() || self.package.trim().is_empty() {
            return Err(anyhow!("test_process runner and package must be set"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_model_name")]
    pub model_name: String,
    #[serde(default = "default_expected_position")]
    pub expected_position: [f64; 3],
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_report_path")]
    pub report_path: PathBuf,
    #[serde(default)]
    pub summary_path: Option<PathBuf>,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            model_name: default_model_name(),
            expected_position: default_expected_position(),
            tolerance: default_tolerance(),
            report_path: default_report_path(),
            summary_path: None,
        }
    }
}

impl ValidationConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(anyhow!(
                "validation.tolerance must be a positive number, got {}",
                self.tolerance
            ));
        }
        if self.model_name.trim().is_empty() {
            return Err(anyhow!("validation.model_name must not be empty"));
        }
        if self.expected_position.iter().any(|v| !v.is_finite()) {
            return Err(anyhow!("validation.expected_position must be finite"));
        }
        Ok(())
    }
}

fn validate_seconds(field: &str, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(anyhow!("{} must be a non-negative number of seconds", field))
    }
}
