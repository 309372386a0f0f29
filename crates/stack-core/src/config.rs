//! Game configuration loaded from JSON.

use serde::{Deserialize, Serialize};

use crate::landing::LandingConfig;
use crate::monitor::MonitorConfig;
use crate::scheduler::SweepConfig;
use crate::selector::SelectionPolicy;
use crate::stabilizer::StabilizerConfig;
use crate::variant::{BlockVariant, VariantCatalog};

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Static platform the tower is built on.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GroundConfig {
    pub center: [f32; 2],
    pub size: [f32; 2],
}

impl Default for GroundConfig {
    fn default() -> Self {
        Self {
            center: [0.0, -0.5],
            size: [6.0, 1.0],
        }
    }
}

/// Complete stacking game configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StackConfig {
    pub seed: u64,
    pub catalog: Vec<BlockVariant>,
    pub selection: SelectionPolicy,
    pub spawn_point: [f32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepConfig>,
    pub landing: LandingConfig,
    pub stabilizer: StabilizerConfig,
    pub resume_cooldown_secs: f32,
    pub ground: GroundConfig,
    pub fall_limit_y: f32,
    pub monitor: MonitorConfig,
    /// Enables time-attack mode with this limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f32>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            catalog: Vec::new(),
            selection: SelectionPolicy::default(),
            spawn_point: [0.0, 8.0],
            sweep: None,
            landing: LandingConfig::default(),
            stabilizer: StabilizerConfig::default(),
            resume_cooldown_secs: 1.0,
            ground: GroundConfig::default(),
            fall_limit_y: -5.0,
            monitor: MonitorConfig::default(),
            time_limit_secs: None,
        }
    }
}

impl StackConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Classic configuration, loaded from configs/default.json at compile time.
    pub fn default_classic() -> Self {
        const DEFAULT_CONFIG_JSON: &str = include_str!("../configs/default.json");
        Self::from_json(DEFAULT_CONFIG_JSON).expect("Failed to parse default config JSON")
    }

    pub fn variant_catalog(&self) -> VariantCatalog {
        VariantCatalog::new(self.catalog.clone())
    }

    /// Checks value ranges. An empty catalog is accepted.
    #[allow(clippy::neg_cmp_op_on_partial_ord)]
    pub fn validate(&self) -> Result<(), ConfigError> {
        for variant in &self.catalog {
            let name = &variant.name;
            if !variant.spawn_weight.is_finite() || variant.spawn_weight < 0.0 {
                return invalid(format!("variant '{name}' has spawn weight {}", variant.spawn_weight));
            }
            if !(variant.footprint.width > 0.0 && variant.footprint.height > 0.0) {
                return invalid(format!("variant '{name}' has a non-positive footprint"));
            }
            if !(variant.density > 0.0) || variant.friction < 0.0 {
                return invalid(format!("variant '{name}' has an invalid material"));
            }
        }

        if let SelectionPolicy::DifficultyTiered {
            tier1,
            tier2,
            base_chance,
            ..
        } = &self.selection
        {
            if tier1 > tier2 {
                return invalid(format!("tier1 ({tier1}) exceeds tier2 ({tier2})"));
            }
            check_unit("base_chance", *base_chance)?;
        }

        let stabilizer = &self.stabilizer;
        check_unit("active_angular_damping", stabilizer.active_angular_damping)?;
        check_unit("passive_linear_damping", stabilizer.passive_linear_damping)?;
        check_unit("passive_angular_damping", stabilizer.passive_angular_damping)?;

        let durations = [
            ("landing.timeout_secs", self.landing.timeout_secs),
            ("stabilizer.active_settle_secs", stabilizer.active_settle_secs),
            ("stabilizer.passive_damp_secs", stabilizer.passive_damp_secs),
            ("stabilizer.grace_secs", stabilizer.grace_secs),
            ("resume_cooldown_secs", self.resume_cooldown_secs),
            ("monitor.check_interval_secs", self.monitor.check_interval_secs),
        ];
        for (field, secs) in durations {
            if !secs.is_finite() || secs < 0.0 {
                return invalid(format!("{field} must be a non-negative duration, got {secs}"));
            }
        }
        if let Some(limit) = self.time_limit_secs {
            if !limit.is_finite() || limit <= 0.0 {
                return invalid(format!("time_limit_secs must be positive, got {limit}"));
            }
        }
        if !(self.landing.at_rest_threshold > 0.0) {
            return invalid("landing.at_rest_threshold must be positive".to_string());
        }
        if !(self.ground.size[0] > 0.0 && self.ground.size[1] > 0.0) {
            return invalid("ground size must be positive".to_string());
        }

        Ok(())
    }
}

fn invalid(message: String) -> Result<(), ConfigError> {
    Err(ConfigError::Invalid(message))
}

fn check_unit(field: &str, value: f32) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        invalid(format!("{field} must be within [0, 1], got {value}"))
    }
}
