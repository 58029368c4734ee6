//! Engine configuration.
//!
//! [`EngineConfig`] is plain serde data with defaults for every field, so a
//! JSON document only needs the keys it changes. Fractional tuning values
//! are authored as `f64` and converted to fixed point once, when the tick
//! loop is built.
//!
//! ```
//! use rewind_engine::config::EngineConfig;
//!
//! let config = EngineConfig::from_json_str(r#"{ "tick_rate": 30, "collision": { "max_collisions_per_tick": 10 } }"#).unwrap();
//! assert_eq!(config.tick_rate, 30);
//! assert_eq!(config.max_rollback_window, 8);
//! assert_eq!(config.collision.max_collisions_per_tick, 10);
//! ```

use std::env;
use std::time::Duration;

use rewind_ecs::fixed::Fx;
use serde::{Deserialize, Serialize};

/// Errors from loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("tick rate must be between 1 and 10000, got {0}")]
    TickRate(u32),

    #[error("{field} must be at least 1")]
    Zero { field: &'static str },

    #[error("{field} must lie in [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("invalid configuration JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// CollisionConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    /// Candidates beyond this count are dropped for the tick.
    pub max_collisions_per_tick: usize,
    /// Per-entity event buffer capacity.
    pub event_capacity: usize,
    /// Per-entity persisted contact buffer capacity.
    pub contact_capacity: usize,
    /// Minimum up-component of a contact normal that counts as ground.
    pub slope_threshold: f64,
    /// Ticks an entity stays grounded after losing its last walkable contact.
    pub grounded_grace_ticks: u32,
    /// Stop responses below this speed come to rest.
    pub rest_speed_epsilon: f64,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            max_collisions_per_tick: 100,
            event_capacity: 16,
            contact_capacity: 16,
            slope_threshold: 0.7,
            grounded_grace_ticks: 2,
            rest_speed_epsilon: 0.01,
        }
    }
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Most ticks run by a single `advance` call; older backlog is dropped.
    pub max_catch_up_steps: u32,
    /// How many ticks behind the current one a rollback may target.
    pub max_rollback_window: u32,
    /// Capture a snapshot after every tick. Rollback needs this.
    pub snapshots_enabled: bool,
    pub collision: CollisionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            max_catch_up_steps: 3,
            max_rollback_window: 8,
            snapshots_enabled: true,
            collision: CollisionConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `REWIND_TICK_RATE`, `REWIND_MAX_CATCH_UP` and
    /// `REWIND_ROLLBACK_WINDOW` when they are set and parse. Unparseable
    /// values are ignored.
    pub fn with_env_overrides(mut self) -> Self {
        fn read(key: &str) -> Option<u32> {
            env::var(key).ok().and_then(|v| v.trim().parse().ok())
        }
        if let Some(rate) = read("REWIND_TICK_RATE") {
            self.tick_rate = rate;
        }
        if let Some(steps) = read("REWIND_MAX_CATCH_UP") {
            self.max_catch_up_steps = steps;
        }
        if let Some(window) = read("REWIND_ROLLBACK_WINDOW") {
            self.max_rollback_window = window;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=10_000).contains(&self.tick_rate) {
            return Err(ConfigError::TickRate(self.tick_rate));
        }
        if self.max_catch_up_steps == 0 {
            return Err(ConfigError::Zero {
                field: "max_catch_up_steps",
            });
        }
        if self.max_rollback_window == 0 {
            return Err(ConfigError::Zero {
                field: "max_rollback_window",
            });
        }
        let c = &self.collision;
        if c.max_collisions_per_tick == 0 {
            return Err(ConfigError::Zero {
                field: "collision.max_collisions_per_tick",
            });
        }
        if c.event_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "collision.event_capacity",
            });
        }
        if c.contact_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "collision.contact_capacity",
            });
        }
        check_range("collision.slope_threshold", c.slope_threshold, 0.0, 1.0)?;
        check_range("collision.rest_speed_epsilon", c.rest_speed_epsilon, 0.0, 1000.0)?;
        Ok(())
    }

    /// Wall-clock length of one tick.
    pub fn fixed_dt(&self) -> Duration {
        Duration::from_secs(1) / self.tick_rate.max(1)
    }

    /// Simulation length of one tick, `1 / tick_rate`.
    pub fn fixed_dt_fx(&self) -> Fx {
        Fx::from_ratio(1, i64::from(self.tick_rate.max(1)))
    }
}

fn check_range(field: &'static str, value: f64, min: f64, max: f64) -> Result<(), ConfigError> {
    if value.is_finite() && (min..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange {
            field,
            value,
            min,
            max,
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.fixed_dt(), Duration::from_nanos(16_666_666));
        assert_eq!(config.fixed_dt_fx(), Fx::from_ratio(1, 60));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{ "max_rollback_window": 4 }"#).unwrap();
        assert_eq!(config.max_rollback_window, 4);
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.collision, CollisionConfig::default());
    }

    #[test]
    fn invalid_values_are_rejected() {
        let err = EngineConfig::from_json_str(r#"{ "tick_rate": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::TickRate(0)), "got {err:?}");

        let err = EngineConfig::from_json_str(r#"{ "collision": { "slope_threshold": 1.5 } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::OutOfRange { .. }), "got {err:?}");

        for field in ["event_capacity", "contact_capacity"] {
            let json = format!(r#"{{ "collision": {{ "{field}": 0 }} }}"#);
            let err = EngineConfig::from_json_str(&json).unwrap_err();
            assert!(
                matches!(err, ConfigError::Zero { field: f } if f == format!("collision.{field}")),
                "got {err:?}"
            );
        }

        let err = EngineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)), "got {err:?}");
    }

    #[test]
    fn config_survives_a_json_round_trip() {
        let mut config = EngineConfig::default();
        config.collision.grounded_grace_ticks = 5;
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfig::from_json_str(&json).unwrap(), config);
    }
}
