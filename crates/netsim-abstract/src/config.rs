use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("capacity_mbps must be a positive number, got {0}")]
    Capacity(f64),
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("{name} must be between 0 and 1, got {value}")]
    Fraction { name: &'static str, value: f64 },
    #[error("latency_jitter_ms must be a non-negative number, got {0}")]
    LatencyJitter(f64),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Bottleneck capacity in Mbps.
    pub capacity_mbps: f64,
    pub tick_interval_ms: u64,
    /// Number of metrics samples kept for the chart.
    pub metrics_retention: usize,
    pub event_log_capacity: usize,
    /// Each user's rate is scaled by a uniform draw in `1 ± demand_jitter`.
    pub demand_jitter: f64,
    /// Amplitude of the slow sinusoidal load swing, as a fraction of demand.
    pub wave_amplitude: f64,
    pub wave_period_ms: u64,
    /// Congestion added per unit of the multi-tick trend. Zero disables the trend.
    pub trend_strength: f64,
    /// Chance per tick of a status message when nothing is alarming.
    pub event_probability: f64,
    pub latency_jitter_ms: f64,
    pub seed: Option<u64>,
    /// JSON file holding the user list. Users live only in memory when unset.
    pub storage_path: Option<PathBuf>,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            capacity_mbps: 100.0,
            tick_interval_ms: 1000,
            metrics_retention: 30,
            event_log_capacity: 50,
            demand_jitter: 0.1,
            wave_amplitude: 0.15,
            wave_period_ms: 20_000,
            trend_strength: 0.05,
            event_probability: 0.15,
            latency_jitter_ms: 5.0,
            seed: None,
            storage_path: None,
        }
    }
}

impl SimConfig {
    /// Settings with every random perturbation switched off, so a tick is a
    /// pure function of the user list and the algorithm.
    pub fn deterministic() -> Self {
        Self {
            demand_jitter: 0.0,
            wave_amplitude: 0.0,
            trend_strength: 0.0,
            event_probability: 0.0,
            latency_jitter_ms: 0.0,
            seed: Some(0),
            ..Default::default()
        }
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.capacity_mbps.is_finite() && self.capacity_mbps > 0.0) {
            return Err(ConfigError::Capacity(self.capacity_mbps));
        }
        if self.tick_interval_ms == 0 {
            return Err(ConfigError::Zero("tick_interval_ms"));
        }
        if self.metrics_retention == 0 {
            return Err(ConfigError::Zero("metrics_retention"));
        }
        if self.event_log_capacity == 0 {
            return Err(ConfigError::Zero("event_log_capacity"));
        }
        for (name, value) in [
            ("demand_jitter", self.demand_jitter),
            ("wave_amplitude", self.wave_amplitude),
            ("trend_strength", self.trend_strength),
            ("event_probability", self.event_probability),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Fraction { name, value });
            }
        }
        if !(self.latency_jitter_ms.is_finite() && self.latency_jitter_ms >= 0.0) {
            return Err(ConfigError::LatencyJitter(self.latency_jitter_ms));
        }
        Ok(())
    }
}

/// Partial settings layered over a [`SimConfig`], as read from a config or
/// scenario file.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimConfigOverride {
    pub capacity_mbps: Option<f64>,
    pub tick_interval_ms: Option<u64>,
    pub metrics_retention: Option<usize>,
    pub event_log_capacity: Option<usize>,
    pub demand_jitter: Option<f64>,
    pub wave_amplitude: Option<f64>,
    pub wave_period_ms: Option<u64>,
    pub trend_strength: Option<f64>,
    pub event_probability: Option<f64>,
    pub latency_jitter_ms: Option<f64>,
    pub seed: Option<u64>,
    pub storage_path: Option<PathBuf>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.capacity_mbps {
            config.capacity_mbps = v;
        }
        if let Some(v) = self.tick_interval_ms {
            config.tick_interval_ms = v;
        }
        if let Some(v) = self.metrics_retention {
            config.metrics_retention = v;
        }
        if let Some(v) = self.event_log_capacity {
            config.event_log_capacity = v;
        }
        if let Some(v) = self.demand_jitter {
            config.demand_jitter = v;
        }
        if let Some(v) = self.wave_amplitude {
            config.wave_amplitude = v;
        }
        if let Some(v) = self.wave_period_ms {
            config.wave_period_ms = v;
        }
        if let Some(v) = self.trend_strength {
            config.trend_strength = v;
        }
        if let Some(v) = self.event_probability {
            config.event_probability = v;
        }
        if let Some(v) = self.latency_jitter_ms {
            config.latency_jitter_ms = v;
        }
        if let Some(v) = self.seed {
            config.seed = Some(v);
        }
        if let Some(v) = &self.storage_path {
            config.storage_path = Some(v.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        SimConfig::default().validate().unwrap();
        SimConfig::deterministic().validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_settings() {
        let config = SimConfig {
            capacity_mbps: 0.0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Capacity(0.0)));

        let config = SimConfig {
            event_probability: 1.5,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Fraction {
                name: "event_probability",
                ..
            })
        ));

        let config = SimConfig {
            metrics_retention: 0,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::Zero("metrics_retention")));
    }

    #[test]
    fn override_from_toml_only_touches_given_fields() {
        let overrides: SimConfigOverride = toml::from_str(
            r#"
            capacity_mbps = 250.0
            seed = 7
            storage_path = "users.json"
            "#,
        )
        .unwrap();
        let mut config = SimConfig::default();
        overrides.apply_to(&mut config);

        assert_eq!(config.capacity_mbps, 250.0);
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.storage_path, Some(PathBuf::from("users.json")));
        assert_eq!(config.tick_interval_ms, 1000);
        assert_eq!(config.metrics_retention, 30);
    }
}
