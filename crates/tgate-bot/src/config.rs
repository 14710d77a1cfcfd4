//! Application configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use tgate_control::ControlConfig;
use tgate_executor::ExecutionConfig;
use tgate_feed::FeedConfig;
use tgate_persistence::PersistenceConfig;
use tgate_position::LadderConfig;
use tgate_risk::{KillSwitchConfig, RiskGateConfig, TrackerConfig};
use tgate_scorer::ScorerConfig;
use tgate_telemetry::TelemetryConfig;

use crate::error::{AppError, AppResult};

/// Environment override prefix, e.g. `TGATE__RISK__MAX_POSITION_SIZE=500`.
pub const ENV_PREFIX: &str = "TGATE";

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Score and gate candidates, record decisions, never deploy.
    #[default]
    Observation,
    /// Deploy admitted candidates through the paper adapter.
    Paper,
}

impl std::fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Observation => write!(f, "observation"),
            Self::Paper => write!(f, "paper"),
        }
    }
}

/// Loop scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleConfig {
    /// Seconds between cycle starts. Default: 600.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Closed positions kept in memory for queries.
    #[serde(default = "default_archive_limit")]
    pub archive_limit: usize,
}

fn default_interval_secs() -> u64 {
    600
}

fn default_archive_limit() -> usize {
    256
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            archive_limit: default_archive_limit(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub mode: OperatingMode,
    #[serde(default)]
    pub cycle: CycleConfig,
    #[serde(default)]
    pub scorer: ScorerConfig,
    #[serde(default)]
    pub risk: RiskGateConfig,
    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub ladder: LadderConfig,
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub feeds: FeedConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub control: ControlConfig,
}

impl AppConfig {
    /// Load from a TOML file layered with `TGATE__SECTION__KEY` environment
    /// overrides, then validate.
    pub fn from_file(path: &str) -> AppResult<Self> {
        if !Path::new(path).exists() {
            return Err(AppError::Config(format!("Config file not found: {path}")));
        }

        let config: Self = config::Config::builder()
            .add_source(config::File::from(Path::new(path)))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| AppError::Config(format!("Failed to load config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text without environment overrides, then validate.
    pub fn from_toml_str(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Run every section's validation. Refuses any invalid threshold.
    pub fn validate(&self) -> AppResult<()> {
        if self.cycle.interval_secs == 0 {
            return Err(AppError::Config(
                "cycle.interval_secs must be positive".to_string(),
            ));
        }

        let sections: [(&str, Result<(), String>); 11] = [
            ("scorer", self.scorer.validate()),
            ("risk", self.risk.validate()),
            ("kill_switch", self.kill_switch.validate()),
            ("tracker", self.tracker.validate()),
            ("ladder", self.ladder.validate()),
            ("execution", self.execution.validate()),
            ("feeds", self.feeds.validate()),
            ("persistence", self.persistence.validate()),
            ("control", self.control.validate()),
            ("ladder", self.check_stop_fits_ladder()),
            ("kill_switch", self.check_loss_streaks()),
        ];
        for (name, result) in sections {
            result.map_err(|e| AppError::Config(format!("[{name}] {e}")))?;
        }
        Ok(())
    }

    /// The deepest entry tier must sit above the widest allowed stop,
    /// otherwise a fully laddered position would be stopped before it fills.
    fn check_stop_fits_ladder(&self) -> Result<(), String> {
        let deepest = self
            .ladder
            .entry_tiers
            .iter()
            .chain(&self.ladder.aggressive_entry_tiers)
            .map(|t| t.offset_pct.abs())
            .max()
            .unwrap_or_default();
        if deepest >= self.risk.max_stop_loss_pct {
            return Err(format!(
                "deepest entry tier ({deepest}%) must be inside max_stop_loss_pct ({}%)",
                self.risk.max_stop_loss_pct
            ));
        }
        Ok(())
    }

    fn check_loss_streaks(&self) -> Result<(), String> {
        if self.risk.loss_streak_halt > self.kill_switch.hard_loss_streak {
            return Err(format!(
                "risk.loss_streak_halt ({}) must not exceed hard_loss_streak ({})",
                self.risk.loss_streak_halt, self.kill_switch.hard_loss_streak
            ));
        }
        Ok(())
    }

    pub fn is_observation_mode(&self) -> bool {
        self.mode == OperatingMode::Observation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.is_observation_mode());
        assert_eq!(config.cycle.interval_secs, 600);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
            mode = "paper"

            [risk]
            max_position_size = 500

            [scorer.weights]
            confidence = 0.5
            reputation = 0.2
            technical = 0.2
            market_condition = 0.1
            "#,
        )
        .unwrap();
        assert_eq!(config.mode, OperatingMode::Paper);
        assert_eq!(config.risk.max_position_size, dec!(500));
        assert_eq!(config.scorer.weights.confidence, dec!(0.5));
        assert_eq!(config.ladder.exit_tiers.len(), 4);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let err = AppConfig::from_toml_str("[cycle]\ninterval_secs = 0\n").unwrap_err();
        assert!(err.to_string().contains("interval_secs"));
    }

    #[test]
    fn test_bad_weights_rejected() {
        let err = AppConfig::from_toml_str(
            r#"
            [scorer.weights]
            confidence = 0.9
            reputation = 0.3
            technical = 0.2
            market_condition = 0.1
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("[scorer]"));
    }

    #[test]
    fn test_health_floors_checked() {
        let err = AppConfig::from_toml_str(
            r#"
            [risk]
            critical_health_ratio = 2.5
            warning_health_ratio = 2.2
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("[risk]"));
    }

    #[test]
    fn test_loss_streak_ordering_checked() {
        let err = AppConfig::from_toml_str(
            r#"
            [risk]
            loss_streak_halt = 6

            [kill_switch]
            hard_loss_streak = 5
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("loss_streak_halt"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "mode = \"paper\"\n[cycle]\ninterval_secs = 30").unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.mode, OperatingMode::Paper);
        assert_eq!(config.cycle.interval_secs, 30);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../config/default.toml");
        let config = AppConfig::from_file(path).unwrap();
        assert_eq!(config.risk.funding_divergence_threshold, dec!(0.0005));
        assert_eq!(config.ladder.aggressive_entry_tiers[1].offset_pct, dec!(-0.5));
        assert_eq!(config.scorer.reputation_of("desk"), dec!(80));
    }

    #[test]
    fn test_missing_file() {
        let err = AppConfig::from_file("/nonexistent/tgate.toml").unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
    }
}
