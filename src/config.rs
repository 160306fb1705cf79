use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Overridden by DATABASE_URL when set
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

fn default_max_connections() -> u32 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CalendarConfig {
    #[serde(default = "default_first_year")]
    pub first_year: i32,
    #[serde(default = "default_last_year")]
    pub last_year: i32,
    #[serde(default = "default_terms")]
    pub terms: Vec<TermConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct TermConfig {
    pub number: u8,
    pub start_month: u32,
    pub end_month: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            first_year: default_first_year(),
            last_year: default_last_year(),
            terms: default_terms(),
        }
    }
}

fn default_first_year() -> i32 {
    2000
}

fn default_last_year() -> i32 {
    2100
}

fn default_terms() -> Vec<TermConfig> {
    vec![
        TermConfig {
            number: 1,
            start_month: 8,
            end_month: 12,
        },
        TermConfig {
            number: 2,
            start_month: 1,
            end_month: 5,
        },
        TermConfig {
            number: 3,
            start_month: 6,
            end_month: 7,
        },
    ]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RiskConfig {
    #[serde(default = "default_attendance_weight")]
    pub attendance_weight: f64,
    #[serde(default = "default_inactivity_weight")]
    pub inactivity_weight: f64,
    #[serde(default = "default_consistency_weight")]
    pub consistency_weight: f64,
    /// Inactivity saturates at this many days
    #[serde(default = "default_inactivity_horizon_days")]
    pub inactivity_horizon_days: i64,
    #[serde(default = "default_medium_threshold")]
    pub medium_threshold: f64,
    #[serde(default = "default_high_threshold")]
    pub high_threshold: f64,
    #[serde(default = "default_medium_threshold")]
    pub at_risk_threshold: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            attendance_weight: default_attendance_weight(),
            inactivity_weight: default_inactivity_weight(),
            consistency_weight: default_consistency_weight(),
            inactivity_horizon_days: default_inactivity_horizon_days(),
            medium_threshold: default_medium_threshold(),
            high_threshold: default_high_threshold(),
            at_risk_threshold: default_medium_threshold(),
        }
    }
}

fn default_attendance_weight() -> f64 {
    0.5
}

fn default_inactivity_weight() -> f64 {
    0.3
}

fn default_consistency_weight() -> f64 {
    0.2
}

fn default_inactivity_horizon_days() -> i64 {
    90
}

fn default_medium_threshold() -> f64 {
    33.0
}

fn default_high_threshold() -> f64 {
    66.0
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), AnalyticsError> {
        let weights = [
            self.attendance_weight,
            self.inactivity_weight,
            self.consistency_weight,
        ];
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AnalyticsError::Config(
                "risk weights must be finite and non-negative".to_string(),
            ));
        }
        let total: f64 = weights.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
            return Err(AnalyticsError::Config(format!(
                "risk weights must sum to 1.0, got {total:.4}"
            )));
        }
        if self.inactivity_horizon_days <= 0 {
            return Err(AnalyticsError::Config(
                "inactivity_horizon_days must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.medium_threshold)
            || !(0.0..=100.0).contains(&self.high_threshold)
            || self.medium_threshold >= self.high_threshold
        {
            return Err(AnalyticsError::Config(format!(
                "tier thresholds must satisfy 0 <= medium ({}) < high ({}) <= 100",
                self.medium_threshold, self.high_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.at_risk_threshold) {
            return Err(AnalyticsError::Config(format!(
                "at_risk_threshold must be within 0..=100, got {}",
                self.at_risk_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

pub fn load_config(config_path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let mut config = match config_path {
        Some(path) => {
            let config_str = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<AppConfig>(&config_str).context("failed to parse TOML config")?
        }
        None => AppConfig::default(),
    };

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.is_empty() {
            config.database.url = Some(url);
        }
    }

    config.risk.validate()?;
    Ok(config)
}
