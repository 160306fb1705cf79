use chrono::NaiveDate;
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("date {date} is outside the configured calendar span {first_year}..={last_year}")]
    DateOutOfRange {
        date: NaiveDate,
        first_year: i32,
        last_year: i32,
    },

    #[error("data integrity error: {0}")]
    DataIntegrity(String),

    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl AnalyticsError {
    pub fn kind(&self) -> &'static str {
        match self {
            AnalyticsError::DateOutOfRange { .. } => "DateOutOfRangeError",
            AnalyticsError::DataIntegrity(_) => "DataIntegrityError",
            AnalyticsError::StoreUnavailable(_) => "StoreUnavailableError",
            AnalyticsError::Config(_) => "ConfigError",
        }
    }
}

impl From<sqlx::Error> for AnalyticsError {
    fn from(err: sqlx::Error) -> Self {
        AnalyticsError::StoreUnavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsWarning {
    pub kind: &'static str,
    pub subject: String,
    pub message: String,
}

impl AnalyticsWarning {
    pub fn from_error(subject: impl Into<String>, err: &AnalyticsError) -> Self {
        Self {
            kind: err.kind(),
            subject: subject.into(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        let err = AnalyticsError::DataIntegrity("attended > joined".to_string());
        assert_eq!(err.kind(), "DataIntegrityError");
        assert_eq!(err.to_string(), "data integrity error: attended > joined");
    }

    #[test]
    fn warning_carries_error_kind() {
        let err = AnalyticsError::DateOutOfRange {
            date: NaiveDate::from_ymd_opt(1990, 3, 1).unwrap(),
            first_year: 2000,
            last_year: 2100,
        };
        let warning = AnalyticsWarning::from_error("requirement 42", &err);
        assert_eq!(warning.kind, "DateOutOfRangeError");
        assert_eq!(warning.subject, "requirement 42");
        assert!(warning.message.contains("1990-03-01"));
    }
}
