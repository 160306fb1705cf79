use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AnalyticsWarning;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volunteer {
    pub email: String,
    pub full_name: String,
    pub membership_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Internal,
    External,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Draft,
    Open,
    Closed,
    Cancelled,
}

macro_rules! text_enum {
    ($ty:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $ty {
            type Err = String;

            fn from_str(value: &str) -> Result<Self, Self::Err> {
                match value.trim().to_ascii_lowercase().as_str() {
                    $($text => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} value: {other}", stringify!($ty))),
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

text_enum!(EventType { Internal => "internal", External => "external" });
text_enum!(EventStatus {
    Draft => "draft",
    Open => "open",
    Closed => "closed",
    Cancelled => "cancelled",
});

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub title: String,
    pub event_type: EventType,
    pub status: EventStatus,
    pub duration_start: NaiveDate,
    pub duration_end: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Requirement {
    pub id: Uuid,
    pub event_id: Uuid,
    pub volunteer_email: String,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub id: Uuid,
    pub requirement_id: Uuid,
    pub criteria: serde_json::Value,
    pub finalized: bool,
    pub comment: Option<String>,
    pub recommendations: Option<String>,
}

impl Evaluation {
    pub fn has_criteria(&self) -> bool {
        match &self.criteria {
            serde_json::Value::Null => false,
            serde_json::Value::Object(map) => !map.is_empty(),
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::String(text) => !text.trim().is_empty(),
            _ => true,
        }
    }

    pub fn counts_as_attendance(&self) -> bool {
        self.finalized && self.has_criteria()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Respondent {
    Volunteer,
    Beneficiary,
}

text_enum!(Respondent { Volunteer => "volunteer", Beneficiary => "beneficiary" });

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SatisfactionSurvey {
    pub id: Uuid,
    pub event_id: Uuid,
    pub respondent: Respondent,
    pub rating: f64,
    pub issues: Vec<String>,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterKey {
    pub year: i32,
    pub number: u8,
}

impl SemesterKey {
    pub fn new(year: i32, number: u8) -> Self {
        Self { year, number }
    }
}

impl fmt::Display for SemesterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.year, self.number)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawCounts {
    pub semester: SemesterKey,
    pub joined: i64,
    pub attended: i64,
    pub first_date: Option<NaiveDate>,
    pub last_date: Option<NaiveDate>,
    /// Start dates of attended events, ascending
    pub attended_dates: Vec<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementLevel {
    Low,
    Medium,
    High,
}

text_enum!(EngagementLevel { Low => "low", Medium => "medium", High => "high" });

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub attendance_rate: f64,
    pub participation_consistency: f64,
    pub days_active_in_semester: i64,
    pub risk_score: f64,
    pub engagement_level: EngagementLevel,
    pub inactivity_days: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolunteerParticipationHistory {
    pub volunteer_email: String,
    pub volunteer_name: String,
    pub membership_id: Option<String>,
    pub semester_year: i32,
    pub semester_number: u8,
    pub events_joined: i64,
    pub events_attended: i64,
    pub events_dropped: i64,
    pub attendance_rate: f64,
    pub first_event_date: Option<NaiveDate>,
    pub last_event_date: Option<NaiveDate>,
    pub days_active_in_semester: i64,
    pub participation_consistency: f64,
    pub risk_score: f64,
    pub inactivity_days: i64,
    pub engagement_level: EngagementLevel,
    pub calculated_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl VolunteerParticipationHistory {
    pub fn semester(&self) -> SemesterKey {
        SemesterKey::new(self.semester_year, self.semester_number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSatisfaction {
    pub year: i32,
    pub semester: u8,
    pub overall: f64,
    pub volunteers: f64,
    pub beneficiaries: f64,
    pub total_evaluations: i64,
    pub event_ids: Vec<Uuid>,
    pub top_issues: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SemesterSummary {
    pub semester: String,
    pub year: i32,
    pub semester_number: u8,
    pub volunteers: usize,
    pub attended: i64,
    pub dropouts: i64,
    pub events_per_volunteer: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRiskVolunteer {
    pub volunteer_email: String,
    pub volunteer_name: String,
    pub membership_id: Option<String>,
    pub semester: String,
    pub events_joined: i64,
    pub events_attended: i64,
    pub attendance_rate: f64,
    pub inactivity_days: i64,
    pub risk_score: f64,
    pub engagement_level: EngagementLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DropoutReport {
    pub semester_data: Vec<SemesterSummary>,
    pub at_risk_volunteers: Vec<AtRiskVolunteer>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<AnalyticsWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<&'static str>,
}

impl<T> Envelope<T> {
    pub fn ok(data: T, warnings: Vec<AnalyticsWarning>) -> Self {
        Self {
            success: true,
            data: Some(data),
            warnings,
            error: None,
            error_kind: None,
        }
    }

    pub fn failed(err: &crate::error::AnalyticsError) -> Self {
        Self {
            success: false,
            data: None,
            warnings: Vec::new(),
            error: Some(err.to_string()),
            error_kind: Some(err.kind()),
        }
    }
}
