use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use serde_json::json;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::aggregate::normalize_email;
use crate::error::{AnalyticsError, Result};
use crate::models::{
    Evaluation, Event, EventStatus, EventType, Requirement, Respondent, SatisfactionSurvey,
    SemesterKey, SemesterSatisfaction, Volunteer, VolunteerParticipationHistory,
};
use crate::schema::{
    ALL_TABLES, EVALUATIONS, EVENTS, PARTICIPATION_HISTORY, REQUIREMENTS, SCHEMA,
    SEMESTER_SATISFACTION, SURVEYS, VOLUNTEERS,
};
use crate::store::{RecordFilter, RecordStore};

pub async fn init_db(pool: &PgPool) -> Result<()> {
    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {SCHEMA}"))
        .execute(pool)
        .await?;

    for table in ALL_TABLES {
        debug!("ensuring table {}", table.qualified_name());
        sqlx::query(&table.create_table_sql()).execute(pool).await?;
    }

    for (index, table, column) in [
        ("requirements_event_idx", REQUIREMENTS, "event_id"),
        ("requirements_email_idx", REQUIREMENTS, "volunteer_email"),
        ("evaluations_requirement_idx", EVALUATIONS, "requirement_id"),
        ("surveys_event_idx", SURVEYS, "event_id"),
    ] {
        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {index} ON {} ({column})",
            table.qualified_name()
        ))
        .execute(pool)
        .await?;
    }

    info!("schema {SCHEMA} ready with {} tables", ALL_TABLES.len());
    Ok(())
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn save_volunteer(&self, volunteer: &Volunteer) -> Result<u64> {
        let sql = VOLUNTEERS.upsert_sql();
        let result = sqlx::query(&sql)
            .bind(&volunteer.email)
            .bind(&volunteer.full_name)
            .bind(&volunteer.membership_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn save_event(&self, event: &Event) -> Result<u64> {
        let sql = EVENTS.upsert_sql();
        let result = sqlx::query(&sql)
            .bind(event.id)
            .bind(&event.title)
            .bind(event.event_type.as_str())
            .bind(event.status.as_str())
            .bind(event.duration_start)
            .bind(event.duration_end)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn save_requirement(&self, requirement: &Requirement) -> Result<u64> {
        let sql = REQUIREMENTS.upsert_sql();
        let result = sqlx::query(&sql)
            .bind(requirement.id)
            .bind(requirement.event_id)
            .bind(&requirement.volunteer_email)
            .bind(requirement.accepted)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn save_evaluation(&self, evaluation: &Evaluation) -> Result<u64> {
        let sql = EVALUATIONS.upsert_sql();
        let criteria = (!evaluation.criteria.is_null()).then(|| evaluation.criteria.clone());
        let result = sqlx::query(&sql)
            .bind(evaluation.id)
            .bind(evaluation.requirement_id)
            .bind(criteria)
            .bind(evaluation.finalized)
            .bind(&evaluation.comment)
            .bind(&evaluation.recommendations)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Surveys are immutable once submitted.
    pub async fn save_survey(&self, survey: &SatisfactionSurvey) -> Result<u64> {
        let sql = SURVEYS.insert_sql();
        let result = sqlx::query(&sql)
            .bind(survey.id)
            .bind(survey.event_id)
            .bind(survey.respondent.as_str())
            .bind(survey.rating)
            .bind(&survey.issues)
            .bind(survey.submitted_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

const EVENT_SCOPE: &str = "($1::text IS NULL OR lower(r.volunteer_email) = lower($1)) \
     AND ($2::date IS NULL OR e.duration_start >= $2)";

#[async_trait]
impl RecordStore for PgStore {
    async fn list_volunteers(&self, filter: &RecordFilter) -> Result<Vec<Volunteer>> {
        let sql = format!(
            "{} WHERE ($1::text IS NULL OR lower(email) = lower($1)) ORDER BY email",
            VOLUNTEERS.select_sql(None)
        );
        let rows = sqlx::query(&sql)
            .bind(filter.volunteer_email.as_deref())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(volunteer_from_row).collect()
    }

    async fn list_events(&self, filter: &RecordFilter) -> Result<Vec<Event>> {
        let sql = format!(
            "{} WHERE ($1::date IS NULL OR duration_start >= $1) ORDER BY duration_start, id",
            EVENTS.select_sql(None)
        );
        let rows = sqlx::query(&sql)
            .bind(filter.since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(event_from_row).collect()
    }

    async fn list_requirements(&self, filter: &RecordFilter) -> Result<Vec<Requirement>> {
        // LEFT JOIN keeps requirements whose event is gone so they surface as warnings
        let sql = format!(
            "{} LEFT JOIN {} e ON e.id = r.event_id WHERE {EVENT_SCOPE} ORDER BY r.id",
            REQUIREMENTS.select_sql(Some("r")),
            EVENTS.qualified_name()
        );
        let rows = sqlx::query(&sql)
            .bind(filter.volunteer_email.as_deref())
            .bind(filter.since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(requirement_from_row).collect()
    }

    async fn list_evaluations(&self, filter: &RecordFilter) -> Result<Vec<Evaluation>> {
        let sql = format!(
            "{} JOIN {} r ON r.id = ev.requirement_id \
             LEFT JOIN {} e ON e.id = r.event_id WHERE {EVENT_SCOPE} ORDER BY ev.id",
            EVALUATIONS.select_sql(Some("ev")),
            REQUIREMENTS.qualified_name(),
            EVENTS.qualified_name()
        );
        let rows = sqlx::query(&sql)
            .bind(filter.volunteer_email.as_deref())
            .bind(filter.since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(evaluation_from_row).collect()
    }

    async fn list_surveys(&self, filter: &RecordFilter) -> Result<Vec<SatisfactionSurvey>> {
        let sql = format!(
            "{} LEFT JOIN {} e ON e.id = s.event_id \
             WHERE ($1::date IS NULL OR e.duration_start >= $1) ORDER BY s.submitted_at, s.id",
            SURVEYS.select_sql(Some("s")),
            EVENTS.qualified_name()
        );
        let rows = sqlx::query(&sql)
            .bind(filter.since)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(survey_from_row).collect()
    }

    async fn upsert_histories(&self, rows: &[VolunteerParticipationHistory]) -> Result<u64> {
        let sql = PARTICIPATION_HISTORY.upsert_sql();
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;

        for row in rows {
            let result = sqlx::query(&sql)
                .bind(&row.volunteer_email)
                .bind(&row.volunteer_name)
                .bind(&row.membership_id)
                .bind(row.semester_year)
                .bind(i16::from(row.semester_number))
                .bind(row.events_joined)
                .bind(row.events_attended)
                .bind(row.events_dropped)
                .bind(row.attendance_rate)
                .bind(row.first_event_date)
                .bind(row.last_event_date)
                .bind(row.days_active_in_semester)
                .bind(row.participation_consistency)
                .bind(row.risk_score)
                .bind(row.inactivity_days)
                .bind(row.engagement_level.as_str())
                .bind(row.calculated_at)
                .bind(row.last_updated)
                .execute(&mut *tx)
                .await?;
            written += result.rows_affected();
        }

        tx.commit().await?;
        Ok(written)
    }

    async fn list_histories(
        &self,
        filter: &RecordFilter,
    ) -> Result<Vec<VolunteerParticipationHistory>> {
        let sql = format!(
            "{} WHERE ($1::text IS NULL OR lower(volunteer_email) = lower($1)) \
             ORDER BY semester_year, semester_number, volunteer_email",
            PARTICIPATION_HISTORY.select_sql(None)
        );
        let rows = sqlx::query(&sql)
            .bind(filter.volunteer_email.as_deref())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(history_from_row).collect()
    }

    async fn upsert_satisfaction(&self, row: &SemesterSatisfaction) -> Result<()> {
        let sql = SEMESTER_SATISFACTION.upsert_sql();
        sqlx::query(&sql)
            .bind(row.year)
            .bind(i16::from(row.semester))
            .bind(row.overall)
            .bind(row.volunteers)
            .bind(row.beneficiaries)
            .bind(row.total_evaluations)
            .bind(&row.event_ids)
            .bind(&row.top_issues)
            .bind(row.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_satisfaction(&self, key: SemesterKey) -> Result<Option<SemesterSatisfaction>> {
        let sql = format!(
            "{} WHERE year = $1 AND semester = $2",
            SEMESTER_SATISFACTION.select_sql(None)
        );
        let row = sqlx::query(&sql)
            .bind(key.year)
            .bind(i16::from(key.number))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(satisfaction_from_row).transpose()
    }
}

fn parse_text<T>(row: &PgRow, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let value: String = row.try_get(column)?;
    value.parse::<T>().map_err(AnalyticsError::DataIntegrity)
}

fn semester_number(row: &PgRow, column: &str) -> Result<u8> {
    let value: i16 = row.try_get(column)?;
    u8::try_from(value).map_err(|_| {
        AnalyticsError::DataIntegrity(format!("semester number {value} out of range"))
    })
}

fn volunteer_from_row(row: &PgRow) -> Result<Volunteer> {
    Ok(Volunteer {
        email: row.try_get("email")?,
        full_name: row.try_get("full_name")?,
        membership_id: row.try_get("membership_id")?,
    })
}

fn event_from_row(row: &PgRow) -> Result<Event> {
    Ok(Event {
        id: row.try_get("id")?,
        title: row.try_get("title")?,
        event_type: parse_text(row, "event_type")?,
        status: parse_text(row, "status")?,
        duration_start: row.try_get("duration_start")?,
        duration_end: row.try_get("duration_end")?,
    })
}

fn requirement_from_row(row: &PgRow) -> Result<Requirement> {
    Ok(Requirement {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        volunteer_email: row.try_get("volunteer_email")?,
        accepted: row.try_get("accepted")?,
    })
}

fn evaluation_from_row(row: &PgRow) -> Result<Evaluation> {
    let criteria: Option<serde_json::Value> = row.try_get("criteria")?;
    Ok(Evaluation {
        id: row.try_get("id")?,
        requirement_id: row.try_get("requirement_id")?,
        criteria: criteria.unwrap_or(serde_json::Value::Null),
        finalized: row.try_get("finalized")?,
        comment: row.try_get("comment")?,
        recommendations: row.try_get("recommendations")?,
    })
}

fn survey_from_row(row: &PgRow) -> Result<SatisfactionSurvey> {
    Ok(SatisfactionSurvey {
        id: row.try_get("id")?,
        event_id: row.try_get("event_id")?,
        respondent: parse_text(row, "respondent")?,
        rating: row.try_get("rating")?,
        issues: row.try_get("issues")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

fn history_from_row(row: &PgRow) -> Result<VolunteerParticipationHistory> {
    Ok(VolunteerParticipationHistory {
        volunteer_email: row.try_get("volunteer_email")?,
        volunteer_name: row.try_get("volunteer_name")?,
        membership_id: row.try_get("membership_id")?,
        semester_year: row.try_get("semester_year")?,
        semester_number: semester_number(row, "semester_number")?,
        events_joined: row.try_get("events_joined")?,
        events_attended: row.try_get("events_attended")?,
        events_dropped: row.try_get("events_dropped")?,
        attendance_rate: row.try_get("attendance_rate")?,
        first_event_date: row.try_get("first_event_date")?,
        last_event_date: row.try_get("last_event_date")?,
        days_active_in_semester: row.try_get("days_active_in_semester")?,
        participation_consistency: row.try_get("participation_consistency")?,
        risk_score: row.try_get("risk_score")?,
        inactivity_days: row.try_get("inactivity_days")?,
        engagement_level: parse_text(row, "engagement_level")?,
        calculated_at: row.try_get("calculated_at")?,
        last_updated: row.try_get("last_updated")?,
    })
}

fn satisfaction_from_row(row: &PgRow) -> Result<SemesterSatisfaction> {
    Ok(SemesterSatisfaction {
        year: row.try_get("year")?,
        semester: semester_number(row, "semester")?,
        overall: row.try_get("overall")?,
        volunteers: row.try_get("volunteers")?,
        beneficiaries: row.try_get("beneficiaries")?,
        total_evaluations: row.try_get("total_evaluations")?,
        event_ids: row.try_get("event_ids")?,
        top_issues: row.try_get("top_issues")?,
        updated_at: row.try_get("updated_at")?,
    })
}

pub async fn seed(store: &PgStore) -> anyhow::Result<()> {
    let volunteers = vec![
        ("avery.lee@volunteers.org", "Avery Lee", Some("VM-0142")),
        ("jules.moreno@volunteers.org", "Jules Moreno", Some("VM-0178")),
        ("kiara.patel@volunteers.org", "Kiara Patel", None),
    ];
    for (email, name, membership) in volunteers {
        store
            .save_volunteer(&Volunteer {
                email: email.to_string(),
                full_name: name.to_string(),
                membership_id: membership.map(str::to_string),
            })
            .await?;
    }

    let events = vec![
        (1u128, "Food bank sorting", EventType::Internal, (2025, 9, 6)),
        (2, "River cleanup", EventType::External, (2025, 10, 4)),
        (3, "Literacy tutoring", EventType::Internal, (2025, 11, 8)),
        (4, "Winter coat drive", EventType::External, (2025, 12, 6)),
    ];
    for (n, title, event_type, (y, m, d)) in events {
        let day = NaiveDate::from_ymd_opt(y, m, d).context("invalid date")?;
        store
            .save_event(&Event {
                id: Uuid::from_u128(0xe000 + n),
                title: title.to_string(),
                event_type,
                status: EventStatus::Closed,
                duration_start: day,
                duration_end: day,
            })
            .await?;
    }

    // (requirement, event, volunteer, evaluation finalized?)
    let sign_ups = vec![
        (1u128, 1u128, "avery.lee@volunteers.org", Some(true)),
        (2, 2, "avery.lee@volunteers.org", Some(true)),
        (3, 3, "avery.lee@volunteers.org", Some(true)),
        (4, 4, "avery.lee@volunteers.org", None),
        (5, 1, "jules.moreno@volunteers.org", Some(false)),
        (6, 2, "jules.moreno@volunteers.org", None),
        (7, 3, "kiara.patel@volunteers.org", Some(true)),
        (8, 4, "kiara.patel@volunteers.org", Some(true)),
    ];
    for (n, event, email, finalized) in sign_ups {
        let requirement = Requirement {
            id: Uuid::from_u128(0xa000 + n),
            event_id: Uuid::from_u128(0xe000 + event),
            volunteer_email: email.to_string(),
            accepted: true,
        };
        store.save_requirement(&requirement).await?;

        if let Some(finalized) = finalized {
            store
                .save_evaluation(&Evaluation {
                    id: Uuid::from_u128(0xb000 + n),
                    requirement_id: requirement.id,
                    criteria: json!({"punctuality": 4, "teamwork": 5}),
                    finalized,
                    comment: Some("Reliable on site".to_string()),
                    recommendations: None,
                })
                .await?;
        }
    }

    let surveys = vec![
        (1u128, 1u128, Respondent::Volunteer, 4.5, vec!["parking"]),
        (2, 1, Respondent::Beneficiary, 5.0, vec![]),
        (3, 2, Respondent::Volunteer, 3.0, vec!["parking", "late start"]),
        (4, 3, Respondent::Beneficiary, 4.0, vec!["late start"]),
    ];
    for (n, event, respondent, rating, issues) in surveys {
        store
            .save_survey(&SatisfactionSurvey {
                id: Uuid::from_u128(0xc000 + n),
                event_id: Uuid::from_u128(0xe000 + event),
                respondent,
                rating,
                issues: issues.into_iter().map(str::to_string).collect(),
                submitted_at: Utc
                    .with_ymd_and_hms(2025, 12, 15, 12, 0, 0)
                    .single()
                    .context("invalid timestamp")?,
            })
            .await?;
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImportKind {
    Volunteers,
    Events,
    Requirements,
    Evaluations,
    Surveys,
}

#[derive(serde::Deserialize)]
struct VolunteerCsv {
    email: String,
    full_name: String,
    membership_id: Option<String>,
}

#[derive(serde::Deserialize)]
struct EventCsv {
    id: Option<Uuid>,
    title: String,
    event_type: EventType,
    status: EventStatus,
    duration_start: NaiveDate,
    duration_end: NaiveDate,
}

#[derive(serde::Deserialize)]
struct RequirementCsv {
    id: Option<Uuid>,
    event_id: Uuid,
    volunteer_email: String,
    accepted: bool,
}

#[derive(serde::Deserialize)]
struct EvaluationCsv {
    id: Option<Uuid>,
    requirement_id: Uuid,
    criteria: Option<String>,
    finalized: bool,
    comment: Option<String>,
    recommendations: Option<String>,
}

#[derive(serde::Deserialize)]
struct SurveyCsv {
    id: Option<Uuid>,
    event_id: Uuid,
    respondent: Respondent,
    rating: f64,
    /// Semicolon separated
    issues: Option<String>,
    submitted_at: DateTime<Utc>,
}

impl From<VolunteerCsv> for Volunteer {
    fn from(row: VolunteerCsv) -> Self {
        Volunteer {
            email: normalize_email(&row.email),
            full_name: row.full_name.trim().to_string(),
            membership_id: row.membership_id.filter(|m| !m.trim().is_empty()),
        }
    }
}

impl From<RequirementCsv> for Requirement {
    fn from(row: RequirementCsv) -> Self {
        Requirement {
            id: row.id.unwrap_or_else(Uuid::new_v4),
            event_id: row.event_id,
            volunteer_email: normalize_email(&row.volunteer_email),
            accepted: row.accepted,
        }
    }
}

pub async fn import_csv(
    store: &PgStore,
    kind: ImportKind,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut imported = 0usize;

    match kind {
        ImportKind::Volunteers => {
            for result in reader.deserialize::<VolunteerCsv>() {
                let volunteer = Volunteer::from(result?);
                imported += store.save_volunteer(&volunteer).await? as usize;
            }
        }
        ImportKind::Events => {
            for result in reader.deserialize::<EventCsv>() {
                let row = result?;
                if row.duration_end < row.duration_start {
                    anyhow::bail!("event '{}' ends before it starts", row.title);
                }
                let event = Event {
                    id: row.id.unwrap_or_else(Uuid::new_v4),
                    title: row.title,
                    event_type: row.event_type,
                    status: row.status,
                    duration_start: row.duration_start,
                    duration_end: row.duration_end,
                };
                imported += store.save_event(&event).await? as usize;
            }
        }
        ImportKind::Requirements => {
            for result in reader.deserialize::<RequirementCsv>() {
                let requirement = Requirement::from(result?);
                imported += store.save_requirement(&requirement).await? as usize;
            }
        }
        ImportKind::Evaluations => {
            for result in reader.deserialize::<EvaluationCsv>() {
                let row = result?;
                let criteria = match row.criteria.as_deref().map(str::trim) {
                    Some(text) if !text.is_empty() => serde_json::from_str::<serde_json::Value>(text)
                        .with_context(|| format!("invalid criteria JSON for {}", row.requirement_id))?,
                    _ => serde_json::Value::Null,
                };
                let evaluation = Evaluation {
                    id: row.id.unwrap_or_else(Uuid::new_v4),
                    requirement_id: row.requirement_id,
                    criteria,
                    finalized: row.finalized,
                    comment: row.comment,
                    recommendations: row.recommendations,
                };
                imported += store.save_evaluation(&evaluation).await? as usize;
            }
        }
        ImportKind::Surveys => {
            for result in reader.deserialize::<SurveyCsv>() {
                let row = result?;
                if !(1.0..=5.0).contains(&row.rating) {
                    anyhow::bail!("survey rating {} is outside 1..=5", row.rating);
                }
                let survey = SatisfactionSurvey {
                    id: row.id.unwrap_or_else(Uuid::new_v4),
                    event_id: row.event_id,
                    respondent: row.respondent,
                    rating: row.rating,
                    issues: split_issues(row.issues.as_deref()),
                    submitted_at: row.submitted_at,
                };
                imported += store.save_survey(&survey).await? as usize;
            }
        }
    }

    Ok(imported)
}

fn split_issues(raw: Option<&str>) -> Vec<String> {
    raw.unwrap_or_default()
        .split(';')
        .map(str::trim)
        .filter(|issue| !issue.is_empty())
        .map(str::to_string)
        .collect()
}
