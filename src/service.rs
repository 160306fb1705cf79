use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, SubsecRound, Utc};
use tracing::{error, info, warn};

use crate::aggregate::{aggregate, normalize_email, BucketKey};
use crate::config::{AppConfig, RiskConfig};
use crate::error::{AnalyticsWarning, Result};
use crate::models::{
    DropoutReport, Envelope, Metrics, RawCounts, SemesterKey, SemesterSatisfaction, Volunteer,
    VolunteerParticipationHistory,
};
use crate::report;
use crate::risk::Scorer;
use crate::satisfaction;
use crate::semester::SemesterCalendar;
use crate::store::{RecordFilter, RecordStore};

#[derive(Debug, Default)]
pub struct RecomputeOutcome {
    pub histories: Vec<VolunteerParticipationHistory>,
    pub warnings: Vec<AnalyticsWarning>,
}

pub struct AnalyticsService<S> {
    store: S,
    calendar: SemesterCalendar,
    risk: RiskConfig,
}

impl<S: RecordStore> AnalyticsService<S> {
    pub fn new(store: S, config: &AppConfig) -> Result<Self> {
        config.risk.validate()?;
        Ok(Self {
            store,
            calendar: SemesterCalendar::new(&config.calendar)?,
            risk: config.risk.clone(),
        })
    }

    #[cfg(test)]
    pub fn store(&self) -> &S {
        &self.store
    }

    pub async fn recompute_participation(
        &self,
        filter: &RecordFilter,
        as_of: NaiveDate,
    ) -> Result<RecomputeOutcome> {
        let filter = self.whole_semesters(filter);
        let volunteers = self.store.list_volunteers(&filter).await?;
        let events = self.store.list_events(&filter).await?;
        let requirements = self.store.list_requirements(&filter).await?;
        let evaluations = self.store.list_evaluations(&filter).await?;
        info!(
            "loaded {} volunteers, {} events, {} requirements, {} evaluations",
            volunteers.len(),
            events.len(),
            requirements.len(),
            evaluations.len()
        );

        let aggregation = aggregate(&self.calendar, &events, &requirements, &evaluations);
        let mut outcome = RecomputeOutcome {
            histories: Vec::with_capacity(aggregation.buckets.len()),
            warnings: aggregation.warnings,
        };

        let directory: HashMap<String, &Volunteer> = volunteers
            .iter()
            .map(|v| (normalize_email(&v.email), v))
            .collect();
        let scorer = Scorer::new(&self.risk, &self.calendar);
        let calculated_at = Utc::now().trunc_subsecs(0);

        for (key, counts) in &aggregation.buckets {
            match scorer.score(counts, as_of) {
                Ok(metrics) => outcome.histories.push(history_row(
                    key,
                    counts,
                    &metrics,
                    directory.get(&key.0).copied(),
                    calculated_at,
                )),
                Err(err) => {
                    warn!("skipping {} {}: {err}", key.0, key.1);
                    outcome
                        .warnings
                        .push(AnalyticsWarning::from_error(format!("{} {}", key.0, key.1), &err));
                }
            }
        }

        let written = self.store.upsert_histories(&outcome.histories).await?;
        info!(
            "stored {written} participation rows with {} warnings",
            outcome.warnings.len()
        );
        Ok(outcome)
    }

    pub async fn get_dropout_analytics(
        &self,
        filter: &RecordFilter,
        as_of: NaiveDate,
    ) -> Envelope<DropoutReport> {
        match self.recompute_participation(filter, as_of).await {
            Ok(outcome) => Envelope::ok(
                report::build(&outcome.histories, self.risk.at_risk_threshold),
                outcome.warnings,
            ),
            Err(err) => {
                error!("dropout analytics failed: {err}");
                Envelope::failed(&err)
            }
        }
    }

    pub async fn get_stored_dropout_analytics(
        &self,
        filter: &RecordFilter,
    ) -> Envelope<DropoutReport> {
        let mut histories = match self.store.list_histories(filter).await {
            Ok(histories) => histories,
            Err(err) => {
                error!("stored dropout analytics failed: {err}");
                return Envelope::failed(&err);
            }
        };

        if let Some(since) = filter.since {
            histories.retain(|h| {
                self.calendar
                    .bounds(h.semester())
                    .is_ok_and(|(_, end)| end >= since)
            });
        }
        Envelope::ok(
            report::build(&histories, self.risk.at_risk_threshold),
            Vec::new(),
        )
    }

    pub async fn recompute_satisfaction(
        &self,
        semester: SemesterKey,
    ) -> Result<SemesterSatisfaction> {
        let summary = self.summarize_satisfaction(semester).await?;
        self.store.upsert_satisfaction(&summary).await?;
        info!(
            "stored satisfaction for {semester} from {} responses",
            summary.total_evaluations
        );
        Ok(summary)
    }

    pub async fn get_semester_satisfaction(
        &self,
        semester: SemesterKey,
    ) -> Envelope<SemesterSatisfaction> {
        match self.current_satisfaction(semester).await {
            Ok(summary) => Envelope::ok(summary, Vec::new()),
            Err(err) => {
                error!("semester satisfaction for {semester} failed: {err}");
                Envelope::failed(&err)
            }
        }
    }

    async fn current_satisfaction(&self, semester: SemesterKey) -> Result<SemesterSatisfaction> {
        let fresh = self.summarize_satisfaction(semester).await?;
        match self.store.get_satisfaction(semester).await? {
            Some(stored) if same_figures(&stored, &fresh) => Ok(stored),
            _ => {
                self.store.upsert_satisfaction(&fresh).await?;
                info!(
                    "refreshed satisfaction for {semester} from {} responses",
                    fresh.total_evaluations
                );
                Ok(fresh)
            }
        }
    }

    async fn summarize_satisfaction(&self, semester: SemesterKey) -> Result<SemesterSatisfaction> {
        let (start, _) = self.calendar.bounds(semester)?;
        self.calendar.resolve(start)?;

        let filter = RecordFilter {
            volunteer_email: None,
            since: Some(start),
        };
        let events = self.store.list_events(&filter).await?;
        let surveys = self.store.list_surveys(&filter).await?;
        Ok(satisfaction::summarize(
            &self.calendar,
            semester,
            &events,
            &surveys,
            Utc::now().trunc_subsecs(0),
        ))
    }

    // stored rows hold whole semesters, so a cutoff is widened to its semester start
    fn whole_semesters(&self, filter: &RecordFilter) -> RecordFilter {
        let since = filter.since.map(|since| {
            self.calendar
                .resolve(since)
                .and_then(|semester| self.calendar.bounds(semester))
                .map_or(since, |(start, _)| start)
        });
        RecordFilter {
            volunteer_email: filter.volunteer_email.clone(),
            since,
        }
    }
}

fn same_figures(stored: &SemesterSatisfaction, fresh: &SemesterSatisfaction) -> bool {
    let comparable = SemesterSatisfaction {
        updated_at: stored.updated_at,
        ..fresh.clone()
    };
    comparable == *stored
}

fn history_row(
    key: &BucketKey,
    counts: &RawCounts,
    metrics: &Metrics,
    volunteer: Option<&Volunteer>,
    calculated_at: DateTime<Utc>,
) -> VolunteerParticipationHistory {
    let (email, semester) = key;
    VolunteerParticipationHistory {
        volunteer_email: email.clone(),
        volunteer_name: volunteer.map_or_else(|| email.clone(), |v| v.full_name.clone()),
        membership_id: volunteer.and_then(|v| v.membership_id.clone()),
        semester_year: semester.year,
        semester_number: semester.number,
        events_joined: counts.joined,
        events_attended: counts.attended,
        events_dropped: counts.joined - counts.attended,
        attendance_rate: metrics.attendance_rate,
        first_event_date: counts.first_date,
        last_event_date: counts.last_date,
        days_active_in_semester: metrics.days_active_in_semester,
        participation_consistency: metrics.participation_consistency,
        risk_score: metrics.risk_score,
        inactivity_days: metrics.inactivity_days,
        engagement_level: metrics.engagement_level,
        calculated_at,
        last_updated: calculated_at,
    }
}
