use async_trait::async_trait;
use chrono::NaiveDate;

use crate::error::Result;
use crate::models::{
    Evaluation, Event, Requirement, SatisfactionSurvey, SemesterKey, SemesterSatisfaction,
    Volunteer, VolunteerParticipationHistory,
};

#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub volunteer_email: Option<String>,
    /// Only events starting on or after this date (and records hanging off them)
    pub since: Option<NaiveDate>,
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn list_volunteers(&self, filter: &RecordFilter) -> Result<Vec<Volunteer>>;

    async fn list_events(&self, filter: &RecordFilter) -> Result<Vec<Event>>;

    async fn list_requirements(&self, filter: &RecordFilter) -> Result<Vec<Requirement>>;

    async fn list_evaluations(&self, filter: &RecordFilter) -> Result<Vec<Evaluation>>;

    async fn list_surveys(&self, filter: &RecordFilter) -> Result<Vec<SatisfactionSurvey>>;

    /// Upsert keyed on (email, year, semester); all rows commit or none do.
    async fn upsert_histories(&self, rows: &[VolunteerParticipationHistory]) -> Result<u64>;

    async fn list_histories(&self, filter: &RecordFilter)
        -> Result<Vec<VolunteerParticipationHistory>>;

    async fn upsert_satisfaction(&self, row: &SemesterSatisfaction) -> Result<()>;

    async fn get_satisfaction(&self, key: SemesterKey) -> Result<Option<SemesterSatisfaction>>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use uuid::Uuid;

    use super::*;
    use crate::error::AnalyticsError;

    impl RecordFilter {
        pub fn matches_email(&self, email: &str) -> bool {
            self.volunteer_email
                .as_deref()
                .map_or(true, |wanted| wanted.eq_ignore_ascii_case(email))
        }

        pub fn matches_start(&self, start: NaiveDate) -> bool {
            self.since.map_or(true, |since| start >= since)
        }
    }

    #[derive(Default)]
    pub struct MemoryStore {
        pub volunteers: Mutex<Vec<Volunteer>>,
        pub events: Mutex<Vec<Event>>,
        pub requirements: Mutex<Vec<Requirement>>,
        pub evaluations: Mutex<Vec<Evaluation>>,
        pub surveys: Mutex<Vec<SatisfactionSurvey>>,
        pub histories: Mutex<Vec<VolunteerParticipationHistory>>,
        pub satisfaction: Mutex<Vec<SemesterSatisfaction>>,
        pub unavailable: AtomicBool,
    }

    impl MemoryStore {
        fn check(&self) -> Result<()> {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(AnalyticsError::StoreUnavailable(
                    "connection refused".to_string(),
                ));
            }
            Ok(())
        }

        fn event_starts(&self) -> HashMap<Uuid, NaiveDate> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| (e.id, e.duration_start))
                .collect()
        }

        fn visible_requirements(&self, filter: &RecordFilter) -> Vec<Requirement> {
            let starts = self.event_starts();
            self.requirements
                .lock()
                .unwrap()
                .iter()
                .filter(|r| filter.matches_email(&r.volunteer_email))
                .filter(|r| match (filter.since, starts.get(&r.event_id)) {
                    (Some(_), Some(start)) => filter.matches_start(*start),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .cloned()
                .collect()
        }
    }

    #[async_trait]
    impl RecordStore for MemoryStore {
        async fn list_volunteers(&self, filter: &RecordFilter) -> Result<Vec<Volunteer>> {
            self.check()?;
            Ok(self
                .volunteers
                .lock()
                .unwrap()
                .iter()
                .filter(|v| filter.matches_email(&v.email))
                .cloned()
                .collect())
        }

        async fn list_events(&self, filter: &RecordFilter) -> Result<Vec<Event>> {
            self.check()?;
            Ok(self
                .events
                .lock()
                .unwrap()
                .iter()
                .filter(|e| filter.matches_start(e.duration_start))
                .cloned()
                .collect())
        }

        async fn list_requirements(&self, filter: &RecordFilter) -> Result<Vec<Requirement>> {
            self.check()?;
            Ok(self.visible_requirements(filter))
        }

        async fn list_evaluations(&self, filter: &RecordFilter) -> Result<Vec<Evaluation>> {
            self.check()?;
            let ids: Vec<Uuid> = self
                .visible_requirements(filter)
                .iter()
                .map(|r| r.id)
                .collect();
            Ok(self
                .evaluations
                .lock()
                .unwrap()
                .iter()
                .filter(|e| ids.contains(&e.requirement_id))
                .cloned()
                .collect())
        }

        async fn list_surveys(&self, filter: &RecordFilter) -> Result<Vec<SatisfactionSurvey>> {
            self.check()?;
            let starts = self.event_starts();
            Ok(self
                .surveys
                .lock()
                .unwrap()
                .iter()
                .filter(|s| match (filter.since, starts.get(&s.event_id)) {
                    (Some(_), Some(start)) => filter.matches_start(*start),
                    (Some(_), None) => false,
                    (None, _) => true,
                })
                .cloned()
                .collect())
        }

        async fn upsert_histories(&self, rows: &[VolunteerParticipationHistory]) -> Result<u64> {
            self.check()?;
            let mut stored = self.histories.lock().unwrap();
            for row in rows {
                stored.retain(|h| {
                    !(h.volunteer_email == row.volunteer_email && h.semester() == row.semester())
                });
                stored.push(row.clone());
            }
            Ok(rows.len() as u64)
        }

        async fn list_histories(
            &self,
            filter: &RecordFilter,
        ) -> Result<Vec<VolunteerParticipationHistory>> {
            self.check()?;
            Ok(self
                .histories
                .lock()
                .unwrap()
                .iter()
                .filter(|h| filter.matches_email(&h.volunteer_email))
                .cloned()
                .collect())
        }

        async fn upsert_satisfaction(&self, row: &SemesterSatisfaction) -> Result<()> {
            self.check()?;
            let mut stored = self.satisfaction.lock().unwrap();
            stored.retain(|s| !(s.year == row.year && s.semester == row.semester));
            stored.push(row.clone());
            Ok(())
        }

        async fn get_satisfaction(
            &self,
            key: SemesterKey,
        ) -> Result<Option<SemesterSatisfaction>> {
            self.check()?;
            Ok(self
                .satisfaction
                .lock()
                .unwrap()
                .iter()
                .find(|s| s.year == key.year && s.semester == key.number)
                .cloned())
        }
    }
}
