use std::collections::{BTreeMap, HashMap};

use tracing::warn;
use uuid::Uuid;

use crate::error::{AnalyticsError, AnalyticsWarning};
use crate::models::{Evaluation, Event, RawCounts, Requirement, SemesterKey};
use crate::semester::SemesterCalendar;

pub type BucketKey = (String, SemesterKey);

#[derive(Debug, Default)]
pub struct Aggregation {
    pub buckets: BTreeMap<BucketKey, RawCounts>,
    pub warnings: Vec<AnalyticsWarning>,
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub fn aggregate(
    calendar: &SemesterCalendar,
    events: &[Event],
    requirements: &[Requirement],
    evaluations: &[Evaluation],
) -> Aggregation {
    let events_by_id: HashMap<Uuid, &Event> = events.iter().map(|e| (e.id, e)).collect();
    let mut evaluations_by_requirement: HashMap<Uuid, Vec<&Evaluation>> = HashMap::new();
    for evaluation in evaluations {
        evaluations_by_requirement
            .entry(evaluation.requirement_id)
            .or_default()
            .push(evaluation);
    }

    let mut aggregation = Aggregation::default();

    for requirement in requirements {
        let subject = format!("requirement {}", requirement.id);

        let Some(event) = events_by_id.get(&requirement.event_id) else {
            let err = AnalyticsError::DataIntegrity(format!(
                "event {} referenced by {} ({}) does not exist",
                requirement.event_id, subject, requirement.volunteer_email
            ));
            warn!("{err}");
            aggregation
                .warnings
                .push(AnalyticsWarning::from_error(subject, &err));
            continue;
        };

        let semester = match calendar.resolve(event.duration_start) {
            Ok(semester) => semester,
            Err(err) => {
                warn!("skipping {subject}: {err}");
                aggregation
                    .warnings
                    .push(AnalyticsWarning::from_error(subject, &err));
                continue;
            }
        };

        let matching = evaluations_by_requirement
            .get(&requirement.id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        if matching.len() > 1 {
            let err = AnalyticsError::DataIntegrity(format!(
                "{} evaluations recorded for {subject}",
                matching.len()
            ));
            warn!("{err}");
            aggregation
                .warnings
                .push(AnalyticsWarning::from_error(subject.clone(), &err));
        }
        let attended = matching.iter().any(|e| e.counts_as_attendance());

        let date = event.duration_start;
        let counts = aggregation
            .buckets
            .entry((normalize_email(&requirement.volunteer_email), semester))
            .or_insert_with(|| RawCounts {
                semester,
                joined: 0,
                attended: 0,
                first_date: None,
                last_date: None,
                attended_dates: Vec::new(),
            });

        counts.joined += 1;
        counts.first_date = Some(counts.first_date.map_or(date, |d| d.min(date)));
        counts.last_date = Some(counts.last_date.map_or(date, |d| d.max(date)));
        if attended {
            counts.attended += 1;
            counts.attended_dates.push(date);
        }
    }

    for counts in aggregation.buckets.values_mut() {
        counts.attended_dates.sort();
    }

    aggregation
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::CalendarConfig;
    use crate::models::{EventStatus, EventType};
    use chrono::NaiveDate;
    use serde_json::json;

    pub(crate) fn event_on(date: NaiveDate) -> Event {
        Event {
            id: Uuid::new_v4(),
            title: format!("Outreach {date}"),
            event_type: EventType::Internal,
            status: EventStatus::Closed,
            duration_start: date,
            duration_end: date,
        }
    }

    pub(crate) fn requirement(event: &Event, email: &str) -> Requirement {
        Requirement {
            id: Uuid::new_v4(),
            event_id: event.id,
            volunteer_email: email.to_string(),
            accepted: true,
        }
    }

    pub(crate) fn evaluation(requirement: &Requirement, finalized: bool) -> Evaluation {
        Evaluation {
            id: Uuid::new_v4(),
            requirement_id: requirement.id,
            criteria: json!({"teamwork": 5, "punctuality": 4}),
            finalized,
            comment: Some("Helped with intake".to_string()),
            recommendations: None,
        }
    }

    fn calendar() -> SemesterCalendar {
        SemesterCalendar::new(&CalendarConfig::default()).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn counts_joined_and_attended_per_semester() {
        let fall = [date(2024, 9, 2), date(2024, 10, 7), date(2024, 11, 4)];
        let spring = date(2025, 2, 10);
        let mut events: Vec<Event> = fall.iter().map(|d| event_on(*d)).collect();
        events.push(event_on(spring));

        let requirements: Vec<Requirement> = events
            .iter()
            .map(|e| requirement(e, "avery@example.org"))
            .collect();
        let evaluations = vec![
            evaluation(&requirements[0], true),
            evaluation(&requirements[2], true),
            evaluation(&requirements[3], true),
        ];

        let result = aggregate(&calendar(), &events, &requirements, &evaluations);
        assert!(result.warnings.is_empty());
        assert_eq!(result.buckets.len(), 2);

        let fall_counts = &result.buckets[&("avery@example.org".to_string(), SemesterKey::new(2024, 1))];
        assert_eq!(fall_counts.joined, 3);
        assert_eq!(fall_counts.attended, 2);
        assert_eq!(fall_counts.first_date, Some(fall[0]));
        assert_eq!(fall_counts.last_date, Some(fall[2]));
        assert_eq!(fall_counts.attended_dates, vec![fall[0], fall[2]]);

        let spring_counts = &result.buckets[&("avery@example.org".to_string(), SemesterKey::new(2024, 2))];
        assert_eq!(spring_counts.joined, 1);
        assert_eq!(spring_counts.attended, 1);
    }

    #[test]
    fn unfinalized_evaluation_is_a_drop() {
        let event = event_on(date(2024, 9, 2));
        let req = requirement(&event, "jules@example.org");
        let eval = evaluation(&req, false);

        let result = aggregate(&calendar(), &[event], &[req], &[eval]);
        let counts = result.buckets.values().next().unwrap();
        assert_eq!(counts.joined, 1);
        assert_eq!(counts.attended, 0);
        assert!(counts.attended_dates.is_empty());
    }

    #[test]
    fn empty_criteria_is_not_attendance() {
        let event = event_on(date(2024, 9, 2));
        let req = requirement(&event, "jules@example.org");
        let mut eval = evaluation(&req, true);
        eval.criteria = json!({});

        let result = aggregate(&calendar(), &[event], &[req], &[eval]);
        assert_eq!(result.buckets.values().next().unwrap().attended, 0);
    }

    #[test]
    fn orphaned_requirement_is_skipped_with_warning() {
        let kept = event_on(date(2024, 9, 2));
        let deleted = event_on(date(2024, 9, 9));
        let ok = requirement(&kept, "kiara@example.org");
        let orphan = requirement(&deleted, "kiara@example.org");
        let other = requirement(&kept, "avery@example.org");

        let result = aggregate(&calendar(), &[kept], &[ok, orphan.clone(), other], &[]);
        assert_eq!(result.buckets.len(), 2);
        assert_eq!(result.warnings.len(), 1);
        assert_eq!(result.warnings[0].kind, "DataIntegrityError");
        assert_eq!(result.warnings[0].subject, format!("requirement {}", orphan.id));
        assert!(result.buckets.values().all(|c| c.joined == 1));
    }

    #[test]
    fn out_of_span_event_is_skipped_with_warning() {
        let calendar = SemesterCalendar::new(&CalendarConfig {
            first_year: 2023,
            last_year: 2025,
            ..CalendarConfig::default()
        })
        .unwrap();
        let old = event_on(date(2010, 9, 1));
        let req = requirement(&old, "avery@example.org");

        let result = aggregate(&calendar, &[old], &[req], &[]);
        assert!(result.buckets.is_empty());
        assert_eq!(result.warnings[0].kind, "DateOutOfRangeError");
    }

    #[test]
    fn duplicate_sign_ups_are_not_deduplicated() {
        let event = event_on(date(2024, 9, 2));
        let first = requirement(&event, "avery@example.org");
        let second = requirement(&event, "avery@example.org");

        let result = aggregate(&calendar(), &[event], &[first, second], &[]);
        assert_eq!(result.buckets.values().next().unwrap().joined, 2);
    }

    #[test]
    fn email_case_and_whitespace_share_a_bucket() {
        let first = event_on(date(2024, 9, 2));
        let second = event_on(date(2024, 9, 16));
        let requirements = vec![
            requirement(&first, "avery@example.org"),
            requirement(&second, " Avery@Example.ORG "),
        ];

        let result = aggregate(&calendar(), &[first, second], &requirements, &[]);
        assert_eq!(result.buckets.len(), 1);
        let (key, counts) = result.buckets.iter().next().unwrap();
        assert_eq!(key.0, "avery@example.org");
        assert_eq!(counts.joined, 2);
    }

    #[test]
    fn duplicate_evaluations_warn_but_still_count_once() {
        let event = event_on(date(2024, 9, 2));
        let req = requirement(&event, "avery@example.org");
        let evaluations = vec![evaluation(&req, false), evaluation(&req, true)];

        let result = aggregate(&calendar(), &[event], &[req], &evaluations);
        let counts = result.buckets.values().next().unwrap();
        assert_eq!(counts.attended, 1);
        assert_eq!(result.warnings.len(), 1);
    }
}
