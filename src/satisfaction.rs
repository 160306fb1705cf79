use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use crate::models::{Event, Respondent, SatisfactionSurvey, SemesterKey, SemesterSatisfaction};
use crate::semester::SemesterCalendar;

const TOP_ISSUE_LIMIT: usize = 5;

pub fn summarize(
    calendar: &SemesterCalendar,
    semester: SemesterKey,
    events: &[Event],
    surveys: &[SatisfactionSurvey],
    now: DateTime<Utc>,
) -> SemesterSatisfaction {
    let events_by_id: HashMap<Uuid, &Event> = events.iter().map(|e| (e.id, e)).collect();

    let mut all = Vec::new();
    let mut volunteers = Vec::new();
    let mut beneficiaries = Vec::new();
    let mut event_ids = BTreeSet::new();
    let mut issues: HashMap<String, usize> = HashMap::new();

    for survey in surveys {
        let Some(event) = events_by_id.get(&survey.event_id) else {
            debug!("survey {} has no event {}", survey.id, survey.event_id);
            continue;
        };

        match calendar.resolve(event.duration_start) {
            Ok(key) if key == semester => {}
            Ok(_) => continue,
            Err(err) => {
                debug!("survey {} not bucketed: {err}", survey.id);
                continue;
            }
        }

        all.push(survey.rating);
        match survey.respondent {
            Respondent::Volunteer => volunteers.push(survey.rating),
            Respondent::Beneficiary => beneficiaries.push(survey.rating),
        }
        event_ids.insert(survey.event_id);
        for issue in &survey.issues {
            let tag = issue.trim().to_lowercase();
            if !tag.is_empty() {
                *issues.entry(tag).or_default() += 1;
            }
        }
    }

    let mut ranked: Vec<(String, usize)> = issues.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    SemesterSatisfaction {
        year: semester.year,
        semester: semester.number,
        overall: mean(&all),
        volunteers: mean(&volunteers),
        beneficiaries: mean(&beneficiaries),
        total_evaluations: all.len() as i64,
        event_ids: event_ids.into_iter().collect(),
        top_issues: ranked
            .into_iter()
            .take(TOP_ISSUE_LIMIT)
            .map(|(tag, _)| tag)
            .collect(),
        updated_at: now,
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
