use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt::Write;

use chrono::NaiveDate;

use crate::models::{
    AtRiskVolunteer, DropoutReport, SemesterKey, SemesterSummary, VolunteerParticipationHistory,
};

pub fn build(histories: &[VolunteerParticipationHistory], at_risk_threshold: f64) -> DropoutReport {
    DropoutReport {
        semester_data: summarize_semesters(histories),
        at_risk_volunteers: rank_at_risk(histories, at_risk_threshold),
    }
}

pub fn summarize_semesters(histories: &[VolunteerParticipationHistory]) -> Vec<SemesterSummary> {
    #[derive(Default)]
    struct Totals<'a> {
        volunteers: HashSet<&'a str>,
        joined: i64,
        attended: i64,
        dropped: i64,
    }

    let mut by_semester: BTreeMap<SemesterKey, Totals> = BTreeMap::new();
    for history in histories {
        let totals = by_semester.entry(history.semester()).or_default();
        totals.volunteers.insert(history.volunteer_email.as_str());
        totals.joined += history.events_joined;
        totals.attended += history.events_attended;
        totals.dropped += history.events_dropped;
    }

    by_semester
        .into_iter()
        .map(|(key, totals)| {
            let volunteers = totals.volunteers.len();
            SemesterSummary {
                semester: key.to_string(),
                year: key.year,
                semester_number: key.number,
                volunteers,
                attended: totals.attended,
                dropouts: totals.dropped,
                events_per_volunteer: if volunteers == 0 {
                    0.0
                } else {
                    totals.joined as f64 / volunteers as f64
                },
            }
        })
        .collect()
}

pub fn rank_at_risk(
    histories: &[VolunteerParticipationHistory],
    threshold: f64,
) -> Vec<AtRiskVolunteer> {
    let mut latest: HashMap<&str, &VolunteerParticipationHistory> = HashMap::new();
    for history in histories {
        latest
            .entry(history.volunteer_email.as_str())
            .and_modify(|current| {
                if history.semester() > current.semester() {
                    *current = history;
                }
            })
            .or_insert(history);
    }

    let mut at_risk: Vec<AtRiskVolunteer> = latest
        .into_values()
        .filter(|h| h.events_joined > 0 && h.risk_score >= threshold)
        .map(|h| AtRiskVolunteer {
            volunteer_email: h.volunteer_email.clone(),
            volunteer_name: h.volunteer_name.clone(),
            membership_id: h.membership_id.clone(),
            semester: h.semester().to_string(),
            events_joined: h.events_joined,
            events_attended: h.events_attended,
            attendance_rate: h.attendance_rate,
            inactivity_days: h.inactivity_days,
            risk_score: h.risk_score,
            engagement_level: h.engagement_level,
        })
        .collect();

    at_risk.sort_by(|a, b| {
        b.risk_score
            .partial_cmp(&a.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.inactivity_days.cmp(&a.inactivity_days))
            .then_with(|| a.volunteer_email.cmp(&b.volunteer_email))
    });
    at_risk
}

pub fn render_markdown(report: &DropoutReport, scope: Option<&str>, as_of: NaiveDate) -> String {
    let mut output = String::new();
    let scope_label = scope.unwrap_or("all volunteers");

    let _ = writeln!(output, "# Volunteer Dropout Report");
    let _ = writeln!(output, "Generated for {} as of {}", scope_label, as_of);
    let _ = writeln!(output);
    let _ = writeln!(output, "## Semester Participation");

    if report.semester_data.is_empty() {
        let _ = writeln!(output, "No participation recorded.");
    } else {
        let _ = writeln!(
            output,
            "| Semester | Volunteers | Attended | Dropouts | Events / volunteer |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|");
        for summary in &report.semester_data {
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {:.2} |",
                summary.semester,
                summary.volunteers,
                summary.attended,
                summary.dropouts,
                summary.events_per_volunteer
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Volunteers");

    if report.at_risk_volunteers.is_empty() {
        let _ = writeln!(output, "No volunteers above the risk threshold.");
    } else {
        for volunteer in &report.at_risk_volunteers {
            let _ = writeln!(
                output,
                "- {} ({}, {}) risk {:.1} [{}]: attended {}/{} ({:.0}%), inactive {} days",
                volunteer.volunteer_name,
                volunteer.volunteer_email,
                volunteer.semester,
                volunteer.risk_score,
                volunteer.engagement_level,
                volunteer.events_attended,
                volunteer.events_joined,
                volunteer.attendance_rate * 100.0,
                volunteer.inactivity_days
            );
        }
    }

    output
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::EngagementLevel;
    use chrono::{TimeZone, Utc};

    pub(crate) fn history(
        email: &str,
        semester: SemesterKey,
        joined: i64,
        attended: i64,
        risk_score: f64,
        inactivity_days: i64,
    ) -> VolunteerParticipationHistory {
        let at = Utc.with_ymd_and_hms(2025, 1, 15, 9, 30, 0).unwrap();
        VolunteerParticipationHistory {
            volunteer_email: email.to_string(),
            volunteer_name: email.split('@').next().unwrap_or_default().to_string(),
            membership_id: None,
            semester_year: semester.year,
            semester_number: semester.number,
            events_joined: joined,
            events_attended: attended,
            events_dropped: joined - attended,
            attendance_rate: if joined > 0 { attended as f64 / joined as f64 } else { 0.0 },
            first_event_date: None,
            last_event_date: None,
            days_active_in_semester: 0,
            participation_consistency: 0.0,
            risk_score,
            inactivity_days,
            engagement_level: if risk_score >= 66.0 {
                EngagementLevel::High
            } else if risk_score >= 33.0 {
                EngagementLevel::Medium
            } else {
                EngagementLevel::Low
            },
            calculated_at: at,
            last_updated: at,
        }
    }

    #[test]
    fn semesters_are_chronological_with_totals() {
        let histories = vec![
            history("avery@example.org", SemesterKey::new(2024, 2), 4, 3, 20.0, 5),
            history("avery@example.org", SemesterKey::new(2024, 1), 10, 7, 30.0, 40),
            history("jules@example.org", SemesterKey::new(2024, 1), 5, 0, 95.0, 200),
        ];

        let semesters = summarize_semesters(&histories);
        assert_eq!(semesters.len(), 2);
        assert_eq!(semesters[0].semester, "2024-1");
        assert_eq!(semesters[0].volunteers, 2);
        assert_eq!(semesters[0].attended, 7);
        assert_eq!(semesters[0].dropouts, 8);
        assert!((semesters[0].events_per_volunteer - 7.5).abs() < 1e-9);
        assert_eq!(semesters[1].semester, "2024-2");
        assert_eq!(semesters[1].volunteers, 1);
    }

    #[test]
    fn at_risk_uses_latest_semester_only() {
        let histories = vec![
            history("avery@example.org", SemesterKey::new(2024, 1), 5, 0, 90.0, 120),
            history("avery@example.org", SemesterKey::new(2024, 2), 4, 4, 10.0, 3),
        ];
        assert!(rank_at_risk(&histories, 33.0).is_empty());
    }

    #[test]
    fn at_risk_sorted_by_risk_then_inactivity() {
        let histories = vec![
            history("a@example.org", SemesterKey::new(2024, 1), 5, 2, 50.0, 10),
            history("b@example.org", SemesterKey::new(2024, 1), 5, 0, 90.0, 100),
            history("c@example.org", SemesterKey::new(2024, 1), 5, 2, 50.0, 60),
            history("d@example.org", SemesterKey::new(2024, 1), 5, 5, 12.0, 1),
        ];

        let ranked = rank_at_risk(&histories, 33.0);
        let emails: Vec<&str> = ranked.iter().map(|v| v.volunteer_email.as_str()).collect();
        assert_eq!(emails, vec!["b@example.org", "c@example.org", "a@example.org"]);
        assert_eq!(ranked[0].engagement_level, EngagementLevel::High);
    }

    #[test]
    fn zero_joined_never_at_risk() {
        let histories = vec![history("z@example.org", SemesterKey::new(2024, 1), 0, 0, 100.0, 400)];
        assert!(rank_at_risk(&histories, 0.0).is_empty());
    }

    #[test]
    fn markdown_lists_semesters_and_risks() {
        let histories = vec![history("jules@example.org", SemesterKey::new(2024, 1), 5, 0, 95.0, 200)];
        let report = build(&histories, 33.0);
        let text = render_markdown(
            &report,
            Some("jules@example.org"),
            NaiveDate::from_ymd_opt(2025, 2, 1).unwrap(),
        );

        assert!(text.starts_with("# Volunteer Dropout Report\n"));
        assert!(text.contains("| 2024-1 | 1 | 0 | 5 | 5.00 |"));
        assert!(text.contains("- jules (jules@example.org, 2024-1) risk 95.0 [high]"));
        assert!(text.contains("inactive 200 days"));
    }

    #[test]
    fn markdown_handles_empty_report() {
        let report = build(&[], 33.0);
        let text = render_markdown(&report, None, NaiveDate::from_ymd_opt(2025, 2, 1).unwrap());
        assert!(text.contains("Generated for all volunteers as of 2025-02-01"));
        assert!(text.contains("No participation recorded."));
        assert!(text.contains("No volunteers above the risk threshold."));
    }
}
