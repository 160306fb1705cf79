use chrono::NaiveDate;

use crate::config::RiskConfig;
use crate::error::{AnalyticsError, Result};
use crate::models::{EngagementLevel, Metrics, RawCounts};
use crate::semester::SemesterCalendar;

pub struct Scorer<'a> {
    policy: &'a RiskConfig,
    calendar: &'a SemesterCalendar,
}

impl<'a> Scorer<'a> {
    pub fn new(policy: &'a RiskConfig, calendar: &'a SemesterCalendar) -> Self {
        Self { policy, calendar }
    }

    pub fn score(&self, counts: &RawCounts, as_of: NaiveDate) -> Result<Metrics> {
        validate_counts(counts)?;

        if counts.joined == 0 {
            return Ok(Metrics {
                attendance_rate: 0.0,
                participation_consistency: 0.0,
                days_active_in_semester: 0,
                risk_score: 0.0,
                engagement_level: EngagementLevel::Low,
                inactivity_days: 0,
            });
        }

        let (first, last) = match (counts.first_date, counts.last_date) {
            (Some(first), Some(last)) => (first, last),
            _ => {
                return Err(AnalyticsError::DataIntegrity(format!(
                    "{} joined events in {} but no event dates",
                    counts.joined, counts.semester
                )))
            }
        };

        let attendance_rate = counts.attended as f64 / counts.joined as f64;
        let inactivity_days = (as_of - last).num_days().max(0);
        let semester_days = self.calendar.length_days(counts.semester)?;
        let participation_consistency = consistency(&counts.attended_dates, semester_days);
        let days_active_in_semester = (last - first).num_days();

        let inactivity_ratio =
            (inactivity_days as f64 / self.policy.inactivity_horizon_days as f64).min(1.0);
        let raw = self.policy.attendance_weight * (1.0 - attendance_rate)
            + self.policy.inactivity_weight * inactivity_ratio
            + self.policy.consistency_weight * (1.0 - participation_consistency);
        let risk_score = (100.0 * raw).clamp(0.0, 100.0);

        Ok(Metrics {
            attendance_rate,
            participation_consistency,
            days_active_in_semester,
            risk_score,
            engagement_level: self.tier(risk_score),
            inactivity_days,
        })
    }

    pub fn tier(&self, risk_score: f64) -> EngagementLevel {
        if risk_score >= self.policy.high_threshold {
            EngagementLevel::High
        } else if risk_score >= self.policy.medium_threshold {
            EngagementLevel::Medium
        } else {
            EngagementLevel::Low
        }
    }
}

fn validate_counts(counts: &RawCounts) -> Result<()> {
    if counts.joined < 0 || counts.attended < 0 {
        return Err(AnalyticsError::DataIntegrity(format!(
            "negative counts in {} (joined {}, attended {})",
            counts.semester, counts.joined, counts.attended
        )));
    }
    if counts.attended > counts.joined {
        return Err(AnalyticsError::DataIntegrity(format!(
            "attended {} exceeds joined {} in {}",
            counts.attended, counts.joined, counts.semester
        )));
    }
    if counts.attended_dates.len() as i64 != counts.attended {
        return Err(AnalyticsError::DataIntegrity(format!(
            "{} attended dates recorded for {} attended events in {}",
            counts.attended_dates.len(),
            counts.attended,
            counts.semester
        )));
    }
    if let (Some(first), Some(last)) = (counts.first_date, counts.last_date) {
        if first > last {
            return Err(AnalyticsError::DataIntegrity(format!(
                "first event {first} is after last event {last} in {}",
                counts.semester
            )));
        }
    }
    Ok(())
}

pub fn consistency(attended_dates: &[NaiveDate], semester_days: i64) -> f64 {
    if attended_dates.len() < 2 || semester_days <= 0 {
        return 0.0;
    }

    let mut sorted = attended_dates.to_vec();
    sorted.sort();
    let gaps: Vec<f64> = sorted
        .windows(2)
        .map(|pair| (pair[1] - pair[0]).num_days() as f64)
        .collect();

    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|gap| (gap - mean).powi(2)).sum::<f64>() / gaps.len() as f64;

    (1.0 - variance.sqrt() / semester_days as f64).clamp(0.0, 1.0)
}
