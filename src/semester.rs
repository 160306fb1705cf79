use chrono::{Datelike, Duration, NaiveDate};

use crate::config::CalendarConfig;
use crate::error::{AnalyticsError, Result};
use crate::models::SemesterKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Term {
    number: u8,
    /// Months after the academic-year start month
    start_offset: u32,
    months: u32,
}

/// The academic year is the calendar year in which its first term starts.
#[derive(Debug, Clone)]
pub struct SemesterCalendar {
    first_year: i32,
    last_year: i32,
    start_month: u32,
    terms: Vec<Term>,
}

impl SemesterCalendar {
    pub fn new(config: &CalendarConfig) -> Result<Self> {
        if config.terms.is_empty() {
            return Err(AnalyticsError::Config(
                "calendar needs at least one term".to_string(),
            ));
        }
        if config.first_year > config.last_year {
            return Err(AnalyticsError::Config(format!(
                "calendar span {}..={} is empty",
                config.first_year, config.last_year
            )));
        }

        let start_month = config.terms[0].start_month;
        let mut expected_offset = 0u32;
        let mut previous_number: Option<u8> = None;
        let mut terms = Vec::with_capacity(config.terms.len());

        for term in &config.terms {
            if !(1..=12).contains(&term.start_month) || !(1..=12).contains(&term.end_month) {
                return Err(AnalyticsError::Config(format!(
                    "semester {} has a month outside 1..=12",
                    term.number
                )));
            }
            if previous_number.is_some_and(|previous| term.number <= previous) {
                return Err(AnalyticsError::Config(format!(
                    "semester numbers must increase in calendar order (found {} after {})",
                    term.number,
                    previous_number.unwrap_or_default()
                )));
            }

            let start_offset = (term.start_month + 12 - start_month) % 12;
            if start_offset != expected_offset || expected_offset >= 12 {
                return Err(AnalyticsError::Config(format!(
                    "semester {} starts in month {} but the previous term ends before month {}",
                    term.number,
                    term.start_month,
                    (start_month - 1 + expected_offset) % 12 + 1
                )));
            }

            let months = (term.end_month + 12 - term.start_month) % 12 + 1;
            terms.push(Term {
                number: term.number,
                start_offset,
                months,
            });
            expected_offset += months;
            previous_number = Some(term.number);
        }

        if expected_offset != 12 {
            return Err(AnalyticsError::Config(format!(
                "semester table covers {expected_offset} months, expected exactly 12"
            )));
        }

        Ok(Self {
            first_year: config.first_year,
            last_year: config.last_year,
            start_month,
            terms,
        })
    }

    pub fn resolve(&self, date: NaiveDate) -> Result<SemesterKey> {
        let month = date.month();
        let year = if month >= self.start_month {
            date.year()
        } else {
            date.year() - 1
        };
        if year < self.first_year || year > self.last_year {
            return Err(AnalyticsError::DateOutOfRange {
                date,
                first_year: self.first_year,
                last_year: self.last_year,
            });
        }

        let offset = (month + 12 - self.start_month) % 12;
        self.terms
            .iter()
            .find(|term| offset >= term.start_offset && offset < term.start_offset + term.months)
            .map(|term| SemesterKey::new(year, term.number))
            .ok_or_else(|| AnalyticsError::Config(format!("no semester covers month {month}")))
    }

    /// First and last day (inclusive) of a semester.
    pub fn bounds(&self, key: SemesterKey) -> Result<(NaiveDate, NaiveDate)> {
        let term = self
            .terms
            .iter()
            .find(|term| term.number == key.number)
            .ok_or_else(|| {
                AnalyticsError::Config(format!("unknown semester number {}", key.number))
            })?;

        let start = self.month_start(key.year, term.start_offset)?;
        let next = self.month_start(key.year, term.start_offset + term.months)?;
        Ok((start, next - Duration::days(1)))
    }

    pub fn length_days(&self, key: SemesterKey) -> Result<i64> {
        let (start, end) = self.bounds(key)?;
        Ok((end - start).num_days() + 1)
    }

    fn month_start(&self, academic_year: i32, offset: u32) -> Result<NaiveDate> {
        let zero_based = self.start_month - 1 + offset;
        let year = academic_year + (zero_based / 12) as i32;
        let month = zero_based % 12 + 1;
        NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(|| {
            AnalyticsError::Config(format!("invalid calendar month {year}-{month}"))
        })
    }
}
