use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScheduleError;

/// How often a schedule-triggered workflow fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleFrequency {
    /// Every hour at `minute`.
    Hourly,
    Daily,
    /// Monday through Friday.
    Weekdays,
    /// On each day listed in `days`.
    Weekly,
    /// On `dayOfMonth` each month.
    Monthly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleDay {
    Sunday,
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
}

impl ScheduleDay {
    /// Cron day-of-week number (Sunday = 0).
    fn cron_number(self) -> u8 {
        match self {
            Self::Sunday => 0,
            Self::Monday => 1,
            Self::Tuesday => 2,
            Self::Wednesday => 3,
            Self::Thursday => 4,
            Self::Friday => 5,
            Self::Saturday => 6,
        }
    }
}

/// Records a schedule fans out over: each fire starts one run per record,
/// with the record as the run payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScheduleRecords {
    /// Licenses expiring within `withinDays` of the fire date.
    LicenseExpirations {
        #[serde(rename = "withinDays")]
        within_days: u32,
    },
}

/// Frequency/day/time specification of a schedule trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSpec {
    pub frequency: ScheduleFrequency,
    /// Local time of day as `HH:MM`. Ignored for hourly schedules.
    #[serde(default = "default_time")]
    pub time: String,
    /// IANA timezone the time of day is interpreted in.
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub days: Vec<ScheduleDay>,
    #[serde(default)]
    pub day_of_month: Option<u32>,
    /// Minute past the hour for hourly schedules.
    #[serde(default)]
    pub minute: u32,
    /// Fan each fire out over these records instead of one run per fire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub for_each: Option<ScheduleRecords>,
}

fn default_time() -> String {
    "09:00".to_owned()
}

fn default_timezone() -> String {
    "UTC".to_owned()
}

impl ScheduleSpec {
    /// A daily schedule at `time` (`HH:MM`) in UTC.
    #[must_use]
    pub fn daily(time: impl Into<String>) -> Self {
        Self {
            frequency: ScheduleFrequency::Daily,
            time: time.into(),
            timezone: default_timezone(),
            days: Vec::new(),
            day_of_month: None,
            minute: 0,
            for_each: None,
        }
    }

    #[must_use]
    pub fn in_timezone(mut self, tz: impl Into<String>) -> Self {
        self.timezone = tz.into();
        self
    }

    #[must_use]
    pub fn for_each(mut self, records: ScheduleRecords) -> Self {
        self.for_each = Some(records);
        self
    }

    /// Translate to a standard 5-field cron expression.
    pub fn to_cron(&self) -> Result<String, ScheduleError> {
        let time = NaiveTime::parse_from_str(&self.time, "%H:%M")
            .map_err(|_| ScheduleError::InvalidTime(self.time.clone()))?;
        let (h, m) = (time.hour(), time.minute());

        let expr = match self.frequency {
            ScheduleFrequency::Hourly => {
                if self.minute > 59 {
                    return Err(ScheduleError::InvalidTime(format!("minute {}", self.minute)));
                }
                format!("{} * * * *", self.minute)
            }
            ScheduleFrequency::Daily => format!("{m} {h} * * *"),
            ScheduleFrequency::Weekdays => format!("{m} {h} * * 1-5"),
            ScheduleFrequency::Weekly => {
                if self.days.is_empty() {
                    return Err(ScheduleError::MissingDays);
                }
                let mut days: Vec<u8> = self.days.iter().map(|d| d.cron_number()).collect();
                days.sort_unstable();
                days.dedup();
                let days: Vec<String> = days.iter().map(ToString::to_string).collect();
                format!("{m} {h} * * {}", days.join(","))
            }
            ScheduleFrequency::Monthly => {
                let dom = self.day_of_month.unwrap_or(1);
                if !(1..=31).contains(&dom) {
                    return Err(ScheduleError::InvalidDayOfMonth(dom));
                }
                format!("{m} {h} {dom} * *")
            }
        };
        Ok(expr)
    }

    /// Validate and compile into an evaluable schedule.
    pub fn compile(&self) -> Result<CompiledSchedule, ScheduleError> {
        let expression = self.to_cron()?;
        let cron = croner::Cron::new(&expression)
            .parse()
            .map_err(|e| ScheduleError::InvalidExpression(format!("{e}")))?;
        let tz = self
            .timezone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(self.timezone.clone()))?;
        Ok(CompiledSchedule {
            expression,
            cron,
            tz,
        })
    }
}

/// A parsed cron expression bound to a timezone.
pub struct CompiledSchedule {
    expression: String,
    cron: croner::Cron,
    tz: chrono_tz::Tz,
}

impl fmt::Debug for CompiledSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchedule")
            .field("expression", &self.expression)
            .field("tz", &self.tz)
            .finish_non_exhaustive()
    }
}

impl CompiledSchedule {
    #[must_use]
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// First fire time strictly after `after`.
    #[must_use]
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let after_tz = after.with_timezone(&self.tz);
        self.cron
            .find_next_occurrence(&after_tz, false)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// The calendar date of `at` in the schedule's timezone.
    #[must_use]
    pub fn local_date(&self, at: &DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    /// The fire time inside `(tick - window, tick]`, if any.
    ///
    /// A tick source running every `window` therefore matches each fire time
    /// exactly once.
    #[must_use]
    pub fn fire_within(
        &self,
        tick: &DateTime<Utc>,
        window: chrono::Duration,
    ) -> Option<DateTime<Utc>> {
        let start = *tick - window;
        self.next_after(&start).filter(|fire| fire <= tick)
    }
}
