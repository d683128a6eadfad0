use crate::config::schema::parse_time_of_day;
use crate::errors::{AutosignError, AutosignResult};
use chrono::{DateTime, Days, NaiveTime, TimeDelta, TimeZone};
use chrono_tz::Tz;
use std::time::Duration;
use tracing::{debug, warn};

/// Normalize a cron expression to 6+ fields (prepend "0 " for seconds if 5-field),
/// then check that it parses.
pub fn validate_cron_expr(expr: &str) -> AutosignResult<String> {
    let normalized = if expr.split_whitespace().count() == 5 {
        format!("0 {}", expr.trim())
    } else {
        expr.trim().to_string()
    };
    normalized.parse::<cron::Schedule>().map_err(|e| {
        AutosignError::Config(format!("invalid cron expression '{}': {}", expr, e))
    })?;
    Ok(normalized)
}

pub fn parse_timezone(name: &str) -> AutosignResult<Tz> {
    name.parse::<Tz>()
        .map_err(|_| AutosignError::Config(format!("unknown timezone '{}'", name)))
}

/// Configured zone, else the system zone, else UTC.
pub fn resolve_timezone(configured: Option<&str>) -> AutosignResult<Tz> {
    if let Some(name) = configured {
        return parse_timezone(name);
    }
    match iana_time_zone::get_timezone() {
        Ok(name) => Ok(name.parse::<Tz>().unwrap_or_else(|_| {
            warn!("system timezone '{}' not recognized, using UTC", name);
            Tz::UTC
        })),
        Err(e) => {
            debug!("could not detect system timezone ({}), using UTC", e);
            Ok(Tz::UTC)
        }
    }
}

/// When a sign task fires.
#[derive(Debug, Clone)]
pub enum Schedule {
    /// Once a day at a local time.
    Daily(NaiveTime),
    Cron {
        expr: String,
        schedule: Box<cron::Schedule>,
    },
}

impl Schedule {
    /// `HH:MM[:SS]` gives a daily schedule; anything else must be a cron expression.
    pub fn parse(sign_at: &str) -> AutosignResult<Self> {
        if let Some(time) = parse_time_of_day(sign_at) {
            return Ok(Self::Daily(time));
        }
        let expr = validate_cron_expr(sign_at).map_err(|_| {
            AutosignError::Config(format!(
                "sign_at '{}' is neither a time of day nor a cron expression",
                sign_at
            ))
        })?;
        let schedule = expr
            .parse::<cron::Schedule>()
            .map_err(|e| AutosignError::Config(e.to_string()))?;
        Ok(Self::Cron {
            expr,
            schedule: Box::new(schedule),
        })
    }

    /// The next firing after `now`, without jitter.
    ///
    /// A daily schedule fires tomorrow: the current day is handled by the run that
    /// asks for the next one.
    pub fn next_occurrence(&self, now: &DateTime<Tz>) -> AutosignResult<DateTime<Tz>> {
        match self {
            Self::Daily(time) => {
                let tz = now.timezone();
                let day = now
                    .date_naive()
                    .checked_add_days(Days::new(1))
                    .ok_or_else(|| AutosignError::Config("date out of range".into()))?;
                let local = day.and_time(*time);
                tz.from_local_datetime(&local)
                    .earliest()
                    // Local time skipped by a DST jump.
                    .or_else(|| {
                        tz.from_local_datetime(&(local + TimeDelta::hours(1)))
                            .earliest()
                    })
                    .ok_or_else(|| {
                        AutosignError::Config(format!("{} does not exist in {}", local, tz))
                    })
            }
            Self::Cron { expr, schedule } => schedule.after(now).next().ok_or_else(|| {
                AutosignError::Config(format!("cron expression '{}' never fires again", expr))
            }),
        }
    }

    /// Next firing plus a uniform random delay of `0..=jitter_secs` seconds.
    pub fn next_run(&self, now: &DateTime<Tz>, jitter_secs: u64) -> AutosignResult<DateTime<Tz>> {
        let base = self.next_occurrence(now)?;
        let jitter = fastrand::u64(0..=jitter_secs);
        i64::try_from(jitter)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|delay| base.checked_add_signed(delay))
            .ok_or_else(|| {
                AutosignError::Config(format!("random delay of {}s is out of range", jitter))
            })
    }
}

/// Wall-clock distance from `now` to `at`, zero if `at` has passed.
pub fn until(now: &DateTime<Tz>, at: &DateTime<Tz>) -> Duration {
    (*at - *now).to_std().unwrap_or(Duration::ZERO)
}
