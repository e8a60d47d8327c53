//! Reduced cron grammar
//!
//! The scheduler understands four schedule forms:
//! - `"immediate"` - run once, now
//! - `"daily"` - next 02:00 UTC
//! - `"hourly"` - next top of the hour
//! - `"*/N * * * *"` - next N-minute boundary
//!
//! Anything else falls back to "in one hour". A full cron parser is
//! deliberately out of scope; the `scheduled_tasks` checkpoint rows carry
//! full cron strings for external runners.

use chrono::{DateTime, Duration, Timelike, Utc};

pub const IMMEDIATE: &str = "immediate";

/// Next run time for a schedule, relative to `now`
pub fn next_run(schedule: &str, now: DateTime<Utc>) -> DateTime<Utc> {
    match schedule {
        IMMEDIATE => now,
        "daily" => {
            let today_2am = truncate_to_hour(now)
                .with_hour(2)
                .expect("hour 2 is always valid");
            if today_2am <= now {
                today_2am + Duration::days(1)
            } else {
                today_2am
            }
        }
        "hourly" => {
            let top_of_hour = truncate_to_hour(now);
            if top_of_hour <= now {
                top_of_hour + Duration::hours(1)
            } else {
                top_of_hour
            }
        }
        other => match parse_minute_interval(other) {
            Some(interval) => {
                let base = truncate_to_minute(now);
                let next_minute = (u64::from(base.minute()) / interval + 1) * interval;
                if next_minute >= 60 {
                    truncate_to_hour(now) + Duration::hours(1)
                } else {
                    base.with_minute(next_minute as u32)
                        .expect("minute < 60 is always valid")
                }
            }
            None => now + Duration::hours(1),
        },
    }
}

/// Parse the `*/N * * * *` form; None for anything else
fn parse_minute_interval(schedule: &str) -> Option<u64> {
    let first = schedule.split_whitespace().next()?;
    let interval: u64 = first.strip_prefix("*/")?.parse().ok()?;
    if interval == 0 || interval > 59 {
        return None;
    }
    Some(interval)
}

fn truncate_to_minute(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.with_second(0)
        .and_then(|t| t.with_nanosecond(0))
        .expect("zeroed subminute fields are always valid")
}

fn truncate_to_hour(ts: DateTime<Utc>) -> DateTime<Utc> {
    truncate_to_minute(ts)
        .with_minute(0)
        .expect("zeroed minute is always valid")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32, second: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, hour, minute, second).unwrap()
    }

    #[test]
    fn test_immediate_is_now() {
        let now = at(10, 30, 45);
        assert_eq!(next_run(IMMEDIATE, now), now);
    }

    #[test]
    fn test_daily_before_2am_runs_same_day() {
        let now = at(1, 15, 0);
        assert_eq!(next_run("daily", now), at(2, 0, 0));
    }

    #[test]
    fn test_daily_after_2am_runs_next_day() {
        let now = at(9, 0, 0);
        let next = next_run("daily", now);
        assert_eq!(next, at(2, 0, 0) + Duration::days(1));
    }

    #[test]
    fn test_hourly_advances_to_next_top_of_hour() {
        assert_eq!(next_run("hourly", at(10, 30, 45)), at(11, 0, 0));
        // Exactly on the boundary still advances
        assert_eq!(next_run("hourly", at(10, 0, 0)), at(11, 0, 0));
    }

    #[test]
    fn test_minute_interval_advances_to_next_boundary() {
        assert_eq!(next_run("*/5 * * * *", at(10, 12, 30)), at(10, 15, 0));
        assert_eq!(next_run("*/15 * * * *", at(10, 15, 0)), at(10, 30, 0));
    }

    #[test]
    fn test_minute_interval_rolls_over_hour() {
        assert_eq!(next_run("*/30 * * * *", at(10, 45, 0)), at(11, 0, 0));
        assert_eq!(next_run("*/5 * * * *", at(10, 58, 0)), at(11, 0, 0));
    }

    #[test]
    fn test_unknown_schedule_falls_back_to_one_hour() {
        let now = at(10, 30, 0);
        assert_eq!(next_run("0 9 * * 1", now), now + Duration::hours(1));
        assert_eq!(next_run("weekly", now), now + Duration::hours(1));
        // A zero or oversized interval is not a valid schedule
        assert_eq!(next_run("*/0 * * * *", now), now + Duration::hours(1));
        assert_eq!(next_run("*/90 * * * *", now), now + Duration::hours(1));
    }

    #[test]
    fn test_next_run_is_never_in_the_past() {
        let now = at(23, 59, 59);
        for schedule in ["daily", "hourly", "*/5 * * * *", "unknown"] {
            assert!(next_run(schedule, now) > now, "schedule {}", schedule);
        }
    }
}
