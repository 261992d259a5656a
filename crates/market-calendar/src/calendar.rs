use std::collections::BTreeSet;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;

use crate::holidays::nyse_holidays;

/// Upper bound on the day-by-day walk when searching for a neighbouring session.
const MAX_WALK_DAYS: u32 = 10;

/// Regular-session calendar for a single exchange.
///
/// All decisions are made in the exchange's own timezone, so the result does
/// not depend on where the caller runs.
#[derive(Debug, Clone)]
pub struct TradingCalendar {
    tz: Tz,
    open: NaiveTime,
    close: NaiveTime,
    holidays: BTreeSet<NaiveDate>,
}

impl Default for TradingCalendar {
    fn default() -> Self {
        Self::nyse()
    }
}

impl TradingCalendar {
    /// NYSE / NASDAQ regular session, 09:30-16:00 America/New_York
    pub fn nyse() -> Self {
        Self {
            tz: chrono_tz::America::New_York,
            open: NaiveTime::from_hms_opt(9, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(16, 0, 0).unwrap_or_default(),
            holidays: nyse_holidays().into_iter().collect(),
        }
    }

    /// Add extra closure dates on top of the built-in list
    pub fn with_holidays(mut self, days: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.holidays.extend(days);
        self
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    /// Calendar date at the exchange for the given instant
    pub fn local_date(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.tz).date_naive()
    }

    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) && !self.holidays.contains(&date)
    }

    pub fn is_open(&self, at: DateTime<Utc>) -> bool {
        let local = at.with_timezone(&self.tz);
        if !self.is_trading_day(local.date_naive()) {
            return false;
        }
        let time = local.time();
        time >= self.open && time < self.close
    }

    /// Opening bell of `date`, whether or not it is a trading day
    pub fn session_open(&self, date: NaiveDate) -> DateTime<Utc> {
        self.localize(date, self.open)
    }

    /// Closing bell of `date`, whether or not it is a trading day
    pub fn session_close(&self, date: NaiveDate) -> DateTime<Utc> {
        self.localize(date, self.close)
    }

    /// Most recent session close at or before `at`.
    pub fn last_close(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let local = at.with_timezone(&self.tz);
        let today = local.date_naive();

        if self.is_trading_day(today) && local.time() >= self.close {
            return self.session_close(today);
        }

        let mut day = today;
        for _ in 0..MAX_WALK_DAYS {
            day = match day.pred_opt() {
                Some(d) => d,
                None => break,
            };
            if self.is_trading_day(day) {
                return self.session_close(day);
            }
        }

        at - Duration::weeks(1)
    }

    /// Next session open strictly after `at` (or later today if before the bell).
    pub fn next_open(&self, at: DateTime<Utc>) -> DateTime<Utc> {
        let local = at.with_timezone(&self.tz);
        let today = local.date_naive();

        if self.is_trading_day(today) && local.time() < self.open {
            return self.session_open(today);
        }

        let mut day = today;
        for _ in 0..MAX_WALK_DAYS {
            day = match day.succ_opt() {
                Some(d) => d,
                None => break,
            };
            if self.is_trading_day(day) {
                return self.session_open(day);
            }
        }

        at + Duration::weeks(1)
    }

    fn localize(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = date.and_time(time);
        match self.tz.from_local_datetime(&naive).earliest() {
            Some(local) => local.with_timezone(&Utc),
            // Session bells never fall inside a DST gap; treat the wall clock as UTC if one ever does.
            None => Utc.from_utc_datetime(&naive),
        }
    }
}
