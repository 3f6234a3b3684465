//! Calendar date/time conversions using O(1) algorithms
//!
//! Implements Howard Hinnant's civil_from_days and days_from_civil algorithms.
//! Reference: http://howardhinnant.github.io/date_algorithms.html
//!
//! Timestamps count seconds since 2000-01-01 00:00:00 UTC, matching the
//! RTC calendar range (years 2000-2099) and the `Seconds` time domain.

use crate::time::EPOCH_YEAR;

const SECONDS_PER_DAY: u32 = 86_400;

/// Days from 0000-03-01 to 1970-01-01
const DAYS_0000_TO_1970: i32 = 719_468;

/// Days from 1970-01-01 to 2000-01-01
const DAYS_1970_TO_2000: i32 = 10_957;

/// Broken-down UTC calendar time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CivilDateTime {
    pub year: u16,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl CivilDateTime {
    /// The epoch itself
    pub const EPOCH: Self = Self {
        year: EPOCH_YEAR,
        month: 1,
        day: 1,
        hour: 0,
        minute: 0,
        second: 0,
    };

    /// Seconds since the epoch; dates before 2000 clamp to 0
    pub fn to_epoch_secs(&self) -> u32 {
        let days = days_from_civil(self.year, self.month, self.day) - DAYS_1970_TO_2000;
        if days < 0 {
            return 0;
        }
        (days as u32) * SECONDS_PER_DAY
            + (self.hour as u32) * 3600
            + (self.minute as u32) * 60
            + (self.second as u32)
    }

    /// Calendar time for a count of seconds since the epoch
    pub fn from_epoch_secs(secs: u32) -> Self {
        let days = (secs / SECONDS_PER_DAY) as i32 + DAYS_1970_TO_2000;
        let secs_today = secs % SECONDS_PER_DAY;
        let (year, month, day) = civil_from_days(days);
        Self {
            year,
            month,
            day,
            hour: (secs_today / 3600) as u8,
            minute: ((secs_today % 3600) / 60) as u8,
            second: (secs_today % 60) as u8,
        }
    }
}

/// Check if year is a leap year (Gregorian calendar)
pub fn is_leap_year(year: u16) -> bool {
    (year % 4 == 0 && year % 100 != 0) || year % 400 == 0
}

/// Convert days since 1970-01-01 to civil date (year, month, day)
fn civil_from_days(days_since_1970: i32) -> (u16, u8, u8) {
    // Shift epoch to 0000-03-01 so the leap day lands at the end of the year
    let z = days_since_1970 + DAYS_0000_TO_1970;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u32; // [0, 146096]
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365; // [0, 399]
    let y = (yoe as i32) + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100); // [0, 365]
    let mp = (5 * doy + 2) / 153; // [0, 11], 0 = March
    let d = (doy - (153 * mp + 2) / 5 + 1) as u8;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u8;
    let year = if m <= 2 { y + 1 } else { y };
    (year as u16, m, d)
}

/// Convert civil date (year, month, day) to days since 1970-01-01
fn days_from_civil(year: u16, month: u8, day: u8) -> i32 {
    let (y, m) = if month <= 2 {
        (year as i32 - 1, month as u32 + 9)
    } else {
        (year as i32, month as u32 - 3)
    };
    let era = if y >= 0 { y } else { y - 399 } / 400;
    let yoe = (y - era * 400) as u32; // [0, 399]
    let doy = (153 * m + 2) / 5 + (day as u32) - 1; // [0, 365]
    let doe = yoe * 365 + yoe / 4 - yoe / 100 + doy; // [0, 146096]
    era * 146_097 + (doe as i32) - DAYS_0000_TO_1970
}
