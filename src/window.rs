//! # Calculation Window
//!
//! Computes the sliding window of monthly calculation dates for one
//! aggregation run: the last day of each of the prior `intervals - 1` months,
//! oldest first, followed by the run date itself. Re-aggregating prior months
//! absorbs late-arriving form submissions.

use chrono::{Datelike, Months, NaiveDate};

/// Monthly anchor dates for a run as of `as_of`, ascending by recency.
///
/// `monthly_window(2020-03-15, 3)` is `[2020-01-31, 2020-02-29, 2020-03-15]`.
/// `intervals == 0` yields an empty window; callers reject it up front.
pub fn monthly_window(as_of: NaiveDate, intervals: u32) -> Vec<NaiveDate> {
    let mut window = Vec::with_capacity(intervals as usize);
    if intervals == 0 {
        return window;
    }

    let first_of_month = first_of_month(as_of);
    for interval in (1..intervals).rev() {
        // last day of the month `interval` months before the run month
        let anchor = first_of_month
            .checked_sub_months(Months::new(interval - 1))
            .and_then(|first_day_next_month| first_day_next_month.pred_opt());
        if let Some(anchor) = anchor {
            window.push(anchor);
        }
    }

    window.push(as_of);
    window
}

/// First day of the month containing `date`.
pub fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}
