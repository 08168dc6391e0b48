use chrono::{DateTime, Duration, Months, Utc};

use super::models::BillingInterval;

/// key: billing-clock -> calendar-correct next-cycle date math
///
/// Pure and total for `count >= 1`. Daily/weekly are fixed-length day
/// additions; monthly/yearly clamp the day-of-month at month ends and honor
/// leap years via chrono's month arithmetic.
pub fn next_billing_date(
    anchor: DateTime<Utc>,
    interval: BillingInterval,
    count: u32,
) -> DateTime<Utc> {
    match interval {
        BillingInterval::Daily => anchor + Duration::days(i64::from(count)),
        BillingInterval::Weekly => anchor + Duration::days(i64::from(count) * 7),
        BillingInterval::Monthly => anchor.checked_add_months(Months::new(count)).unwrap_or(anchor),
        BillingInterval::Yearly => anchor
            .checked_add_months(Months::new(count * 12))
            .unwrap_or(anchor),
    }
}
