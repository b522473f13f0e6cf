//! Subject line for test sends.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;

/// `TEST #<n>: [<when>] <subject>`.
///
/// `when` is the schedule date in `tz` as `M-D hAM/PM`, or `ASAP` when the
/// schedule is missing or already in the past.
pub fn test_subject(
    subject: &str,
    test_number: u32,
    schedule: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    tz: Tz,
) -> String {
    let when = match schedule {
        Some(at) if at >= now => at.with_timezone(&tz).format("%-m-%-d %-I%p").to_string(),
        _ => "ASAP".to_string(),
    };
    format!("TEST #{test_number}: [{when}] {subject}")
}
