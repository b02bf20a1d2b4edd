
use chrono::{DateTime, Utc};

/// Returns a fixed point in time offset by `secs`.
fn ts(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
}
