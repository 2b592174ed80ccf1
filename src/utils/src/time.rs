use chrono::format::StrftimeItems;
use chrono::NaiveDateTime;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// current timestamp
pub fn now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

/// current unix timestamp in seconds
pub fn unix_secs() -> i64 {
    now().as_secs() as i64
}

pub fn unix_secs_to_time(unix_secs: i64) -> Option<NaiveDateTime> {
    NaiveDateTime::from_timestamp_opt(unix_secs, 0)
}

pub fn time_format(dt: NaiveDateTime) -> String {
    let fmt = StrftimeItems::new("%Y-%m-%d %H:%M:%S");
    format!("{}", dt.format_with_items(fmt))
}
