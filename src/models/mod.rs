pub mod audit;
pub mod campaign;
pub mod campaign_send;
pub mod contact;
pub mod contact_list;
pub mod settings;
pub mod user;

use chrono::{NaiveDateTime, SubsecRound, Utc};

/// Storage format for every timestamp column. Lexically ordered, so string
/// comparisons in SQL agree with time order.
pub const TS_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current UTC time truncated to whole seconds.
pub fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc().trunc_subsecs(0)
}

pub fn fmt_ts(dt: &NaiveDateTime) -> String {
    dt.format(TS_FORMAT).to_string()
}

/// Parse a timestamp as accepted from API clients: `YYYY-MM-DD HH:MM:SS`,
/// `YYYY-MM-DDTHH:MM[:SS]`, or RFC 3339 with an offset (converted to UTC).
pub fn parse_ts(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc().trunc_subsecs(0));
    }
    for fmt in [TS_FORMAT, "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.trunc_subsecs(0));
        }
    }
    None
}
