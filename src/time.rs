use chrono::{DateTime, SecondsFormat, Utc};

pub(crate) fn format_utc(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn now_utc() -> String {
    format_utc(Utc::now())
}
