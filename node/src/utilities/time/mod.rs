use chrono::Utc;

pub(crate) struct QuorateTime;

impl QuorateTime {
    pub(crate) fn now_millis() -> i64 {
        Utc::now().timestamp_millis()
    }

    pub(crate) fn now_secs() -> i64 {
        Utc::now().timestamp()
    }
}
