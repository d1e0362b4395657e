use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

static COUNTER: AtomicU64 = AtomicU64::new(0);

// Wall-clock millis alone collide when two ids are minted in the same tick.
fn next(prefix: &str) -> String {
    let seq = COUNTER.fetch_add(1, Ordering::Relaxed) + 1;
    format!("{}_{}_{}", prefix, Utc::now().timestamp_millis(), seq)
}

pub fn new_message_id() -> String {
    next("msg")
}

pub fn new_session_id() -> String {
    next("session")
}

pub fn new_response_id(prefix: &str) -> String {
    next(prefix)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_ids_unique_within_same_millisecond() {
        let ids: HashSet<String> = (0..1000).map(|_| new_message_id()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn test_id_prefixes() {
        assert!(new_message_id().starts_with("msg_"));
        assert!(new_session_id().starts_with("session_"));
        assert!(new_response_id("fallback").starts_with("fallback_"));
    }
}
