use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_DEDUP_WINDOW: Duration = Duration::from_millis(300);

/// Drops a message identical to the previous one when it arrives within `window`.
#[derive(Debug)]
pub struct DedupFilter {
    window: Duration,
    last: Mutex<Option<(Instant, String)>>,
}

impl Default for DedupFilter {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_WINDOW)
    }
}

impl DedupFilter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    pub fn admit(&self, text: &str) -> bool {
        self.admit_at(text, Instant::now())
    }

    /// Returns false for a duplicate; otherwise remembers `text` and returns true.
    pub fn admit_at(&self, text: &str, now: Instant) -> bool {
        let mut last = self.last.lock();
        if let Some((seen_at, seen_text)) = last.as_ref() {
            let elapsed = now.saturating_duration_since(*seen_at);
            if seen_text == text && elapsed < self.window {
                tracing::debug!(
                    "Filter out double message [first was for {}ms]: {}",
                    elapsed.as_millis(),
                    text
                );
                return false;
            }
        }
        *last = Some((now, text.to_string()));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_message_always_passes() {
        let filter = DedupFilter::default();
        assert!(filter.admit("{\"preset\":\"a\"}"));
    }

    #[test]
    fn duplicate_inside_window_is_dropped() {
        let filter = DedupFilter::default();
        let t0 = Instant::now();
        assert!(filter.admit_at("a", t0));
        assert!(!filter.admit_at("a", t0 + Duration::from_millis(299)));
    }

    #[test]
    fn duplicate_after_window_passes() {
        let filter = DedupFilter::default();
        let t0 = Instant::now();
        assert!(filter.admit_at("a", t0));
        assert!(filter.admit_at("a", t0 + Duration::from_millis(300)));
    }

    #[test]
    fn different_message_passes_and_replaces_record() {
        let filter = DedupFilter::default();
        let t0 = Instant::now();
        assert!(filter.admit_at("a", t0));
        assert!(filter.admit_at("b", t0 + Duration::from_millis(10)));
        assert!(filter.admit_at("a", t0 + Duration::from_millis(20)));
    }

    #[test]
    fn dropped_duplicate_does_not_extend_window() {
        let filter = DedupFilter::default();
        let t0 = Instant::now();
        assert!(filter.admit_at("a", t0));
        assert!(!filter.admit_at("a", t0 + Duration::from_millis(200)));
        assert!(filter.admit_at("a", t0 + Duration::from_millis(350)));
    }
}
