use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

pub const DEFAULT_ABUSE_THRESHOLD: u32 = 10;
pub const DEFAULT_ABUSE_WINDOW: Duration = Duration::from_secs(60);

/// Number of recent error messages kept per context.
pub const MAX_RECENT_ERRORS: usize = 10;

/// Consecutive failures for one context id.
#[derive(Debug, Clone)]
pub struct AbuseEntry {
    pub count: u32,
    pub first_failure: Instant,
    pub last_failure: Instant,
    pub recent_errors: VecDeque<String>,
    /// Set once this streak has been reported.
    pub alerted: bool,
}

impl AbuseEntry {
    fn new(now: Instant) -> Self {
        Self {
            count: 0,
            first_failure: now,
            last_failure: now,
            recent_errors: VecDeque::with_capacity(MAX_RECENT_ERRORS),
            alerted: false,
        }
    }
}

/// Detection only: crossing the threshold is reported, nothing is blocked.
#[derive(Debug)]
pub struct AbuseTracker {
    threshold: u32,
    window: Duration,
    entries: HashMap<String, AbuseEntry>,
}

impl AbuseTracker {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold: threshold.max(1),
            window,
            entries: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Count one failure. Returns a snapshot of the entry when this failure
    /// first puts the context at the threshold inside the window. Later
    /// failures in the same window are counted but not reported again.
    pub fn record_failure(
        &mut self,
        context_id: &str,
        error: &str,
        now: Instant,
    ) -> Option<AbuseEntry> {
        let window = self.window;
        let entry = self
            .entries
            .entry(context_id.to_string())
            .or_insert_with(|| AbuseEntry::new(now));

        // A stale streak starts over at this failure.
        if now.saturating_duration_since(entry.first_failure) > window {
            *entry = AbuseEntry::new(now);
        }

        entry.count += 1;
        entry.last_failure = now;
        if entry.recent_errors.len() == MAX_RECENT_ERRORS {
            entry.recent_errors.pop_front();
        }
        entry.recent_errors.push_back(error.to_string());

        if entry.alerted || entry.count < self.threshold {
            return None;
        }
        entry.alerted = true;
        Some(entry.clone())
    }

    /// A success clears the context's streak entirely.
    pub fn record_success(&mut self, context_id: &str) {
        self.entries.remove(context_id);
    }

    pub fn get(&self, context_id: &str) -> Option<&AbuseEntry> {
        self.entries.get(context_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
