//! Request identifier allocation.
//!
//! Every outbound message that expects an `ack` carries a `req_id`.  The
//! device copies it verbatim into its acknowledgment, so the only hard
//! requirement is uniqueness among the requests still waiting on one link.
//! Identifiers are built from the device id and a per-link counter
//! (`"w1-0"`, `"w1-1"`, ...) which keeps them readable in logs.

use std::sync::atomic::{AtomicU64, Ordering};

/// A thread-safe, monotonically increasing counter.
///
/// Wraps around at `u64::MAX` back to 0 without panicking.
///
/// # Examples
///
/// ```rust
/// use lasertag_core::protocol::SequenceCounter;
///
/// let counter = SequenceCounter::new();
/// assert_eq!(counter.next(), 0);
/// assert_eq!(counter.next(), 1);
/// ```
#[derive(Debug)]
pub struct SequenceCounter {
    inner: AtomicU64,
}

impl SequenceCounter {
    /// Creates a new counter starting at 0.
    pub fn new() -> Self {
        Self::starting_at(0)
    }

    /// Creates a counter whose first value is `start`.
    pub fn starting_at(start: u64) -> Self {
        Self {
            inner: AtomicU64::new(start),
        }
    }

    /// Returns the next value and increments the counter.
    pub fn next(&self) -> u64 {
        self.inner.fetch_add(1, Ordering::Relaxed)
    }

    /// Returns the value the next call to [`next`](Self::next) will produce.
    pub fn peek(&self) -> u64 {
        self.inner.load(Ordering::Relaxed)
    }
}

impl Default for SequenceCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Hands out request identifiers scoped to one device.
#[derive(Debug)]
pub struct RequestIds {
    prefix: String,
    counter: SequenceCounter,
}

impl RequestIds {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: SequenceCounter::new(),
        }
    }

    /// Returns a fresh identifier such as `"w1-42"`.
    pub fn next_id(&self) -> String {
        format!("{}-{}", self.prefix, self.counter.next())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_counter_starts_at_zero() {
        let counter = SequenceCounter::new();
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_peek_does_not_increment() {
        let counter = SequenceCounter::new();
        counter.next();
        assert_eq!(counter.peek(), 1);
        assert_eq!(counter.peek(), 1);
    }

    #[test]
    fn test_counter_wraps_at_max() {
        let counter = SequenceCounter::starting_at(u64::MAX);
        assert_eq!(counter.next(), u64::MAX);
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn test_concurrent_next_produces_unique_values() {
        // Arrange
        let counter = Arc::new(SequenceCounter::new());
        let mut handles = Vec::new();

        // Act: 4 threads x 250 calls each
        for _ in 0..4 {
            let c = Arc::clone(&counter);
            handles.push(thread::spawn(move || (0..250).map(|_| c.next()).collect::<Vec<_>>()));
        }
        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort_unstable();
        all.dedup();

        // Assert
        assert_eq!(all.len(), 1000);
    }

    #[test]
    fn test_request_ids_are_prefixed_and_distinct() {
        let ids = RequestIds::new("w1");
        assert_eq!(ids.next_id(), "w1-0");
        assert_eq!(ids.next_id(), "w1-1");
    }
}
