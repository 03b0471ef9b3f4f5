//! # Campus Queue Testing
//!
//! Testing utilities for the campus queue engine.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - [`ReducerTest`], a Given-When-Then harness for reducers
//! - [`InMemoryDocumentStore`], a transactional document store kept in memory
//!
//! ## Example
//!
//! ```ignore
//! use campus_queue_testing::{test_clock, InMemoryDocumentStore};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn first_join_gets_position_one() {
//!     let store = Arc::new(InMemoryDocumentStore::new());
//!     let service = QueueService::new(store, Arc::new(test_clock()), Config::default());
//!
//!     let receipt = service.join_queue(request).await.unwrap();
//!     assert_eq!(receipt.queue_number.as_str(), "PAY-001");
//! }
//! ```

use chrono::{DateTime, Utc};
use campus_queue_core::environment::Clock;

mod document_mocks;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use chrono::Duration;
    use std::sync::{Arc, RwLock};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use campus_queue_testing::mocks::FixedClock;
    /// use campus_queue_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when a test moves it.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the service under test.
    ///
    /// ```
    /// use campus_queue_testing::mocks::ManualClock;
    /// use campus_queue_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::starting_at_test_epoch();
    /// let handle = clock.clone();
    /// let before = clock.now();
    /// handle.advance(Duration::minutes(4));
    /// assert_eq!(clock.now() - before, Duration::minutes(4));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<RwLock<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock at the given time
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(RwLock::new(time)),
            }
        }

        /// Create a clock at 2025-01-01 00:00:00 UTC
        #[must_use]
        pub fn starting_at_test_epoch() -> Self {
            Self::new(test_epoch())
        }

        /// Jump to a specific time
        pub fn set(&self, time: DateTime<Utc>) {
            if let Ok(mut guard) = self.time.write() {
                *guard = time;
            }
        }

        /// Move the clock forward
        pub fn advance(&self, by: Duration) {
            if let Ok(mut guard) = self.time.write() {
                *guard += by;
            }
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
                .read()
                .map_or_else(|poisoned| *poisoned.into_inner(), |guard| *guard)
        }
    }

    fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or_default()
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }
}

// Re-export commonly used items
pub use document_mocks::InMemoryDocumentStore;
pub use mocks::{test_clock, FixedClock, ManualClock};
pub use reducer_test::{assertions, ReducerTest};
