//! Time abstraction for testable expiry behavior.
//!
//! This module provides a mockable `Instant` type that can be controlled in
//! tests to verify session-expiry behavior without waiting for real time to
//! pass.
//!
//! In production, this uses `std::time::Instant` directly.
//! In tests, this uses `mock_instant::thread_local::Instant` which can be
//! advanced via `MockClock`. The `thread_local` module is used because our
//! unit tests are single-threaded, and it provides per-thread time isolation.
//!
//! # Example (in tests)
//!
//! ```ignore
//! use crate::clock::{Instant, MockClock};
//! use std::time::Duration;
//!
//! // Reset clock to known state at start of test
//! MockClock::set_time(Duration::ZERO);
//!
//! // Create a session, then advance time past the expiry bound
//! MockClock::advance(Duration::from_secs(25 * 3600));
//!
//! // Now the sweep should remove the expired session
//! let removed = registry.sweep_expired(Instant::now(), max_age);
//! assert_eq!(removed.len(), 1);
//! ```

// In tests, use mock_instant for time control.
// The `thread_local` module provides per-thread time isolation,
// which is appropriate for single-threaded unit tests.
#[cfg(test)]
pub use mock_instant::thread_local::Instant;

// In production, use standard library Instant
#[cfg(not(test))]
pub use std::time::Instant;

// Re-export MockClock for tests
#[cfg(test)]
pub use mock_instant::thread_local::MockClock;
