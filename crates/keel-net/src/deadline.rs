use std::time::Duration;

use tokio::time::Instant;

/// Point in time a graceful shutdown must complete by.
///
/// Passed to [`Server::shutdown`](crate::Server::shutdown). An unbounded deadline never elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadline {
    at: Option<Instant>,
}

impl Deadline {
    /// A deadline that never elapses.
    pub fn unbounded() -> Self {
        Self { at: None }
    }

    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Some(Instant::now() + timeout),
        }
    }

    /// Bounded by `timeout` when set and non-zero, unbounded otherwise.
    pub fn from_timeout(timeout: Option<Duration>) -> Self {
        match timeout.filter(|t| !t.is_zero()) {
            Some(t) => Self::after(t),
            None => Self::unbounded(),
        }
    }

    #[inline]
    pub fn instant(&self) -> Option<Instant> {
        self.at
    }

    #[inline]
    pub fn is_bounded(&self) -> bool {
        self.at.is_some()
    }

    /// Time left before the deadline; `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.at.map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_elapsed(&self) -> bool {
        self.at.is_some_and(|at| Instant::now() >= at)
    }

    /// Completes when the deadline elapses; pends forever when unbounded.
    pub async fn elapsed(&self) {
        match self.at {
            Some(at) => tokio::time::sleep_until(at).await,
            None => std::future::pending().await,
        }
    }
}

impl Default for Deadline {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_or_missing_timeout_is_unbounded() {
        assert!(!Deadline::from_timeout(None).is_bounded());
        assert!(!Deadline::from_timeout(Some(Duration::ZERO)).is_bounded());
        assert!(Deadline::from_timeout(Some(Duration::from_secs(1))).is_bounded());
    }

    #[test]
    fn unbounded_never_elapses() {
        let d = Deadline::unbounded();
        assert!(!d.is_elapsed());
        assert_eq!(d.remaining(), None);
    }

    #[tokio::test]
    async fn bounded_deadline_elapses() {
        let d = Deadline::after(Duration::from_millis(10));
        assert!(d.remaining().is_some());
        tokio::time::timeout(Duration::from_secs(2), d.elapsed())
            .await
            .expect("deadline must elapse");
        assert!(d.is_elapsed());
    }
}
