//! # Request Pipeline
//!
//! The endpoint service runs an endpoint's backends one after another; the backend service
//! performs a single upstream call with its request and response modifiers. Both work on
//! immutable [`Request`](crate::core::types::Request) and
//! [`Response`](crate::core::types::Response) snapshots and hand the next snapshot on.

pub mod backend;
pub mod endpoint;

pub use backend::{Backend, BackendService, ResponsePolicy};
pub use endpoint::{Endpoint, EndpointService};

use std::time::Duration;

use tokio::time::Instant;

use crate::core::error::GatewayError;

/// Stand-in for budgets too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `now + budget`, saturating at [`FAR_FUTURE`]
fn instant_after(budget: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(budget.min(FAR_FUTURE))
        .unwrap_or(now)
}

/// Point in time by which a whole request must be answered
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    at: Instant,
    budget: Duration,
}

impl Deadline {
    pub fn after(budget: Duration) -> Self {
        Self {
            at: instant_after(budget),
            budget,
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.at
    }

    /// Deadline of one call: the request deadline, tightened by an optional per-call limit
    pub fn bound(&self, limit: Option<Duration>) -> Instant {
        match limit {
            Some(limit) => self.at.min(instant_after(limit)),
            None => self.at,
        }
    }

    /// Error reported when the deadline passes
    pub fn error(&self) -> GatewayError {
        GatewayError::timeout(self.budget)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deadline_bound_takes_the_earlier_instant() {
        let deadline = Deadline::after(Duration::from_secs(10));

        assert_eq!(deadline.bound(None), deadline.at());
        assert!(deadline.bound(Some(Duration::from_secs(1))) < deadline.at());
        assert_eq!(deadline.bound(Some(Duration::from_secs(60))), deadline.at());
        assert!(!deadline.expired());
    }

    #[tokio::test]
    async fn test_expired_deadline_reports_timeout() {
        let deadline = Deadline::after(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert!(deadline.expired());
        assert_eq!(
            deadline.error().status_code(),
            axum::http::StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_huge_budgets_saturate() {
        let deadline = Deadline::after(Duration::MAX);

        assert!(!deadline.expired());
        assert!(deadline.at() > Instant::now() + Duration::from_secs(86400 * 365));
        assert_eq!(deadline.bound(Some(Duration::MAX)), deadline.at());
        assert!(deadline.bound(Some(Duration::from_secs(1))) < deadline.at());
    }
}
